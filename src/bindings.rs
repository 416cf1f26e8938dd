//! Solidity contract ABI bindings for the Keep network: the tBTC system
//! contract, deposit contracts, bonded ECDSA keeps, and the bonding pool.

use alloy::sol;

sol!(
    #[sol(rpc)]
    contract ITBTCSystem {
        event CourtesyCalled(address _depositContractAddress, uint256 _timestamp);
    }
);

sol!(
    #[sol(rpc)]
    contract IDeposit {
        function collateralizationPercentage() external view returns (uint256);
        function undercollateralizedThresholdPercent() external view returns (uint16);
        function severelyUndercollateralizedThresholdPercent() external view returns (uint16);
        function keepAddress() external view returns (address);
    }
);

sol!(
    #[sol(rpc)]
    contract IBondedECDSAKeep {
        function getMembers() external view returns (address[] memory);
    }
);

sol!(
    #[sol(rpc)]
    contract IKeepBonding {
        function unbondedValue(address operator) external view returns (uint256);
    }
);
