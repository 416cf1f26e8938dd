//! Keep-network chain client: courtesy-call log fetches, per-deposit
//! collateralization state reads, keep membership resolution, and
//! unbonded ETH balance reads.
//!
//! All fan-out across deposits or operators goes through a bounded
//! buffer sized to the RPC provider's rate limits, and every call
//! carries a finite timeout.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use futures_util::try_join;
use tracing::debug;

use crate::bindings::{IBondedECDSAKeep, IDeposit, IKeepBonding, ITBTCSystem};
use crate::error::TransportError;

pub(crate) const DEFAULT_RPC_FAN_OUT: usize = 8;
pub(crate) const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Collateralization state of a single deposit, derived from three
/// on-chain reads per cycle and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepositState {
    Normal,
    Undercollateralized,
    SeverelyUndercollateralized,
}

impl DepositState {
    pub(crate) fn classify(current: U256, under_threshold: u16, severe_threshold: u16) -> Self {
        if current < U256::from(severe_threshold) {
            Self::SeverelyUndercollateralized
        } else if current < U256::from(under_threshold) {
            Self::Undercollateralized
        } else {
            Self::Normal
        }
    }

    pub(crate) fn is_normal(self) -> bool {
        self == Self::Normal
    }

    pub(crate) fn is_severe(self) -> bool {
        self == Self::SeverelyUndercollateralized
    }
}

#[derive(Clone)]
pub struct KeepClient<P> {
    provider: P,
    tbtc_system: Address,
    keep_bonding: Address,
    call_timeout: Duration,
    fan_out: usize,
}

impl<P: Provider + Clone> KeepClient<P> {
    pub fn new(provider: P, tbtc_system: Address, keep_bonding: Address) -> Self {
        Self {
            provider,
            tbtc_system,
            keep_bonding,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            fan_out: DEFAULT_RPC_FAN_OUT,
        }
    }

    pub fn with_limits(mut self, call_timeout: Duration, fan_out: usize) -> Self {
        self.call_timeout = call_timeout;
        self.fan_out = fan_out.max(1);
        self
    }

    pub(crate) fn fan_out(&self) -> usize {
        self.fan_out
    }

    async fn with_timeout<T, F, E>(&self, fut: F) -> Result<T, TransportError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: Into<TransportError>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(TransportError::Timeout(self.call_timeout)),
        }
    }

    /// Raw `CourtesyCalled` logs of the tBTC system contract from
    /// `from_block` to the chain head.
    pub(crate) async fn courtesy_called_logs(
        &self,
        from_block: BlockNumberOrTag,
    ) -> Result<Vec<Log>, TransportError> {
        let filter = Filter::new()
            .address(self.tbtc_system)
            .from_block(from_block)
            .event_signature(ITBTCSystem::CourtesyCalled::SIGNATURE_HASH);

        let logs = self
            .with_timeout(self.provider.get_logs(&filter))
            .await?;
        debug!("Fetched {} CourtesyCalled logs", logs.len());
        Ok(logs)
    }

    /// Classifies one deposit from its current collateralization
    /// percentage and the two threshold percentages, read concurrently.
    pub(crate) async fn deposit_state(
        &self,
        deposit_address: Address,
    ) -> Result<DepositState, TransportError> {
        let deposit = IDeposit::new(deposit_address, self.provider.clone());

        let current_call = deposit.collateralizationPercentage();
        let under_call = deposit.undercollateralizedThresholdPercent();
        let severe_call = deposit.severelyUndercollateralizedThresholdPercent();
        let (current, under, severe) = try_join!(
            self.with_timeout(current_call.call()),
            self.with_timeout(under_call.call()),
            self.with_timeout(severe_call.call()),
        )?;

        Ok(DepositState::classify(current, under, severe))
    }

    /// Resolves the state of every deposit in the set. Fails the whole
    /// batch on the first deposit whose reads fail, leaving the cycle to
    /// retry the same window on the next tick.
    pub(crate) async fn deposit_states(
        &self,
        deposits: Vec<Address>,
    ) -> Result<Vec<(Address, DepositState)>, TransportError> {
        stream::iter(deposits.into_iter().map(|deposit| async move {
            let state = self.deposit_state(deposit).await?;
            Ok::<_, TransportError>((deposit, state))
        }))
        .buffer_unordered(self.fan_out)
        .try_collect()
        .await
    }

    /// Member operators of the bonded ECDSA keep backing a deposit.
    pub(crate) async fn operators_for_deposit(
        &self,
        deposit_address: Address,
    ) -> Result<Vec<Address>, TransportError> {
        let deposit = IDeposit::new(deposit_address, self.provider.clone());
        let keep_address = self.with_timeout(deposit.keepAddress().call()).await?;

        let keep = IBondedECDSAKeep::new(keep_address, self.provider.clone());
        self.with_timeout(keep.getMembers().call()).await
    }

    pub(crate) async fn unbonded_value(&self, operator: Address) -> Result<U256, TransportError> {
        let bonding = IKeepBonding::new(self.keep_bonding, self.provider.clone());
        self.with_timeout(bonding.unbondedValue(operator).call())
            .await
    }

    /// Current unbonded value per operator, fetched concurrently under
    /// the fan-out bound. Fails the whole batch on the first failed read.
    pub(crate) async fn unbonded_values(
        &self,
        operators: Vec<Address>,
    ) -> Result<HashMap<Address, U256>, TransportError> {
        stream::iter(operators.into_iter().map(|operator| async move {
            let value = self.unbonded_value(operator).await?;
            Ok::<_, TransportError>((operator, value))
        }))
        .buffer_unordered(self.fan_out)
        .try_collect()
        .await
    }
}
