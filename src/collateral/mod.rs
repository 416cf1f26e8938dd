//! Collateralization monitoring: courtesy-call event scanning with
//! incremental watermarking, per-deposit severity classification, alert
//! aggregation by operator, and the cycle orchestration on top.

pub(crate) mod cycle;
pub(crate) mod scanner;

use std::collections::HashMap;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use crate::error::TransportError;

pub use cycle::{CollateralCycle, CollateralReport};

/// Events older than this are no longer worth alerting on; the oldest
/// still-actionable age also bounds the pre-liquidation grace window
/// quoted in alert messages.
pub(crate) const MAX_ALERT_AGE_SECS: i64 = 6 * 60 * 60;

/// A decoded `CourtesyCalled` log, consumed within the cycle that
/// fetched it and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CourtesyEvent {
    pub(crate) deposit: Address,
    pub(crate) observed_at: DateTime<Utc>,
    pub(crate) block_number: Option<u64>,
}

/// One alert for one responsible operator of a flagged deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralAlert {
    pub operator: Address,
    pub deposit: Address,
    pub observed_at: DateTime<Utc>,
    pub severe: bool,
}

/// Output of one scan: alerts grouped by operator, plus the watermark to
/// persist if the cycle completes.
#[derive(Debug, Default)]
pub(crate) struct ScanResult {
    pub(crate) new_watermark: Option<String>,
    pub(crate) alerts: HashMap<Address, Vec<CollateralAlert>>,
}

pub(crate) fn format_block_ref(block_number: u64) -> String {
    format!("0x{block_number:x}")
}

pub(crate) fn parse_block_ref(block_ref: &str) -> Result<u64, TransportError> {
    block_ref
        .strip_prefix("0x")
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| TransportError::MalformedBlockRef(block_ref.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ref_round_trips() {
        assert_eq!(format_block_ref(200), "0xc8");
        assert_eq!(parse_block_ref("0xc8").unwrap(), 200);
    }

    #[test]
    fn malformed_block_ref_is_rejected()  {
        assert!(matches!(
            parse_block_ref("c8"),
            Err(TransportError::MalformedBlockRef(_))
        ));
        assert!(matches!(
            parse_block_ref("0xzz"),
            Err(TransportError::MalformedBlockRef(_))
        ));
    }
}
