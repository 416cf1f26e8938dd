//! Subscription interface: add, list and delete alert monitors for a
//! chat. Callers hand in raw user input; addresses are validated and
//! canonicalized to EIP-55 checksummed form before they reach the store,
//! so every downstream comparison is exact.

use std::str::FromStr;

use alloy::primitives::Address;
use alloy::providers::Provider;
use sqlx::SqlitePool;
use tracing::info;

use crate::balance::wei_to_eth;
use crate::error::{ConsistencyError, TransportError, ValidationError};
use crate::keep::KeepClient;
use crate::message;
use crate::store::monitor::{self, DeleteMonitorError};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}

impl From<sqlx::Error> for SubscriptionError {
    fn from(err: sqlx::Error) -> Self {
        Self::Transport(TransportError::Database(err))
    }
}

impl From<DeleteMonitorError> for SubscriptionError {
    fn from(err: DeleteMonitorError) -> Self {
        match err {
            DeleteMonitorError::Database(e) => Self::Transport(TransportError::Database(e)),
            DeleteMonitorError::Consistency(e) => Self::Consistency(e),
        }
    }
}

/// Creates (or re-thresholds) a monitor and returns the confirmation
/// text, which includes the operator's current unbonded balance.
pub async fn add_monitor<P: Provider + Clone>(
    pool: &SqlitePool,
    keep: &KeepClient<P>,
    chat_id: i64,
    operator_input: &str,
    eth_threshold: u64,
) -> Result<String, SubscriptionError> {
    let operator = Address::from_str(operator_input.trim())
        .map_err(|_| ValidationError::InvalidAddress(operator_input.to_string()))?;
    let threshold = i64::try_from(eth_threshold)
        .ok()
        .filter(|threshold| *threshold > 0)
        .ok_or(ValidationError::InvalidThreshold(eth_threshold))?;

    let unbonded = keep.unbonded_value(operator).await?;

    let monitor = monitor::upsert(pool, chat_id, &operator.to_checksum(None), threshold).await?;
    info!(
        "Monitor {} set for chat {chat_id}: {} below {threshold} ETH",
        monitor.id, monitor.operator_address
    );

    Ok(message::monitor_added_text(&monitor, wei_to_eth(unbonded)))
}

/// Deletes the single monitor of `chat_id` whose operator address starts
/// with `prefix` and returns the confirmation text.
pub async fn delete_monitor(
    pool: &SqlitePool,
    chat_id: i64,
    prefix: &str,
) -> Result<String, SubscriptionError> {
    let deleted = monitor::delete_by_prefix(pool, chat_id, prefix.trim()).await?;
    info!(
        "Monitor {} deleted for chat {chat_id}: {}",
        deleted.id, deleted.operator_address
    );

    Ok(message::monitor_deleted_text(&deleted.operator_address))
}

/// Summary text of every monitor the chat has.
pub async fn monitor_list(pool: &SqlitePool, chat_id: i64) -> Result<String, SubscriptionError> {
    let monitors = monitor::for_chat(pool, chat_id).await?;
    Ok(message::monitors_summary(&monitors))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, Bytes, U256};
    use alloy::providers::mock::Asserter;
    use alloy::providers::ProviderBuilder;
    use alloy::sol_types::SolValue;
    use std::time::Duration;

    use super::*;
    use crate::test_utils::setup_test_db;

    const OPERATOR: &str = "0x8aD12FeD8eBD6571Fb14C8D5C43dB0AeA241C057";

    fn keep_client(asserter: &Asserter) -> KeepClient<impl Provider + Clone> {
        let provider = ProviderBuilder::new().connect_mocked_client(asserter.clone());
        KeepClient::new(
            provider,
            address!("0x14dC06F762E7f4a756825c1A1dA569b3180153cB"),
            address!("0x27321f84704a599aB740281E285cc4463d89A3D5"),
        )
        .with_limits(Duration::from_secs(5), 1)
    }

    fn push_eth(asserter: &Asserter, eth: u64) {
        let wei = U256::from(eth) * U256::from(10).pow(U256::from(18));
        asserter.push_success(&Bytes::from(wei.abi_encode()));
    }

    #[tokio::test]
    async fn add_monitor_canonicalizes_and_confirms() {
        let pool = setup_test_db().await;
        let asserter = Asserter::new();
        push_eth(&asserter, 12);

        let text = add_monitor(
            &pool,
            &keep_client(&asserter),
            42,
            &OPERATOR.to_lowercase(),
            5,
        )
        .await
        .unwrap();

        assert!(text.contains("lower than 5"));
        assert!(text.contains("*12* unbonded ETH"));

        // Stored in checksummed form despite lowercase input.
        let monitors = monitor::for_chat(&pool, 42).await.unwrap();
        assert_eq!(monitors[0].operator_address, OPERATOR);
    }

    #[tokio::test]
    async fn add_monitor_rejects_malformed_address() {
        let pool = setup_test_db().await;
        let asserter = Asserter::new();

        let err = add_monitor(&pool, &keep_client(&asserter), 42, "0xnope", 5)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::Validation(ValidationError::InvalidAddress(_))
        ));
        assert!(monitor::for_chat(&pool, 42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_monitor_rejects_zero_threshold() {
        let pool = setup_test_db().await;
        let asserter = Asserter::new();

        let err = add_monitor(&pool, &keep_client(&asserter), 42, OPERATOR, 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::Validation(ValidationError::InvalidThreshold(0))
        ));
    }

    #[tokio::test]
    async fn delete_monitor_confirms_with_link() {
        let pool = setup_test_db().await;
        monitor::upsert(&pool, 42, OPERATOR, 5).await.unwrap();

        let text = delete_monitor(&pool, 42, "0x8aD1").await.unwrap();
        assert!(text.contains("deleted"));
        assert!(monitor::for_chat(&pool, 42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn monitor_list_renders_thresholds() {
        let pool = setup_test_db().await;
        monitor::upsert(&pool, 42, OPERATOR, 5).await.unwrap();

        let text = monitor_list(&pool, 42).await.unwrap();
        assert!(text.starts_with("Your active monitors are:"));
        assert!(text.contains("*5* ETH"));

        let empty = monitor_list(&pool, 7).await.unwrap();
        assert_eq!(empty, "You don't have any monitors");
    }
}
