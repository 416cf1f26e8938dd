//! Alert monitor subscriptions: one row per (chat, operator) pair with a
//! low-balance threshold and the hysteresis value of the last alert sent.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::ConsistencyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMonitor {
    pub id: i64,
    pub chat_id: i64,
    /// EIP-55 checksummed hex, validated on creation.
    pub operator_address: String,
    pub eth_threshold: i64,
    /// Last integer ETH value a low-balance alert was sent at. NULL while
    /// no unresolved alert is outstanding; cleared when the balance
    /// recovers above the threshold.
    pub last_reported_value: Option<i64>,
}

fn from_row(row: &SqliteRow) -> AlertMonitor {
    AlertMonitor {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        operator_address: row.get("operator_address"),
        eth_threshold: row.get("eth_threshold"),
        last_reported_value: row.get("last_reported_value"),
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, chat_id, operator_address, eth_threshold, last_reported_value FROM alert_monitors";

/// Creates a monitor, or updates the threshold of an existing one for the
/// same (chat, operator) pair. Updating resets the hysteresis value so the
/// next balance cycle re-evaluates the monitor from scratch.
pub(crate) async fn upsert(
    pool: &SqlitePool,
    chat_id: i64,
    operator_address: &str,
    eth_threshold: i64,
) -> Result<AlertMonitor, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO alert_monitors (chat_id, operator_address, eth_threshold) \
         VALUES (?1, ?2, ?3) \
         ON CONFLICT (chat_id, operator_address) \
         DO UPDATE SET eth_threshold = excluded.eth_threshold, last_reported_value = NULL \
         RETURNING id, chat_id, operator_address, eth_threshold, last_reported_value",
    )
    .bind(chat_id)
    .bind(operator_address)
    .bind(eth_threshold)
    .fetch_one(pool)
    .await?;

    Ok(from_row(&row))
}

pub(crate) async fn for_chat(
    pool: &SqlitePool,
    chat_id: i64,
) -> Result<Vec<AlertMonitor>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "{SELECT_COLUMNS} WHERE chat_id = ?1 ORDER BY id"
    ))
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(from_row).collect())
}

/// All monitors whose operator address is in the given set. Used by the
/// collateralization cycle to match aggregated alerts to subscribers.
pub(crate) async fn for_operators(
    pool: &SqlitePool,
    operator_addresses: &[String],
) -> Result<Vec<AlertMonitor>, sqlx::Error> {
    if operator_addresses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = (1..=operator_addresses.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql =
        format!("{SELECT_COLUMNS} WHERE operator_address IN ({placeholders}) ORDER BY id");
    let mut query = sqlx::query(&sql);
    for address in operator_addresses {
        query = query.bind(address);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(from_row).collect())
}

/// Distinct operator addresses across all monitors, the poll set of the
/// balance cycle.
pub(crate) async fn distinct_operator_addresses(
    pool: &SqlitePool,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT operator_address FROM alert_monitors ORDER BY operator_address",
    )
    .fetch_all(pool)
    .await
}

/// Clears the hysteresis value of every monitor for `operator_address`
/// whose threshold is strictly below the freshly observed integer value:
/// those monitors have recovered and may fire again on a later drop.
pub(crate) async fn reset_recovered(
    pool: &SqlitePool,
    operator_address: &str,
    eth_value: i64,
) -> Result<(), sqlx::Error> {
    let mut sql_tx = pool.begin().await?;
    sqlx::query(
        "UPDATE alert_monitors SET last_reported_value = NULL \
         WHERE operator_address = ?1 AND eth_threshold < ?2 AND last_reported_value IS NOT NULL",
    )
    .bind(operator_address)
    .bind(eth_value)
    .execute(sql_tx.as_mut())
    .await?;
    sql_tx.commit().await
}

/// Monitors for `operator_address` that should fire at the observed
/// integer value: threshold at or above the value, and not already
/// reported at exactly this value.
pub(crate) async fn firing_monitors(
    pool: &SqlitePool,
    operator_address: &str,
    eth_value: i64,
) -> Result<Vec<AlertMonitor>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "{SELECT_COLUMNS} \
         WHERE operator_address = ?1 AND eth_threshold >= ?2 \
         AND (last_reported_value IS NULL OR last_reported_value != ?2) \
         ORDER BY id"
    ))
    .bind(operator_address)
    .bind(eth_value)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(from_row).collect())
}

pub(crate) async fn record_reported(
    pool: &SqlitePool,
    monitor_id: i64,
    eth_value: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE alert_monitors SET last_reported_value = ?1 WHERE id = ?2")
        .bind(eth_value)
        .bind(monitor_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteMonitorError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}

/// Deletes the single monitor of `chat_id` whose operator address starts
/// with `prefix`. Zero or several matches leave the table untouched and
/// surface a [`ConsistencyError`].
pub(crate) async fn delete_by_prefix(
    pool: &SqlitePool,
    chat_id: i64,
    prefix: &str,
) -> Result<AlertMonitor, DeleteMonitorError> {
    let pattern = format!("{}%", prefix.replace('%', "").replace('_', ""));
    let rows = sqlx::query(&format!(
        "{SELECT_COLUMNS} WHERE chat_id = ?1 AND operator_address LIKE ?2"
    ))
    .bind(chat_id)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    let monitor = match rows.as_slice() {
        [] => return Err(ConsistencyError::NoMatch(prefix.to_string()).into()),
        [row] => from_row(row),
        many => {
            return Err(ConsistencyError::Ambiguous {
                query: prefix.to_string(),
                matches: many.len(),
            }
            .into());
        }
    };

    sqlx::query("DELETE FROM alert_monitors WHERE id = ?1")
        .bind(monitor.id)
        .execute(pool)
        .await?;

    Ok(monitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    const OPERATOR_A: &str = "0x8aD12FeD8eBD6571Fb14C8D5C43dB0AeA241C057";
    const OPERATOR_B: &str = "0x1234567890AbcdEF1234567890aBcdef12345678";

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let pool = setup_test_db().await;

        let created = upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();
        assert_eq!(created.eth_threshold, 5);
        assert_eq!(created.last_reported_value, None);

        record_reported(&pool, created.id, 3).await.unwrap();

        let updated = upsert(&pool, 1, OPERATOR_A, 7).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.eth_threshold, 7);
        // A threshold change discards the hysteresis state.
        assert_eq!(updated.last_reported_value, None);
    }

    #[tokio::test]
    async fn for_operators_filters_by_membership() {
        let pool = setup_test_db().await;
        upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();
        upsert(&pool, 2, OPERATOR_A, 9).await.unwrap();
        upsert(&pool, 1, OPERATOR_B, 2).await.unwrap();

        let matched = for_operators(&pool, &[OPERATOR_A.to_string()]).await.unwrap();
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|m| m.operator_address == OPERATOR_A));

        let none = for_operators(&pool, &[]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn distinct_addresses_deduplicates() {
        let pool = setup_test_db().await;
        upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();
        upsert(&pool, 2, OPERATOR_A, 9).await.unwrap();
        upsert(&pool, 1, OPERATOR_B, 2).await.unwrap();

        let addresses = distinct_operator_addresses(&pool).await.unwrap();
        assert_eq!(addresses.len(), 2);
    }

    #[tokio::test]
    async fn firing_and_reset_respect_hysteresis_filters() {
        let pool = setup_test_db().await;
        let monitor = upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();

        // Below threshold, never reported: fires.
        let firing = firing_monitors(&pool, OPERATOR_A, 3).await.unwrap();
        assert_eq!(firing.len(), 1);

        record_reported(&pool, monitor.id, 3).await.unwrap();

        // Same value again: suppressed.
        let firing = firing_monitors(&pool, OPERATOR_A, 3).await.unwrap();
        assert!(firing.is_empty());

        // Recovery above threshold clears the hysteresis value.
        reset_recovered(&pool, OPERATOR_A, 10).await.unwrap();
        let monitors = for_chat(&pool, 1).await.unwrap();
        assert_eq!(monitors[0].last_reported_value, None);
    }

    #[tokio::test]
    async fn reset_skips_monitors_at_or_above_value() {
        let pool = setup_test_db().await;
        let monitor = upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();
        record_reported(&pool, monitor.id, 4).await.unwrap();

        // Value 5 is not strictly above the threshold, so the monitor is
        // still in alert state and keeps its hysteresis value.
        reset_recovered(&pool, OPERATOR_A, 5).await.unwrap();
        let monitors = for_chat(&pool, 1).await.unwrap();
        assert_eq!(monitors[0].last_reported_value, Some(4));
    }

    #[tokio::test]
    async fn delete_by_prefix_requires_exactly_one_match() {
        let pool = setup_test_db().await;
        upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();
        upsert(&pool, 1, OPERATOR_B, 2).await.unwrap();

        let err = delete_by_prefix(&pool, 1, "0xdead").await.unwrap_err();
        assert!(matches!(
            err,
            DeleteMonitorError::Consistency(ConsistencyError::NoMatch(_))
        ));

        let err = delete_by_prefix(&pool, 1, "0x").await.unwrap_err();
        assert!(matches!(
            err,
            DeleteMonitorError::Consistency(ConsistencyError::Ambiguous { matches: 2, .. })
        ));

        // Failed attempts must not mutate anything.
        assert_eq!(for_chat(&pool, 1).await.unwrap().len(), 2);

        let deleted = delete_by_prefix(&pool, 1, "0x8aD1").await.unwrap();
        assert_eq!(deleted.operator_address, OPERATOR_A);
        assert_eq!(for_chat(&pool, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_by_prefix_is_scoped_to_chat() {
        let pool = setup_test_db().await;
        upsert(&pool, 1, OPERATOR_A, 5).await.unwrap();
        upsert(&pool, 2, OPERATOR_A, 5).await.unwrap();

        delete_by_prefix(&pool, 1, "0x8aD1").await.unwrap();

        assert!(for_chat(&pool, 1).await.unwrap().is_empty());
        assert_eq!(for_chat(&pool, 2).await.unwrap().len(), 1);
    }
}
