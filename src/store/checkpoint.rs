//! Append-only checkpoint rows recording the last chain position the
//! collateralization scanner confirmed fully processed. Only written by a
//! successful cycle, so a crash or transport failure simply re-scans the
//! same window on the next tick.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Opaque block reference, a hex block number as produced by the
    /// scanner ("0x1a2b3c").
    pub block_number: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) async fn latest(pool: &SqlitePool) -> Result<Option<Checkpoint>, sqlx::Error> {
    let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT block_number, created_at FROM collateral_checkpoints \
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(block_number, created_at)| Checkpoint {
        block_number,
        created_at,
    }))
}

pub(crate) async fn append(
    pool: &SqlitePool,
    block_number: &str,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO collateral_checkpoints (block_number, created_at) VALUES (?1, ?2)")
        .bind(block_number)
        .bind(created_at)
        .execute(pool)
        .await?;
    Ok(())
}
