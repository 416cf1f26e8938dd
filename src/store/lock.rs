//! Run locks preventing overlapping invocations of the same cycle type.
//! A slow cycle can outlive its own next scheduled tick; the later tick
//! must become a no-op instead of racing the earlier run on checkpoint
//! and monitor rows.

use sqlx::SqlitePool;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleKind {
    Collateral,
    Balance,
}

impl CycleKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Collateral => "collateral",
            Self::Balance => "balance",
        }
    }
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically acquires the run lock for the given cycle type.
/// Returns true if the lock was acquired, false if a run is in flight.
pub(crate) async fn try_acquire(pool: &SqlitePool, cycle: CycleKind) -> Result<bool, sqlx::Error> {
    const LOCK_TIMEOUT_MINUTES: i32 = 10;

    let mut sql_tx = pool.begin().await?;

    // Reclaim a stale lock left behind by a crashed run.
    let timeout_param = format!("-{LOCK_TIMEOUT_MINUTES} minutes");
    let cleanup = sqlx::query(
        "DELETE FROM cycle_locks WHERE cycle = ?1 AND locked_at < datetime('now', ?2)",
    )
    .bind(cycle.as_str())
    .bind(&timeout_param)
    .execute(sql_tx.as_mut())
    .await?;

    if cleanup.rows_affected() > 0 {
        info!(
            "Reclaimed stale {cycle} lock older than {} minutes",
            LOCK_TIMEOUT_MINUTES
        );
    }

    let result = sqlx::query("INSERT OR IGNORE INTO cycle_locks (cycle) VALUES (?1)")
        .bind(cycle.as_str())
        .execute(sql_tx.as_mut())
        .await?;

    sql_tx.commit().await?;

    let acquired = result.rows_affected() > 0;
    if !acquired {
        warn!("Skipping {cycle} cycle: previous run still in flight");
    }

    Ok(acquired)
}

pub(crate) async fn release(pool: &SqlitePool, cycle: CycleKind) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM cycle_locks WHERE cycle = ?1")
        .bind(cycle.as_str())
        .execute(pool)
        .await?;
    Ok(())
}
