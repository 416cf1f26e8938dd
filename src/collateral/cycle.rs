//! One collateralization monitoring cycle: load checkpoint, scan,
//! resolve, aggregate, match subscriptions, dispatch, persist checkpoint.
//!
//! A transport failure before dispatch aborts the cycle with the
//! checkpoint untouched, so the same events are re-evaluated on the next
//! scheduled run (at-least-once redelivery; recipients may see
//! duplicates). Dispatch outcomes are collected per recipient: one
//! failed send never masks the other deliveries, and the checkpoint
//! still advances so a single broken chat cannot wedge the scanner.

use std::str::FromStr;
use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::Provider;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tracing::{info, warn};

use super::{parse_block_ref, scanner, CollateralAlert, ScanResult};
use crate::error::CycleError;
use crate::keep::KeepClient;
use crate::message;
use crate::store::lock::{self, CycleKind};
use crate::store::{checkpoint, monitor};
use crate::telegram::Messenger;

/// Outcome of one collateralization cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollateralReport {
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub new_watermark: Option<String>,
    /// True when the tick was a no-op because the previous run of this
    /// cycle type was still in flight.
    pub skipped: bool,
}

impl CollateralReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct CollateralCycle<P, M> {
    pool: SqlitePool,
    keep: KeepClient<P>,
    messenger: Arc<M>,
}

impl<P: Provider + Clone, M: Messenger> CollateralCycle<P, M> {
    pub(crate) fn new(pool: SqlitePool, keep: KeepClient<P>, messenger: Arc<M>) -> Self {
        Self {
            pool,
            keep,
            messenger,
        }
    }

    /// Runs one cycle, guarded by the per-cycle-type run lock.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn run(&self) -> Result<CollateralReport, CycleError> {
        if !lock::try_acquire(&self.pool, CycleKind::Collateral).await? {
            return Ok(CollateralReport::skipped());
        }

        let result = self.run_locked().await;

        if let Err(e) = lock::release(&self.pool, CycleKind::Collateral).await {
            warn!("Failed to release collateral cycle lock: {e}");
        }

        result
    }

    async fn run_locked(&self) -> Result<CollateralReport, CycleError> {
        let now = Utc::now();

        let stored = checkpoint::latest(&self.pool).await?;
        let from_block = match &stored {
            Some(cp) => BlockNumberOrTag::Number(parse_block_ref(&cp.block_number)?),
            None => BlockNumberOrTag::Earliest,
        };

        let scan = scanner::fetch_cycle(&self.keep, from_block, now).await?;
        let (sent, failed) = self.dispatch(&scan, now).await?;

        if let Some(watermark) = &scan.new_watermark {
            // The scan window starts at the stored watermark inclusively,
            // so a quiet chain recomputes the same watermark every tick.
            // Appending only on change keeps the history one row per
            // actual advance.
            let unchanged = stored
                .as_ref()
                .is_some_and(|cp| cp.block_number == *watermark);
            if !unchanged {
                checkpoint::append(&self.pool, watermark, now).await?;
                info!("Advanced collateralization checkpoint to {watermark}");
            }
        }

        Ok(CollateralReport {
            notifications_sent: sent,
            notifications_failed: failed,
            new_watermark: scan.new_watermark,
            skipped: false,
        })
    }

    /// Matches aggregated alerts against monitor subscriptions and sends
    /// one message per (monitor, alert) pair, collecting outcomes
    /// independently.
    async fn dispatch(
        &self,
        scan: &ScanResult,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), CycleError> {
        let operator_keys: Vec<String> = scan
            .alerts
            .keys()
            .map(|operator| operator.to_checksum(None))
            .collect();
        let monitors = monitor::for_operators(&self.pool, &operator_keys).await?;

        let mut jobs = Vec::new();
        for subscription in &monitors {
            let Ok(operator) = Address::from_str(&subscription.operator_address) else {
                warn!(
                    "Skipping monitor {} with unparseable operator address",
                    subscription.id
                );
                continue;
            };
            let Some(alerts) = scan.alerts.get(&operator) else {
                continue;
            };

            for alert in alerts {
                jobs.push((subscription.chat_id, render(alert, now)));
            }
        }

        let docs_link = message::docs_link();
        let outcomes: Vec<bool> = stream::iter(jobs.into_iter().map(|(chat_id, text)| {
            let docs_link = &docs_link;
            async move {
                match self
                    .messenger
                    .send_message(chat_id, &text, Some(docs_link))
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to deliver collateralization alert to chat {chat_id}: {e}");
                        false
                    }
                }
            }
        }))
        .buffer_unordered(self.keep.fan_out())
        .collect()
        .await;

        let sent = outcomes.iter().filter(|delivered| **delivered).count();
        Ok((sent, outcomes.len() - sent))
    }
}

fn render(alert: &CollateralAlert, now: DateTime<Utc>) -> String {
    if alert.severe {
        message::severely_undercollateralized_text(alert)
    } else {
        message::undercollateralized_text(alert, now)
    }
}
