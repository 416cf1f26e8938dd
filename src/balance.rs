//! Unbonded-ETH balance monitoring: polls the bonding contract for every
//! operator with at least one subscription, compares the normalized value
//! against each monitor's threshold, and alerts with hysteresis so a
//! balance hovering at the same integer value fires once, not every tick.
//!
//! Sends happen before the hysteresis write. A crash between the two
//! re-sends the same alert on the next cycle; the duplicate is accepted
//! over the silent loss the reverse order would risk.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use futures_util::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::CycleError;
use crate::keep::KeepClient;
use crate::message;
use crate::store::lock::{self, CycleKind};
use crate::store::monitor;
use crate::telegram::Messenger;

const WEI_PER_ETH: f64 = 1e18;

/// Wei as fractional ETH rounded to two decimal places, for display.
pub(crate) fn wei_to_eth(wei: U256) -> f64 {
    let wei = wei.min(U256::from(u128::MAX)).to::<u128>() as f64;
    (wei / WEI_PER_ETH * 100.0).round() / 100.0
}

/// The integer ETH value thresholds and hysteresis compare against.
/// Rounding up means a threshold of N fires only once the balance is
/// strictly below N whole ETH.
pub(crate) fn wei_to_eth_ceil(wei: U256) -> i64 {
    let eth = wei.min(U256::from(u128::MAX)).to::<u128>() as f64 / WEI_PER_ETH;
    eth.ceil() as i64
}

/// Outcome of one balance cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BalanceReport {
    pub operators_checked: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub skipped: bool,
}

impl BalanceReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct BalanceCycle<P, M> {
    pool: SqlitePool,
    keep: KeepClient<P>,
    messenger: Arc<M>,
}

impl<P: Provider + Clone, M: Messenger> BalanceCycle<P, M> {
    pub(crate) fn new(pool: SqlitePool, keep: KeepClient<P>, messenger: Arc<M>) -> Self {
        Self {
            pool,
            keep,
            messenger,
        }
    }

    /// Runs one cycle, guarded by the per-cycle-type run lock.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn run(&self) -> Result<BalanceReport, CycleError> {
        if !lock::try_acquire(&self.pool, CycleKind::Balance).await? {
            return Ok(BalanceReport::skipped());
        }

        let result = self.run_locked().await;

        if let Err(e) = lock::release(&self.pool, CycleKind::Balance).await {
            warn!("Failed to release balance cycle lock: {e}");
        }

        result
    }

    async fn run_locked(&self) -> Result<BalanceReport, CycleError> {
        let stored = monitor::distinct_operator_addresses(&self.pool).await?;

        // Rows predate checksummed validation only if written by hand;
        // skip rather than poison the whole cycle.
        let operators: Vec<(String, Address)> = stored
            .into_iter()
            .filter_map(|address| match Address::from_str(&address) {
                Ok(parsed) => Some((address, parsed)),
                Err(_) => {
                    warn!("Skipping monitored operator with unparseable address {address}");
                    None
                }
            })
            .collect();

        let values = self
            .keep
            .unbonded_values(operators.iter().map(|(_, parsed)| *parsed).collect())
            .await?;

        // Collected eagerly to sidestep rustc's "implementation is not
        // general enough" limitation when the borrowed iterator crosses
        // a spawn boundary; the futures themselves stay lazy.
        let evaluations: Vec<_> = operators
            .iter()
            .map(|(address, parsed)| {
                let value = values.get(parsed).copied().unwrap_or(U256::ZERO);
                self.evaluate_operator(address, value)
            })
            .collect();

        let outcomes: Vec<(usize, usize)> = stream::iter(evaluations)
            .buffer_unordered(self.keep.fan_out())
            .collect()
            .await;

        let (sent, failed) = outcomes
            .into_iter()
            .fold((0, 0), |(s, f), (sent, failed)| (s + sent, f + failed));

        Ok(BalanceReport {
            operators_checked: operators.len(),
            notifications_sent: sent,
            notifications_failed: failed,
            skipped: false,
        })
    }

    /// Evaluates every monitor of one operator against its current
    /// unbonded value. Failures here are per-operator: they are logged
    /// and counted, never propagated, so one bad chat or row cannot
    /// starve the remaining operators.
    async fn evaluate_operator(&self, operator_address: &str, value: U256) -> (usize, usize) {
        let eth_value = wei_to_eth_ceil(value);

        if let Err(e) = monitor::reset_recovered(&self.pool, operator_address, eth_value).await {
            warn!("Failed to reset recovered monitors for {operator_address}: {e}");
        }

        let firing = match monitor::firing_monitors(&self.pool, operator_address, eth_value).await {
            Ok(firing) => firing,
            Err(e) => {
                warn!("Failed to load firing monitors for {operator_address}: {e}");
                return (0, 1);
            }
        };

        let text = message::low_balance_text(operator_address, wei_to_eth(value));

        let mut sent = 0;
        let mut failed = 0;
        for subscription in firing {
            match self
                .messenger
                .send_message(subscription.chat_id, &text, None)
                .await
            {
                Ok(()) => {
                    sent += 1;
                    // Recorded only after a successful send; a crash in
                    // between re-sends rather than losing the alert.
                    if let Err(e) =
                        monitor::record_reported(&self.pool, subscription.id, eth_value).await
                    {
                        warn!(
                            "Failed to record reported value for monitor {}: {e}",
                            subscription.id
                        );
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        "Failed to deliver low-balance alert to chat {}: {e}",
                        subscription.chat_id
                    );
                }
            }
        }

        (sent, failed)
    }
}
