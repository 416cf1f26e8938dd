//! Fixed-rate loops driving the two monitoring cycles. A failed cycle is
//! logged and retried on the next tick; nothing is retried inside a tick.

use std::time::Duration;

use alloy::providers::Provider;
use tokio::time::interval;
use tracing::{error, info};

use crate::balance::BalanceCycle;
use crate::collateral::CollateralCycle;
use crate::telegram::Messenger;

pub async fn run_collateral_loop<P: Provider + Clone, M: Messenger>(
    cycle: CollateralCycle<P, M>,
    period: Duration,
) {
    info!("Starting collateralization loop with interval: {period:?}");
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;

        match cycle.run().await {
            Ok(report) if report.skipped => {}
            Ok(report) => info!(
                sent = report.notifications_sent,
                failed = report.notifications_failed,
                watermark = ?report.new_watermark,
                "Collateralization cycle complete"
            ),
            Err(e) => error!("Collateralization cycle failed: {e}"),
        }
    }
}

pub async fn run_balance_loop<P: Provider + Clone, M: Messenger>(
    cycle: BalanceCycle<P, M>,
    period: Duration,
) {
    info!("Starting balance loop with interval: {period:?}");
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;

        match cycle.run().await {
            Ok(report) if report.skipped => {}
            Ok(report) => info!(
                operators = report.operators_checked,
                sent = report.notifications_sent,
                failed = report.notifications_failed,
                "Balance cycle complete"
            ),
            Err(e) => error!("Balance cycle failed: {e}"),
        }
    }
}
