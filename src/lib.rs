//! Alert engine for Keep-network tBTC operators: scans the chain for
//! courtesy-call collateralization warnings and polls unbonded ETH
//! balances, notifying subscribed Telegram chats.

use std::sync::Arc;

use alloy::providers::ProviderBuilder;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, info_span};

pub mod balance;
mod bindings;
pub mod collateral;
pub mod config;
pub mod error;
pub mod keep;
mod message;
pub mod scheduler;
pub mod store;
pub mod subscription;
pub mod telegram;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

use balance::BalanceCycle;
use collateral::CollateralCycle;
use config::Ctx;
use keep::KeepClient;
use telegram::TelegramClient;

pub async fn launch(ctx: Ctx) -> anyhow::Result<()> {
    let launch_span = info_span!("launch");
    let _enter = launch_span.enter();

    let pool = ctx.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;

    let provider = ProviderBuilder::new().connect_http(ctx.evm.rpc_url.clone());
    let keep = KeepClient::new(provider, ctx.evm.tbtc_system, ctx.evm.keep_bonding)
        .with_limits(ctx.scheduler.call_timeout, ctx.scheduler.rpc_fan_out);
    let messenger = Arc::new(TelegramClient::new(ctx.telegram.bot_token.clone(), None)?);

    let collateral_task = tokio::spawn(scheduler::run_collateral_loop(
        CollateralCycle::new(pool.clone(), keep.clone(), Arc::clone(&messenger)),
        ctx.scheduler.collateral_interval,
    ));
    let balance_task = tokio::spawn(scheduler::run_balance_loop(
        BalanceCycle::new(pool, keep, messenger),
        ctx.scheduler.balance_interval,
    ));

    await_shutdown(collateral_task, balance_task).await;

    info!("Shutdown complete");
    Ok(())
}

async fn await_shutdown(collateral_task: JoinHandle<()>, balance_task: JoinHandle<()>) {
    let collateral_abort = collateral_task.abort_handle();
    let balance_abort = balance_task.abort_handle();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, shutting down gracefully...");
            abort_task("collateral", &collateral_abort);
            abort_task("balance", &balance_abort);
        }
        result = collateral_task => {
            // The loops never return; reaching here means the task panicked
            // or was aborted.
            log_loop_exit("collateral", result);
            abort_task("balance", &balance_abort);
        }
        result = balance_task => {
            log_loop_exit("balance", result);
            abort_task("collateral", &collateral_abort);
        }
    }
}

fn abort_task(name: &str, handle: &AbortHandle) {
    info!("Aborting {name} task");
    handle.abort();
}

fn log_loop_exit(name: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => error!("{name} loop exited unexpectedly"),
        Err(e) => error!("{name} loop terminated: {e}"),
    }
}
