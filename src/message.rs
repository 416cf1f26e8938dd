//! Notification text rendering: etherscan links, the two
//! collateralization alert variants, low-balance alerts, and the
//! subscription confirmations.

use alloy::primitives::Address;
use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

use crate::collateral::{CollateralAlert, MAX_ALERT_AGE_SECS};
use crate::store::monitor::AlertMonitor;
use crate::telegram::InlineLink;

const ETHERSCAN_ADDRESS_BASE: &str = "https://etherscan.io/address";
const DOCS_URL: &str = "https://docs.keep.network/tbtc/index.html#pre-liquidation";

pub(crate) fn docs_link() -> InlineLink {
    InlineLink {
        text: "Go to docs",
        // Static literal, cannot fail to parse.
        url: Url::parse(DOCS_URL).expect("static docs URL is valid"),
    }
}

pub(crate) fn etherscan_link(address: &str) -> String {
    format!("[{}]({ETHERSCAN_ADDRESS_BASE}/{address})", shorten(address))
}

fn shorten(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

fn checksummed_link(address: &Address) -> String {
    etherscan_link(&address.to_checksum(None))
}

/// "1h 23m" style rendering of the time left until the pre-liquidation
/// auction can start, or `None` once the grace window has elapsed.
fn remaining_grace_time(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
    let deadline = observed_at + TimeDelta::seconds(MAX_ALERT_AGE_SECS);
    let remaining = deadline - now;
    if remaining <= TimeDelta::zero() {
        return None;
    }

    let minutes = remaining.num_minutes();
    Some(format!("{}h {}m", minutes / 60, minutes % 60))
}

pub(crate) fn undercollateralized_text(alert: &CollateralAlert, now: DateTime<Utc>) -> String {
    let countdown = remaining_grace_time(alert.observed_at, now)
        .map(|time| format!(" You have {time} until the auction starts"))
        .unwrap_or_default();

    format!(
        "⚠️ Your operator {} has undercollateralized deposit {}.{countdown}",
        checksummed_link(&alert.operator),
        checksummed_link(&alert.deposit),
    )
}

pub(crate) fn severely_undercollateralized_text(alert: &CollateralAlert) -> String {
    format!(
        "‼️ Your operator {} has severely undercollateralized deposit {}",
        checksummed_link(&alert.operator),
        checksummed_link(&alert.deposit),
    )
}

pub(crate) fn low_balance_text(operator_address: &str, unbonded_eth: f64) -> String {
    format!(
        "Operator {} is low on unbonded ETH(*{unbonded_eth}*)",
        etherscan_link(operator_address)
    )
}

pub(crate) fn monitor_added_text(monitor: &AlertMonitor, unbonded_eth: f64) -> String {
    format!(
        "I'll notify you when {} unbonded ETH will be lower than {}.\n\
         Currently you have *{unbonded_eth}* unbonded ETH.",
        etherscan_link(&monitor.operator_address),
        monitor.eth_threshold,
    )
}

pub(crate) fn monitor_deleted_text(operator_address: &str) -> String {
    format!("Alert for {} deleted", etherscan_link(operator_address))
}

pub(crate) fn monitors_summary(monitors: &[AlertMonitor]) -> String {
    if monitors.is_empty() {
        return "You don't have any monitors".to_string();
    }

    let lines = monitors
        .iter()
        .map(|monitor| {
            format!(
                "{} : *{}* ETH",
                etherscan_link(&monitor.operator_address),
                monitor.eth_threshold
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("Your active monitors are:\n\n{lines}")
}
