//! Courtesy-call scanning: fetches warning events from the watermark to
//! the chain head, windows them by age, resolves deposit severity and
//! responsible operators, and folds the result into a per-operator map.

use std::collections::HashMap;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::Log;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use itertools::Itertools;
use tracing::{debug, warn};

use super::{CollateralAlert, CourtesyEvent, ScanResult, format_block_ref, MAX_ALERT_AGE_SECS};
use crate::bindings::ITBTCSystem::CourtesyCalled;
use crate::error::TransportError;
use crate::keep::KeepClient;

/// Runs one full scan from `from_block`: events, windowing, severity
/// classification, operator resolution, aggregation. A transport failure
/// anywhere aborts with no partial result.
pub(crate) async fn fetch_cycle<P: Provider + Clone>(
    keep: &KeepClient<P>,
    from_block: BlockNumberOrTag,
    now: DateTime<Utc>,
) -> Result<ScanResult, TransportError> {
    let logs = keep.courtesy_called_logs(from_block).await?;
    let events = decode_events(logs);
    let (actionable, new_watermark) = window_events(events, now);

    debug!(
        actionable = actionable.len(),
        watermark = ?new_watermark,
        "Windowed courtesy-call events"
    );

    let states = keep
        .deposit_states(actionable.iter().map(|event| event.deposit).collect())
        .await?;

    let observed_at: HashMap<Address, DateTime<Utc>> = actionable
        .iter()
        .map(|event| (event.deposit, event.observed_at))
        .collect();

    // Deposits that recovered to normal by the time we read their state
    // produce no alerts and no operator lookups.
    let flagged: Vec<_> = states
        .into_iter()
        .filter(|(_, state)| !state.is_normal())
        .collect();

    let alert_batches: Vec<Vec<CollateralAlert>> =
        stream::iter(flagged.into_iter().map(|(deposit, state)| {
            let observed_at = observed_at.get(&deposit).copied().unwrap_or(now);
            async move {
                let operators = keep.operators_for_deposit(deposit).await?;
                Ok::<_, TransportError>(
                    operators
                        .into_iter()
                        .map(|operator| CollateralAlert {
                            operator,
                            deposit,
                            observed_at,
                            severe: state.is_severe(),
                        })
                        .collect(),
                )
            }
        }))
        .buffer_unordered(keep.fan_out())
        .try_collect()
        .await?;

    Ok(ScanResult {
        new_watermark,
        alerts: aggregate(alert_batches.into_iter().flatten()),
    })
}

/// Decodes raw logs into courtesy events, dropping anything that does
/// not decode cleanly.
fn decode_events(logs: Vec<Log>) -> Vec<CourtesyEvent> {
    logs.into_iter()
        .filter_map(|log| {
            let event = log.log_decode::<CourtesyCalled>().ok()?;
            let seconds = i64::try_from(event.data()._timestamp).ok()?;
            let Some(observed_at) = DateTime::from_timestamp(seconds, 0) else {
                warn!("Dropping CourtesyCalled log with unrepresentable timestamp {seconds}");
                return None;
            };

            Some(CourtesyEvent {
                deposit: event.data()._depositContractAddress,
                observed_at,
                block_number: log.block_number,
            })
        })
        .collect()
}

/// Splits events into the actionable set and the new watermark.
///
/// Events are ordered most recent first. An event is actionable while it
/// is younger than the alert window; the watermark is the block of the
/// most recent event that has already aged out, so the next scan starts
/// past everything this cycle either alerted on or wrote off. Actionable
/// events are deduplicated per deposit keeping the most recent timestamp.
fn window_events(
    events: Vec<CourtesyEvent>,
    now: DateTime<Utc>,
) -> (Vec<CourtesyEvent>, Option<String>) {
    let max_age = TimeDelta::seconds(MAX_ALERT_AGE_SECS);
    let sorted: Vec<_> = events
        .into_iter()
        .sorted_by_key(|event| std::cmp::Reverse(event.observed_at))
        .collect();

    let new_watermark = sorted
        .iter()
        .find(|event| now - event.observed_at >= max_age)
        .and_then(|event| event.block_number)
        .map(format_block_ref);

    let actionable = sorted
        .into_iter()
        .filter(|event| now - event.observed_at < max_age)
        .unique_by(|event| event.deposit)
        .collect();

    (actionable, new_watermark)
}

/// Folds alerts into a map keyed by operator address, preserving
/// resolution order within each operator.
fn aggregate(alerts: impl IntoIterator<Item = CollateralAlert>) -> HashMap<Address, Vec<CollateralAlert>> {
    let mut grouped: HashMap<Address, Vec<CollateralAlert>> = HashMap::new();
    for alert in alerts {
        grouped.entry(alert.operator).or_default().push(alert);
    }
    grouped
}
