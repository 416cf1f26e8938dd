//! SQLite persistence: alert monitor subscriptions, the append-only
//! collateralization checkpoint, and per-cycle-type run locks.

pub(crate) mod checkpoint;
pub(crate) mod lock;
pub(crate) mod monitor;
