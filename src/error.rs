//! Domain error types for the alert engine. Transport failures abort a
//! cycle without advancing the checkpoint; validation and consistency
//! errors are surfaced to the subscription interface.

use std::time::Duration;

use alloy::transports::{RpcError, TransportErrorKind};

use crate::telegram::TelegramError;

/// An external collaborator (RPC node, SQLite, Telegram) was unreachable,
/// timed out, or returned something we could not decode.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("RPC transport error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),
    #[error("Contract call error: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Telegram API error: {0}")]
    Telegram(#[from] TelegramError),
    #[error("External call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Malformed block reference in checkpoint: {0}")]
    MalformedBlockRef(String),
}

/// Malformed user input, surfaced to the subscription interface.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid operator address: {0}")]
    InvalidAddress(String),
    #[error("Threshold must be a positive integer, got {0}")]
    InvalidThreshold(u64),
}

/// An address-prefix deletion query matched zero or several monitors.
/// No mutation is performed in either case.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    #[error("No monitor matches query {0}")]
    NoMatch(String),
    #[error("{matches} monitors match query {query}, need exactly one")]
    Ambiguous { query: String, matches: usize },
}

/// Failure of a single monitoring cycle. The scheduler logs these and
/// retries on its next fixed-rate tick; nothing is retried inside a cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<sqlx::Error> for CycleError {
    fn from(err: sqlx::Error) -> Self {
        Self::Transport(TransportError::Database(err))
    }
}
