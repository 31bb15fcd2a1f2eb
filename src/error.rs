use thiserror::Error;
use crate::types::exchange::Exchange;

#[derive(Error, Debug)]
pub enum Error {
    // Source Errors
    #[error("Failed to connect to {exchange} at {address}: {reason}")]
    SourceConnection {
        exchange: Exchange,
        address: String,
        reason: String,
    },

    #[error("Tick decode failed: {0}")]
    Decode(String),

    #[error("Tick rejected: {0}")]
    Validation(#[from] ValidationError),

    // Persistence Errors
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("data not found, try again later")]
    NotFound,

    // Mode Errors
    #[error("server is already on test mode")]
    AlreadyOnTestMode,

    #[error("server is already on live mode")]
    AlreadyOnLiveMode,

    #[error("Exchange manager is already running")]
    AlreadyRunning,

    #[error("Timeout waiting for {component} to stop")]
    ShutdownTimeout { component: &'static str },

    // Request Errors
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid exchange: {0}")]
    InvalidExchange(String),

    #[error("invalid period format: {0}")]
    InvalidPeriod(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a tick fails the domain invariants inside the worker pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("price cannot be negative: {0}")]
    NegativePrice(f64),

    #[error("invalid timestamp (zero time)")]
    ZeroTimestamp,

    #[error("invalid exchange: {0}")]
    InvalidExchange(Exchange),

    #[error("invalid symbol")]
    InvalidSymbol,
}

impl ValidationError {
    /// Short label used as the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::NegativePrice(_) => "negative_price",
            ValidationError::ZeroTimestamp => "zero_timestamp",
            ValidationError::InvalidExchange(_) => "invalid_exchange",
            ValidationError::InvalidSymbol => "invalid_symbol",
        }
    }
}

/// Coarse classification surfaced to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotFound => ErrorCategory::NotFound,
            Error::InvalidSymbol(_)
            | Error::InvalidExchange(_)
            | Error::InvalidPeriod(_)
            | Error::Validation(_) => ErrorCategory::BadRequest,
            Error::AlreadyOnTestMode | Error::AlreadyOnLiveMode | Error::AlreadyRunning => {
                ErrorCategory::Conflict
            }
            _ => ErrorCategory::Internal,
        }
    }
}
