//! Error taxonomy
//!
//! Expected order outcomes (rejections, cancels, timeouts) are NOT errors;
//! they are modeled as `broker::OrderOutcome` values and handled inline.
//! `BotError` is reserved for genuinely exceptional conditions: faults that
//! require a retry path, a halt, or operator attention.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Broker API returned a non-success response
    #[error("broker api error: {0}")]
    Broker(String),

    /// Market data venue failure (connect, auth, subscribe)
    #[error("market data error: {0}")]
    MarketData(String),

    /// The capital pool cannot afford a single share of the target.
    /// Fatal: the engine halts rather than loop on an unfillable signal.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Persisted state exists but cannot be parsed. Never silently
    /// discarded; the operator must resolve it (or run --reset).
    #[error("corrupt state file: {0}")]
    CorruptState(String),

    /// Configuration failed validation at load time
    #[error("invalid configuration: {0}")]
    Config(String),
}
