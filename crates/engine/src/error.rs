//! The module contains the errors the engine can throw.
//!
//! The errors are:
//!
//! - [`Configuration`] thrown when the process cannot run at all (missing
//!   credential, missing category binding). Fatal.
//! - [`NotFound`] thrown when a month or category is absent from a ledger
//!   snapshot. The owning pass is abandoned, sibling passes continue.
//! - [`Gateway`] thrown when a remote call fails. Never retried.
//! - [`InvalidTransaction`] thrown when a ledger returns data the engine cannot
//!   interpret. Fatal to the pass.
//!
//!  [`Configuration`]: EngineError::Configuration
//!  [`NotFound`]: EngineError::NotFound
//!  [`Gateway`]: EngineError::Gateway
//!  [`InvalidTransaction`]: EngineError::InvalidTransaction
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
}

impl EngineError {
    /// Returns `true` when the error must stop the whole process rather than
    /// the current pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Failure of a single gateway call.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{call} failed: {source}")]
    Transport {
        call: String,
        #[source]
        source: TransportError,
    },
    #[error("hourly call budget exhausted ({calls}/{limit})")]
    BudgetExhausted { calls: u32, limit: u32 },
}

/// Error reported by a [`LedgerApi`](crate::LedgerApi) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{status} {name}: {detail}")]
    Api {
        status: u16,
        name: String,
        detail: String,
    },
    #[error("decode error: {0}")]
    Decode(String),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Configuration(a), Self::Configuration(b)) => a == b,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::InvalidTransaction(a), Self::InvalidTransaction(b)) => a == b,
            (Self::Gateway(a), Self::Gateway(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
