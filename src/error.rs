//! Unified error handling for the linkgate crate
//!
//! Each component has its own error type; this module wraps them into a
//! single `Error` enum for code that crosses component boundaries.
//!
//! # Architecture
//!
//! - [`LinkgateErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! The request handler never lets any of these reach a crawler; it logs
//! them and answers with "nothing to show".

use thiserror::Error;

pub use crate::coordinator::ClientError;
pub use crate::handler::RequestStage;
pub use crate::storage::StoreError;

/// Common trait for all linkgate error types
pub trait LinkgateErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried or degraded around)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordinator or DNS unreachable, malformed responses, timeouts
    Network,
    /// Persisted state unreadable, corrupt or not writable
    Storage,
    /// Configuration and validation errors
    Config,
    /// Coordinator answered but refused the operation
    Business,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Business => "business",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the linkgate crate
#[derive(Error, Debug)]
pub enum Error {
    /// Link store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Coordinator client errors
    #[error("Coordinator error: {0}")]
    Client(#[from] ClientError),

    /// A pipeline stage ran past its deadline
    #[error("Timed out during {stage}")]
    Timeout { stage: RequestStage },

    /// Request context could not be turned into a site
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl LinkgateErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Client(e) => e.is_recoverable(),
            Self::Timeout { .. } => true,
            Self::InvalidRequest(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Client(e) => e.category(),
            Self::Timeout { .. } => ErrorCategory::Network,
            Self::InvalidRequest(_) => ErrorCategory::Other,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
