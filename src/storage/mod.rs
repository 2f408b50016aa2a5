//! Durable per-site state
//!
//! The queue cache and the used-link set live as JSON files in the data
//! directory. See [`link_store`] for the file layout.

pub mod link_store;

use std::path::PathBuf;
use thiserror::Error;

use crate::error::{ErrorCategory, LinkgateErrorTrait};

pub use link_store::{
    LinkStore, QueueCache, QueueOrigin, QueueSnapshot, QueueSource, StoreSettings,
    QUEUE_CACHE_LIFETIME, USED_LINK_RETENTION,
};

/// Errors raised by the link store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The data directory cannot be created or written
    #[error("Data directory {} is not writable: {reason}", path.display())]
    NotWritable { path: PathBuf, reason: String },

    /// A state file exists but cannot be decoded
    #[error("Corrupt state file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkgateErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::NotWritable { .. } => false,
            Self::Corrupt { .. } => true,
            Self::Io(_) => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotWritable { .. } => ErrorCategory::Config,
            Self::Corrupt { .. } | Self::Io(_) => ErrorCategory::Storage,
        }
    }
}
