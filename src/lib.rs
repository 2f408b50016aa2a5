//! linkgate - link placement for verified search engine crawlers
//!
//! Decides per request whether the requester is a genuine crawler and, if
//! so, hands it one link from a pool managed by a remote coordinator,
//! without showing the same link on a site twice per rotation window.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`identity`] - Crawler verification (user agent + forward-confirmed reverse DNS)
//! - [`storage`] - File-backed per-site queue and used-link state
//! - [`allocator`] - Picks unused links, falls back to used ones
//! - [`coordinator`] - Client for the coordinator API
//! - [`handler`] - Per-request pipeline that never surfaces errors
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use linkgate::config::Config;
//! use linkgate::handler::{RequestContext, RequestHandler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let handler = RequestHandler::from_config(&config)?;
//!
//!     let ctx = RequestContext::from_cgi_env();
//!     if let Some(link) = handler.handle(&ctx).await {
//!         println!("{}", serde_json::to_string(&link)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod identity;
pub mod models;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::allocator::Allocator;
    pub use crate::config::Config;
    pub use crate::coordinator::{ClientConfig, CoordinatorClient};
    pub use crate::error::{Error, ErrorCategory, LinkgateErrorTrait, Result};
    pub use crate::handler::{HandlerSettings, RequestContext, RequestHandler};
    pub use crate::identity::{IdentityVerifier, StaticResolver, SystemResolver};
    pub use crate::models::{AllocationKind, AllocationResult, BotIdentity, Link, Site};
    pub use crate::storage::{LinkStore, StoreSettings};
}

// Direct re-exports for convenience
pub use models::{AllocationResult, BotIdentity, Link, Site};
