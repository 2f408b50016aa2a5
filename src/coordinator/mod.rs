//! Client side of the link coordinator
//!
//! The coordinator owns the authoritative link pool. This module talks to
//! it: fetching a site's queue, reporting assignments, and registering the
//! site.
//!
//! # Architecture
//!
//! ```text
//!  LinkStore ──(QueueSource)──┐
//!                             ▼
//!  RequestHandler ───► CoordinatorClient ──POST ?act=...──► Coordinator
//!                             │
//!                             └──(RegistrationLedger)──► registered marker
//! ```
//!
//! A `DOMAIN_NOT_EXISTS` answer to any site-scoped call triggers a
//! `register` before the failure is returned, so the next call for
//! the same site goes through without manual intervention.
//!
//! # Usage
//!
//! ```ignore
//! use linkgate::coordinator::{ClientConfig, CoordinatorClient};
//!
//! let client = CoordinatorClient::new(ClientConfig::new("https://coordinator.example/router"))?;
//! let links = client.fetch_queue(&site).await?;
//! ```

pub mod client;
pub mod protocol;

use crate::models::Site;
use crate::storage::StoreError;

// Re-export main types
pub use client::{ClientConfig, ClientError, CoordinatorClient};
pub use protocol::{Action, ApiResponse, CODE_ALREADY_EXISTS, CODE_DOMAIN_NOT_EXISTS};

/// Where successful registrations are remembered
pub trait RegistrationLedger: Send + Sync {
    fn is_registered(&self, site: &Site) -> bool;

    fn mark_registered(&self, site: &Site) -> Result<(), StoreError>;
}
