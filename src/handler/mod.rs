//! Per-request orchestration
//!
//! # Pipeline
//!
//! ```text
//! Start ──classify──► Classified ──allocate──► Allocated ──report──► Reported ──► Done
//!   │                     │                        │
//!   └── Unknown ──────────┴── nothing to show ─────┴──────────────────────────► Done
//! ```
//!
//! 1. Classify the requester. `Unknown` ends the request.
//! 2. Allocate a link. Trusted crawlers consume it; everything else gets a
//!    dry-run answer that leaves the used set untouched.
//! 3. Report `actual` allocations for trusted crawlers. A failed report is
//!    logged and the link is still returned.
//!
//! Every stage runs against one request deadline. Errors and timeouts are
//! flattened into "nothing to show" at this boundary; a crawler never sees
//! an internal failure.

pub mod context;

use anyhow::Context;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::allocator::Allocator;
use crate::config::Config;
use crate::coordinator::CoordinatorClient;
use crate::error::{Error, LinkgateErrorTrait, Result};
use crate::identity::{
    DnsError, DnsResolver, IdentityVerifier, SystemResolver, UnavailableResolver,
};
use crate::models::{AllocationResult, BotIdentity, Site, TrustPolicy};
use crate::storage::LinkStore;

pub use context::RequestContext;

/// Default deadline for a whole request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Request stages
// ============================================================================

/// Pipeline stage of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStage {
    Start,
    Classified,
    Allocated,
    Reported,
    Done,
}

impl RequestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Classified => "classified",
            Self::Allocated => "allocated",
            Self::Reported => "reported",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Behaviour switches of the request handler
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Treat every request as a bot and never persist or report
    pub emulation: bool,

    /// Identities whose allocations are persisted and reported
    pub trust: TrustPolicy,

    /// Fixed site instead of the request's `Host`
    pub site_override: Option<Site>,

    /// Deadline for a whole request
    pub request_timeout: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            emulation: false,
            trust: TrustPolicy::default(),
            site_override: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HandlerSettings {
    pub fn with_emulation(mut self, emulation: bool) -> Self {
        self.emulation = emulation;
        self
    }

    pub fn with_trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_site_override(mut self, site: Option<Site>) -> Self {
        self.site_override = site;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ============================================================================
// Request Handler
// ============================================================================

/// Answers requests with links for verified crawlers
pub struct RequestHandler {
    verifier: IdentityVerifier,
    allocator: Allocator,
    client: Arc<CoordinatorClient>,
    settings: HandlerSettings,
}

impl RequestHandler {
    pub fn new(
        verifier: IdentityVerifier,
        allocator: Allocator,
        client: Arc<CoordinatorClient>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            verifier,
            allocator,
            client,
            settings,
        }
    }

    /// Wire up the production pipeline described by `config`
    ///
    /// Fails when the data directory is not writable. Without a usable
    /// system DNS configuration every requester classifies as `Unknown`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(
            LinkStore::open(&config.data_dir, config.store_settings())
                .context("Failed to open link store")?,
        );
        let client = Arc::new(
            CoordinatorClient::new(config.client_config())
                .context("Failed to build coordinator client")?
                .with_ledger(store.clone()),
        );
        let resolver = system_resolver_or_unavailable(SystemResolver::from_system_conf());

        let verifier = IdentityVerifier::new(resolver).with_lookup_timeout(config.dns_timeout());
        let allocator = Allocator::new(store, client.clone())
            .with_always_show_something(config.always_show_something);

        Ok(Self::new(
            verifier,
            allocator,
            client,
            config.handler_settings()?,
        ))
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn client(&self) -> &Arc<CoordinatorClient> {
        &self.client
    }

    /// Identity of the requester; `Unknown` if verification runs out of time
    pub async fn classify(&self, ctx: &RequestContext) -> BotIdentity {
        let deadline = Instant::now() + self.settings.request_timeout;
        within(deadline, RequestStage::Classified, self.classify_inner(ctx))
            .await
            .unwrap_or(BotIdentity::Unknown)
    }

    /// A single link for the request, if it deserves one
    pub async fn handle(&self, ctx: &RequestContext) -> Option<AllocationResult> {
        self.try_handle(ctx)
            .await
            .unwrap_or_else(|e| self.degrade(ctx, e))
    }

    /// [`Self::handle`] as a list of at most one link
    pub async fn handle_many(&self, ctx: &RequestContext, count: usize) -> Vec<AllocationResult> {
        if count == 0 {
            return Vec::new();
        }
        self.handle(ctx).await.into_iter().collect()
    }

    /// Up to `count` links in one go, reported as a batch
    pub async fn handle_batch(&self, ctx: &RequestContext, count: usize) -> Vec<AllocationResult> {
        self.try_handle_batch(ctx, count)
            .await
            .unwrap_or_else(|e| self.degrade(ctx, e))
    }

    async fn try_handle(&self, ctx: &RequestContext) -> Result<Option<AllocationResult>> {
        let deadline = Instant::now() + self.settings.request_timeout;

        let identity = within(deadline, RequestStage::Classified, self.classify_inner(ctx)).await?;
        if !identity.is_bot() {
            return Ok(None);
        }

        let site = self.site(ctx)?;
        let persist = self.is_reportable(identity);

        let allocation = within(
            deadline,
            RequestStage::Allocated,
            self.allocator.pick_one(&site, persist),
        )
        .await??;
        let Some(result) = allocation else {
            tracing::debug!(%site, %identity, "Nothing to show");
            return Ok(None);
        };

        if persist && result.is_actual() {
            let set_url = ctx.current_url();
            let report = self.client.report_assignment(
                &site,
                result.link.id,
                &set_url,
                &ctx.user_agent,
                identity,
            );
            if let Err(e) = flatten(within(deadline, RequestStage::Reported, report).await) {
                tracing::warn!(%site, link_id = result.link.id, error = %e, "Failed to report assignment");
            }
        }

        tracing::info!(
            %site,
            %identity,
            link_id = result.link.id,
            kind = result.kind.as_str(),
            "Link served"
        );
        Ok(Some(result))
    }

    async fn try_handle_batch(
        &self,
        ctx: &RequestContext,
        count: usize,
    ) -> Result<Vec<AllocationResult>> {
        let deadline = Instant::now() + self.settings.request_timeout;

        let identity = within(deadline, RequestStage::Classified, self.classify_inner(ctx)).await?;
        if !identity.is_bot() {
            return Ok(Vec::new());
        }

        let site = self.site(ctx)?;
        let persist = self.is_reportable(identity);
        let results = within(
            deadline,
            RequestStage::Allocated,
            self.allocator.pick_next(&site, count, persist),
        )
        .await??;
        if results.is_empty() || !persist {
            return Ok(results);
        }

        let actual_ids: Vec<u64> = results
            .iter()
            .filter(|result| result.is_actual())
            .map(|result| result.link.id)
            .collect();
        let set_url = ctx.current_url();
        let report = self.client.report_batch(
            &site,
            &actual_ids,
            &set_url,
            &ctx.user_agent,
            identity,
        );
        if let Err(e) = flatten(within(deadline, RequestStage::Reported, report).await) {
            tracing::warn!(%site, links = actual_ids.len(), error = %e, "Failed to report batch");
        }

        tracing::info!(%site, %identity, links = results.len(), "Batch served");
        Ok(results)
    }

    async fn classify_inner(&self, ctx: &RequestContext) -> BotIdentity {
        self.verifier
            .classify(&ctx.user_agent, &ctx.remote_addr, self.settings.emulation)
            .await
    }

    fn site(&self, ctx: &RequestContext) -> Result<Site> {
        ctx.site(self.settings.site_override.as_ref())
            .ok_or_else(|| Error::InvalidRequest(format!("no usable site in host {:?}", ctx.host)))
    }

    fn is_reportable(&self, identity: BotIdentity) -> bool {
        !self.settings.emulation && self.settings.trust.is_trusted(identity)
    }

    fn degrade<T: Default>(&self, ctx: &RequestContext, error: Error) -> T {
        tracing::warn!(
            host = %ctx.host,
            error = %error,
            category = error.category().as_str(),
            "Request failed, nothing to show"
        );
        T::default()
    }
}

fn system_resolver_or_unavailable(
    loaded: std::result::Result<SystemResolver, DnsError>,
) -> Arc<dyn DnsResolver> {
    match loaded {
        Ok(resolver) => Arc::new(resolver),
        Err(e) => {
            tracing::warn!(error = %e, "No usable DNS configuration, crawlers cannot be verified");
            Arc::new(UnavailableResolver::new(e.to_string()))
        }
    }
}

/// Run `fut` unless `deadline` passes first
async fn within<F>(deadline: Instant, stage: RequestStage, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| Error::Timeout { stage })
}

fn flatten<T, E>(result: Result<std::result::Result<T, E>>) -> Result<T>
where
    E: Into<Error>,
{
    result.and_then(|inner| inner.map_err(Into::into))
}
