//! Coordinator client
//!
//! Every call is a single form-encoded `POST <url>?act=<operation>` answered
//! with a JSON envelope (see [`super::protocol`]).

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ErrorCategory, LinkgateErrorTrait};
use crate::models::{BotIdentity, Link, Site};
use crate::storage::QueueSource;

use super::protocol::{Action, ApiResponse, CODE_ALREADY_EXISTS, CODE_DOMAIN_NOT_EXISTS};
use super::RegistrationLedger;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator endpoint URL
    pub coordinator_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Extra attempts after a transport failure
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into(),
            timeout: Duration::from_secs(10),
            retry_count: 0,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for the link coordinator
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
    ledger: Option<Arc<dyn RegistrationLedger>>,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("linkgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            ledger: None,
        })
    }

    /// Record successful registrations in `ledger`
    pub fn with_ledger(mut self, ledger: Arc<dyn RegistrationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch the current link queue for `site`
    pub async fn fetch_queue(&self, site: &Site) -> Result<Vec<Link>, ClientError> {
        let form = vec![("domain".to_string(), site.to_string())];
        let response = self.call_checked(site, Action::GetQueue, &form).await?;
        Ok(response.items.unwrap_or_default())
    }

    /// Report that `link_id` was shown on `set_url`
    pub async fn report_assignment(
        &self,
        site: &Site,
        link_id: u64,
        set_url: &str,
        user_agent: &str,
        bot: BotIdentity,
    ) -> Result<(), ClientError> {
        let form = vec![
            ("domain".to_string(), site.to_string()),
            ("link_id".to_string(), link_id.to_string()),
            ("set_url".to_string(), set_url.to_string()),
            ("userAgent".to_string(), user_agent.to_string()),
            ("bot".to_string(), bot.to_string()),
        ];
        self.call_checked(site, Action::ReportSet, &form).await?;

        tracing::info!(%site, link_id, %bot, "Assignment reported");
        Ok(())
    }

    /// Report several links shown on `set_url` at once
    ///
    /// Returns `Ok(false)` without contacting the coordinator when
    /// `link_ids` is empty.
    pub async fn report_batch(
        &self,
        site: &Site,
        link_ids: &[u64],
        set_url: &str,
        user_agent: &str,
        bot: BotIdentity,
    ) -> Result<bool, ClientError> {
        if link_ids.is_empty() {
            return Ok(false);
        }

        let mut form = vec![
            ("domain".to_string(), site.to_string()),
            ("setUrl".to_string(), set_url.to_string()),
        ];
        form.extend(
            link_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (format!("linkIds[{i}]"), id.to_string())),
        );
        form.push(("userAgent".to_string(), user_agent.to_string()));
        form.push(("bot".to_string(), bot.to_string()));

        self.call_checked(site, Action::ReportSetMany, &form).await?;

        tracing::info!(%site, links = link_ids.len(), %bot, "Batch assignment reported");
        Ok(true)
    }

    /// Register `site` with the coordinator
    ///
    /// `ALREADY_EXISTS` counts as success. Success is written to the
    /// registration ledger when one is attached.
    pub async fn register(&self, site: &Site) -> Result<(), ClientError> {
        let form = vec![("domain".to_string(), site.to_string())];
        let response = self.call(Action::Register, &form).await?;

        if !response.status && response.code.as_deref() != Some(CODE_ALREADY_EXISTS) {
            return Err(ClientError::Rejected {
                code: response.code,
            });
        }

        tracing::info!(%site, "Site registered with coordinator");

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.mark_registered(site) {
                tracing::warn!(%site, error = %e, "Failed to write registration marker");
            }
        }
        Ok(())
    }

    // Internal: call and turn `status: false` into an error, registering the
    // site first when the coordinator does not know it
    async fn call_checked(
        &self,
        site: &Site,
        action: Action,
        form: &[(String, String)],
    ) -> Result<ApiResponse, ClientError> {
        let response = self.call(action, form).await?;
        if response.status {
            return Ok(response);
        }

        if response.code.as_deref() == Some(CODE_DOMAIN_NOT_EXISTS) {
            tracing::info!(%site, action = action.as_str(), "Site unknown to coordinator, registering");
            if let Err(e) = self.register(site).await {
                tracing::warn!(%site, error = %e, "Automatic registration failed");
            }
        }

        Err(ClientError::Rejected {
            code: response.code,
        })
    }

    // Internal: POST with retry on transport failures
    async fn call(
        &self,
        action: Action,
        form: &[(String, String)],
    ) -> Result<ApiResponse, ClientError> {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.send(action, form).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(action = action.as_str(), attempt, error = %e, "Coordinator call failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::Transport("Unknown error".to_string())))
    }

    async fn send(
        &self,
        action: Action,
        form: &[(String, String)],
    ) -> Result<ApiResponse, ClientError> {
        let response = self
            .http_client
            .post(&self.config.coordinator_url)
            .query(&[("act", action.as_str())])
            .form(form)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
    }
}

#[async_trait]
impl QueueSource for CoordinatorClient {
    async fn fetch_queue(&self, site: &Site) -> Result<Vec<Link>, ClientError> {
        CoordinatorClient::fetch_queue(self, site).await
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Coordinator client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Coordinator unreachable or the exchange broke off
    #[error("Network error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    /// Body is not a valid response envelope
    #[error("Parse error: {0}")]
    Parse(String),

    /// Coordinator answered with `status: false`
    #[error("Coordinator rejected request: {}", code.as_deref().unwrap_or("no code"))]
    Rejected { code: Option<String> },
}

impl ClientError {
    /// Failure of the exchange itself rather than a refusal
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http { .. } | Self::Parse(_)
        )
    }

    /// Machine-readable code of a rejection
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code } => code.as_deref(),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl LinkgateErrorTrait for ClientError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Init(_))
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Init(_) => ErrorCategory::Config,
            Self::Transport(_) | Self::Http { .. } | Self::Parse(_) => ErrorCategory::Network,
            Self::Rejected { .. } => ErrorCategory::Business,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
