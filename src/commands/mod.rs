pub mod admin;
pub mod link;

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

use linkgate::config::Config;
use linkgate::coordinator::CoordinatorClient;
use linkgate::handler::RequestContext;
use linkgate::models::Site;
use linkgate::storage::LinkStore;

// Re-export command functions for convenience
pub use admin::{queue, register, status};
pub use link::{classify, link, links};

/// Request fields; anything not given is read from the CGI environment
#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// User agent of the request (default: $HTTP_USER_AGENT)
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Source address of the request (default: $REMOTE_ADDR)
    #[arg(long)]
    pub remote_addr: Option<String>,

    /// Host header of the request (default: $HTTP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Path and query of the request (default: $REQUEST_URI)
    #[arg(long)]
    pub uri: Option<String>,

    /// Request arrived over HTTPS (default: $HTTPS)
    #[arg(long)]
    pub https: bool,
}

impl RequestArgs {
    pub fn into_context(self) -> RequestContext {
        let mut ctx = RequestContext::from_cgi_env();

        if let Some(user_agent) = self.user_agent {
            ctx.user_agent = user_agent;
        }
        if let Some(remote_addr) = self.remote_addr {
            ctx.remote_addr = remote_addr;
        }
        if let Some(host) = self.host {
            ctx.host = host;
        }
        if let Some(uri) = self.uri {
            ctx.request_uri = uri;
        }
        if self.https {
            ctx.https = true;
        }

        ctx
    }
}

/// Site named on the command line, else the configured one
pub fn resolve_site(config: &Config, site: Option<String>) -> Result<Site> {
    match site {
        Some(raw) => Site::parse(&raw).with_context(|| format!("Invalid site: {raw:?}")),
        None => config
            .site()?
            .context("No site given; pass --site or set LINKGATE_SITE"),
    }
}

/// Store and client for the maintenance commands
pub fn open_backend(config: &Config) -> Result<(Arc<LinkStore>, CoordinatorClient)> {
    let store = Arc::new(
        LinkStore::open(&config.data_dir, config.store_settings())
            .context("Failed to open link store")?,
    );
    let client = CoordinatorClient::new(config.client_config())
        .context("Failed to build coordinator client")?
        .with_ledger(store.clone());

    Ok((store, client))
}
