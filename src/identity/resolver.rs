//! DNS lookups used for crawler verification
//!
//! [`SystemResolver`] talks to the nameservers from the system
//! configuration. [`StaticResolver`] answers from an in-memory table and is
//! handy for pinning known crawler hosts or for tests. [`UnavailableResolver`]
//! stands in when no configuration could be loaded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// DNS lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// The name or address has no matching records
    #[error("No records found")]
    NoRecords,

    /// Lookup did not finish in time
    #[error("DNS lookup timed out")]
    Timeout,

    /// Any other resolver failure
    #[error("DNS lookup failed: {0}")]
    Lookup(String),
}

/// Reverse and forward lookups
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// PTR names for `ip`
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;

    /// A/AAAA addresses for `host`
    async fn forward(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
}

// ============================================================================
// System resolver
// ============================================================================

/// Resolver backed by the system's DNS configuration
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Build from `/etc/resolv.conf` (or the platform equivalent)
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| DnsError::Lookup(e.to_string()))?;
        Ok(Self { inner })
    }
}

fn map_resolve_error(err: trust_dns_resolver::error::ResolveError) -> DnsError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DnsError::NoRecords,
        ResolveErrorKind::Timeout => DnsError::Timeout,
        _ => DnsError::Lookup(err.to_string()),
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .inner
            .reverse_lookup(ip)
            .await
            .map_err(map_resolve_error)?;
        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }

    async fn forward(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self.inner.lookup_ip(host).await.map_err(map_resolve_error)?;
        Ok(lookup.iter().collect())
    }
}

// ============================================================================
// Static resolver
// ============================================================================

/// In-memory resolver
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    ptr: HashMap<IpAddr, Vec<String>>,
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a PTR record
    pub fn with_ptr(mut self, ip: IpAddr, host: impl Into<String>) -> Self {
        self.ptr.entry(ip).or_default().push(host.into());
        self
    }

    /// Add an address record
    pub fn with_host(mut self, host: impl Into<String>, ip: IpAddr) -> Self {
        self.hosts
            .entry(normalize_host(&host.into()))
            .or_default()
            .push(ip);
        self
    }

    /// Add matching PTR and address records
    pub fn with_pair(self, ip: IpAddr, host: impl Into<String>) -> Self {
        let host = host.into();
        self.with_ptr(ip, host.clone()).with_host(host, ip)
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        self.ptr.get(&ip).cloned().ok_or(DnsError::NoRecords)
    }

    async fn forward(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.hosts
            .get(&normalize_host(host))
            .cloned()
            .ok_or(DnsError::NoRecords)
    }
}

// ============================================================================
// Unavailable resolver
// ============================================================================

/// Resolver that fails every lookup with the same reason
#[derive(Debug, Clone)]
pub struct UnavailableResolver {
    reason: String,
}

impl UnavailableResolver {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DnsResolver for UnavailableResolver {
    async fn reverse(&self, _ip: IpAddr) -> Result<Vec<String>, DnsError> {
        Err(DnsError::Lookup(self.reason.clone()))
    }

    async fn forward(&self, _host: &str) -> Result<Vec<IpAddr>, DnsError> {
        Err(DnsError::Lookup(self.reason.clone()))
    }
}

/// Lower-case and drop the root label dot
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_lookups() {
        let ip: IpAddr = "66.249.66.1".parse().unwrap();
        let resolver = StaticResolver::new().with_pair(ip, "crawl-66-249-66-1.googlebot.com.");

        assert_eq!(
            resolver.reverse(ip).await.unwrap(),
            vec!["crawl-66-249-66-1.googlebot.com.".to_string()]
        );
        assert_eq!(
            resolver.forward("CRAWL-66-249-66-1.googlebot.com").await.unwrap(),
            vec![ip]
        );
        assert_eq!(
            resolver.reverse("10.0.0.1".parse().unwrap()).await,
            Err(DnsError::NoRecords)
        );
    }

    #[tokio::test]
    async fn test_unavailable_resolver_fails_every_lookup() {
        let resolver = UnavailableResolver::new("no nameservers");

        assert_eq!(
            resolver.reverse("66.249.66.1".parse().unwrap()).await,
            Err(DnsError::Lookup("no nameservers".to_string()))
        );
        assert!(resolver.forward("crawl.googlebot.com").await.is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Host.Example.COM."), "host.example.com");
    }
}
