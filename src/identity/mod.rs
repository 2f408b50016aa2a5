//! Crawler identity verification
//!
//! A request is classified from its user agent and source address. Matching
//! the user agent only nominates a candidate; most crawlers must then pass
//! forward-confirmed reverse DNS:
//!
//! 1. reverse-resolve the source address to a hostname,
//! 2. check the hostname against the crawler's domains,
//! 3. forward-resolve that hostname and require the source address among
//!    the results.
//!
//! A failed step only rules out that candidate; classification continues
//! with the next signature and ends at [`BotIdentity::Unknown`]. DNS errors
//! and timeouts count as a failed step, so [`IdentityVerifier::classify`]
//! always returns an identity.
//!
//! This is best-effort verification. A client that controls the reverse
//! zone of its own address and the forward zone of a matching name can
//! still pass.

pub mod resolver;
pub mod signatures;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::models::BotIdentity;

pub use resolver::{
    normalize_host, DnsError, DnsResolver, StaticResolver, SystemResolver, UnavailableResolver,
};
pub use signatures::{signatures, CrawlerSignature, Verification, DUCKDUCKGO_ADDRESSES};

/// Default bound on each DNS lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Classifies requests into crawler identities
#[derive(Clone)]
pub struct IdentityVerifier {
    resolver: Arc<dyn DnsResolver>,
    lookup_timeout: Duration,
}

impl IdentityVerifier {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            resolver,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Set the per-lookup timeout
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Classify a request
    ///
    /// `emulation` short-circuits to [`BotIdentity::Emulation`] without
    /// looking at the request.
    pub async fn classify(
        &self,
        user_agent: &str,
        source_address: &str,
        emulation: bool,
    ) -> BotIdentity {
        if emulation {
            return BotIdentity::Emulation;
        }

        let signatures = signatures();

        // UA-only signatures need no address
        if let Some(signature) = signatures.iter().find(|s| {
            s.verification == Verification::UserAgentOnly && s.matches_user_agent(user_agent)
        }) {
            return signature.identity;
        }

        let Some(ip) = parse_source_address(source_address) else {
            tracing::debug!(source_address, "Unparseable source address");
            return BotIdentity::Unknown;
        };

        for signature in signatures {
            if !signature.matches_user_agent(user_agent) {
                continue;
            }

            let verified = match signature.verification {
                Verification::UserAgentOnly => true,
                Verification::AllowList(allowed) => signatures::is_allowed(ip, allowed),
                Verification::ReverseDns(domains) => self.forward_confirmed(ip, domains).await,
            };

            if verified {
                tracing::debug!(identity = %signature.identity, %ip, "Crawler verified");
                return signature.identity;
            }

            tracing::debug!(
                candidate = %signature.identity,
                %ip,
                "User agent matched but verification failed"
            );
        }

        BotIdentity::Unknown
    }

    /// Forward-confirmed reverse DNS for `ip` within `domains`
    pub async fn forward_confirmed(&self, ip: IpAddr, domains: &[&str]) -> bool {
        let names = match self.lookup(self.resolver.reverse(ip)).await {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(%ip, error = %e, "Reverse lookup failed");
                return false;
            }
        };

        for name in names.iter().map(|name| normalize_host(name)) {
            if !domains
                .iter()
                .any(|domain| signatures::host_matches_suffix(&name, domain))
            {
                continue;
            }

            match self.lookup(self.resolver.forward(&name)).await {
                Ok(addresses) if addresses.iter().any(|a| a.to_canonical() == ip) => return true,
                Ok(_) => {
                    tracing::debug!(%ip, host = %name, "Forward lookup does not point back");
                }
                Err(e) => {
                    tracing::debug!(%ip, host = %name, error = %e, "Forward lookup failed");
                }
            }
        }

        false
    }

    async fn lookup<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, DnsError>>,
    ) -> Result<T, DnsError> {
        tokio::time::timeout(self.lookup_timeout, fut)
            .await
            .unwrap_or(Err(DnsError::Timeout))
    }
}

/// Parse a source address, mapping IPv4-mapped IPv6 to IPv4
pub fn parse_source_address(source_address: &str) -> Option<IpAddr> {
    source_address
        .trim()
        .parse::<IpAddr>()
        .ok()
        .map(|ip| ip.to_canonical())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const GOOGLEBOT_UA: &str =
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
    const GOOGLE_IP: &str = "66.249.66.1";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn verifier(resolver: StaticResolver) -> IdentityVerifier {
        IdentityVerifier::new(Arc::new(resolver))
    }

    fn google_dns() -> StaticResolver {
        StaticResolver::new().with_pair(ip(GOOGLE_IP), "crawl-66-249-66-1.googlebot.com.")
    }

    struct SlowResolver;

    #[async_trait]
    impl DnsResolver for SlowResolver {
        async fn reverse(&self, _ip: IpAddr) -> Result<Vec<String>, DnsError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec!["crawl.googlebot.com".to_string()])
        }

        async fn forward(&self, _host: &str) -> Result<Vec<IpAddr>, DnsError> {
            Ok(vec![ip(GOOGLE_IP)])
        }
    }

    #[tokio::test]
    async fn test_emulation_short_circuits() {
        let identity = verifier(StaticResolver::new())
            .classify("curl/8.0", "not an ip", true)
            .await;
        assert_eq!(identity, BotIdentity::Emulation);
    }

    #[tokio::test]
    async fn test_debug_signature_needs_no_address() {
        let identity = verifier(StaticResolver::new())
            .classify("Mozilla/5.0 debug-Googlebot", "", false)
            .await;
        assert_eq!(identity, BotIdentity::Debug);
    }

    #[tokio::test]
    async fn test_invalid_address_fails_closed() {
        let identity = verifier(google_dns())
            .classify(GOOGLEBOT_UA, "66.249.66", false)
            .await;
        assert_eq!(identity, BotIdentity::Unknown);
    }

    #[tokio::test]
    async fn test_google_forward_confirmed() {
        let identity = verifier(google_dns())
            .classify(GOOGLEBOT_UA, GOOGLE_IP, false)
            .await;
        assert_eq!(identity, BotIdentity::Google);
    }

    #[tokio::test]
    async fn test_ipv4_mapped_address_is_canonicalized() {
        let identity = verifier(google_dns())
            .classify(GOOGLEBOT_UA, "::ffff:66.249.66.1", false)
            .await;
        assert_eq!(identity, BotIdentity::Google);
    }

    #[tokio::test]
    async fn test_forward_mismatch_is_unknown() {
        let resolver = StaticResolver::new()
            .with_ptr(ip("203.0.113.7"), "crawl-66-249-66-1.googlebot.com")
            .with_host("crawl-66-249-66-1.googlebot.com", ip(GOOGLE_IP));

        let identity = verifier(resolver)
            .classify(GOOGLEBOT_UA, "203.0.113.7", false)
            .await;
        assert_eq!(identity, BotIdentity::Unknown);
    }

    #[tokio::test]
    async fn test_suffix_mismatch_is_unknown() {
        let resolver = StaticResolver::new().with_pair(ip("203.0.113.7"), "googlebot.com.evil.net");

        let identity = verifier(resolver)
            .classify(GOOGLEBOT_UA, "203.0.113.7", false)
            .await;
        assert_eq!(identity, BotIdentity::Unknown);
    }

    #[tokio::test]
    async fn test_missing_ptr_is_unknown() {
        let identity = verifier(StaticResolver::new())
            .classify(GOOGLEBOT_UA, GOOGLE_IP, false)
            .await;
        assert_eq!(identity, BotIdentity::Unknown);
    }

    #[tokio::test]
    async fn test_duckduckgo_uses_allow_list() {
        let v = verifier(StaticResolver::new());

        assert_eq!(
            v.classify("DuckDuckBot/1.1; (+http://duckduckgo.com/duckduckbot.html)", "50.16.241.113", false)
                .await,
            BotIdentity::DuckDuckGo
        );
        assert_eq!(
            v.classify("DuckDuckBot/1.1", "198.51.100.1", false).await,
            BotIdentity::Unknown
        );
    }

    #[tokio::test]
    async fn test_falls_through_to_next_candidate() {
        // Matches the Yandex pattern too, but only Google's DNS checks out
        let ua = "Mozilla/5.0 (compatible; YandexLike; Googlebot/2.1)";
        let identity = verifier(google_dns()).classify(ua, GOOGLE_IP, false).await;
        assert_eq!(identity, BotIdentity::Google);
    }

    #[tokio::test]
    async fn test_other_crawlers() {
        let resolver = StaticResolver::new()
            .with_pair(ip("5.255.253.1"), "5-255-253-1.spider.yandex.com")
            .with_pair(ip("157.55.39.1"), "msnbot-157-55-39-1.search.msn.com")
            .with_pair(ip("77.75.77.1"), "fulltextrobot-77-75-77-1.seznam.cz")
            .with_pair(ip("220.181.108.1"), "baiduspider-220-181-108-1.crawl.baidu.com");
        let v = verifier(resolver);

        assert_eq!(
            v.classify("Mozilla/5.0 (compatible; YandexBot/3.0)", "5.255.253.1", false).await,
            BotIdentity::Yandex
        );
        assert_eq!(
            v.classify("Mozilla/5.0 (compatible; bingbot/2.0)", "157.55.39.1", false).await,
            BotIdentity::Bing
        );
        assert_eq!(
            v.classify("Mozilla/5.0 (compatible; SeznamBot/4.0)", "77.75.77.1", false).await,
            BotIdentity::Seznam
        );
        assert_eq!(
            v.classify("Mozilla/5.0 (compatible; Baiduspider/2.0)", "220.181.108.1", false)
                .await,
            BotIdentity::Baidu
        );
    }

    #[tokio::test]
    async fn test_human_user_agent_is_unknown() {
        let identity = verifier(google_dns())
            .classify("Mozilla/5.0 (X11; Linux x86_64) Firefox/130.0", GOOGLE_IP, false)
            .await;
        assert_eq!(identity, BotIdentity::Unknown);
    }

    #[tokio::test]
    async fn test_slow_dns_counts_as_failure() {
        let v = IdentityVerifier::new(Arc::new(SlowResolver))
            .with_lookup_timeout(Duration::from_millis(50));

        assert_eq!(
            v.classify(GOOGLEBOT_UA, GOOGLE_IP, false).await,
            BotIdentity::Unknown
        );
    }

    #[tokio::test]
    async fn test_classification_is_deterministic() {
        let v = verifier(google_dns());
        let first = v.classify(GOOGLEBOT_UA, GOOGLE_IP, false).await;
        for _ in 0..5 {
            assert_eq!(v.classify(GOOGLEBOT_UA, GOOGLE_IP, false).await, first);
        }
    }
}
