//! Known crawler signatures
//!
//! The table order is the classification priority.

use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use crate::models::BotIdentity;

/// DuckDuckBot source addresses published by DuckDuckGo
pub const DUCKDUCKGO_ADDRESSES: [Ipv4Addr; 11] = [
    Ipv4Addr::new(23, 21, 227, 69),
    Ipv4Addr::new(50, 16, 241, 113),
    Ipv4Addr::new(50, 16, 241, 114),
    Ipv4Addr::new(50, 16, 241, 117),
    Ipv4Addr::new(50, 16, 247, 234),
    Ipv4Addr::new(52, 204, 97, 54),
    Ipv4Addr::new(52, 5, 190, 19),
    Ipv4Addr::new(54, 197, 234, 188),
    Ipv4Addr::new(54, 208, 100, 253),
    Ipv4Addr::new(54, 208, 102, 37),
    Ipv4Addr::new(107, 21, 1, 8),
];

/// How a user-agent match is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// User agent alone is enough
    UserAgentOnly,
    /// Source address must be on a fixed list
    AllowList(&'static [Ipv4Addr]),
    /// Forward-confirmed reverse DNS within these domains
    ReverseDns(&'static [&'static str]),
}

/// One crawler the verifier knows about
#[derive(Debug)]
pub struct CrawlerSignature {
    pub identity: BotIdentity,
    pub pattern: Regex,
    pub verification: Verification,
}

impl CrawlerSignature {
    fn new(identity: BotIdentity, pattern: &str, verification: Verification) -> Self {
        Self {
            identity,
            pattern: Regex::new(pattern).expect("Invalid crawler pattern"),
            verification,
        }
    }

    pub fn matches_user_agent(&self, user_agent: &str) -> bool {
        self.pattern.is_match(user_agent)
    }
}

/// All signatures in priority order
pub fn signatures() -> &'static [CrawlerSignature] {
    static SIGNATURES: OnceLock<Vec<CrawlerSignature>> = OnceLock::new();

    SIGNATURES.get_or_init(|| {
        use Verification::*;

        vec![
            CrawlerSignature::new(BotIdentity::Debug, r"debug-Googlebot", UserAgentOnly),
            CrawlerSignature::new(
                BotIdentity::DuckDuckGo,
                r"(?i)duckduckbot",
                AllowList(&DUCKDUCKGO_ADDRESSES),
            ),
            CrawlerSignature::new(
                BotIdentity::Yandex,
                r"Yandex",
                ReverseDns(&["yandex.com", "yandex.ru", "yandex.net"]),
            ),
            CrawlerSignature::new(
                BotIdentity::Google,
                r"Googlebot",
                ReverseDns(&["googlebot.com", "google.com"]),
            ),
            CrawlerSignature::new(
                BotIdentity::Baidu,
                r"Baiduspider",
                ReverseDns(&["baidu.com", "baidu.jp"]),
            ),
            CrawlerSignature::new(BotIdentity::Sogou, r"Sogou [Ww]eb", ReverseDns(&["sogou.com"])),
            CrawlerSignature::new(BotIdentity::Sosospider, r"Sosospider", ReverseDns(&["soso.com"])),
            CrawlerSignature::new(BotIdentity::Bing, r"bingbot", ReverseDns(&["search.msn.com"])),
            CrawlerSignature::new(BotIdentity::Seznam, r"SeznamBot", ReverseDns(&["seznam.cz"])),
        ]
    })
}

/// Whether `host` is `suffix` or a subdomain of it
pub fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    host == suffix
        || host
            .strip_suffix(suffix)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Whether `ip` is on an allow-list
pub fn is_allowed(ip: IpAddr, allowed: &[Ipv4Addr]) -> bool {
    match ip {
        IpAddr::V4(v4) => allowed.contains(&v4),
        IpAddr::V6(_) => false,
    }
}
