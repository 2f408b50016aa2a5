// Core data structures for linkgate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Links
// ============================================================================

/// A link handed out by the coordinator
///
/// Only `id` and `url` are interpreted locally. Every other field the
/// coordinator sends is kept in `extra` and written back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(deserialize_with = "deserialize_link_id")]
    pub id: u64,

    #[serde(default)]
    pub url: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Link {
    /// Create a link without extra metadata
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            extra: serde_json::Map::new(),
        }
    }
}

// The coordinator is not consistent about quoting numeric ids.
fn deserialize_link_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid link id: {text:?}"))),
    }
}

/// A link that has been shown on a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsedLinkRecord {
    pub link_id: u64,
    pub link: Link,
    pub assigned_at: DateTime<Utc>,
}

impl UsedLinkRecord {
    /// Record `link` as assigned at `assigned_at`
    pub fn new(link: Link, assigned_at: DateTime<Utc>) -> Self {
        Self {
            link_id: link.id,
            link,
            assigned_at,
        }
    }

    /// Record `link` as assigned now
    pub fn now(link: Link) -> Self {
        Self::new(link, Utc::now())
    }
}

/// Used links of one site, keyed by link id
pub type UsedLinks = BTreeMap<u64, UsedLinkRecord>;

// ============================================================================
// Allocation
// ============================================================================

/// How a link was allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationKind {
    /// Never shown on this site before
    Actual,
    /// Re-served because nothing fresh was left
    Fillup,
}

impl AllocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actual => "actual",
            Self::Fillup => "fillup",
        }
    }
}

/// A link together with the way it was allocated
///
/// Serializes as the link's own fields plus `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    #[serde(flatten)]
    pub link: Link,

    #[serde(rename = "type")]
    pub kind: AllocationKind,
}

impl AllocationResult {
    pub fn actual(link: Link) -> Self {
        Self {
            link,
            kind: AllocationKind::Actual,
        }
    }

    pub fn fillup(link: Link) -> Self {
        Self {
            link,
            kind: AllocationKind::Fillup,
        }
    }

    pub fn is_actual(&self) -> bool {
        self.kind == AllocationKind::Actual
    }
}

// ============================================================================
// Bot identities
// ============================================================================

/// Crawler identity assigned to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotIdentity {
    Google,
    DuckDuckGo,
    Yandex,
    Baidu,
    Sogou,
    Sosospider,
    Bing,
    Seznam,
    Debug,
    Emulation,
    Unknown,
}

impl BotIdentity {
    /// Crawlers whose identity is verified against the network
    pub const VERIFIED: [BotIdentity; 8] = [
        Self::Google,
        Self::DuckDuckGo,
        Self::Yandex,
        Self::Baidu,
        Self::Sogou,
        Self::Sosospider,
        Self::Bing,
        Self::Seznam,
    ];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::DuckDuckGo => "duckduckgo",
            Self::Yandex => "yandex",
            Self::Baidu => "baidu",
            Self::Sogou => "sogou",
            Self::Sosospider => "sosospider",
            Self::Bing => "bing",
            Self::Seznam => "seznam",
            Self::Debug => "debug",
            Self::Emulation => "emulation",
            Self::Unknown => "unknown",
        }
    }

    /// Anything but `Unknown` is treated as a bot
    pub fn is_bot(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "duckduckgo" => Ok(Self::DuckDuckGo),
            "yandex" => Ok(Self::Yandex),
            "baidu" => Ok(Self::Baidu),
            "sogou" => Ok(Self::Sogou),
            "sosospider" => Ok(Self::Sosospider),
            "bing" => Ok(Self::Bing),
            "seznam" => Ok(Self::Seznam),
            "debug" => Ok(Self::Debug),
            "emulation" => Ok(Self::Emulation),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown bot identity: {other}")),
        }
    }
}

/// Identities allowed to consume pool capacity and be reported upstream
///
/// Identities outside the policy still get an answer, but nothing is
/// persisted or reported for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustPolicy(std::collections::BTreeSet<BotIdentity>);

impl TrustPolicy {
    pub fn new(identities: impl IntoIterator<Item = BotIdentity>) -> Self {
        Self(
            identities
                .into_iter()
                .filter(|identity| *identity != BotIdentity::Unknown)
                .collect(),
        )
    }

    pub fn is_trusted(&self, identity: BotIdentity) -> bool {
        self.0.contains(&identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = BotIdentity> + '_ {
        self.0.iter().copied()
    }
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self::new(BotIdentity::VERIFIED)
    }
}

// ============================================================================
// Sites
// ============================================================================

/// Normalized hostname used as the partition key for cached state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Site(String);

impl Site {
    /// Normalize a Host header value or bare hostname
    ///
    /// Lower-cases, strips the port, a leading `www.` and a trailing dot.
    pub fn parse(host: &str) -> Option<Self> {
        let host = host.trim().to_ascii_lowercase();
        let host = strip_port(&host);
        let host = host.trim_end_matches('.');
        let host = host.strip_prefix("www.").unwrap_or(host);

        let valid = !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));

        valid.then(|| Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal, e.g. "[::1]:8080"
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Site {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid site: {value:?}"))
    }
}

impl From<Site> for String {
    fn from(site: Site) -> Self {
        site.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_accepts_string_id_and_keeps_extra_fields() {
        let json = r#"{"id":"42","url":"https://example.org/","anchor":"Example","weight":3}"#;
        let link: Link = serde_json::from_str(json).unwrap();

        assert_eq!(link.id, 42);
        assert_eq!(link.url, "https://example.org/");
        assert_eq!(link.extra["anchor"], "Example");

        let back = serde_json::to_value(&link).unwrap();
        assert_eq!(back["weight"], 3);
    }

    #[test]
    fn test_link_rejects_non_numeric_id() {
        let result: Result<Link, _> = serde_json::from_str(r#"{"id":"abc","url":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_allocation_result_serializes_type_tag() {
        let result = AllocationResult::fillup(Link::new(7, "https://a.example/"));
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["type"], "fillup");
    }

    #[test]
    fn test_site_normalization() {
        assert_eq!(Site::parse("WWW.Example.COM").unwrap().as_str(), "example.com");
        assert_eq!(Site::parse("www.example.com:8443").unwrap().as_str(), "example.com");
        assert_eq!(Site::parse("blog.example.com.").unwrap().as_str(), "blog.example.com");
        assert_eq!(Site::parse("[::1]:8080").unwrap().as_str(), "::1");
        assert!(Site::parse("").is_none());
        assert!(Site::parse("../etc/passwd").is_none());
    }

    #[test]
    fn test_bot_identity_round_trip_through_str() {
        for identity in BotIdentity::VERIFIED {
            assert_eq!(identity.as_str().parse::<BotIdentity>().unwrap(), identity);
        }
        assert!("crawler".parse::<BotIdentity>().is_err());
    }

    #[test]
    fn test_default_trust_policy() {
        let policy = TrustPolicy::default();
        assert!(policy.is_trusted(BotIdentity::Google));
        assert!(policy.is_trusted(BotIdentity::DuckDuckGo));
        assert!(!policy.is_trusted(BotIdentity::Debug));
        assert!(!policy.is_trusted(BotIdentity::Emulation));
        assert!(!TrustPolicy::new([BotIdentity::Unknown]).is_trusted(BotIdentity::Unknown));
    }
}
