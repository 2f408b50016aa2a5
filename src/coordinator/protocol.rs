//! Coordinator wire format
//!
//! Requests are form-encoded; the operation travels in the `act` query
//! parameter. Every response is a JSON envelope:
//!
//! ```json
//! { "status": true, "items": [ { "id": 1, "url": "https://..." } ] }
//! { "status": false, "code": "DOMAIN_NOT_EXISTS" }
//! ```

use serde::{Deserialize, Deserializer};

use crate::models::Link;

/// The coordinator does not know the site
pub const CODE_DOMAIN_NOT_EXISTS: &str = "DOMAIN_NOT_EXISTS";

/// Registration of a site that is already registered
pub const CODE_ALREADY_EXISTS: &str = "ALREADY_EXISTS";

/// Operations understood by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetQueue,
    ReportSet,
    ReportSetMany,
    Register,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetQueue => "getqueue",
            Self::ReportSet => "reportset",
            Self::ReportSetMany => "reportsetmany",
            Self::Register => "register",
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default, deserialize_with = "deserialize_status")]
    pub status: bool,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub items: Option<Vec<Link>>,
}

// Accepts `true`, `1`, `"1"`, `"ok"` and friends
fn deserialize_status<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !matches!(s.trim().to_ascii_lowercase().as_str(), "" | "0" | "false"),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    })
}
