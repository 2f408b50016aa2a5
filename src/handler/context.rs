//! Per-request inputs
//!
//! Everything the pipeline needs to know about the incoming request is
//! captured once at the boundary and passed down explicitly.

use serde::{Deserialize, Serialize};

use crate::models::Site;

/// The request being answered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// `User-Agent` header
    pub user_agent: String,

    /// Source address of the connection
    pub remote_addr: String,

    /// Request arrived over TLS
    pub https: bool,

    /// `Host` header
    pub host: String,

    /// Path and query, e.g. `/blog/post?page=2`
    pub request_uri: String,
}

impl RequestContext {
    pub fn new(
        user_agent: impl Into<String>,
        remote_addr: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            remote_addr: remote_addr.into(),
            https: false,
            host: host.into(),
            request_uri: "/".to_string(),
        }
    }

    /// Set the TLS flag
    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Set the request path
    pub fn with_request_uri(mut self, request_uri: impl Into<String>) -> Self {
        self.request_uri = request_uri.into();
        self
    }

    /// Build from the CGI variables of the current process
    pub fn from_cgi_env() -> Self {
        Self::from_cgi_vars(|name| std::env::var(name).ok())
    }

    /// Build from CGI variables supplied by `lookup`
    ///
    /// Reads `HTTP_USER_AGENT`, `REMOTE_ADDR`, `HTTPS`, `HTTP_HOST` and
    /// `REQUEST_URI`; missing variables are left empty.
    pub fn from_cgi_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).unwrap_or_default();

        Self {
            user_agent: var("HTTP_USER_AGENT"),
            remote_addr: var("REMOTE_ADDR"),
            https: lookup("HTTPS").is_some_and(|value| https_flag(&value)),
            host: var("HTTP_HOST"),
            request_uri: var("REQUEST_URI"),
        }
    }

    /// Fully qualified URL of the request
    pub fn current_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        if self.request_uri.starts_with('/') {
            format!("{scheme}://{}{}", self.host, self.request_uri)
        } else {
            format!("{scheme}://{}/{}", self.host, self.request_uri)
        }
    }

    /// Site this request belongs to
    ///
    /// `site_override` wins over the `Host` header.
    pub fn site(&self, site_override: Option<&Site>) -> Option<Site> {
        match site_override {
            Some(site) => Some(site.clone()),
            None => Site::parse(&self.host),
        }
    }
}

// CGI servers set HTTPS to "on" (or "1"); some set "off" for plain HTTP
fn https_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "off" | "0" | "false"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_current_url() {
        let ctx = RequestContext::new("ua", "127.0.0.1", "www.example.com")
            .with_https(true)
            .with_request_uri("/a/b?c=1");
        assert_eq!(ctx.current_url(), "https://www.example.com/a/b?c=1");

        let ctx = RequestContext::new("ua", "127.0.0.1", "example.com").with_request_uri("");
        assert_eq!(ctx.current_url(), "http://example.com/");
    }

    #[test]
    fn test_from_cgi_vars() {
        let vars: HashMap<&str, &str> = [
            ("HTTP_USER_AGENT", "Googlebot/2.1"),
            ("REMOTE_ADDR", "66.249.66.1"),
            ("HTTPS", "on"),
            ("HTTP_HOST", "Example.com:443"),
            ("REQUEST_URI", "/post"),
        ]
        .into_iter()
        .collect();

        let ctx = RequestContext::from_cgi_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(ctx.user_agent, "Googlebot/2.1");
        assert!(ctx.https);
        assert_eq!(ctx.site(None).unwrap().as_str(), "example.com");
        assert_eq!(ctx.current_url(), "https://Example.com:443/post");
    }

    #[test]
    fn test_https_off_and_missing() {
        let ctx = RequestContext::from_cgi_vars(|name| (name == "HTTPS").then(|| "off".to_string()));
        assert!(!ctx.https);

        let ctx = RequestContext::from_cgi_vars(|_| None);
        assert!(!ctx.https);
        assert!(ctx.site(None).is_none());
    }

    #[test]
    fn test_site_override_wins() {
        let ctx = RequestContext::new("ua", "127.0.0.1", "mirror.example.net");
        let site = Site::parse("example.com").unwrap();
        assert_eq!(ctx.site(Some(&site)), Some(site));
    }
}
