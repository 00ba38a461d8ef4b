//! Request description and preparation.
//!
//! # Responsibilities
//! - Describe a logical request independently of its destination's base URL
//! - Generate a unique request ID (UUID v4), stable across retries
//! - Resolve the final URL and headers for one dispatch
//!
//! # Design Decisions
//! - Descriptors are cheap to clone: retries and the offline queue keep copies
//! - Bodies are JSON, matching every service this layer fronts

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_TARGET_SERVICE: &str = "x-target-service";
pub const X_SERVICE_CLIENT: &str = "x-service-client";
pub const X_CLIENT_VERSION: &str = "x-client-version";

/// Unique identifier for a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the caller wants sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the service base URL, or an absolute URL.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Overrides the service's configured timeout.
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether any of `patterns` appears in the path as whole segments.
    ///
    /// `/login` matches `/auth/login` and `/login?next=/` but not `/login-history`.
    pub fn path_matches_any(&self, patterns: &[String]) -> bool {
        let segments = path_segments(&self.path);
        patterns.iter().any(|pattern| {
            let wanted = path_segments(pattern);
            !wanted.is_empty() && segments.windows(wanted.len()).any(|w| w == wanted.as_slice())
        })
    }

    /// Whether the request stays on `base`'s scheme, host and port.
    /// Relative paths always do.
    pub fn targets_origin_of(&self, base: &Url) -> bool {
        if !is_absolute(&self.path) {
            return true;
        }
        Url::parse(&self.path).is_ok_and(|url| url.origin() == base.origin())
    }

    /// Resolve the URL this request targets on `base`.
    pub fn resolve_url(&self, base: &Url) -> Result<Url, url::ParseError> {
        if is_absolute(&self.path) {
            return Url::parse(&self.path);
        }
        // Join relative to the base path, keeping any prefix such as "/api".
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(self.path.trim_start_matches('/'))
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn path_segments(path: &str) -> Vec<&str> {
    let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// A single dispatch, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace (or add) a header.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }
}
