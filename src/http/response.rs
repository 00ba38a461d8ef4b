//! Response returned to callers.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::resilience::retries::parse_retry_after;

/// A buffered response from a service.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ServiceResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Anything below 400 counts as success; redirects are followed by the transport.
    pub fn is_success(&self) -> bool {
        self.status.as_u16() < 400
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after").and_then(parse_retry_after)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        let reason = self.status.canonical_reason().unwrap_or("Unknown");
        let mut text = self.text();
        if text.len() > 200 {
            let mut cut = 200;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        if text.is_empty() {
            format!("HTTP {} {}", self.status.as_u16(), reason)
        } else {
            format!("HTTP {} {}: {}", self.status.as_u16(), reason, text)
        }
    }
}
