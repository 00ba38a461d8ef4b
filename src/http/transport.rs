//! Outbound HTTP dispatch.
//!
//! # Responsibilities
//! - Send one prepared request and buffer the response
//! - Enforce the per-request timeout
//! - Distinguish "no response" failures from HTTP error statuses
//!
//! # Design Decisions
//! - `Transport` is a trait so the executor can be driven by scripted transports in tests
//! - Error statuses are returned as responses; only missing responses are errors

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use thiserror::Error;

use crate::http::request::PreparedRequest;
use crate::http::response::ServiceResponse;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request aborted: {0}")]
    Aborted(String),

    /// The status line arrived but the body could not be read.
    #[error("response body from {status} could not be read: {message}")]
    Body { status: u16, message: String },

    /// The request was never sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Timeout, connect, abort: nothing came back from the service.
    pub fn is_no_response(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_) | TransportError::Body { .. })
    }
}

/// Sends prepared requests.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'_, Result<ServiceResponse, TransportError>>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn dispatch(&self, request: PreparedRequest) -> Result<ServiceResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(timeout);

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header value for '{}': {}", name, e)))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| TransportError::Body {
            status: status.as_u16(),
            message: e.to_string(),
        })?;

        Ok(ServiceResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'_, Result<ServiceResponse, TransportError>> {
        Box::pin(self.dispatch(request))
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Aborted(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use url::Url;

    #[test]
    fn test_no_response_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_no_response());
        assert!(TransportError::Connect("refused".into()).is_no_response());
        assert!(!TransportError::InvalidRequest("bad header".into()).is_no_response());
        assert!(!TransportError::Body {
            status: 200,
            message: "connection closed".into()
        }
        .is_no_response());
    }

    #[tokio::test]
    async fn test_truncated_body_keeps_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshort")
                .await;
            let _ = socket.shutdown().await;
        });

        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .send(PreparedRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://{}/jobs", addr)).unwrap(),
                headers: Vec::new(),
                body: None,
                timeout: Duration::from_secs(2),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Body { status: 200, .. }), "unexpected error {:?}", err);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .send(PreparedRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://{}/health", addr)).unwrap(),
                headers: Vec::new(),
                body: None,
                timeout: Duration::from_secs(2),
            })
            .await
            .unwrap_err();
        assert!(err.is_no_response(), "unexpected error {:?}", err);
    }

    #[tokio::test]
    async fn test_invalid_header_is_not_sent() {
        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .send(PreparedRequest {
                method: Method::GET,
                url: Url::parse("http://127.0.0.1:9/").unwrap(),
                headers: vec![("bad header".into(), "x".into())],
                body: None,
                timeout: Duration::from_secs(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }
}
