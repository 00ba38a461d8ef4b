//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use resilient_request::auth::{CredentialError, CredentialSource};
use resilient_request::config::ClientConfig;
use resilient_request::http::{PreparedRequest, ServiceResponse, Transport, TransportError};
use resilient_request::offline::ConnectivityMonitor;
use resilient_request::ResilientClient;

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(u16),
    ReplyWith(u16, Vec<(&'static str, &'static str)>),
    /// Reply after a delay (tokio time, so paused clocks apply).
    Delayed(Duration, u16),
    NoResponse,
    /// Status line received, body cut off.
    TruncatedBody(u16),
    /// Never completes.
    Hang,
}

/// Transport that plays back a script and records every request it sees.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    sent: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedTransport {
    /// Plays `steps`, then answers 200 forever.
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_fallback(steps, Step::Reply(200))
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.sent.lock().unwrap().clone()
    }
}

fn reply(status: u16, headers: &[(&'static str, &'static str)]) -> ServiceResponse {
    let status = StatusCode::from_u16(status).unwrap();
    let mut response = ServiceResponse::new(status, format!("{{\"status\":{}}}", status.as_u16()));
    for (name, value) in headers {
        response
            .headers
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

impl Transport for ScriptedTransport {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'_, Result<ServiceResponse, TransportError>> {
        self.sent.lock().unwrap().push(request);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        Box::pin(async move {
            match step {
                Step::Reply(status) => Ok(reply(status, &[])),
                Step::ReplyWith(status, headers) => Ok(reply(status, &headers)),
                Step::Delayed(delay, status) => {
                    tokio::time::sleep(delay).await;
                    Ok(reply(status, &[]))
                }
                Step::NoResponse => Err(TransportError::Connect("connection refused".into())),
                Step::TruncatedBody(status) => Err(TransportError::Body {
                    status,
                    message: "connection closed before message completed".into(),
                }),
                Step::Hang => std::future::pending().await,
            }
        })
    }
}

/// Credentials whose refresh takes `delay` and yields "fresh-token".
pub struct RefreshingCredentials {
    token: Arc<RwLock<Option<String>>>,
    refreshes: Arc<AtomicU32>,
    delay: Duration,
    succeed: bool,
}

impl RefreshingCredentials {
    pub fn new(initial: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            token: Arc::new(RwLock::new(Some(initial.to_string()))),
            refreshes: Arc::new(AtomicU32::new(0)),
            delay,
            succeed: true,
        })
    }

    pub fn failing(initial: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Arc::new(RwLock::new(Some(initial.to_string()))),
            refreshes: Arc::new(AtomicU32::new(0)),
            delay: Duration::ZERO,
            succeed: false,
        })
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl CredentialSource for RefreshingCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    fn refresh_token(&self) -> BoxFuture<'static, Result<String, CredentialError>> {
        let token = Arc::clone(&self.token);
        let refreshes = Arc::clone(&self.refreshes);
        let delay = self.delay;
        let succeed = self.succeed;
        Box::pin(async move {
            refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            if !succeed {
                return Err(CredentialError::RefreshFailed("refresh token revoked".into()));
            }
            let fresh = "fresh-token".to_string();
            *token.write().unwrap() = Some(fresh.clone());
            Ok(fresh)
        })
    }
}

/// Defaults with exact backoff and no background probing.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.retry.jitter_ratio = 0.0;
    config.health_check.enabled = false;
    config
}

pub fn client_with(transport: Arc<ScriptedTransport>, config: ClientConfig) -> ResilientClient {
    ResilientClient::builder(config)
        .transport(transport)
        .build()
        .unwrap()
}

pub fn client_with_connectivity(
    transport: Arc<ScriptedTransport>,
    config: ClientConfig,
    connectivity: ConnectivityMonitor,
) -> ResilientClient {
    ResilientClient::builder(config)
        .transport(transport)
        .connectivity(connectivity)
        .build()
        .unwrap()
}

/// Start a programmable raw-TCP backend on an ephemeral port.
///
/// `f` is called once per connection and returns the status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Consume the request head before answering.
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        loop {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    buf.extend_from_slice(&chunk[..n]);
                                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                            }
                        }

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
