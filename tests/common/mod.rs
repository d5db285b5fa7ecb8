//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use drop_sniper::claim::{ClaimRequest, ClaimResponse, ClaimTransport, TransportError, TransportFactory};
use drop_sniper::clock::{TimeOracle, TimeSourceFetcher, TimeSyncError};
use drop_sniper::config::TimeSyncConfig;

/// Request line and headers seen by a mock backend. Header names are lowercase.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    Some(MockRequest {
        method,
        target,
        headers,
    })
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
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
                        let Some(request) = read_head(&mut socket).await else {
                            return;
                        };
                        let response = f(request).await;
                        let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str(&format!(
                            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.body.len(),
                            response.body
                        ));
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a mock backend that always answers with the same response.
pub async fn start_mock_backend(response: MockResponse) -> SocketAddr {
    start_programmable_backend(move |_| {
        let response = response.clone();
        async move { response }
    })
    .await
}

type Script = dyn Fn(&ClaimRequest<'_>) -> Result<ClaimResponse, TransportError> + Send + Sync;

/// In-memory transport answering from a script, with optional latency.
pub struct ScriptedTransport {
    script: Box<Script>,
    latency: Duration,
    pub calls: AtomicU64,
    pub by_worker: Mutex<HashMap<usize, u64>>,
    pub by_credential: Mutex<HashMap<String, u64>>,
}

impl ScriptedTransport {
    pub fn new<F>(latency: Duration, script: F) -> Arc<Self>
    where
        F: Fn(&ClaimRequest<'_>) -> Result<ClaimResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            latency,
            calls: AtomicU64::new(0),
            by_worker: Mutex::new(HashMap::new()),
            by_credential: Mutex::new(HashMap::new()),
        })
    }

    pub fn calls_for_credential(&self, fingerprint: &str) -> u64 {
        self.by_credential.lock().unwrap().get(fingerprint).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ClaimTransport for ScriptedTransport {
    async fn claim(&self, request: &ClaimRequest<'_>) -> Result<ClaimResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.by_worker.lock().unwrap().entry(request.worker_id).or_default() += 1;
        *self
            .by_credential
            .lock()
            .unwrap()
            .entry(request.credential.fingerprint().to_string())
            .or_default() += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.script)(request)
    }
}

/// Hands out the same scripted transport for every race.
pub struct ScriptedFactory {
    pub transport: Arc<ScriptedTransport>,
    pub opened: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(transport: Arc<ScriptedTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            opened: AtomicUsize::new(0),
        })
    }
}

impl TransportFactory for ScriptedFactory {
    fn open(&self, _max_connections: usize) -> Result<Arc<dyn ClaimTransport>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

/// Hands out any transport for every race.
pub struct SharedFactory(pub Arc<dyn ClaimTransport>);

impl TransportFactory for SharedFactory {
    fn open(&self, _max_connections: usize) -> Result<Arc<dyn ClaimTransport>, TransportError> {
        Ok(self.0.clone())
    }
}

/// Time sources that never answer; the oracle falls back to the local clock.
pub struct OfflineFetcher;

#[async_trait]
impl TimeSourceFetcher for OfflineFetcher {
    async fn fetch(&self, _source: &str, _timeout: Duration) -> Result<serde_json::Value, TimeSyncError> {
        Err(TimeSyncError::Timeout)
    }
}

pub fn offline_oracle() -> Arc<TimeOracle> {
    Arc::new(TimeOracle::with_fetcher(&TimeSyncConfig::default(), Arc::new(OfflineFetcher)))
}
