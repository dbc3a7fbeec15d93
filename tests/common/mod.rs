//! Common utilities for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use devpipe::client::{LocalRequest, LocalResponse};
use devpipe::transport::MemoryPeer;
use devpipe::{
    ClientConfig, IdentityStore, LocalForwarder, MemoryIdentityStore, ProxyError, TunnelIdentity,
};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Client configuration with the production timings and a fixed local port
pub fn test_config(port: &str) -> ClientConfig {
    ClientConfig {
        local_port: port.to_string(),
        ..ClientConfig::default()
    }
}

/// Read the registration frame and answer it
pub async fn accept_registration(peer: &mut MemoryPeer, tunnel: &str, uuid: &str, key: &str) -> Value {
    let register = peer
        .recv_json()
        .await
        .expect("Client closed before registering");
    assert_eq!(register["action"], "register");
    peer.send_json(&json!({"tunnel": tunnel, "uuid": uuid, "key": key}));
    register
}

/// Read the registration frame and reject it
pub async fn reject_registration(peer: &mut MemoryPeer, error: &str) -> Value {
    let register = peer
        .recv_json()
        .await
        .expect("Client closed before registering");
    peer.send_json(&json!({"error": error}));
    register
}

/// Answer pings with pongs and collect every other frame until the client hangs up
pub async fn serve_pings(mut peer: MemoryPeer) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(frame) = peer.recv_json().await {
        if frame["action"] == "ping" {
            peer.send_json(&json!({"action": "pong"}));
        } else {
            frames.push(frame);
        }
    }
    frames
}

/// Identity store that counts `clear` calls
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryIdentityStore,
    clears: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingStore {
    pub fn with_identity(identity: TunnelIdentity) -> Self {
        Self {
            inner: MemoryIdentityStore::with_identity(identity),
            ..Self::default()
        }
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl IdentityStore for CountingStore {
    fn load(&self) -> devpipe::Result<Option<TunnelIdentity>> {
        self.inner.load()
    }

    fn save(&self, identity: &TunnelIdentity) -> devpipe::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(identity)
    }

    fn clear(&self) -> devpipe::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

/// Forwarder that echoes the request path after an optional delay
pub struct EchoForwarder {
    pub max_delay_ms: u64,
    pub calls: AtomicUsize,
}

impl EchoForwarder {
    pub fn new(max_delay_ms: u64) -> Self {
        Self {
            max_delay_ms,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LocalForwarder for EchoForwarder {
    async fn forward(&self, request: LocalRequest) -> Result<LocalResponse, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.max_delay_ms > 0 {
            let delay = rand::random_range(0..self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(LocalResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: request.url,
        })
    }
}

/// Raw HTTP/1.1 origin server that records each request and replies with a fixed response
pub struct HttpOrigin {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<String>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for HttpOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start an origin answering every request with `response` (status line, headers and body)
pub async fn start_http_origin(response: &'static str) -> HttpOrigin {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin server");
    let port = listener.local_addr().expect("Failed to get local addr").port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(serve_http_request(socket, response, recorded));
        }
    });

    HttpOrigin {
        port,
        requests,
        handle,
    }
}

async fn serve_http_request(
    mut socket: TcpStream,
    response: &'static str,
    recorded: Arc<Mutex<Vec<String>>>,
) -> Option<()> {
    let mut data = Vec::new();
    let mut buf = vec![0u8; 8192];

    let header_end = loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }

    recorded
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&data).to_string());

    socket.write_all(response.as_bytes()).await.ok()?;
    socket.shutdown().await.ok()
}
