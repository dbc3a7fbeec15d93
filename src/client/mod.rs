mod connection;
mod dispatcher;
mod forwarder;
mod heartbeat;
mod proxy;
mod reconnect;
mod registration;

pub use connection::{next_generation, Connection, FrameReader, FrameWriter};
pub use dispatcher::Dispatcher;
pub use forwarder::{HttpForwarder, LocalForwarder, LocalRequest, LocalResponse};
pub use heartbeat::{HeartbeatFailure, HeartbeatMonitor};
pub use proxy::{ProxyHandler, SUPPORTED_METHODS};
pub use reconnect::{ReconnectionDriver, RetryPolicy};
pub use registration::Registrar;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::identity::IdentityStore;
use crate::transport::TransportClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 隧道连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    /// 重试次数耗尽，终态
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// 隧道客户端
///
/// 持有当前连接及其心跳任务的生命周期。任一失败来源（读错误、读超时、
/// 心跳发送失败）先到达即触发一次重连，旧连接的心跳在新心跳启动前停止。
pub struct TunnelClient {
    driver: ReconnectionDriver,
    proxy: Arc<ProxyHandler>,
    store: Arc<dyn IdentityStore>,
    heartbeat_interval: Duration,
    read_timeout: Duration,
    state_tx: watch::Sender<ConnectionState>,
    reconnects: AtomicU64,
    shutdown: CancellationToken,
}

impl TunnelClient {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn TransportClient>,
        store: Arc<dyn IdentityStore>,
        forwarder: Arc<dyn LocalForwarder>,
    ) -> Self {
        let registrar = Registrar::new(
            transport,
            store.clone(),
            config.local_port.clone(),
            config.handshake_timeout(),
        );

        Self {
            driver: ReconnectionDriver::new(registrar, config.retry_policy()),
            proxy: Arc::new(ProxyHandler::new(config.local_port.clone(), forwarder)),
            store,
            heartbeat_interval: config.heartbeat_interval(),
            read_timeout: config.read_timeout(),
            // 首次连接完成前视为 Reconnecting
            state_tx: watch::Sender::new(ConnectionState::Reconnecting),
            reconnects: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// 当前状态
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 已完成的重连次数
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// 请求停止 `run`
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// 首次连接：有保存的凭据时先尝试恢复
    pub async fn connect(&self) -> Result<Connection> {
        let persisted = match self.store.load() {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Could not load existing tunnel identity: {}", e);
                None
            }
        };

        match self.driver.establish(persisted.as_ref()).await {
            Ok(conn) => {
                info!(
                    "Tunnel {} registered for localhost:{}",
                    conn.tunnel_id(),
                    conn.port()
                );
                self.state_tx.send_replace(ConnectionState::Connected);
                Ok(conn)
            }
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// 运行分发与重连状态机
    ///
    /// 调用 `shutdown` 后返回 `Ok(())`；重试耗尽时状态变为 `Failed` 并返回错误。
    pub async fn run(&self, conn: Connection) -> Result<()> {
        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel();
        let mut conn = conn;

        loop {
            self.state_tx.send_replace(ConnectionState::Connected);
            let generation = conn.generation();
            let monitor =
                HeartbeatMonitor::start(conn.writer(), self.heartbeat_interval, failure_tx.clone());
            let dispatcher =
                Dispatcher::new(self.proxy.clone(), self.read_timeout, self.shutdown.clone());

            let trigger = tokio::select! {
                result = dispatcher.run(&mut conn) => result.err(),
                failure = next_failure(&mut failure_rx, generation) => Some(failure.error),
            };

            monitor.stop().await;
            let writer = conn.writer();
            writer.close().await;
            while let Ok(stale) = failure_rx.try_recv() {
                debug!(
                    "Ignoring heartbeat failure from connection #{}",
                    stale.generation
                );
            }

            let Some(cause) = trigger else {
                info!("Tunnel client stopped");
                return Ok(());
            };

            warn!("Connection #{} lost: {}", generation, cause);
            self.state_tx.send_replace(ConnectionState::Reconnecting);

            let previous = conn.identity().clone();
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Tunnel client stopped while reconnecting");
                    return Ok(());
                }
                next = self.driver.reconnect(&previous) => next,
            };

            match next {
                Ok(next) => {
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    conn = next;
                }
                Err(e) => {
                    self.state_tx.send_replace(ConnectionState::Failed);
                    error!("Giving up on tunnel {}: {}", previous.tunnel_id, e);
                    return Err(e);
                }
            }
        }
    }
}

/// 等待属于指定连接的心跳失败，忽略旧连接遗留的信号
async fn next_failure(
    rx: &mut mpsc::UnboundedReceiver<HeartbeatFailure>,
    generation: u64,
) -> HeartbeatFailure {
    loop {
        match rx.recv().await {
            Some(failure) if failure.generation == generation => return failure,
            Some(stale) => debug!(
                "Ignoring heartbeat failure from connection #{}",
                stale.generation
            ),
            None => return std::future::pending().await,
        }
    }
}
