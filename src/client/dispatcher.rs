use super::connection::Connection;
use super::proxy::ProxyHandler;
use crate::error::Result;
use crate::protocol::InboundFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 入站帧分发循环
///
/// 独占连接的读端。每条请求交给独立任务处理，循环本身不等待响应完成，
/// 因此一个慢请求不会阻塞后续请求。
pub struct Dispatcher {
    proxy: Arc<ProxyHandler>,
    read_timeout: Duration,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(proxy: Arc<ProxyHandler>, read_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            proxy,
            read_timeout,
            shutdown,
        }
    }

    /// 运行直到读失败（返回错误）或收到关闭信号（返回 `Ok`）
    pub async fn run(&self, conn: &mut Connection) -> Result<()> {
        let generation = conn.generation();
        debug!("Dispatcher started on connection #{}", generation);

        loop {
            conn.set_idle_deadline(Some(self.read_timeout));
            let text = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Dispatcher on connection #{} shutting down", generation);
                    return Ok(());
                }
                frame = conn.receive() => frame?,
            };
            conn.set_idle_deadline(None);

            match InboundFrame::decode(&text) {
                Ok(InboundFrame::Request(request)) => {
                    let proxy = self.proxy.clone();
                    let writer = conn.writer();
                    tokio::spawn(async move {
                        proxy.serve(request, &writer).await;
                    });
                }
                Ok(InboundFrame::Control(action)) => {
                    debug!("Control frame '{}' on connection #{}", action, generation);
                }
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                }
            }
        }
    }
}
