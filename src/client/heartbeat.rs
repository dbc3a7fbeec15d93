use super::connection::FrameWriter;
use crate::error::TunnelError;
use crate::protocol::ClientMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 心跳发送失败的通知，携带所属连接的代号
#[derive(Debug)]
pub struct HeartbeatFailure {
    pub generation: u64,
    pub error: TunnelError,
}

/// 绑定到单个连接的心跳任务
///
/// 每个周期通过共享写端发送 `{action:"ping"}`。发送失败时上报一次并退出，
/// 不会继续对已损坏的连接发送。
pub struct HeartbeatMonitor {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// 启动心跳，第一次发送在一个周期之后
    pub fn start(
        writer: Arc<FrameWriter>,
        period: Duration,
        failures: mpsc::UnboundedSender<HeartbeatFailure>,
    ) -> Self {
        let generation = writer.generation();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // 写入可能卡在已失效的连接上，停止信号必须能打断它
                        let sent = tokio::select! {
                            _ = token.cancelled() => break,
                            sent = writer.send(&ClientMessage::Ping) => sent,
                        };
                        if let Err(error) = sent {
                            warn!("Heartbeat error on connection #{}: {}", generation, error);
                            let _ = failures.send(HeartbeatFailure { generation, error });
                            break;
                        }
                        debug!("Heartbeat sent on connection #{}", generation);
                    }
                }
            }
        });

        Self {
            generation,
            cancel,
            handle,
        }
    }

    /// 停止心跳并等待任务退出
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
        debug!("Heartbeat for connection #{} stopped", self.generation);
    }
}
