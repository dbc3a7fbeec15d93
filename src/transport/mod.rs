mod memory;
mod wss;

pub use memory::{memory_transport, MemoryListener, MemoryPeer, MemoryTransport};
pub use wss::WssTransport;

use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use std::sync::Arc;

/// 传输层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// 明文 WebSocket
    Ws,
    /// WebSocket Secure
    Wss,
    /// 进程内回环
    Memory,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Ws => write!(f, "ws"),
            TransportType::Wss => write!(f, "wss"),
            TransportType::Memory => write!(f, "memory"),
        }
    }
}

/// 帧发送端：每次调用发送一条完整的文本帧
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// 尽力关闭底层通道
    async fn close(&mut self);
}

/// 帧接收端
#[async_trait]
pub trait FrameSource: Send {
    /// 返回下一条文本帧；对端正常关闭时返回 `None`
    async fn next_text(&mut self) -> Option<Result<String>>;
}

/// 建立好的双工通道
pub struct FramedChannel {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// 传输层客户端接口
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// 连接到中继并返回消息通道
    async fn connect(&self) -> Result<FramedChannel>;

    /// 获取传输类型
    fn transport_type(&self) -> TransportType;

    /// 连接目标的描述（用于日志）
    fn endpoint(&self) -> String;
}

/// 根据中继地址的 scheme 创建传输层客户端
pub fn create_transport_client(server_url: &str) -> Result<Arc<dyn TransportClient>> {
    let url = url::Url::parse(server_url)
        .map_err(|e| TunnelError::config_error(format!("Invalid relay URL {}: {}", server_url, e)))?;

    match url.scheme() {
        "ws" | "wss" => Ok(Arc::new(WssTransport::new(url))),
        other => Err(TunnelError::config_error(format!(
            "Unsupported relay URL scheme: {}",
            other
        ))),
    }
}
