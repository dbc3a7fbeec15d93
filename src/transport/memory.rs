// 进程内回环传输
//
// `MemoryTransport::connect` 每次产生一对相连的通道，中继端以 `MemoryPeer`
// 的形式从 `MemoryListener` 取出。适用于嵌入式场景和测试。

use super::{FrameSink, FrameSource, FramedChannel, TransportClient, TransportType};
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// 创建相连的客户端传输与中继监听端
pub fn memory_transport() -> (MemoryTransport, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemoryTransport { accept_tx }, MemoryListener { accept_rx })
}

pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

/// 中继端：接受客户端连接
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// 等待下一个客户端连接；所有传输端被丢弃后返回 `None`
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// 中继端看到的一条连接
pub struct MemoryPeer {
    /// 客户端发来的帧
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// 发往客户端的帧
    pub outgoing: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// 读取下一条客户端帧并解析为 JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.incoming.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// 向客户端发送一条 JSON 帧
    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.outgoing.send(text).is_ok(),
            Err(_) => false,
        }
    }

    /// 向客户端发送原始文本帧
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outgoing.send(text.into()).is_ok()
    }
}

#[async_trait]
impl TransportClient for MemoryTransport {
    async fn connect(&self) -> Result<FramedChannel> {
        let (to_relay_tx, to_relay_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(MemoryPeer {
                incoming: to_relay_rx,
                outgoing: to_client_tx,
            })
            .map_err(|_| TunnelError::transport("Memory relay is not listening"))?;

        Ok(FramedChannel {
            sink: Box::new(MemorySink {
                tx: Some(to_relay_tx),
            }),
            source: Box::new(MemorySource { rx: to_client_rx }),
        })
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn endpoint(&self) -> String {
        "memory://relay".to_string()
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TunnelError::ConnectionClosed)?;
        tx.send(text)
            .map_err(|_| TunnelError::transport("Memory relay hung up"))
    }

    async fn close(&mut self) {
        self.tx.take();
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_text(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}
