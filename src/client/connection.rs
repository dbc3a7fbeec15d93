use crate::error::{Result, TunnelError};
use crate::identity::TunnelIdentity;
use crate::transport::{FrameSink, FrameSource, FramedChannel};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// 关闭底层通道的最长等待时间
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// 分配进程内唯一的连接代号
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// 连接写端
///
/// 心跳和所有请求处理任务共享同一个写端，发送时持有互斥锁，
/// 保证帧不会交错。连接被关闭（或被新连接取代）后写入立即失败。
pub struct FrameWriter {
    generation: u64,
    sink: Mutex<Box<dyn FrameSink>>,
    closed: AtomicBool,
}

impl FrameWriter {
    pub fn new(generation: u64, sink: Box<dyn FrameSink>) -> Self {
        Self {
            generation,
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 序列化并发送一条帧
    pub async fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        if self.is_closed() {
            return Err(TunnelError::ConnectionClosed);
        }

        let text = serde_json::to_string(value)?;
        let mut sink = self.sink.lock().await;
        // 等锁期间连接可能已被关闭
        if self.is_closed() {
            return Err(TunnelError::ConnectionClosed);
        }
        sink.send_text(text).await
    }

    /// 关闭写端，之后的发送全部失败
    ///
    /// 标记立即生效；底层通道的关闭最多等待 `SINK_CLOSE_TIMEOUT`，
    /// 写入卡在已失效连接上时不会阻塞调用者。
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let close_sink = async { self.sink.lock().await.close().await };
        match tokio::time::timeout(SINK_CLOSE_TIMEOUT, close_sink).await {
            Ok(()) => debug!("Connection #{} writer closed", self.generation),
            Err(_) => warn!(
                "Connection #{} writer did not close within {:?}, abandoning it",
                self.generation, SINK_CLOSE_TIMEOUT
            ),
        }
    }
}

/// 连接读端，只由分发循环持有
pub struct FrameReader {
    source: Box<dyn FrameSource>,
    idle_deadline: Option<Duration>,
}

impl FrameReader {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            idle_deadline: None,
        }
    }

    /// 设置 `receive` 的最长阻塞时间，`None` 表示不限制
    pub fn set_idle_deadline(&mut self, deadline: Option<Duration>) {
        self.idle_deadline = deadline;
    }

    /// 等待下一条帧
    pub async fn receive(&mut self) -> Result<String> {
        let next = match self.idle_deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.source.next_text())
                .await
                .map_err(|_| TunnelError::timeout(deadline))?,
            None => self.source.next_text().await,
        };

        next.unwrap_or(Err(TunnelError::ConnectionClosed))
    }
}

/// 已注册到中继的连接
pub struct Connection {
    identity: TunnelIdentity,
    writer: Arc<FrameWriter>,
    reader: FrameReader,
}

impl Connection {
    pub fn new(identity: TunnelIdentity, writer: Arc<FrameWriter>, reader: FrameReader) -> Self {
        Self {
            identity,
            writer,
            reader,
        }
    }

    /// 从原始通道构造（分配新的连接代号）
    pub fn from_channel(identity: TunnelIdentity, channel: FramedChannel) -> Self {
        let writer = Arc::new(FrameWriter::new(next_generation(), channel.sink));
        Self::new(identity, writer, FrameReader::new(channel.source))
    }

    pub fn identity(&self) -> &TunnelIdentity {
        &self.identity
    }

    pub fn tunnel_id(&self) -> &str {
        &self.identity.tunnel_id
    }

    pub fn uuid(&self) -> Option<&str> {
        self.identity.uuid()
    }

    pub fn security_key(&self) -> Option<&str> {
        self.identity.security_key()
    }

    pub fn port(&self) -> &str {
        &self.identity.port
    }

    pub fn generation(&self) -> u64 {
        self.writer.generation()
    }

    /// 共享写端
    pub fn writer(&self) -> Arc<FrameWriter> {
        self.writer.clone()
    }

    pub async fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.writer.send(value).await
    }

    pub fn set_idle_deadline(&mut self, deadline: Option<Duration>) {
        self.reader.set_idle_deadline(deadline);
    }

    pub async fn receive(&mut self) -> Result<String> {
        self.reader.receive().await
    }

    /// 关闭连接；返回的 future 只持有写端，可以跨任务传递
    pub fn close(&self) -> impl Future<Output = ()> + Send + 'static {
        let writer = self.writer.clone();
        async move { writer.close().await }
    }
}
