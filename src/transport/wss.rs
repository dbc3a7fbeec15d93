// WebSocket 传输实现

use super::{FrameSink, FrameSource, FramedChannel, TransportClient, TransportType};
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WssTransport {
    url: Url,
}

impl WssTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl TransportClient for WssTransport {
    async fn connect(&self) -> Result<FramedChannel> {
        let (ws, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TunnelError::transport(format!("Failed to dial {}: {}", self.url, e)))?;

        debug!("WebSocket handshake completed: HTTP {}", response.status());

        let (sink, stream) = ws.split();
        Ok(FramedChannel {
            sink: Box::new(WsSink { inner: sink }),
            source: Box::new(WsSource { inner: stream }),
        })
    }

    fn transport_type(&self) -> TransportType {
        if self.url.scheme() == "wss" {
            TransportType::Wss
        } else {
            TransportType::Ws
        }
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TunnelError::transport(format!("WebSocket write error: {}", e)))
    }

    async fn close(&mut self) {
        let _ = self.inner.close().await;
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(TunnelError::transport(format!(
                        "WebSocket read error: {}",
                        e
                    ))))
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(text.to_string())),
                // 非 UTF-8 内容会在解码阶段被丢弃，不影响连接
                Message::Binary(data) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()))
                }
                Message::Close(frame) => {
                    debug!("Relay closed the WebSocket: {:?}", frame);
                    return None;
                }
                // tungstenite 自动回复 Ping
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
