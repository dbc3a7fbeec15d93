use super::connection::Connection;
use crate::error::{Result, TunnelError};
use crate::identity::{Credentials, IdentityStore, TunnelIdentity};
use crate::protocol::{ClientMessage, RegisterResponse};
use crate::transport::{FramedChannel, TransportClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 注册/安全重连协议
///
/// 每次调用都会新建一条到中继的连接，发送 `register` 并等待应答。
/// 成功后立即持久化身份，覆盖之前的记录。
pub struct Registrar {
    transport: Arc<dyn TransportClient>,
    store: Arc<dyn IdentityStore>,
    port: String,
    handshake_timeout: Duration,
}

impl Registrar {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        store: Arc<dyn IdentityStore>,
        port: impl Into<String>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            port: port.into(),
            handshake_timeout,
        }
    }

    /// 全新注册，由中继分配隧道 ID、uuid 和密钥
    pub async fn register(&self) -> Result<Connection> {
        info!("Registering new tunnel for local port {}", self.port);
        self.handshake(ClientMessage::register(&self.port)).await
    }

    /// 使用已保存的凭据恢复隧道
    pub async fn resume(&self, credentials: &Credentials) -> Result<Connection> {
        info!("Attempting secure reconnection with UUID: {}", credentials.uuid);
        self.handshake(ClientMessage::resume(
            &self.port,
            &credentials.uuid,
            &credentials.security_key,
        ))
        .await
    }

    /// 清除已保存的身份（凭据已不可信）
    pub fn clear_identity(&self) {
        match self.store.clear() {
            Ok(()) => info!("Cleared invalid tunnel identity"),
            Err(e) => warn!("Could not clear invalid tunnel identity: {}", e),
        }
    }

    async fn handshake(&self, message: ClientMessage) -> Result<Connection> {
        debug!(
            "Dialing {} using {} transport",
            self.transport.endpoint(),
            self.transport.transport_type()
        );
        let mut channel = self.transport.connect().await?;

        let response = match tokio::time::timeout(
            self.handshake_timeout,
            exchange(&mut channel, &message),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                channel.sink.close().await;
                return Err(e);
            }
            Err(_) => {
                channel.sink.close().await;
                return Err(TunnelError::timeout(self.handshake_timeout));
            }
        };

        if let Some(message) = response.error_message() {
            channel.sink.close().await;
            return Err(TunnelError::Rejected(message.to_string()));
        }

        if response.tunnel.is_empty() {
            channel.sink.close().await;
            return Err(TunnelError::protocol(
                "Registration response is missing the tunnel id",
            ));
        }

        let credentials = Credentials::from_parts(&response.uuid, &response.key);
        if credentials.is_none() {
            warn!("Relay did not return a complete uuid/key pair, secure reconnection disabled");
        }

        let identity = TunnelIdentity::new(response.tunnel, self.port.clone(), credentials);
        self.persist(&identity);

        Ok(Connection::from_channel(identity, channel))
    }

    fn persist(&self, identity: &TunnelIdentity) {
        match self.store.save(identity) {
            Ok(()) => info!("Tunnel identity saved for secure reconnection"),
            Err(e) => warn!("Could not save tunnel identity: {}", e),
        }
    }
}

/// 发送注册消息并读取应答
async fn exchange(channel: &mut FramedChannel, message: &ClientMessage) -> Result<RegisterResponse> {
    channel
        .sink
        .send_text(serde_json::to_string(message)?)
        .await?;

    let text = channel
        .source
        .next_text()
        .await
        .unwrap_or(Err(TunnelError::ConnectionClosed))?;

    serde_json::from_str(&text)
        .map_err(|e| TunnelError::protocol(format!("Malformed registration response: {}", e)))
}
