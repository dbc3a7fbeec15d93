use super::connection::Connection;
use super::registration::Registrar;
use crate::error::{Result, TunnelError};
use crate::identity::TunnelIdentity;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 全新注册的重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 最多尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 第 2 次尝试前的等待时间
    pub initial_delay: Duration,
    /// 之后每次等待时间的倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// 只尝试一次
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 第 `attempt` 次尝试（从 1 开始）之前的等待时间
    ///
    /// 第 1 次不等待；超出 `max_attempts` 时返回 `None`。
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.powi(attempt as i32 - 2);
        Some(self.initial_delay.mul_f64(factor))
    }
}

/// 重连驱动
///
/// 先用已有凭据尝试一次安全重连；失败则清除身份，按退避策略做全新注册。
pub struct ReconnectionDriver {
    registrar: Registrar,
    policy: RetryPolicy,
}

impl ReconnectionDriver {
    pub fn new(registrar: Registrar, policy: RetryPolicy) -> Self {
        Self { registrar, policy }
    }

    /// 进程启动时的首次连接
    ///
    /// 有可用凭据时先恢复，被拒绝或失败后清除身份再做一次全新注册；
    /// 不做退避重试，失败直接返回给调用者。
    pub async fn establish(&self, persisted: Option<&TunnelIdentity>) -> Result<Connection> {
        if let Some(credentials) = persisted.and_then(|identity| identity.credentials.as_ref()) {
            match self.registrar.resume(credentials).await {
                Ok(conn) => {
                    info!("Resumed tunnel {}", conn.tunnel_id());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!("Secure reconnection failed: {}", e);
                    self.registrar.clear_identity();
                }
            }
        } else {
            info!("Creating new secure connection");
        }

        self.registrar.register().await
    }

    /// 连接失效后重建连接
    pub async fn reconnect(&self, previous: &TunnelIdentity) -> Result<Connection> {
        if let Some(credentials) = &previous.credentials {
            match self.registrar.resume(credentials).await {
                Ok(conn) => {
                    log_tunnel_change(&previous.tunnel_id, conn.tunnel_id());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!("Secure reconnection failed: {}", e);
                    self.registrar.clear_identity();
                }
            }
        }

        let conn = self.register_with_backoff().await?;
        log_tunnel_change(&previous.tunnel_id, conn.tunnel_id());
        Ok(conn)
    }

    async fn register_with_backoff(&self) -> Result<Connection> {
        for attempt in 1..=self.policy.max_attempts {
            if let Some(delay) = self.policy.delay_before(attempt) {
                info!(
                    "Retrying registration in {:.1}s (attempt {}/{})",
                    delay.as_secs_f64(),
                    attempt,
                    self.policy.max_attempts
                );
                sleep(delay).await;
            }

            match self.registrar.register().await {
                Ok(conn) => return Ok(conn),
                Err(e) => warn!(
                    "Registration attempt {}/{} failed: {}",
                    attempt, self.policy.max_attempts, e
                ),
            }
        }

        error!(
            "Failed to reconnect after {} attempts",
            self.policy.max_attempts
        );
        Err(TunnelError::RetriesExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}

fn log_tunnel_change(previous: &str, current: &str) {
    if previous == current {
        info!("Reconnected to tunnel {}", current);
    } else {
        warn!("Reconnected with new tunnel ID: {} (was {})", current, previous);
    }
}
