// 客户端配置
//
// 优先级：命令行参数 > 环境变量（DEVPIPE_ 前缀）> 配置文件 > 默认值

use crate::client::RetryPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "DEVPIPE_";

/// 默认中继地址
pub const DEFAULT_SERVER_URL: &str = "wss://devpipe.cloud/ws";
/// 默认本地端口
pub const DEFAULT_LOCAL_PORT: &str = "3000";
/// 默认身份文件位置
pub const DEFAULT_IDENTITY_PATH: &str = "~/.devpipe/tunnel.json";
/// 心跳间隔（秒）
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// 读空闲超时（秒），需大于心跳间隔
pub const READ_TIMEOUT_SECS: u64 = 35;
/// 注册握手超时（秒）
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// 重新注册的最大尝试次数
pub const MAX_RETRIES: u32 = 5;
/// 第二次尝试前的等待时间（毫秒）
pub const RETRY_DELAY_MS: u64 = 2000;
/// 每次失败后等待时间的增长倍数
pub const RETRY_BACKOFF: f64 = 1.5;

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 中继 WebSocket 地址（ws:// 或 wss://）
    pub server_url: String,
    /// 本地服务端口
    pub local_port: String,
    /// 隧道身份文件路径（支持 ~）
    pub identity_path: String,
    pub heartbeat_interval_secs: u64,
    pub read_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: f64,
    /// 本地请求总超时（秒），不设置则不限制
    pub local_timeout_secs: Option<u64>,
    /// 本地请求是否跟随重定向
    pub follow_redirects: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            local_port: DEFAULT_LOCAL_PORT.to_string(),
            identity_path: DEFAULT_IDENTITY_PATH.to_string(),
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            handshake_timeout_secs: HANDSHAKE_TIMEOUT_SECS,
            max_retries: MAX_RETRIES,
            retry_delay_ms: RETRY_DELAY_MS,
            retry_backoff: RETRY_BACKOFF,
            local_timeout_secs: None,
            follow_redirects: true,
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let key = format!("{}{}", ENV_PREFIX, name);
    let raw = std::env::var(&key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {}", key, raw);
            None
        }
    }
}

impl ClientConfig {
    /// 从 TOML 文件加载
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(config)
    }

    /// 使用环境变量覆盖
    pub fn apply_env(&mut self) {
        if let Some(v) = env_value("SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env_value("PORT") {
            self.local_port = v;
        }
        if let Some(v) = env_value("IDENTITY_PATH") {
            self.identity_path = v;
        }
        if let Some(v) = env_value("HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = env_value("READ_TIMEOUT_SECS") {
            self.read_timeout_secs = v;
        }
        if let Some(v) = env_value("HANDSHAKE_TIMEOUT_SECS") {
            self.handshake_timeout_secs = v;
        }
        if let Some(v) = env_value("MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_value("RETRY_DELAY_MS") {
            self.retry_delay_ms = v;
        }
        if let Some(v) = env_value("RETRY_BACKOFF") {
            self.retry_backoff = v;
        }
        if let Some(v) = env_value("LOCAL_TIMEOUT_SECS") {
            self.local_timeout_secs = Some(v);
        }
        if let Some(v) = env_value("FOLLOW_REDIRECTS") {
            self.follow_redirects = v;
        }
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.server_url)
            .with_context(|| format!("Invalid server_url: {}", self.server_url))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            anyhow::bail!("server_url must use ws:// or wss://, got {}", url.scheme());
        }

        match self.local_port.parse::<u16>() {
            Ok(port) if port > 0 => {}
            _ => anyhow::bail!("local_port must be in 1-65535, got '{}'", self.local_port),
        }

        if self.identity_path.trim().is_empty() {
            anyhow::bail!("identity_path cannot be empty");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be greater than 0");
        }
        if self.read_timeout_secs <= self.heartbeat_interval_secs {
            anyhow::bail!(
                "read_timeout_secs ({}) must be greater than heartbeat_interval_secs ({})",
                self.read_timeout_secs,
                self.heartbeat_interval_secs
            );
        }
        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("handshake_timeout_secs must be greater than 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }
        if !(self.retry_backoff >= 1.0 && self.retry_backoff.is_finite()) {
            anyhow::bail!("retry_backoff must be >= 1.0, got {}", self.retry_backoff);
        }
        if self.local_timeout_secs == Some(0) {
            anyhow::bail!("local_timeout_secs must be greater than 0 when set");
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn local_timeout(&self) -> Option<Duration> {
        self.local_timeout_secs.map(Duration::from_secs)
    }

    /// 断线后重新注册的退避策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_delay_ms),
            multiplier: self.retry_backoff,
        }
    }

    /// 展开 ~ 后的身份文件路径
    pub fn identity_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.identity_path).into_owned())
    }
}
