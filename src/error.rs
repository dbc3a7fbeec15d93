/// 自定义错误类型
///
/// `TunnelError` 覆盖与中继之间的连接、注册和身份存储；
/// `ProxyError` 覆盖单个转发请求的校验与本地调用失败，它们会被转换为
/// 带有相同 id 的错误响应返回给中继，而不会影响连接本身。
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 隧道客户端的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 传输层错误（拨号、读、写失败）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 连接已关闭（对端关闭或连接已被新连接取代）
    #[error("Connection closed")]
    ConnectionClosed,

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// 中继拒绝了注册或恢复请求
    #[error("Relay rejected registration: {0}")]
    Rejected(String),

    /// 协议错误（中继返回的数据格式不正确）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 身份存储错误
    #[error("Identity store error: {0}")]
    Identity(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 重连次数耗尽
    #[error("Reconnection failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// 帧编解码错误
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建传输层错误
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// 创建协议错误
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 创建身份存储错误
    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为中继拒绝
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// 检查是否为连接层面的失败（需要重连）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectionClosed | Self::Timeout { .. } | Self::Io(_)
        )
    }
}

/// 单个转发请求的失败，每种都对应一个 HTTP 状态码
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// 不支持的 HTTP 方法
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// 请求路径为空
    #[error("Empty request path")]
    EmptyPath,

    /// 无法构造本地请求
    #[error("Failed to create request: {0}")]
    InvalidRequest(String),

    /// 无法连接本地服务
    #[error("Request failed: {0}")]
    Unreachable(String),

    /// 读取本地响应体失败
    #[error("Failed to read response: {0}")]
    BodyRead(String),
}

impl ProxyError {
    /// 返回给中继的状态码
    pub fn status(&self) -> u16 {
        match self {
            Self::UnsupportedMethod(_) => 405,
            Self::EmptyPath => 400,
            Self::InvalidRequest(_) => 500,
            Self::Unreachable(_) => 502,
            Self::BodyRead(_) => 500,
        }
    }
}
