/// devpipe 库入口
///
/// 将隧道客户端的核心模块导出为库，方便测试和嵌入
pub mod banner;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod transport;

// 重新导出常用类型
pub use client::{
    Connection, ConnectionState, HttpForwarder, LocalForwarder, ProxyHandler, RetryPolicy,
    TunnelClient,
};
pub use config::ClientConfig;
pub use error::{ProxyError, Result, TunnelError};
pub use identity::{Credentials, FileIdentityStore, IdentityStore, MemoryIdentityStore, TunnelIdentity};
pub use transport::{create_transport_client, memory_transport, TransportClient};
