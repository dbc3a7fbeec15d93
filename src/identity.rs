/// 隧道身份及其持久化
///
/// 身份在首次注册成功后创建，每次注册或恢复成功后覆盖写入，
/// 中继拒绝恢复请求时清除。
use crate::error::{Result, TunnelError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// 安全重连凭据（uuid 与 key 必须成对出现）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uuid: String,
    pub security_key: String,
}

impl Credentials {
    /// 两者都非空时才构成有效凭据
    pub fn from_parts(uuid: &str, security_key: &str) -> Option<Self> {
        if uuid.is_empty() || security_key.is_empty() {
            return None;
        }
        Some(Self {
            uuid: uuid.to_string(),
            security_key: security_key.to_string(),
        })
    }
}

/// 隧道身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelIdentity {
    pub tunnel_id: String,
    pub port: String,
    pub credentials: Option<Credentials>,
}

impl TunnelIdentity {
    pub fn new(
        tunnel_id: impl Into<String>,
        port: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            port: port.into(),
            credentials,
        }
    }

    pub fn uuid(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.uuid.as_str())
    }

    pub fn security_key(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.security_key.as_str())
    }
}

/// 磁盘上的记录格式
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    security_key: String,
    #[serde(default)]
    tunnel_id: String,
    #[serde(default)]
    port: String,
}

impl From<&TunnelIdentity> for StoredIdentity {
    fn from(identity: &TunnelIdentity) -> Self {
        Self {
            uuid: identity.uuid().unwrap_or_default().to_string(),
            security_key: identity.security_key().unwrap_or_default().to_string(),
            tunnel_id: identity.tunnel_id.clone(),
            port: identity.port.clone(),
        }
    }
}

impl From<StoredIdentity> for TunnelIdentity {
    fn from(stored: StoredIdentity) -> Self {
        let credentials = Credentials::from_parts(&stored.uuid, &stored.security_key);
        if credentials.is_none() && !(stored.uuid.is_empty() && stored.security_key.is_empty()) {
            warn!("Stored identity has an incomplete uuid/key pair, ignoring credentials");
        }
        Self {
            tunnel_id: stored.tunnel_id,
            port: stored.port,
            credentials,
        }
    }
}

/// 身份存储接口
pub trait IdentityStore: Send + Sync {
    /// 读取已保存的身份，不存在时返回 `Ok(None)`
    fn load(&self) -> Result<Option<TunnelIdentity>>;

    /// 覆盖保存身份
    fn save(&self, identity: &TunnelIdentity) -> Result<()>;

    /// 清除身份；没有保存任何身份时也返回成功
    fn clear(&self) -> Result<()>;
}

/// 基于 JSON 文件的身份存储
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_file(&self, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        file.write_all(data)?;
        file.flush()
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<TunnelIdentity>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TunnelError::identity(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let stored: StoredIdentity = serde_json::from_slice(&data).map_err(|e| {
            TunnelError::identity(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        Ok(Some(stored.into()))
    }

    fn save(&self, identity: &TunnelIdentity) -> Result<()> {
        let data = serde_json::to_vec_pretty(&StoredIdentity::from(identity))?;
        self.write_file(&data).map_err(|e| {
            TunnelError::identity(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        debug!("Saved tunnel identity to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TunnelError::identity(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// 仅保存在进程内存中的身份存储（`--ephemeral`）
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: Mutex<Option<TunnelIdentity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: TunnelIdentity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<TunnelIdentity>> {
        Ok(self.identity.lock().clone())
    }

    fn save(&self, identity: &TunnelIdentity) -> Result<()> {
        *self.identity.lock() = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.identity.lock().take();
        Ok(())
    }
}
