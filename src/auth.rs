//! 访问凭据
//!
//! 凭据获取失败对整次同步是致命的，调用方应提示用户重新运行 `--authorise`。

use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 远程存储使用的凭据
#[derive(Clone, Default)]
pub struct Credential {
    pub secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("secret", &"***").finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<Credential>;
}

/// 不需要凭据的存储（本地目录、内存）
pub struct Anonymous;

#[async_trait]
impl CredentialProvider for Anonymous {
    async fn access_token(&self) -> Result<Credential> {
        Ok(Credential::default())
    }
}

#[derive(Deserialize)]
struct KeyFile {
    secret: String,
}

/// 从 JSON 密钥文件读取凭据：`{"secret": "..."}`
pub struct KeyFileCredentials {
    path: PathBuf,
}

impl KeyFileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认密钥文件位置
    pub fn default_path() -> PathBuf {
        crate::dirs::config_dir()
            .map(|p| p.join("drivesync"))
            .unwrap_or_else(|| PathBuf::from(".drivesync"))
            .join("drivesync.key")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for KeyFileCredentials {
    async fn access_token(&self) -> Result<Credential> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SyncError::Authorization(format!("无法读取密钥文件 {:?}: {}", self.path, e))
        })?;

        let key: KeyFile = serde_json::from_str(&content).map_err(|e| {
            SyncError::Authorization(format!("密钥文件 {:?} 格式错误: {}", self.path, e))
        })?;

        if key.secret.trim().is_empty() {
            return Err(SyncError::Authorization(format!(
                "密钥文件 {:?} 中的 secret 为空",
                self.path
            )));
        }

        Ok(Credential {
            secret: key.secret.trim().to_string(),
        })
    }
}

/// `--authorise` 输出的配置说明
pub fn authorise_instructions(remote: &RemoteConfig, key_file: &Path) -> String {
    let what = match remote {
        RemoteConfig::Webdav { endpoint, username, .. } => {
            format!("WebDAV 服务 {} 用户 {} 的密码", endpoint, username)
        }
        RemoteConfig::S3 {
            bucket,
            access_key_id,
            ..
        } => format!("S3 bucket {} 访问密钥 {} 对应的 secret key", bucket, access_key_id),
        RemoteConfig::Fs { .. } | RemoteConfig::Memory => {
            return "当前远程存储类型不需要凭据".to_string();
        }
    };

    format!(
        "请创建密钥文件 {:?}，内容为:\n\n  {{\"secret\": \"<{}>\"}}\n\n并确保只有当前用户可读（chmod 600）。",
        key_file, what
    )
}
