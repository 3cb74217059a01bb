pub mod local;
pub mod readonly;
pub mod remote;
pub mod s3;
pub mod webdav;

use crate::auth::Credential;
use crate::config::RemoteConfig;
use crate::core::checksum::Expected;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use local::FsLocalStore;
pub use readonly::{ReadOnlyLocal, ReadOnlyRemote};
pub use remote::OpendalRemote;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// 远程条目（只读使用，核心逻辑从不修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// 相对远程根的完整路径，使用 `/` 分隔，不带首尾斜杠；根目录为空串
    pub path: String,
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    /// BLAKE3 内容 hash（仅当存储能提供时）
    pub hash: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteItem {
    pub fn folder(path: &str) -> Self {
        let path = path.trim_matches('/').to_string();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            path,
            name,
            kind: ItemKind::Folder,
            size: 0,
            hash: None,
            created: None,
            modified: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// 显示用的完整名称
    pub fn full_name(&self) -> String {
        format!("/{}", self.path)
    }

    /// 子条目路径
    pub fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    /// 父目录路径
    pub fn parent_path(&self) -> Option<&str> {
        if self.path.is_empty() {
            return None;
        }
        Some(self.path.rsplit_once('/').map_or("", |(parent, _)| parent))
    }

    /// 下载后用于校验的期望值
    pub fn expected(&self) -> Expected {
        Expected {
            size: self.size,
            hash: self.hash.clone(),
        }
    }
}

/// 本地条目
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl LocalEntry {
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}

/// 远程存储的身份与配额信息（用于启动日志）
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriveInfo {
    pub id: String,
    pub kind: String,
    pub used: Option<u64>,
    pub total: Option<u64>,
}

/// 远程存储能力接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 默认驱动器信息
    async fn drive_info(&self) -> Result<DriveInfo>;

    /// 按路径解析条目
    async fn resolve_path(&self, path: &str) -> Result<RemoteItem>;

    /// 列出目录的直接子条目
    async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>>;

    /// 下载文件内容到本地路径，返回写入的字节数
    async fn download(&self, item: &RemoteItem, destination: &Path) -> Result<u64>;

    /// 读取文件内容计算 BLAKE3 hash（列表元数据不带 hash 时使用）
    async fn hash(&self, item: &RemoteItem) -> Result<String>;

    /// 上传本地文件到远程目录，返回上传后的条目
    async fn upload(&self, source: &Path, parent: &RemoteItem, name: &str) -> Result<RemoteItem>;

    /// 创建子目录
    async fn create_folder(&self, parent: &RemoteItem, name: &str) -> Result<RemoteItem>;

    /// 删除文件或目录
    async fn delete(&self, item: &RemoteItem) -> Result<()>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 本地文件系统能力接口
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn create_folder(&self, parent: &Path, name: &str) -> Result<PathBuf>;

    /// 在目标旁边创建一个空的临时文件
    async fn create_temp_file(&self, parent: &Path, name: &str) -> Result<PathBuf>;

    async fn verify_checksum(&self, path: &Path, expected: &Expected) -> Result<bool>;

    async fn set_timestamps(
        &self,
        path: &Path,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// 用临时文件原子替换最终文件
    async fn atomic_replace(&self, temp: &Path, target: &Path) -> Result<()>;

    /// 列出目录的直接子条目，目录不存在时返回空列表
    async fn list_entries(&self, path: &Path) -> Result<Vec<LocalEntry>>;

    async fn stat(&self, path: &Path) -> Result<Option<LocalEntry>>;

    async fn hash(&self, path: &Path) -> Result<String>;

    async fn delete(&self, path: &Path) -> Result<()>;

    /// 丢弃临时文件（失败时忽略）
    async fn discard(&self, path: &Path);
}

/// 根据配置创建远程存储实例
pub fn create_remote(
    config: &RemoteConfig,
    credential: &Credential,
    chunk_size: u64,
) -> Result<Arc<dyn RemoteStore>> {
    let remote = match config {
        RemoteConfig::Fs { root } => {
            tracing::info!("初始化本地目录存储: {}", root);
            OpendalRemote::fs(root, chunk_size)?
        }
        RemoteConfig::Webdav {
            endpoint,
            username,
            root,
        } => {
            tracing::info!("创建WebDAV存储: endpoint={}, root={:?}", endpoint, root);
            let operator = webdav::operator(endpoint, username, &credential.secret, root.as_deref())?;
            OpendalRemote::new(operator, webdav::display_name(endpoint, root.as_deref()), chunk_size)
        }
        RemoteConfig::S3 {
            bucket,
            region,
            access_key_id,
            endpoint,
            root,
        } => {
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            let operator = s3::operator(
                bucket,
                region,
                access_key_id,
                &credential.secret,
                endpoint.as_deref(),
                root.as_deref(),
            )?;
            OpendalRemote::new(operator, s3::display_name(bucket, root.as_deref()), chunk_size)
        }
        RemoteConfig::Memory => OpendalRemote::memory(chunk_size)?,
    };
    Ok(Arc::new(remote))
}
