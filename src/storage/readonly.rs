//! 演练模式（dry run）使用的只读包装
//!
//! 读取操作透传给内部存储，写入操作只记录日志并返回模拟结果。

use super::{DriveInfo, ItemKind, LocalEntry, LocalStore, RemoteItem, RemoteStore};
use crate::core::checksum::{self, Expected};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ReadOnlyRemote {
    inner: Arc<dyn RemoteStore>,
}

impl ReadOnlyRemote {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RemoteStore for ReadOnlyRemote {
    async fn drive_info(&self) -> Result<DriveInfo> {
        self.inner.drive_info().await
    }

    async fn resolve_path(&self, path: &str) -> Result<RemoteItem> {
        self.inner.resolve_path(path).await
    }

    async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>> {
        // 演练中"创建"的目录并不存在
        match self.inner.list_children(folder).await {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    async fn download(&self, item: &RemoteItem, destination: &Path) -> Result<u64> {
        tracing::info!("[dry run] 下载 {} -> {:?}", item.full_name(), destination);
        Ok(item.size)
    }

    async fn hash(&self, item: &RemoteItem) -> Result<String> {
        self.inner.hash(item).await
    }

    async fn upload(&self, source: &Path, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        let size = tokio::fs::metadata(source).await.map(|m| m.len()).unwrap_or(0);
        // 模拟结果带上本地 hash，校验时不需要读取并不存在的远程文件
        let owned = source.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || checksum::hash_file(&owned))
            .await
            .ok()
            .and_then(|r| r.ok());
        tracing::info!("[dry run] 上传 {:?} -> /{}", source, parent.child_path(name));
        Ok(RemoteItem {
            path: parent.child_path(name),
            name: name.to_string(),
            kind: ItemKind::File,
            size,
            hash,
            created: None,
            modified: None,
        })
    }

    async fn create_folder(&self, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        let path = parent.child_path(name);
        tracing::info!("[dry run] 创建远程目录 /{}", path);
        Ok(RemoteItem::folder(&path))
    }

    async fn delete(&self, item: &RemoteItem) -> Result<()> {
        tracing::info!("[dry run] 删除远程 {}", item.full_name());
        Ok(())
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

pub struct ReadOnlyLocal {
    inner: Arc<dyn LocalStore>,
}

impl ReadOnlyLocal {
    pub fn new(inner: Arc<dyn LocalStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LocalStore for ReadOnlyLocal {
    async fn create_folder(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        let path = parent.join(name);
        tracing::info!("[dry run] 创建本地目录 {:?}", path);
        Ok(path)
    }

    async fn create_temp_file(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        Ok(parent.join(format!("{}.dryrun.tmp", name)))
    }

    async fn verify_checksum(&self, _path: &Path, _expected: &Expected) -> Result<bool> {
        Ok(true)
    }

    async fn set_timestamps(
        &self,
        path: &Path,
        _created: Option<DateTime<Utc>>,
        _modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        tracing::debug!("[dry run] 设置时间戳 {:?}", path);
        Ok(())
    }

    async fn atomic_replace(&self, _temp: &Path, target: &Path) -> Result<()> {
        tracing::debug!("[dry run] 替换 {:?}", target);
        Ok(())
    }

    async fn list_entries(&self, path: &Path) -> Result<Vec<LocalEntry>> {
        self.inner.list_entries(path).await
    }

    async fn stat(&self, path: &Path) -> Result<Option<LocalEntry>> {
        self.inner.stat(path).await
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        self.inner.hash(path).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tracing::info!("[dry run] 删除本地 {:?}", path);
        Ok(())
    }

    async fn discard(&self, _path: &Path) {}
}
