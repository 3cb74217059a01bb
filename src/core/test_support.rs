//! 测试用的上下文与故障注入存储

use super::queue::TaskQueue;
use super::reporter::TaskReporter;
use super::task::{TaskContext, TaskSettings};
use crate::config::{Direction, SyncConfig};
use crate::error::{Result, SyncError};
use crate::storage::{DriveInfo, FsLocalStore, OpendalRemote, RemoteItem, RemoteStore};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) fn test_config(direction: Direction) -> SyncConfig {
    SyncConfig {
        direction: Some(direction),
        retry_base_delay_ms: 0,
        ..Default::default()
    }
}

pub(crate) fn context(remote: Arc<dyn RemoteStore>, direction: Direction, tries: u32) -> TaskContext {
    context_with(remote, direction, |config| config.tries = tries)
}

pub(crate) fn context_with(
    remote: Arc<dyn RemoteStore>,
    direction: Direction,
    customize: impl FnOnce(&mut SyncConfig),
) -> TaskContext {
    let mut config = test_config(direction);
    customize(&mut config);

    TaskContext {
        queue: Arc::new(TaskQueue::new()),
        remote,
        local: Arc::new(FsLocalStore::new()),
        reporter: Arc::new(TaskReporter::new()),
        settings: Arc::new(TaskSettings::from_config(&config).unwrap()),
    }
}

fn transient(message: &str) -> SyncError {
    SyncError::Remote(opendal::Error::new(opendal::ErrorKind::Unexpected, message).set_temporary())
}

/// 传输总是以瞬时错误失败，其它操作透传
pub(crate) struct FlakyRemote {
    inner: Arc<OpendalRemote>,
    downloads: AtomicU32,
    uploads: AtomicU32,
}

impl FlakyRemote {
    pub(crate) fn new(inner: Arc<OpendalRemote>) -> Self {
        Self {
            inner,
            downloads: AtomicU32::new(0),
            uploads: AtomicU32::new(0),
        }
    }

    pub(crate) fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }

    pub(crate) fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn drive_info(&self) -> Result<DriveInfo> {
        self.inner.drive_info().await
    }

    async fn resolve_path(&self, path: &str) -> Result<RemoteItem> {
        self.inner.resolve_path(path).await
    }

    async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>> {
        self.inner.list_children(folder).await
    }

    async fn hash(&self, item: &RemoteItem) -> Result<String> {
        self.inner.hash(item).await
    }

    async fn download(&self, _item: &RemoteItem, _destination: &Path) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Err(transient("connection reset"))
    }

    async fn upload(&self, _source: &Path, _parent: &RemoteItem, _name: &str) -> Result<RemoteItem> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Err(transient("gateway timeout"))
    }

    async fn create_folder(&self, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        self.inner.create_folder(parent, name).await
    }

    async fn delete(&self, item: &RemoteItem) -> Result<()> {
        self.inner.delete(item).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// 传输过程中翻转第一个字节，大小不变；元数据与普通存储一样不带 hash
pub(crate) struct CorruptingRemote {
    inner: Arc<OpendalRemote>,
}

impl CorruptingRemote {
    pub(crate) fn new(inner: Arc<OpendalRemote>) -> Self {
        Self { inner }
    }
}

fn corrupt(data: &mut [u8]) {
    if let Some(first) = data.first_mut() {
        *first ^= 0xff;
    }
}

#[async_trait]
impl RemoteStore for CorruptingRemote {
    async fn drive_info(&self) -> Result<DriveInfo> {
        self.inner.drive_info().await
    }

    async fn resolve_path(&self, path: &str) -> Result<RemoteItem> {
        self.inner.resolve_path(path).await
    }

    async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>> {
        self.inner.list_children(folder).await
    }

    async fn hash(&self, item: &RemoteItem) -> Result<String> {
        self.inner.hash(item).await
    }

    async fn download(&self, item: &RemoteItem, destination: &Path) -> Result<u64> {
        let written = self.inner.download(item, destination).await?;
        let mut data = std::fs::read(destination).map_err(|e| SyncError::io(destination, e))?;
        corrupt(&mut data);
        std::fs::write(destination, data).map_err(|e| SyncError::io(destination, e))?;
        Ok(written)
    }

    async fn upload(&self, source: &Path, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        let mut data = std::fs::read(source).map_err(|e| SyncError::io(source, e))?;
        corrupt(&mut data);
        let path = parent.child_path(name);
        self.inner.operator().write(&path, data).await?;
        self.inner.resolve_path(&path).await
    }

    async fn create_folder(&self, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        self.inner.create_folder(parent, name).await
    }

    async fn delete(&self, item: &RemoteItem) -> Result<()> {
        self.inner.delete(item).await
    }

    fn name(&self) -> &str {
        "corrupting"
    }
}
