//! 同步引擎：准备存储、启动工作者、等待队列排空并输出报告

use super::queue::TaskQueue;
use super::reporter::{readable_file_size, SyncReport, TaskReporter};
use super::task::{Task, TaskContext, TaskSettings};
use crate::auth::CredentialProvider;
use crate::config::{Direction, SyncConfig};
use crate::error::{Result, SyncError};
use crate::storage::{
    self, DriveInfo, FsLocalStore, LocalStore, ReadOnlyLocal, ReadOnlyRemote, RemoteStore,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Synchronizer {
    config: SyncConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credentials,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 运行一次完整同步
    ///
    /// 返回的错误都是致命错误；单个条目的失败只体现在报告的 `failed` 计数中。
    pub async fn run(&self) -> Result<SyncReport> {
        self.config.validate()?;

        let credential = self.credentials.access_token().await.map_err(|e| {
            error!("无法获取访问凭据: {}", e);
            error!("请使用 --authorise 重新运行");
            match e {
                SyncError::Authorization(msg) => {
                    SyncError::Authorization(format!("{}，请使用 --authorise 重新运行", msg))
                }
                other => SyncError::Authorization(format!(
                    "{}，请使用 --authorise 重新运行",
                    other
                )),
            }
        })?;

        let remote = storage::create_remote(
            &self.config.remote,
            &credential,
            self.config.chunk_size_bytes(),
        )?;
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new());

        self.run_with_stores(remote, local).await
    }

    /// 使用给定的存储运行同步（跳过凭据获取）
    pub async fn run_with_stores(
        &self,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
    ) -> Result<SyncReport> {
        let config = &self.config;
        config.validate()?;
        let settings = Arc::new(TaskSettings::from_config(config)?);

        let (remote, local): (Arc<dyn RemoteStore>, Arc<dyn LocalStore>) = if config.dry_run {
            warn!("演练模式（dry run），不会做任何修改");
            (
                Arc::new(ReadOnlyRemote::new(remote)),
                Arc::new(ReadOnlyLocal::new(local)),
            )
        } else {
            (remote, local)
        };

        log_drive_info(&remote.drive_info().await?);

        let remote_path = config.remote_path.as_deref().unwrap_or("/");
        let root = remote.resolve_path(remote_path).await.map_err(|e| {
            if e.is_not_found() {
                SyncError::InvalidRoot(format!("远程路径 '{}' 不存在", remote_path))
            } else {
                e
            }
        })?;
        if !root.is_folder() {
            error!("指定的根 '{}' 不是目录", root.full_name());
            return Err(SyncError::InvalidRoot(format!(
                "'{}' 不是目录",
                root.full_name()
            )));
        }

        let local_root = config
            .local_path
            .clone()
            .ok_or_else(|| SyncError::Config("未指定本地路径".to_string()))?;
        let local_root = prepare_local_root(local.as_ref(), &local_root, settings.direction).await?;

        info!("本地目录 {:?}", local_root);
        info!("远程目录 <{}>{}", remote.name(), root.full_name());
        info!(
            "同步方向: {}，工作者 {} 个，最多尝试 {} 次",
            settings.direction, config.threads, settings.tries
        );

        let queue = Arc::new(TaskQueue::new());
        let reporter = Arc::new(TaskReporter::new());
        let ctx = TaskContext {
            queue: queue.clone(),
            remote,
            local,
            reporter: reporter.clone(),
            settings,
        };

        queue.add(Task::check(root, local_root, String::new()));

        let cancel = CancellationToken::new();
        let workers: Vec<_> = (0..config.threads)
            .map(|id| tokio::spawn(worker_loop(id, ctx.clone(), cancel.clone())))
            .collect();

        queue.wait_for_completion().await;
        cancel.cancel();

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("工作者异常退出: {}", e);
            }
        }

        info!("同步完成");
        Ok(reporter.report())
    }
}

fn log_drive_info(info: &DriveInfo) {
    match (info.used, info.total) {
        (Some(used), Some(total)) if total > 0 => info!(
            "使用存储 '{}' ({})，已用 {} / {} ({:.2}%)",
            info.id,
            info.kind,
            readable_file_size(used),
            readable_file_size(total),
            used as f64 / total as f64 * 100.0
        ),
        _ => info!("使用存储 '{}' ({})", info.id, info.kind),
    }
}

/// 检查本地根目录；下载方向时不存在则创建
async fn prepare_local_root(
    local: &dyn LocalStore,
    path: &Path,
    direction: Direction,
) -> Result<PathBuf> {
    match local.stat(path).await? {
        Some(entry) if entry.is_folder() => Ok(path.to_path_buf()),
        Some(_) => Err(SyncError::InvalidRoot(format!("本地路径 {:?} 不是目录", path))),
        None if direction == Direction::Down => {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| SyncError::InvalidRoot(format!("无效的本地路径 {:?}", path)))?;
            info!("创建本地目录 {:?}", path);
            local.create_folder(parent, &name).await
        }
        None => Err(SyncError::InvalidRoot(format!("本地目录 {:?} 不存在", path))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 工作者循环：取任务、执行、完成，直到被取消
///
/// 任务 panic 时计为失败，工作者继续处理后续任务。
async fn worker_loop(id: usize, ctx: TaskContext, cancel: CancellationToken) {
    debug!("工作者 {} 启动", id);

    loop {
        let mut lease = tokio::select! {
            _ = cancel.cancelled() => break,
            lease = ctx.queue.take() => lease,
        };

        let outcome = AssertUnwindSafe(lease.run(&ctx)).catch_unwind().await;
        if let Err(panic) = outcome {
            error!("{} 执行时发生异常: {}", *lease, panic_message(panic.as_ref()));
            ctx.reporter.failed();
        }
    }

    debug!("工作者 {} 退出", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Anonymous, KeyFileCredentials};
    use crate::config::{DeletePolicy, RemoteConfig};
    use crate::core::test_support::{test_config, CorruptingRemote, FlakyRemote};
    use crate::storage::{OpendalRemote, RemoteItem};
    use async_trait::async_trait;

    fn config(direction: Direction, local: &Path) -> SyncConfig {
        SyncConfig {
            local_path: Some(local.to_path_buf()),
            remote_path: Some("/".to_string()),
            threads: 3,
            ..test_config(direction)
        }
    }

    fn synchronizer(config: SyncConfig) -> Synchronizer {
        Synchronizer::new(config, Arc::new(Anonymous))
    }

    async fn run(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<SyncReport> {
        synchronizer(config)
            .run_with_stores(remote, Arc::new(FsLocalStore::new()))
            .await
    }

    fn write(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_upload_then_rerun_skips() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), &[b'a'; 10]);
        write(&dir.path().join("dir").join("b.txt"), &[b'b'; 20]);

        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());

        let first = run(config(Direction::Up, dir.path()), remote.clone()).await.unwrap();
        assert_eq!(first.uploaded(), 2);
        assert_eq!(first.new_uploaded, 2);
        assert_eq!(first.failed, 0);
        assert_eq!(first.folders_created, 1);
        assert_eq!(first.bytes_uploaded, 30);

        let op = remote.operator();
        assert_eq!(op.read("a.txt").await.unwrap().to_vec(), vec![b'a'; 10]);
        assert_eq!(op.read("dir/b.txt").await.unwrap().to_vec(), vec![b'b'; 20]);

        let second = run(config(Direction::Up, dir.path()), remote.clone()).await.unwrap();
        assert_eq!(second.uploaded(), 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.failed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_download_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(OpendalRemote::memory(4).unwrap());
        let op = remote.operator().clone();
        op.write("one.txt", b"first file".to_vec()).await.unwrap();
        op.write("nested/deeper/two.bin", vec![9u8; 100]).await.unwrap();
        op.write("nested/three.txt", b"3".to_vec()).await.unwrap();

        let local_root = dir.path().join("mirror");
        let first = run(config(Direction::Down, &local_root), remote.clone()).await.unwrap();
        assert_eq!(first.new_downloaded, 3);
        assert_eq!(first.failed, 0);
        assert_eq!(
            std::fs::read(local_root.join("nested/deeper/two.bin")).unwrap(),
            vec![9u8; 100]
        );

        let second = run(config(Direction::Down, &local_root), remote).await.unwrap();
        assert_eq!(second.downloaded(), 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(second.folders_created, 0);
    }

    #[tokio::test]
    async fn test_authoritative_side_never_modified() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"local version");

        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());
        let op = remote.operator().clone();
        op.write("a.txt", b"remote".to_vec()).await.unwrap();
        op.write("remote-only.txt", b"only here".to_vec()).await.unwrap();

        let report = run(config(Direction::Up, dir.path()), remote).await.unwrap();
        assert_eq!(report.replaced_uploaded, 1);
        assert_eq!(report.deleted, 0);

        // 权威侧（本地）保持原样
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"local version");
        assert!(!dir.path().join("remote-only.txt").exists());
        // 默认保留目标侧的多余条目
        assert_eq!(op.read("remote-only.txt").await.unwrap().to_vec(), b"only here");
        assert_eq!(op.read("a.txt").await.unwrap().to_vec(), b"local version");
    }

    #[tokio::test]
    async fn test_delete_policy_removes_local_extras() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("extra").join("old.txt"), b"old");

        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());
        remote.operator().write("kept.txt", b"k".to_vec()).await.unwrap();

        let mut config = config(Direction::Down, dir.path());
        config.delete_policy = DeletePolicy::Delete;
        let report = run(config, remote).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(!dir.path().join("extra").exists());
        assert!(dir.path().join("kept.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_verification_keeps_destination() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"before");

        let inner = Arc::new(OpendalRemote::memory(1024).unwrap());
        inner.operator().write("a.txt", b"after the change".to_vec()).await.unwrap();

        let report = run(
            config(Direction::Down, dir.path()),
            Arc::new(CorruptingRemote::new(inner)),
        )
        .await
        .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded(), 0);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"before");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_same_size_edit_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"NEW!");

        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());
        let op = remote.operator().clone();
        op.write("a.txt", b"old.".to_vec()).await.unwrap();

        let mut config = config(Direction::Up, dir.path());
        config.hash_compare = true;
        let report = run(config, remote).await.unwrap();

        assert_eq!(report.replaced_uploaded, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(op.read("a.txt").await.unwrap().to_vec(), b"NEW!");
    }

    #[tokio::test]
    async fn test_same_size_edit_downloaded() {
        use chrono::TimeZone;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        write(&local, b"old.");
        let old = chrono::Utc.with_ymd_and_hms(2001, 3, 4, 5, 6, 7).unwrap();
        FsLocalStore::new()
            .set_timestamps(&local, None, Some(old))
            .await
            .unwrap();

        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());
        remote.operator().write("a.txt", b"NEW!".to_vec()).await.unwrap();

        let hashing = || SyncConfig {
            hash_compare: true,
            ..config(Direction::Down, dir.path())
        };
        let report = run(hashing(), remote.clone()).await.unwrap();

        assert_eq!(report.replaced_downloaded, 1);
        assert_eq!(std::fs::read(&local).unwrap(), b"NEW!");

        // 再次运行时内容一致
        let again = run(hashing(), remote).await.unwrap();
        assert_eq!(again.downloaded(), 0);
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn test_same_size_corruption_never_promoted() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("kept.txt"), b"world");

        let inner = Arc::new(OpendalRemote::memory(1024).unwrap());
        inner.operator().write("kept.txt", b"hello".to_vec()).await.unwrap();
        inner.operator().write("fresh.txt", b"hello".to_vec()).await.unwrap();

        let mut config = config(Direction::Down, dir.path());
        config.hash_compare = true;
        let report = run(config, Arc::new(CorruptingRemote::new(inner))).await.unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.downloaded(), 0);
        assert_eq!(std::fs::read(dir.path().join("kept.txt")).unwrap(), b"world");
        assert!(!dir.path().join("fresh.txt").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_transient_upload_attempted_exactly_tries_times() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"payload");

        let flaky = Arc::new(FlakyRemote::new(Arc::new(OpendalRemote::memory(1024).unwrap())));
        let mut config = config(Direction::Up, dir.path());
        config.tries = 5;

        let report = run(config, flaky.clone()).await.unwrap();
        assert_eq!(flaky.uploads(), 5);
        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());
        remote.operator().write("docs/plan.txt", b"plan".to_vec()).await.unwrap();
        remote.operator().write("top.txt", b"top".to_vec()).await.unwrap();

        let mut config = config(Direction::Down, dir.path());
        config.dry_run = true;
        let report = run(config, remote).await.unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.new_downloaded, 2);
        assert_eq!(report.folders_created, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_root_must_be_folder() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());
        remote.operator().write("file.txt", b"x".to_vec()).await.unwrap();

        let mut config = config(Direction::Down, dir.path());
        config.remote_path = Some("/file.txt".into());
        let err = run(config, remote).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidRoot(_)));
    }

    #[tokio::test]
    async fn test_missing_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-yet");
        let remote = Arc::new(OpendalRemote::memory(1024).unwrap());

        let err = run(config(Direction::Up, &missing), remote.clone()).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidRoot(_)));

        run(config(Direction::Down, &missing), remote).await.unwrap();
        assert!(missing.is_dir());
    }

    #[tokio::test]
    async fn test_credential_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(Direction::Up, dir.path());
        config.remote = RemoteConfig::Memory;

        let sync = Synchronizer::new(
            config,
            Arc::new(KeyFileCredentials::new(dir.path().join("missing.key"))),
        );
        let err = sync.run().await.unwrap_err();
        assert!(matches!(err, SyncError::Authorization(ref msg) if msg.contains("--authorise")));
    }

    /// 列出名为 boom 的目录时 panic
    struct PanickingRemote {
        inner: OpendalRemote,
    }

    #[async_trait]
    impl RemoteStore for PanickingRemote {
        async fn drive_info(&self) -> Result<DriveInfo> {
            self.inner.drive_info().await
        }

        async fn resolve_path(&self, path: &str) -> Result<RemoteItem> {
            self.inner.resolve_path(path).await
        }

        async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>> {
            if folder.name == "boom" {
                panic!("listing exploded");
            }
            self.inner.list_children(folder).await
        }

        async fn hash(&self, item: &RemoteItem) -> Result<String> {
            self.inner.hash(item).await
        }

        async fn download(&self, item: &RemoteItem, destination: &Path) -> Result<u64> {
            self.inner.download(item, destination).await
        }

        async fn upload(&self, source: &Path, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
            self.inner.upload(source, parent, name).await
        }

        async fn create_folder(&self, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
            self.inner.create_folder(parent, name).await
        }

        async fn delete(&self, item: &RemoteItem) -> Result<()> {
            self.inner.delete(item).await
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_task_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let inner = OpendalRemote::memory(1024).unwrap();
        inner.operator().write("boom/x.txt", b"x".to_vec()).await.unwrap();
        inner.operator().write("fine.txt", b"fine".to_vec()).await.unwrap();

        let mut config = config(Direction::Down, dir.path());
        config.threads = 1;
        let report = run(config, Arc::new(PanickingRemote { inner })).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.new_downloaded, 1);
        assert!(dir.path().join("fine.txt").exists());
    }
}
