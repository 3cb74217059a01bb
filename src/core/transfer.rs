//! 上传与下载任务：传输 -> 校验 -> 落盘

use super::task::{Task, TaskContext};
use crate::error::{Result, SyncError};
use crate::storage::{LocalEntry, RemoteItem};
use scopeguard::ScopeGuard;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 传输阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Transferring,
    Verifying,
    Finalizing,
}

impl std::fmt::Display for TransferStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStage::Transferring => write!(f, "transferring"),
            TransferStage::Verifying => write!(f, "verifying"),
            TransferStage::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// KB/s，耗时为 0 时返回 0
fn throughput_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / 1024.0) / secs
    } else {
        0.0
    }
}

fn mode(replace: bool) -> &'static str {
    if replace {
        "替换"
    } else {
        "新建"
    }
}

/// 远程文件的内容 hash：列表已带 hash 时直接使用，否则读取远程内容计算
pub(crate) async fn remote_hash(ctx: &TaskContext, item: &RemoteItem) -> Result<String> {
    match &item.hash {
        Some(hash) => Ok(hash.clone()),
        None => ctx.remote.hash(item).await,
    }
}

/// 下载远程条目到本地目录
///
/// 文件先写入同目录下的临时文件，校验通过后才替换目标文件。
pub(crate) async fn download(
    ctx: &TaskContext,
    item: &RemoteItem,
    parent: &Path,
    rel: &str,
    replace: bool,
) -> Result<()> {
    if item.is_folder() {
        let folder = ctx.local.create_folder(parent, &item.name).await?;
        info!("创建本地目录 {:?}", folder);
        ctx.reporter.folder_created();
        ctx.queue.add(Task::check(item.clone(), folder, rel.to_string()));
        return Ok(());
    }

    let temp = ctx.local.create_temp_file(parent, &item.name).await?;

    // 任务被取消或 panic 时也要清理临时文件
    let guard = scopeguard::guard((ctx.local.clone(), temp.clone()), |(local, temp)| {
        tokio::spawn(async move {
            local.discard(&temp).await;
        });
    });

    let result = download_to_temp(ctx, item, parent, &temp, replace).await;

    let (local, temp) = ScopeGuard::into_inner(guard);
    if result.is_err() {
        local.discard(&temp).await;
    }
    result
}

async fn download_to_temp(
    ctx: &TaskContext,
    item: &RemoteItem,
    parent: &Path,
    temp: &Path,
    replace: bool,
) -> Result<()> {
    // 期望值在传输前从权威侧确定
    let mut expected = item.expected();
    expected.hash = Some(remote_hash(ctx, item).await?);

    debug!("{} {}", item.full_name(), TransferStage::Transferring);
    let started = Instant::now();
    let bytes = ctx.remote.download(item, temp).await?;
    let elapsed = started.elapsed();

    info!(
        "下载 {} KB 用时 {}ms ({:.2} KB/s)，{}文件 {}",
        bytes / 1024,
        elapsed.as_millis(),
        throughput_kbps(bytes, elapsed),
        mode(replace),
        item.full_name()
    );

    debug!("{} {}", item.full_name(), TransferStage::Verifying);
    if !ctx.local.verify_checksum(temp, &expected).await? {
        return Err(SyncError::ChecksumMismatch {
            path: item.full_name(),
            expected: expected
                .hash
                .clone()
                .unwrap_or_else(|| format!("{} bytes", expected.size)),
            actual: format!("{:?}", temp),
        });
    }

    debug!("{} {}", item.full_name(), TransferStage::Finalizing);
    ctx.local
        .set_timestamps(temp, item.created, item.modified)
        .await?;
    ctx.local
        .atomic_replace(temp, &parent.join(&item.name))
        .await?;

    ctx.reporter.file_downloaded(replace, item.size);
    Ok(())
}

/// 上传本地条目到远程目录
pub(crate) async fn upload(
    ctx: &TaskContext,
    parent: &RemoteItem,
    source: &LocalEntry,
    rel: &str,
    replace: bool,
) -> Result<()> {
    if source.is_folder() {
        let folder = ctx.remote.create_folder(parent, &source.name).await?;
        info!("创建远程目录 {}", folder.full_name());
        ctx.reporter.folder_created();
        ctx.queue.add(Task::check(folder, source.path.clone(), rel.to_string()));
        return Ok(());
    }

    // 以当前文件状态为准，列目录之后文件可能已经变化
    let current = ctx.local.stat(&source.path).await?.ok_or_else(|| {
        SyncError::InvalidItem(format!("{:?} 已不存在", source.path))
    })?;
    if current.is_folder() {
        return Err(SyncError::TypeMismatch {
            path: rel.to_string(),
            message: "文件已变为目录".to_string(),
        });
    }

    let local_hash = ctx.local.hash(&source.path).await?;

    debug!("{:?} {}", source.path, TransferStage::Transferring);
    let started = Instant::now();
    let uploaded = ctx.remote.upload(&source.path, parent, &source.name).await?;
    let elapsed = started.elapsed();

    info!(
        "上传 {} KB 用时 {}ms ({:.2} KB/s)，{}文件 {}",
        current.size / 1024,
        elapsed.as_millis(),
        throughput_kbps(current.size, elapsed),
        mode(replace),
        uploaded.full_name()
    );

    debug!("{:?} {}", source.path, TransferStage::Verifying);
    if uploaded.size != current.size {
        return Err(SyncError::ChecksumMismatch {
            path: uploaded.full_name(),
            expected: format!("{} bytes", current.size),
            actual: format!("{} bytes", uploaded.size),
        });
    }
    let stored_hash = remote_hash(ctx, &uploaded).await?;
    if !stored_hash.eq_ignore_ascii_case(&local_hash) {
        return Err(SyncError::ChecksumMismatch {
            path: uploaded.full_name(),
            expected: local_hash,
            actual: stored_hash,
        });
    }

    ctx.reporter.file_uploaded(replace, current.size);
    Ok(())
}
