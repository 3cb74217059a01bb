//! 目录比较：决定每个子条目需要的动作

use super::comparator::{FileRelation, FileSide};
use super::filter::SkipReason;
use super::task::{Task, TaskContext};
use super::transfer::remote_hash;
use crate::config::{DeletePolicy, Direction};
use crate::error::{Result, SyncError};
use crate::storage::{LocalEntry, RemoteItem};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info};

#[derive(Default)]
struct Pair {
    remote: Option<RemoteItem>,
    local: Option<LocalEntry>,
}

fn child_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", rel, name)
    }
}

/// 比较一个远程目录和对应的本地目录，为子条目加入后续任务
///
/// 只有列目录失败会让整个检查失败（并重试）。单个子条目的错误计为该条目失败，不影响其它条目。
pub(crate) async fn check_folder(
    ctx: &TaskContext,
    remote: &RemoteItem,
    local: &Path,
    rel: &str,
) -> Result<()> {
    let remote_children = ctx.remote.list_children(remote).await?;
    let local_entries = ctx.local.list_entries(local).await?;

    let mut pairs: BTreeMap<String, Pair> = BTreeMap::new();
    for item in remote_children {
        let key = item.name.clone();
        pairs.entry(key).or_default().remote = Some(item);
    }
    for entry in local_entries {
        let key = entry.name.clone();
        pairs.entry(key).or_default().local = Some(entry);
    }

    debug!("检查 {} <-> {:?}: {} 个条目", remote.full_name(), local, pairs.len());

    for (name, pair) in pairs {
        let rel = child_rel(rel, &name);
        if let Err(e) = reconcile(ctx, remote, local, &rel, pair).await {
            error!("处理 {} 失败: {}", rel, e);
            ctx.reporter.failed();
        }
    }

    ctx.reporter.folder_checked();
    Ok(())
}

async fn reconcile(
    ctx: &TaskContext,
    remote_parent: &RemoteItem,
    local_parent: &Path,
    rel: &str,
    pair: Pair,
) -> Result<()> {
    let settings = &ctx.settings;
    let authoritative_present = match settings.direction {
        Direction::Down => pair.remote.is_some(),
        Direction::Up => pair.local.is_some(),
    };

    let (is_folder, size) = match (settings.direction, &pair.remote, &pair.local) {
        (Direction::Down, Some(r), _) | (Direction::Up, Some(r), None) => (r.is_folder(), r.size),
        (_, _, Some(l)) => (l.is_folder(), l.size),
        (_, None, None) => return Ok(()),
    };

    if let Some(reason) = settings.filter.skip_reason(rel, is_folder, size) {
        // 被过滤的目标侧多余条目不计数，也不删除
        if authoritative_present {
            match reason {
                SkipReason::Ignored => debug!("忽略 {}", rel),
                SkipReason::TooLarge => info!("跳过过大的文件 {} ({} bytes)", rel, size),
            }
            ctx.reporter.skipped();
        }
        return Ok(());
    }

    match (pair.remote, pair.local) {
        (Some(remote), Some(local)) => match (remote.is_folder(), local.is_folder()) {
            (true, true) => {
                if settings.recursive {
                    ctx.queue.add(Task::check(remote, local.path, rel.to_string()));
                } else {
                    debug!("非递归模式，跳过子目录 {}", rel);
                }
                Ok(())
            }
            (false, false) => compare_files(ctx, remote_parent, local_parent, rel, remote, local).await,
            (remote_is_folder, _) => Err(SyncError::TypeMismatch {
                path: rel.to_string(),
                message: if remote_is_folder {
                    "远程是目录而本地是文件".to_string()
                } else {
                    "远程是文件而本地是目录".to_string()
                },
            }),
        },
        (Some(remote), None) => match settings.direction {
            Direction::Down => {
                if remote.is_folder() && !settings.recursive {
                    debug!("非递归模式，跳过子目录 {}", rel);
                } else {
                    ctx.queue.add(Task::download(
                        remote,
                        local_parent.to_path_buf(),
                        rel.to_string(),
                        false,
                    ));
                }
                Ok(())
            }
            Direction::Up => match settings.delete_policy {
                DeletePolicy::Keep => {
                    debug!("保留仅存在于远程的 {}", rel);
                    Ok(())
                }
                DeletePolicy::Delete => {
                    ctx.remote.delete(&remote).await?;
                    info!("已删除远程多余条目 {}", remote.full_name());
                    ctx.reporter.deleted();
                    Ok(())
                }
            },
        },
        (None, Some(local)) => match settings.direction {
            Direction::Up => {
                if local.is_folder() && !settings.recursive {
                    debug!("非递归模式，跳过子目录 {}", rel);
                } else {
                    ctx.queue.add(Task::upload(
                        remote_parent.clone(),
                        local,
                        rel.to_string(),
                        false,
                    ));
                }
                Ok(())
            }
            Direction::Down => match settings.delete_policy {
                DeletePolicy::Keep => {
                    debug!("保留仅存在于本地的 {}", rel);
                    Ok(())
                }
                DeletePolicy::Delete => {
                    ctx.local.delete(&local.path).await?;
                    info!("已删除本地多余条目 {:?}", local.path);
                    ctx.reporter.deleted();
                    Ok(())
                }
            },
        },
        (None, None) => Ok(()),
    }
}

/// 两侧都是文件：大小不同则传输，大小相同按需比较 hash
///
/// 远程列表不带 hash 时读取远程内容计算，不会因为拿不到 hash 就当作相同。
async fn compare_files(
    ctx: &TaskContext,
    remote_parent: &RemoteItem,
    local_parent: &Path,
    rel: &str,
    mut remote: RemoteItem,
    local: LocalEntry,
) -> Result<()> {
    let settings = &ctx.settings;
    let remote_side = FileSide {
        size: remote.size,
        modified: remote.modified,
    };
    let local_side = FileSide {
        size: local.size,
        modified: local.modified,
    };
    let (source, target) = match settings.direction {
        Direction::Down => (remote_side, local_side),
        Direction::Up => (local_side, remote_side),
    };

    let relation = match settings.comparator.compare(&source, &target) {
        FileRelation::NeedsHash => {
            let hash = remote_hash(ctx, &remote).await?;
            let local_hash = ctx.local.hash(&local.path).await?;
            let relation = settings
                .comparator
                .compare_hashes(Some(&hash), Some(&local_hash));
            // 下载时直接用作期望值
            remote.hash = Some(hash);
            relation
        }
        relation => relation,
    };

    match relation {
        FileRelation::Different => {
            debug!("{} 内容不同，需要替换", rel);
            enqueue_transfer(ctx, remote_parent, local_parent, rel, remote, local, true);
        }
        FileRelation::Equal => {
            // 内容相同但时间不同：本地为目标时同步修改时间
            if settings.direction == Direction::Down && remote.modified != local.modified {
                ctx.local
                    .set_timestamps(&local.path, remote.created, remote.modified)
                    .await?;
                debug!("{} 内容一致，已更新本地修改时间", rel);
            }
            ctx.reporter.skipped();
        }
        FileRelation::NeedsHash | FileRelation::ProbablyEqual => {
            ctx.reporter.skipped();
        }
    }

    Ok(())
}

fn enqueue_transfer(
    ctx: &TaskContext,
    remote_parent: &RemoteItem,
    local_parent: &Path,
    rel: &str,
    remote: RemoteItem,
    local: LocalEntry,
    replace: bool,
) {
    let task = match ctx.settings.direction {
        Direction::Down => Task::download(remote, local_parent.to_path_buf(), rel.to_string(), replace),
        Direction::Up => Task::upload(remote_parent.clone(), local, rel.to_string(), replace),
    };
    ctx.queue.add(task);
}
