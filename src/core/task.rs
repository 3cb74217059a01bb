//! 任务定义与重试策略

use super::check;
use super::comparator::FileComparator;
use super::filter::ItemFilter;
use super::queue::{Prioritized, TaskQueue};
use super::reporter::TaskReporter;
use super::transfer;
use crate::config::{DeletePolicy, Direction, SyncConfig};
use crate::error::{Result, SyncError};
use crate::storage::{LocalEntry, LocalStore, RemoteItem, RemoteStore};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// 目录检查优先，尽快展开待处理的工作
pub const CHECK_PRIORITY: u32 = 10;
/// 下载先于上传
pub const DOWNLOAD_PRIORITY: u32 = 50;
pub const UPLOAD_PRIORITY: u32 = 60;

/// 一次运行内所有任务共享的只读设置
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub direction: Direction,
    /// 每个任务的最大尝试次数
    pub tries: u32,
    pub retry_base_delay: Duration,
    pub recursive: bool,
    pub delete_policy: DeletePolicy,
    pub filter: ItemFilter,
    pub comparator: FileComparator,
}

impl TaskSettings {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let direction = config
            .direction
            .ok_or_else(|| SyncError::Config("未指定同步方向".to_string()))?;

        Ok(Self {
            direction,
            tries: config.tries.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            recursive: config.recursive,
            delete_policy: config.delete_policy,
            filter: ItemFilter::new(&config.ignore, config.max_size_bytes())?,
            comparator: FileComparator::new(config.hash_compare),
        })
    }

    /// 第 n 次失败后的等待时间（指数退避）
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay.saturating_mul(factor)
    }
}

/// 任务执行时使用的共享服务
#[derive(Clone)]
pub struct TaskContext {
    pub queue: Arc<TaskQueue<Task>>,
    pub remote: Arc<dyn RemoteStore>,
    pub local: Arc<dyn LocalStore>,
    pub reporter: Arc<TaskReporter>,
    pub settings: Arc<TaskSettings>,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    /// 比较远程目录和本地目录
    Check {
        remote: RemoteItem,
        local: PathBuf,
        /// 相对同步根目录的路径，用于忽略规则
        rel: String,
    },
    /// 上传本地文件，或创建远程目录后检查其内容
    Upload {
        parent: RemoteItem,
        source: LocalEntry,
        rel: String,
        replace: bool,
    },
    /// 下载远程文件，或创建本地目录后检查其内容
    Download {
        item: RemoteItem,
        parent: PathBuf,
        rel: String,
        replace: bool,
    },
}

/// 队列中的一个工作单元
#[derive(Debug, Clone)]
pub struct Task {
    kind: TaskKind,
    attempts: u32,
}

impl Task {
    pub fn check(remote: RemoteItem, local: PathBuf, rel: String) -> Self {
        Self::from_kind(TaskKind::Check { remote, local, rel })
    }

    pub fn upload(parent: RemoteItem, source: LocalEntry, rel: String, replace: bool) -> Self {
        Self::from_kind(TaskKind::Upload {
            parent,
            source,
            rel,
            replace,
        })
    }

    pub fn download(item: RemoteItem, parent: PathBuf, rel: String, replace: bool) -> Self {
        Self::from_kind(TaskKind::Download {
            item,
            parent,
            rel,
            replace,
        })
    }

    fn from_kind(kind: TaskKind) -> Self {
        Self { kind, attempts: 0 }
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 执行任务直到成功、永久失败或重试次数用尽
    ///
    /// 每个终态恰好更新一次统计：成功由具体任务计数，失败在这里计数。
    pub async fn run(&mut self, ctx: &TaskContext) {
        loop {
            self.attempts += 1;

            let err = match self.execute(ctx).await {
                Ok(()) => return,
                Err(e) => e,
            };

            if err.is_transient() && self.attempts < ctx.settings.tries {
                let delay = ctx.settings.retry_delay(self.attempts);
                warn!(
                    "{} 失败，{}ms 后重试 ({}/{}): {}",
                    self,
                    delay.as_millis(),
                    self.attempts,
                    ctx.settings.tries,
                    err
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if err.is_transient() {
                error!("{} 最终失败 (已尝试{}次): {}", self, self.attempts, err);
            } else {
                error!("{} 失败: {}", self, err);
            }
            ctx.reporter.failed();
            return;
        }
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        match &self.kind {
            TaskKind::Check { remote, local, rel } => check::check_folder(ctx, remote, local, rel).await,
            TaskKind::Upload {
                parent,
                source,
                rel,
                replace,
            } => transfer::upload(ctx, parent, source, rel, *replace).await,
            TaskKind::Download {
                item,
                parent,
                rel,
                replace,
            } => transfer::download(ctx, item, parent, rel, *replace).await,
        }
    }
}

impl Prioritized for Task {
    fn priority(&self) -> u32 {
        match self.kind {
            TaskKind::Check { .. } => CHECK_PRIORITY,
            TaskKind::Download { .. } => DOWNLOAD_PRIORITY,
            TaskKind::Upload { .. } => UPLOAD_PRIORITY,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TaskKind::Check { remote, .. } => write!(f, "检查 {}", remote.full_name()),
            TaskKind::Upload { source, .. } => write!(f, "上传 {:?}", source.path),
            TaskKind::Download { item, .. } => write!(f, "下载 {}", item.full_name()),
        }
    }
}
