//! 同步结果统计

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// 同步报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub new_uploaded: u64,
    pub replaced_uploaded: u64,
    pub new_downloaded: u64,
    pub replaced_downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub deleted: u64,
    pub folders_created: u64,
    pub folders_checked: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    /// 耗时（毫秒）
    pub duration: u64,
}

impl SyncReport {
    pub fn uploaded(&self) -> u64 {
        self.new_uploaded + self.replaced_uploaded
    }

    pub fn downloaded(&self) -> u64 {
        self.new_downloaded + self.replaced_downloaded
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// 线程安全的计数器集合，所有工作者共享
#[derive(Debug)]
pub struct TaskReporter {
    new_uploaded: AtomicU64,
    replaced_uploaded: AtomicU64,
    new_downloaded: AtomicU64,
    replaced_downloaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    deleted: AtomicU64,
    folders_created: AtomicU64,
    folders_checked: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    started: Instant,
}

impl Default for TaskReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter {
    pub fn new() -> Self {
        Self {
            new_uploaded: AtomicU64::new(0),
            replaced_uploaded: AtomicU64::new(0),
            new_downloaded: AtomicU64::new(0),
            replaced_downloaded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            folders_created: AtomicU64::new(0),
            folders_checked: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn file_uploaded(&self, replace: bool, size: u64) {
        if replace {
            self.replaced_uploaded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.new_uploaded.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_uploaded.fetch_add(size, Ordering::Relaxed);
    }

    pub fn file_downloaded(&self, replace: bool, size: u64) {
        if replace {
            self.replaced_downloaded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.new_downloaded.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_downloaded.fetch_add(size, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn folder_created(&self) {
        self.folders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn folder_checked(&self) {
        self.folders_checked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncReport {
        SyncReport {
            new_uploaded: self.new_uploaded.load(Ordering::Relaxed),
            replaced_uploaded: self.replaced_uploaded.load(Ordering::Relaxed),
            new_downloaded: self.new_downloaded.load(Ordering::Relaxed),
            replaced_downloaded: self.replaced_downloaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            folders_created: self.folders_created.load(Ordering::Relaxed),
            folders_checked: self.folders_checked.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            duration: self.started.elapsed().as_millis() as u64,
        }
    }

    /// 输出汇总日志并返回报告
    pub fn report(&self) -> SyncReport {
        let report = self.snapshot();

        if report.failed > 0 {
            tracing::warn!("失败: {} 个条目", report.failed);
        }
        info!("跳过: {} 个文件（已同步或被过滤）", report.skipped);
        if report.uploaded() > 0 {
            info!(
                "上传: 新增 {}, 替换 {}, 共 {}",
                report.new_uploaded,
                report.replaced_uploaded,
                readable_file_size(report.bytes_uploaded)
            );
        }
        if report.downloaded() > 0 {
            info!(
                "下载: 新增 {}, 替换 {}, 共 {}",
                report.new_downloaded,
                report.replaced_downloaded,
                readable_file_size(report.bytes_downloaded)
            );
        }
        if report.deleted > 0 {
            info!("删除: {} 个条目", report.deleted);
        }
        info!(
            "检查目录 {} 个，新建目录 {} 个，耗时 {:.1}s",
            report.folders_checked,
            report.folders_created,
            report.duration as f64 / 1000.0
        );

        report
    }
}

/// 人类可读的文件大小，如 `1.5 MB`
pub fn readable_file_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", size)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
