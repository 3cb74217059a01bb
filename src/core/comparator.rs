use chrono::{DateTime, Utc};

/// 文件比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// 内容相同（hash 一致）
    Equal,
    /// 需要传输
    Different,
    /// 大小相同，需要比较 hash 才能确定
    NeedsHash,
    /// 可能相同（大小相同，无法进一步确认）
    ProbablyEqual,
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 时间容差（秒）
    pub time_tolerance_seconds: i64,
    /// 大小相同时也总是比较 hash
    pub hash_compare: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 2,
            hash_compare: false,
        }
    }
}

/// 参与比较的一侧文件元数据
#[derive(Debug, Clone, Copy)]
pub struct FileSide {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// 文件比较器
#[derive(Debug, Clone, Default)]
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn new(hash_compare: bool) -> Self {
        Self {
            config: CompareConfig {
                hash_compare,
                ..Default::default()
            },
        }
    }

    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 按元数据比较权威侧与目标侧
    pub fn compare(&self, source: &FileSide, target: &FileSide) -> FileRelation {
        // 大小不同，肯定不同
        if source.size != target.size {
            return FileRelation::Different;
        }

        if self.config.hash_compare || self.times_differ(source.modified, target.modified) {
            FileRelation::NeedsHash
        } else {
            FileRelation::ProbablyEqual
        }
    }

    /// 比较 hash，任一侧缺失时无法判断
    pub fn compare_hashes(&self, source: Option<&str>, target: Option<&str>) -> FileRelation {
        match (source, target) {
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => FileRelation::Equal,
            (Some(_), Some(_)) => FileRelation::Different,
            _ => FileRelation::ProbablyEqual,
        }
    }

    /// 时间差超过容差才算不同，缺少时间时视为相同
    fn times_differ(&self, a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => (a - b).num_seconds().abs() > self.config.time_tolerance_seconds,
            _ => false,
        }
    }
}
