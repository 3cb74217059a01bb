//! 同步配置模块

use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 同步方向，决定哪一侧是权威侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 本地为权威侧，上传到远程
    Up,
    /// 远程为权威侧，下载到本地
    Down,
}

impl std::str::FromStr for Direction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(SyncError::Config(format!(
                "无效的同步方向 '{}'，只支持 up 或 down",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// 非权威侧多余条目的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// 保留
    #[default]
    Keep,
    /// 从非权威侧删除
    Delete,
}

/// 远程存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// 已挂载的目录（例如网盘客户端的同步目录）
    Fs { root: String },
    Webdav {
        endpoint: String,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
    S3 {
        bucket: String,
        region: String,
        access_key_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
    /// 进程内存储，仅用于测试和演练
    Memory,
}

impl RemoteConfig {
    /// 是否需要凭据
    pub fn needs_credentials(&self) -> bool {
        matches!(self, RemoteConfig::Webdav { .. } | RemoteConfig::S3 { .. })
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig::Memory
    }
}

/// 一次同步运行的完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SyncConfig {
    pub local_path: Option<PathBuf>,
    pub remote_path: Option<String>,
    pub direction: Option<Direction>,
    /// 并发工作者数量
    pub threads: usize,
    /// 每个任务的最大尝试次数
    pub tries: u32,
    /// 重试基础延迟（毫秒），按 2 的幂次递增
    pub retry_base_delay_ms: u64,
    pub dry_run: bool,
    /// 是否递归进入子目录
    pub recursive: bool,
    /// 大小一致时也总是比较 hash
    pub hash_compare: bool,
    /// 最大文件大小（KB），0 表示不限制
    pub max_size_kb: u64,
    /// 忽略规则（glob）
    pub ignore: Vec<String>,
    pub delete_policy: DeletePolicy,
    /// 分块传输大小（MB）
    pub chunk_size_mb: u64,
    pub key_file: Option<PathBuf>,
    pub remote: RemoteConfig,
    pub log: LogConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_path: None,
            direction: None,
            threads: 5,
            tries: 3,
            retry_base_delay_ms: 1000,
            dry_run: false,
            recursive: true,
            hash_compare: false,
            max_size_kb: 0,
            ignore: Vec::new(),
            delete_policy: DeletePolicy::Keep,
            chunk_size_mb: 8,
            key_file: None,
            remote: RemoteConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    /// 从配置文件加载，文件不存在时返回默认配置
    pub fn load(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(config_file).map_err(|e| SyncError::io(config_file, e))?;
        serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("无法解析配置文件 {:?}: {}", config_file, e)))
    }

    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        crate::dirs::config_dir()
            .map(|p| p.join("drivesync"))
            .unwrap_or_else(|| PathBuf::from(".drivesync"))
            .join("config.json")
    }

    /// 读取忽略文件，每行一个 glob，`#` 开头为注释
    pub fn load_ignore_file(&mut self, ignore_file: &Path) -> Result<()> {
        let content = fs::read_to_string(ignore_file).map_err(|e| SyncError::io(ignore_file, e))?;
        self.ignore.extend(parse_ignore_lines(&content));
        Ok(())
    }

    /// 检查运行前必须满足的条件
    pub fn validate(&self) -> Result<()> {
        if self.local_path.is_none() || self.remote_path.is_none() || self.direction.is_none() {
            return Err(SyncError::Config(
                "必须指定 --local、--remote 和 --direction".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(SyncError::Config("threads 必须大于 0".to_string()));
        }
        if self.tries == 0 {
            return Err(SyncError::Config("tries 必须大于 0".to_string()));
        }
        if self.chunk_size_mb == 0 {
            return Err(SyncError::Config("chunk_size_mb 必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn max_size_bytes(&self) -> Option<u64> {
        (self.max_size_kb > 0).then(|| self.max_size_kb * 1024)
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb.max(1) * 1024 * 1024
    }
}

fn parse_ignore_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}
