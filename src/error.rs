//! 错误类型与分类
//!
//! 任务重试策略只依赖 [`ErrorClass`]：瞬时错误由同一个任务实例重试，
//! 永久错误立即计为失败，致命错误中止整次同步。

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 网络超时、限流、临时 IO 错误、校验不一致
    Transient,
    /// 类型冲突、元数据无效、不存在等，不重试
    Permanent,
    /// 授权失败、根目录无效、配置错误，中止整次运行
    Fatal,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("远程存储错误: {0}")]
    Remote(#[from] opendal::Error),

    #[error("本地文件错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("校验失败 {path}: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("类型冲突 {path}: {message}")]
    TypeMismatch { path: String, message: String },

    #[error("无效的条目 {0}")]
    InvalidItem(String),

    #[error("授权失败: {0}")]
    Authorization(String),

    #[error("远程根目录无效: {0}")]
    InvalidRoot(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// 构造带路径的本地 IO 错误
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Remote(e) => {
                if e.is_temporary() || e.kind() == opendal::ErrorKind::RateLimited {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            SyncError::Io { source, .. } => match source.kind() {
                io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            SyncError::ChecksumMismatch { .. } => ErrorClass::Transient,
            SyncError::TypeMismatch { .. } | SyncError::InvalidItem(_) | SyncError::Other(_) => {
                ErrorClass::Permanent
            }
            SyncError::Authorization(_) | SyncError::InvalidRoot(_) | SyncError::Config(_) => {
                ErrorClass::Fatal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// 远程条目不存在
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.kind() == opendal::ErrorKind::NotFound,
            SyncError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
