//! 忽略规则与大小限制

use crate::error::{Result, SyncError};
use regex::Regex;

/// 始终排除的模式：传输过程中的临时文件
const BUILTIN_PATTERNS: &[&str] = &["*.tmp"];

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ignored,
    TooLarge,
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
    /// 不含 `/` 的模式只匹配名称，否则匹配相对路径
    match_path: bool,
}

/// 条目过滤器
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    patterns: Vec<Pattern>,
    /// 最大文件大小（字节）
    max_size: Option<u64>,
}

impl ItemFilter {
    pub fn new(patterns: &[String], max_size: Option<u64>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len() + BUILTIN_PATTERNS.len());
        for pattern in BUILTIN_PATTERNS
            .iter()
            .copied()
            .chain(patterns.iter().map(String::as_str))
        {
            let pattern = pattern.trim().trim_start_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
                SyncError::Config(format!("无效的忽略规则 '{}': {}", pattern, e))
            })?;
            compiled.push(Pattern {
                source: pattern.to_string(),
                regex,
                match_path: pattern.contains('/'),
            });
        }

        Ok(Self {
            patterns: compiled,
            max_size: max_size.filter(|&s| s > 0),
        })
    }

    /// 检查路径是否应该被排除
    ///
    /// `path` 为相对同步根目录、以 `/` 分隔的路径。
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_matches('/').to_lowercase();
        let name = path.rsplit('/').next().unwrap_or_default();

        self.patterns.iter().any(|p| {
            let matched = if p.match_path {
                p.regex.is_match(&path)
            } else {
                p.regex.is_match(name)
            };
            if matched {
                tracing::trace!("{} 匹配忽略规则 {}", path, p.source);
            }
            matched
        })
    }

    pub fn is_too_large(&self, size: u64) -> bool {
        self.max_size.is_some_and(|max| size > max)
    }

    /// 目录只按名称规则判断，文件还要检查大小
    pub fn skip_reason(&self, path: &str, is_folder: bool, size: u64) -> Option<SkipReason> {
        if self.is_ignored(path) {
            Some(SkipReason::Ignored)
        } else if !is_folder && self.is_too_large(size) {
            Some(SkipReason::TooLarge)
        } else {
            None
        }
    }
}

/// 简单的 glob 转正则：`**` 跨目录，`*` 和 `?` 不跨目录，大小写不敏感
fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.to_lowercase();

    // `dir/**` 同时匹配目录本身
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return format!("^{}(/.*)?$", glob_body(prefix));
    }
    format!("^{}$", glob_body(&pattern))
}

fn glob_body(pattern: &str) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}
