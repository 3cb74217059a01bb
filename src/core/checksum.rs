//! 内容校验（BLAKE3）

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// 流式读取缓冲区大小
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// 传输后用于校验的期望值，来自权威侧记录的元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub size: u64,
    /// 权威侧能提供 hash 时才校验内容
    pub hash: Option<String>,
}

/// 计算内存数据的 hash
pub fn calculate_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// 增量 hash，分块读取的内容逐块喂入，结果与 [`calculate_hash`] 一致
#[derive(Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(&self) -> String {
        self.inner.finalize().to_hex().to_string()
    }
}

/// 流式计算文件的 hash（阻塞，调用方负责放到 spawn_blocking 中）
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finish())
}

/// 校验结果不一致时的描述，匹配时返回 None
pub fn mismatch(expected: &Expected, size: u64, hash: Option<&str>) -> Option<(String, String)> {
    if expected.size != size {
        return Some((
            format!("{} bytes", expected.size),
            format!("{} bytes", size),
        ));
    }

    match (&expected.hash, hash) {
        (Some(want), Some(got)) if !want.eq_ignore_ascii_case(got) => {
            Some((want.clone(), got.to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_file_matches_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(hash_file(&path).unwrap(), calculate_hash(&data));
    }

    #[test]
    fn test_chunked_hash_matches_whole() {
        let data = b"split across several uneven chunks";
        let mut hasher = ContentHasher::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finish(), calculate_hash(data));
    }

    #[test]
    fn test_mismatch() {
        let expected = Expected {
            size: 3,
            hash: Some(calculate_hash(b"abc")),
        };
        assert!(mismatch(&expected, 3, Some(&calculate_hash(b"abc"))).is_none());
        assert!(mismatch(&expected, 3, Some(&calculate_hash(b"abd"))).is_some());
        assert!(mismatch(&expected, 4, None).is_some());

        // 无 hash 时只比较大小
        let size_only = Expected { size: 3, hash: None };
        assert!(mismatch(&size_only, 3, Some("whatever")).is_none());
    }
}
