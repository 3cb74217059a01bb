use super::{ItemKind, LocalEntry, LocalStore};
use crate::core::checksum::{self, Expected};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地文件系统
#[derive(Debug, Default, Clone)]
pub struct FsLocalStore;

impl FsLocalStore {
    pub fn new() -> Self {
        Self
    }

    fn entry_from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> LocalEntry {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_dir = metadata.is_dir();

        LocalEntry {
            path,
            name,
            kind: if is_dir { ItemKind::Folder } else { ItemKind::File },
            size: if is_dir { 0 } else { metadata.len() },
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }

    /// 临时文件名：`<name>.<8位随机十六进制>.tmp`
    pub fn temp_name(name: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}.{}.tmp", name, &suffix[..8])
    }
}

fn join_error(e: tokio::task::JoinError) -> SyncError {
    SyncError::Other(format!("后台任务失败: {}", e))
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn create_folder(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        let path = parent.join(name);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        Ok(path)
    }

    async fn create_temp_file(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        let path = parent.join(Self::temp_name(name));
        fs::File::create(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        Ok(path)
    }

    async fn verify_checksum(&self, path: &Path, expected: &Expected) -> Result<bool> {
        let size = fs::metadata(path)
            .await
            .map_err(|e| SyncError::io(path, e))?
            .len();

        let hash = match expected.hash {
            Some(_) if size == expected.size => Some(self.hash(path).await?),
            _ => None,
        };

        match checksum::mismatch(expected, size, hash.as_deref()) {
            Some((want, got)) => {
                tracing::warn!("校验不一致 {:?}: 期望 {}, 实际 {}", path, want, got);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    async fn set_timestamps(
        &self,
        path: &Path,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(modified) = modified {
            let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
            filetime::set_file_mtime(path, mtime).map_err(|e| SyncError::io(path, e))?;
        }
        if created.is_some() {
            // 大多数平台无法直接设置创建时间
            tracing::trace!("忽略创建时间 {:?}", path);
        }
        Ok(())
    }

    async fn atomic_replace(&self, temp: &Path, target: &Path) -> Result<()> {
        fs::rename(temp, target)
            .await
            .map_err(|e| SyncError::io(target, e))
    }

    async fn list_entries(&self, path: &Path) -> Result<Vec<LocalEntry>> {
        let base = path.to_path_buf();
        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<LocalEntry>> {
            let mut entries = Vec::new();
            if !base.exists() {
                return Ok(entries);
            }
            for entry in WalkDir::new(&base).min_depth(1).max_depth(1).follow_links(false) {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone());
                    SyncError::io(path, e.into())
                })?;

                if entry.path_is_symlink() {
                    tracing::debug!("跳过符号链接 {:?}", entry.path());
                    continue;
                }

                let metadata = entry
                    .metadata()
                    .map_err(|e| SyncError::io(entry.path(), e.into()))?;
                entries.push(Self::entry_from_metadata(entry.into_path(), &metadata));
            }
            Ok(entries)
        })
        .await
        .map_err(join_error)??;

        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<Option<LocalEntry>> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(Some(Self::entry_from_metadata(path.to_path_buf(), &metadata))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || checksum::hash_file(&owned))
            .await
            .map_err(join_error)?
            .map_err(|e| SyncError::io(path, e))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let metadata = match fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SyncError::io(path, e)),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };
        result.map_err(|e| SyncError::io(path, e))
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("删除临时文件失败 {:?}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_list_entries_is_shallow() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("deep.txt"), b"x").unwrap();

        let mut entries = FsLocalStore::new().list_entries(dir.path()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 10);
        assert_eq!(entries[1].kind, ItemKind::Folder);
    }

    #[tokio::test]
    async fn test_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let entries = FsLocalStore::new()
            .list_entries(&dir.path().join("nope"))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_temp_file_replace_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLocalStore::new();
        let target = dir.path().join("report.pdf");
        std::fs::write(&target, b"old").unwrap();

        let temp = store.create_temp_file(dir.path(), "report.pdf").await.unwrap();
        let temp_name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(temp_name.starts_with("report.pdf."));
        assert!(temp_name.ends_with(".tmp"));
        assert_eq!(temp_name.len(), "report.pdf.".len() + 8 + ".tmp".len());

        std::fs::write(&temp, b"new content").unwrap();
        let expected = Expected {
            size: 11,
            hash: Some(checksum::calculate_hash(b"new content")),
        };
        assert!(store.verify_checksum(&temp, &expected).await.unwrap());

        let modified = Utc.with_ymd_and_hms(2020, 5, 17, 8, 30, 0).unwrap();
        store.set_timestamps(&temp, None, Some(modified)).await.unwrap();
        store.atomic_replace(&temp, &target).await.unwrap();

        assert!(!temp.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"new content");
        let entry = store.stat(&target).await.unwrap().unwrap();
        assert_eq!(entry.modified.unwrap().timestamp(), modified.timestamp());
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, b"abc").unwrap();

        let expected = Expected {
            size: 3,
            hash: Some(checksum::calculate_hash(b"abd")),
        };
        assert!(!FsLocalStore::new().verify_checksum(&path, &expected).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLocalStore::new();
        store.delete(&dir.path().join("ghost")).await.unwrap();

        let sub = store.create_folder(dir.path(), "sub").await.unwrap();
        std::fs::write(sub.join("f"), b"1").unwrap();
        store.delete(&sub).await.unwrap();
        assert!(!sub.exists());
    }
}
