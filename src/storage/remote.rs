//! 基于 OpenDAL 的远程存储实现

use super::{DriveInfo, ItemKind, RemoteItem, RemoteStore};
use crate::core::checksum::ContentHasher;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{Metakey, Operator};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct OpendalRemote {
    operator: Operator,
    name: String,
    chunk_size: u64,
}

impl OpendalRemote {
    pub fn new(operator: Operator, name: String, chunk_size: u64) -> Self {
        Self {
            operator,
            name,
            chunk_size: chunk_size.max(1),
        }
    }

    /// 以本地目录作为远程（例如网盘客户端挂载的目录）
    pub fn fs(root: &str, chunk_size: u64) -> Result<Self> {
        use opendal::services::Fs;

        std::fs::create_dir_all(root).map_err(|e| SyncError::io(root, e))?;
        let operator = Operator::new(Fs::default().root(root))?.finish();
        Ok(Self::new(operator, format!("fs://{}", root), chunk_size))
    }

    /// 进程内存储
    pub fn memory(chunk_size: u64) -> Result<Self> {
        use opendal::services::Memory;

        let operator = Operator::new(Memory::default())?.finish();
        Ok(Self::new(operator, "memory://".to_string(), chunk_size))
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// OpenDAL 的目录路径必须以 `/` 结尾，根目录为 `/`
    fn dir_path(path: &str) -> String {
        if path.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }

    fn normalize(path: &str) -> String {
        path.replace('\\', "/").trim_matches('/').to_string()
    }

    fn item_from_meta(path: &str, meta: &opendal::Metadata) -> RemoteItem {
        let path = Self::normalize(path);
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let kind = if meta.is_dir() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };

        RemoteItem {
            path,
            name,
            kind,
            size: if meta.is_dir() { 0 } else { meta.content_length() },
            hash: None,
            created: None,
            modified: meta.last_modified(),
        }
    }
}

/// 尽量读满缓冲区，返回实际读取的字节数（0 表示文件结束）
async fn read_chunk(file: &mut fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl RemoteStore for OpendalRemote {
    async fn drive_info(&self) -> Result<DriveInfo> {
        let info = self.operator.info();
        Ok(DriveInfo {
            id: format!("{}{}", info.name(), info.root()),
            kind: info.scheme().to_string(),
            used: None,
            total: None,
        })
    }

    async fn resolve_path(&self, path: &str) -> Result<RemoteItem> {
        let path = Self::normalize(path);
        if path.is_empty() {
            return Ok(RemoteItem::folder(""));
        }

        match self.operator.stat(&path).await {
            Ok(meta) if meta.is_file() => return Ok(Self::item_from_meta(&path, &meta)),
            Ok(_) => {}
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let meta = self.operator.stat(&Self::dir_path(&path)).await?;
        Ok(Self::item_from_meta(&path, &meta))
    }

    async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>> {
        if !folder.is_folder() {
            return Err(SyncError::InvalidItem(format!(
                "{} 不是目录",
                folder.full_name()
            )));
        }

        let mut children = Vec::new();
        let mut lister = self
            .operator
            .lister_with(&Self::dir_path(&folder.path))
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path = Self::normalize(entry.path());

            // 跳过目录自身
            if path == folder.path {
                continue;
            }

            children.push(Self::item_from_meta(entry.path(), entry.metadata()));
        }

        Ok(children)
    }

    async fn download(&self, item: &RemoteItem, destination: &Path) -> Result<u64> {
        let meta = self.operator.stat(&item.path).await?;
        let total = meta.content_length();

        let mut file = fs::File::create(destination)
            .await
            .map_err(|e| SyncError::io(destination, e))?;

        let mut offset = 0u64;
        while offset < total {
            let end = (offset + self.chunk_size).min(total);
            let data = self
                .operator
                .read_with(&item.path)
                .range(offset..end)
                .await?
                .to_vec();

            if data.is_empty() {
                return Err(SyncError::io(
                    destination,
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "远程数据提前结束"),
                ));
            }

            file.write_all(&data)
                .await
                .map_err(|e| SyncError::io(destination, e))?;
            offset += data.len() as u64;
        }

        file.flush().await.map_err(|e| SyncError::io(destination, e))?;
        Ok(offset)
    }

    async fn hash(&self, item: &RemoteItem) -> Result<String> {
        let total = self.operator.stat(&item.path).await?.content_length();

        let mut hasher = ContentHasher::new();
        let mut offset = 0u64;
        while offset < total {
            let end = (offset + self.chunk_size).min(total);
            let data = self
                .operator
                .read_with(&item.path)
                .range(offset..end)
                .await?
                .to_vec();

            if data.is_empty() {
                return Err(opendal::Error::new(opendal::ErrorKind::Unexpected, "远程数据提前结束")
                    .set_temporary()
                    .into());
            }

            hasher.update(&data);
            offset += data.len() as u64;
        }

        Ok(hasher.finish())
    }

    async fn upload(&self, source: &Path, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        let path = parent.child_path(name);
        let mut file = fs::File::open(source)
            .await
            .map_err(|e| SyncError::io(source, e))?;

        let mut writer = self.operator.writer(&path).await?;
        let mut buf = vec![0u8; self.chunk_size as usize];
        loop {
            let n = read_chunk(&mut file, &mut buf)
                .await
                .map_err(|e| SyncError::io(source, e))?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await?;
        }
        writer.close().await?;

        let meta = self.operator.stat(&path).await?;
        Ok(Self::item_from_meta(&path, &meta))
    }

    async fn create_folder(&self, parent: &RemoteItem, name: &str) -> Result<RemoteItem> {
        let path = parent.child_path(name);
        self.operator.create_dir(&Self::dir_path(&path)).await?;
        Ok(RemoteItem::folder(&path))
    }

    async fn delete(&self, item: &RemoteItem) -> Result<()> {
        let result = if item.is_folder() {
            self.operator.remove_all(&Self::dir_path(&item.path)).await
        } else {
            self.operator.delete(&item.path).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
