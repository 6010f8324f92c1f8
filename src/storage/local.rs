use super::{FileInfo, FileStream, Storage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use scopeguard::ScopeGuard;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// 临时文件后缀，列举时跳过
const TEMP_SUFFIX: &str = ".s3sync-tmp";

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 目录不存在时不创建，第一次写入时再创建
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base_path = path.into();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    /// key 只能落在 base_path 之内，含 `..` 或绝对路径的 key 直接拒绝
    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => anyhow::bail!("非法的对象 key（超出同步目录）: {}", key),
            }
        }
        Ok(self.base_path.join(relative))
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn is_temp_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
            .unwrap_or(false)
    }

    /// 同目录下的唯一临时文件，保证 rename 不跨文件系统
    fn temp_path_for(full_path: &Path) -> PathBuf {
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        full_path.with_file_name(format!(
            ".{}.{}{}",
            file_name,
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ))
    }

    fn file_info(base: &Path, entry: &walkdir::DirEntry) -> Result<FileInfo> {
        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("读取元数据失败: {}", path.display()))?;
        let relative_path = path
            .strip_prefix(base)
            .with_context(|| format!("路径不在同步目录内: {}", path.display()))?
            .to_string_lossy()
            .to_string();

        let modified_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let checksum = if metadata.is_file() {
            Some(file_md5(path)?)
        } else {
            None
        };

        Ok(FileInfo {
            path: Self::normalize_path(&relative_path),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified_time,
            is_dir: metadata.is_dir(),
            checksum,
        })
    }
}

/// 计算文件 MD5（十六进制小写），与 S3 单段上传的 ETag 一致
pub fn file_md5(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("打开文件失败: {}", path.display()))?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("读取文件失败: {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// 计算内存数据的 MD5
pub fn bytes_md5(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list(&self) -> Result<Option<FileStream<'_>>> {
        match fs::metadata(&self.base_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => anyhow::bail!("{} 不是目录", self.base_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("无法访问 {}", self.base_path.display()))
            }
        }

        // 在阻塞线程里遍历并计算校验和，边走边发
        let (tx, rx) = mpsc::channel::<Result<FileInfo>>(256);
        let base = self.base_path.clone();
        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&base).follow_links(false).min_depth(1) {
                let item = match entry {
                    // 符号链接不同步
                    Ok(entry) if entry.path_is_symlink() || Self::is_temp_file(entry.path()) => {
                        continue
                    }
                    Ok(entry) => Self::file_info(&base, &entry),
                    Err(e) => Err(e.into()),
                };

                let failed = item.is_err();
                // 接收端已丢弃（列举被放弃），或已发出错误
                if tx.blocking_send(item).is_err() || failed {
                    break;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Some(Box::pin(stream)))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path)?;
        let data = fs::read(&full_path)
            .await
            .with_context(|| format!("读取 {} 失败", full_path.display()))?;
        Ok(data)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建目录 {} 失败", parent.display()))?;
        }

        // 使用临时文件写入，然后原子重命名
        // 任务被中途取消（超时 abort）时 guard 负责删除临时文件
        let temp_path = scopeguard::guard(Self::temp_path_for(&full_path), |path| {
            let _ = std::fs::remove_file(path);
        });
        fs::write(&*temp_path, data)
            .await
            .with_context(|| format!("写入 {} 失败", temp_path.display()))?;
        fs::rename(&*temp_path, &full_path)
            .await
            .with_context(|| format!("重命名到 {} 失败", full_path.display()))?;
        // 已重命名，无需清理
        let _ = ScopeGuard::into_inner(temp_path);

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("删除 {} 失败", full_path.display())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
