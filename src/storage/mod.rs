pub mod local;
pub mod s3;

use crate::config::StorageOptions;
use crate::credentials;
use crate::error::SyncError;
use crate::location::Location;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub use local::LocalStorage;
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 存储返回的原始条目
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    pub is_dir: bool,
    pub checksum: Option<String>,
}

/// 列举结果流，按页拉取，直到结束或出错
pub type FileStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// 存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有对象；位置不存在时返回 None
    async fn list(&self) -> Result<Option<FileStream<'_>>>;

    /// 读取整个对象
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个对象，对读者来说要么是旧内容要么是新内容
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除对象，不存在时不报错
    async fn delete(&self, path: &str) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据位置创建存储实例
///
/// 只有 S3 位置才会解析凭证，解析失败返回 `SyncError::Auth`。
pub async fn create_storage(
    location: &Location,
    options: &StorageOptions,
) -> Result<Arc<dyn Storage>, SyncError> {
    match location {
        Location::Local(path) => {
            tracing::info!("初始化本地存储: {}", path.display());
            Ok(Arc::new(LocalStorage::new(path.clone())) as Arc<dyn Storage>)
        }
        Location::S3 { bucket, prefix } => {
            let creds = credentials::resolve(
                options.access_key.as_deref(),
                options.secret_key.as_deref(),
            )?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, options.region);
            let storage = S3Storage::new(
                bucket,
                prefix,
                &options.region,
                &creds,
                options.endpoint.as_deref(),
            )
            .map_err(|e| SyncError::Configuration(format!("创建 S3 客户端失败: {:#}", e)))?
            .with_etag_checksums(!options.ignore_etag);
            if options.ignore_etag {
                tracing::info!("{}: 忽略 ETag，只按大小比较", storage.name());
            }
            Ok(Arc::new(storage) as Arc<dyn Storage>)
        }
    }
}
