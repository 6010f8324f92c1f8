//! 应用配置模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 默认并发传输数
pub const DEFAULT_CONCURRENCY: usize = 20;
/// 默认 S3 区域
pub const DEFAULT_REGION: &str = "us-east-1";

/// 存储连接参数
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub region: String,
    /// 自定义 endpoint（MinIO、R2 等 S3 兼容服务）
    pub endpoint: Option<String>,
    /// 显式 access key，为空时读取环境变量
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// ETag 不是内容 MD5（SSE-KMS / SSE-C 加密的桶）时设为 true
    pub ignore_etag: bool,
}

/// 同步配置，构造 `SyncEngine` 时传入
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数
    pub concurrency: usize,
    /// 镜像模式：删除目标中源不存在的对象
    pub mirror: bool,
    /// 单个传输的超时时间，None 表示不限
    pub item_timeout: Option<Duration>,
    pub storage: StorageOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            mirror: false,
            item_timeout: None,
            storage: StorageOptions {
                region: DEFAULT_REGION.to_string(),
                ..Default::default()
            },
        }
    }
}

/// 配置文件（JSON），所有字段可省略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,
    #[serde(default)]
    pub mirror: bool,
    /// 单个传输超时（秒），0 表示不限
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 加密桶的 ETag 不是 MD5，只按大小比较
    #[serde(default)]
    pub ignore_etag: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_concurrent() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            concurrent: default_concurrent(),
            mirror: false,
            timeout_secs: 0,
            region: default_region(),
            endpoint: None,
            ignore_etag: false,
            log_level: default_log_level(),
        }
    }
}

impl FileConfig {
    /// 从配置文件加载；文件是显式指定的，读取或解析失败都返回错误
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件 {} 失败", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件 {} 失败", path.display()))
    }

    /// 转换为同步配置（不含凭证）
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            concurrency: self.concurrent,
            mirror: self.mirror,
            item_timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            storage: StorageOptions {
                region: self.region.clone(),
                endpoint: self.endpoint.clone(),
                access_key: None,
                secret_key: None,
                ignore_etag: self.ignore_etag,
            },
        }
    }
}
