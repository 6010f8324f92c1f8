//! 同步位置解析：`s3://bucket/prefix` 或本地目录

use crate::error::{Result, SyncError};
use std::fmt;
use std::path::{Component, Path, PathBuf};

const S3_SCHEME: &str = "s3://";

/// 同步的一端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// S3 存储桶，prefix 不含首尾的 `/`
    S3 { bucket: String, prefix: String },
    /// 本地目录
    Local(PathBuf),
}

impl Location {
    /// 解析位置字符串
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SyncError::Validation("位置不能为空".to_string()));
        }

        if let Some(rest) = raw.strip_prefix(S3_SCHEME) {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            validate_bucket(bucket)?;
            return Ok(Location::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.trim_matches('/').to_string(),
            });
        }

        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(SyncError::Validation(format!(
                "不支持的协议 '{}': {}",
                scheme, raw
            )));
        }

        Ok(Location::Local(normalize_local(Path::new(raw))))
    }

    pub fn is_s3(&self) -> bool {
        matches!(self, Location::S3 { .. })
    }

    /// 判断两个位置是否指向同一处（或互相包含）
    pub fn overlaps(&self, other: &Location) -> bool {
        match (self, other) {
            (
                Location::S3 { bucket: b1, prefix: p1 },
                Location::S3 { bucket: b2, prefix: p2 },
            ) => b1 == b2 && (key_contains(p1, p2) || key_contains(p2, p1)),
            (Location::Local(a), Location::Local(b)) => {
                let a = canonical_or_self(a);
                let b = canonical_or_self(b);
                a.starts_with(&b) || b.starts_with(&a)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::S3 { bucket, prefix } if prefix.is_empty() => {
                write!(f, "{}{}", S3_SCHEME, bucket)
            }
            Location::S3 { bucket, prefix } => write!(f, "{}{}/{}", S3_SCHEME, bucket, prefix),
            Location::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// 校验源与目标：格式合法且不相同
pub fn validate_pair(source: &str, target: &str) -> Result<(Location, Location)> {
    let source = Location::parse(source)?;
    let target = Location::parse(target)?;

    if source.overlaps(&target) {
        return Err(SyncError::Validation(format!(
            "源和目标不能相同或互相包含: {} / {}",
            source, target
        )));
    }

    Ok((source, target))
}

/// S3 存储桶命名规则（简化版）
fn validate_bucket(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(SyncError::Validation("S3 地址缺少存储桶名".to_string()));
    }
    if !(3..=63).contains(&bucket.len()) {
        return Err(SyncError::Validation(format!(
            "存储桶名长度必须在 3 到 63 之间: {}",
            bucket
        )));
    }

    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);

    if !valid_chars || !valid_edges {
        return Err(SyncError::Validation(format!("存储桶名不合法: {}", bucket)));
    }
    Ok(())
}

/// prefix 是否包含 key（按路径段）
fn key_contains(prefix: &str, key: &str) -> bool {
    prefix.is_empty() || key == prefix || key.starts_with(&format!("{}/", prefix))
}

/// 去掉 `.` 和多余的分隔符，不访问文件系统
fn normalize_local(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// 目录存在时比较规范化路径，不存在时比较绝对路径
fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
