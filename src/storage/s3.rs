use super::{FileInfo, FileStream, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::credentials::Credentials;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct S3Storage {
    operator: Operator,
    name: String,
    /// ETag 是否等于内容 MD5；SSE-KMS / SSE-C 加密的桶不是
    etag_is_md5: bool,
}

impl S3Storage {
    pub fn new(
        bucket: &str,
        prefix: &str,
        region: &str,
        credentials: &Credentials,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(&credentials.access_key)
            .secret_access_key(&credentials.secret_key);

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if !prefix.is_empty() {
            builder = builder.root(&format!("/{}/", prefix));
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = if prefix.is_empty() {
            format!("s3://{}", bucket)
        } else {
            format!("s3://{}/{}", bucket, prefix)
        };

        Ok(Self {
            operator,
            name,
            etag_is_md5: true,
        })
    }

    /// 列举接口不返回加密信息，加密桶需要显式关闭，此时只按大小比较
    pub fn with_etag_checksums(mut self, enabled: bool) -> Self {
        self.etag_is_md5 = enabled;
        self
    }
}

/// ETag 转为内容校验和
///
/// 多段上传的 ETag 形如 `<md5>-<parts>`，不是内容的 MD5；
/// 不是 32 位十六进制的也不当作 MD5。
fn etag_checksum(etag: Option<&str>, etag_is_md5: bool) -> Option<String> {
    if !etag_is_md5 {
        return None;
    }
    etag.map(|s| s.trim_matches('"'))
        .filter(|s| s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|s| s.to_lowercase())
}

#[async_trait]
impl Storage for S3Storage {
    async fn list(&self) -> Result<Option<FileStream<'_>>> {
        // lister 内部按 continuation token 翻页
        let lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode | Metakey::Etag)
            .await
            .with_context(|| format!("列举 {} 失败", self.name))?;

        let etag_is_md5 = self.etag_is_md5;
        let stream = lister
            .map_err(anyhow::Error::from)
            .filter_map(move |entry| async move {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(e)),
                };
                let path = entry.path().trim_start_matches('/').to_string();

                // 跳过根目录
                if path.is_empty() {
                    return None;
                }

                let meta = entry.metadata();
                Some(Ok(FileInfo {
                    is_dir: meta.is_dir() || path.ends_with('/'),
                    path,
                    size: meta.content_length(),
                    modified_time: meta
                        .last_modified()
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    checksum: etag_checksum(meta.etag(), etag_is_md5),
                }))
            });

        Ok(Some(Box::pin(stream)))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = self
            .operator
            .read(path)
            .await
            .with_context(|| format!("读取 {}/{} 失败", self.name, path))?;
        Ok(data.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        // PUT 本身是原子的
        self.operator
            .write(path, data)
            .await
            .with_context(|| format!("写入 {}/{} 失败", self.name, path))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        // S3 删除不存在的文件不会报错
        self.operator
            .delete(path)
            .await
            .with_context(|| format!("删除 {}/{} 失败", self.name, path))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_checksum() {
        assert_eq!(
            etag_checksum(Some("\"9E107D9D372BB6826BD81D3542A419D6\""), true).as_deref(),
            Some("9e107d9d372bb6826bd81d3542a419d6")
        );
        assert_eq!(etag_checksum(Some("\"9e107d9d372bb6826bd81d3542a419d6-4\""), true), None);
        assert_eq!(etag_checksum(Some("\"abc123\""), true), None);
        assert_eq!(etag_checksum(Some("\"\""), true), None);
        assert_eq!(etag_checksum(None, true), None);
    }

    #[test]
    fn test_encrypted_bucket_etags_are_ignored() {
        // SSE-KMS 的 ETag 同样是 32 位十六进制，但不是内容 MD5
        let kms_etag = Some("\"0f343b0931126a20f133d67c2b018a3b\"");
        assert!(etag_checksum(kms_etag, true).is_some());
        assert_eq!(etag_checksum(kms_etag, false), None);

        let creds = Credentials {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
        };
        let storage = S3Storage::new("my-bucket", "", "us-east-1", &creds, None)
            .unwrap()
            .with_etag_checksums(false);
        assert!(!storage.etag_is_md5);
    }

    #[test]
    fn test_name() {
        let creds = Credentials {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
        };
        let root = S3Storage::new("my-bucket", "", "us-east-1", &creds, None).unwrap();
        assert_eq!(root.name(), "s3://my-bucket");

        let nested = S3Storage::new(
            "my-bucket",
            "backup/2024",
            "us-east-1",
            &creds,
            Some("http://localhost:9000"),
        )
        .unwrap();
        assert_eq!(nested.name(), "s3://my-bucket/backup/2024");
    }
}
