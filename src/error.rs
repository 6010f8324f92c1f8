//! 错误类型

use crate::core::SyncReport;
use std::time::Duration;
use thiserror::Error;

/// 同步错误
///
/// 除 `PartialFailure` 外均为致命错误：在任何传输开始前（或列举阶段）中止整个运行。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 参数错误、源与目标相同等
    #[error("参数无效: {0}")]
    Validation(String),

    /// 并发数等配置不合法
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 无法解析出访问凭证
    #[error("认证失败: {0}")]
    Auth(String),

    /// 源或目标列举失败
    #[error("列举 {location} 失败: {reason}")]
    Listing { location: String, reason: String },

    /// 部分传输失败，报告中包含全部失败的 key
    #[error("{} 个传输失败 (共 {} 个)", .0.failed.len(), .0.total_actions)]
    PartialFailure(Box<SyncReport>),

    #[error("同步已取消")]
    Cancelled,
}

impl SyncError {
    pub fn listing(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Listing {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// 部分失败不是致命错误，调用方可以决定是否接受
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::PartialFailure(_))
    }

    /// 部分失败时取出完整报告
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncError::PartialFailure(report) => Some(report),
            _ => None,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// 单个传输的失败原因
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("{0}")]
    Io(String),

    #[error("校验和不匹配: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("超时 ({0:?})")]
    Timeout(Duration),

    #[error("已取消")]
    Cancelled,

    #[error("传输任务异常退出: {0}")]
    Panicked(String),
}

impl From<anyhow::Error> for TransferError {
    fn from(e: anyhow::Error) -> Self {
        // {:#} 保留 context 链
        TransferError::Io(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_is_not_fatal() {
        let mut report = SyncReport::new();
        report.total_actions = 2;
        report.failed.push(("a".to_string(), "boom".to_string()));
        let err = SyncError::PartialFailure(Box::new(report));

        assert!(!err.is_fatal());
        assert_eq!(err.report().map(|r| r.failed.len()), Some(1));
        assert_eq!(err.to_string(), "1 个传输失败 (共 2 个)");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::Validation("x".into()).is_fatal());
        assert!(SyncError::listing("s3://b", "denied").is_fatal());
        assert!(SyncError::Auth("x".into()).report().is_none());
    }

    #[test]
    fn test_anyhow_keeps_context() {
        let err = anyhow::anyhow!("permission denied").context("写入 a.txt 失败");
        let transfer: TransferError = err.into();
        assert_eq!(transfer.to_string(), "写入 a.txt 失败: permission denied");
    }
}
