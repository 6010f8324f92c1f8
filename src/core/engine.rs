use crate::config::SyncConfig;
use crate::core::lister::{Entry, ObjectLister};
use crate::core::planner::{self, Action};
use crate::core::pool::{TransferOutcome, TransferPool, TransferResult};
use crate::error::{Result, SyncError, TransferError};
use crate::location;
use crate::storage::{self, local::bytes_md5, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 同步阶段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    Listing,
    Planning,
    Transferring,
    Completed { success: bool },
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total_actions: usize,
    /// 成功的 key
    pub succeeded: Vec<String>,
    /// 失败的 key 和原因
    pub failed: Vec<(String, String)>,
    pub copied: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            total_actions: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            copied: 0,
            deleted: 0,
            skipped: 0,
            bytes_transferred: 0,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, result: TransferResult, is_copy: bool) {
        match result.outcome {
            TransferOutcome::Success => {
                self.bytes_transferred += result.bytes_transferred;
                if is_copy {
                    self.copied += 1;
                } else {
                    self.deleted += 1;
                }
                self.succeeded.push(result.key);
            }
            TransferOutcome::Failed(reason) => self.failed.push((result.key, reason)),
        }
    }

    fn finish(&mut self) {
        self.succeeded.sort();
        self.failed.sort();
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

/// 同步引擎
pub struct SyncEngine {
    config: SyncConfig,
    cancel: CancellationToken,
    phase: watch::Sender<SyncPhase>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            config,
            cancel: CancellationToken::new(),
            phase,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 取消同步：不再开始新的传输，进行中的传输会完成
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 可以交给信号处理等其他任务的取消句柄
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 订阅阶段变化
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.borrow().clone()
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!("同步阶段: {:?}", phase);
        self.phase.send_replace(phase);
    }

    /// 同步两个位置
    ///
    /// 参数不合法时在任何列举和传输之前返回 `SyncError::Validation`。
    /// 所有传输都成功才返回 Ok，否则返回带完整报告的 `SyncError::PartialFailure`。
    pub async fn sync(&self, source: &str, target: &str) -> Result<SyncReport> {
        let (source, target) = location::validate_pair(source, target)?;
        TransferPool::new(self.config.concurrency)?;

        info!("源: {}", source);
        info!("目标: {}", target);

        let source_storage = storage::create_storage(&source, &self.config.storage).await?;
        let target_storage = storage::create_storage(&target, &self.config.storage).await?;

        self.sync_storages(source_storage, target_storage).await
    }

    /// 同步两个已打开的存储
    pub async fn sync_storages(
        &self,
        source: Arc<dyn Storage>,
        target: Arc<dyn Storage>,
    ) -> Result<SyncReport> {
        let pool = TransferPool::new(self.config.concurrency)?
            .with_item_timeout(self.config.item_timeout)
            .with_cancel(self.cancel.clone());

        let mut report = SyncReport::new();
        let result = self.run(&pool, source, target, &mut report).await;
        report.finish();

        match result {
            Ok(()) => {
                let success = report.is_success();
                self.set_phase(SyncPhase::Completed { success });
                info!(
                    "同步完成: 复制 {}, 删除 {}, 跳过 {}, 失败 {}, 传输 {} 字节, 耗时 {}ms",
                    report.copied,
                    report.deleted,
                    report.skipped,
                    report.failed.len(),
                    report.bytes_transferred,
                    report.duration_ms
                );
                if success {
                    Ok(report)
                } else {
                    Err(SyncError::PartialFailure(Box::new(report)))
                }
            }
            Err(e) => {
                error!("同步中止: {}", e);
                self.set_phase(SyncPhase::Idle);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        pool: &TransferPool,
        source: Arc<dyn Storage>,
        target: Arc<dyn Storage>,
        report: &mut SyncReport,
    ) -> Result<()> {
        // 列举：先源后目标，目标不存在视为空
        self.set_phase(SyncPhase::Listing);
        let lister = ObjectLister::new().with_cancel(self.cancel.clone());
        let source_listing = lister.list(source.as_ref()).await?;
        let target_listing = lister
            .clone()
            .missing_ok(true)
            .list(target.as_ref())
            .await?;

        // 比较
        self.set_phase(SyncPhase::Planning);
        let actions = planner::plan(&source_listing, &target_listing, self.config.mirror);
        let summary = planner::summarize(&source_listing, &actions);
        info!(
            "比较完成: {} 个复制 ({} 字节), {} 个删除, {} 个跳过",
            summary.copy_count, summary.copy_bytes, summary.delete_count, summary.skip_count
        );
        report.total_actions = summary.total_actions();
        report.skipped = summary.skip_count;
        drop(source_listing);
        drop(target_listing);

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // 传输：全部复制结束后才开始删除
        self.set_phase(SyncPhase::Transferring);
        let (copies, deletes): (Vec<_>, Vec<_>) = actions.into_iter().partition(Action::is_copy);

        if !copies.is_empty() {
            info!("开始复制 {} 个对象 (并发 {})", copies.len(), pool.concurrency());
            for result in Self::dispatch(pool, copies, &source, &target).await {
                report.record(result, true);
            }
        }

        if !deletes.is_empty() {
            info!("开始删除 {} 个对象", deletes.len());
            for result in Self::dispatch(pool, deletes, &source, &target).await {
                report.record(result, false);
            }
        }

        Ok(())
    }

    async fn dispatch(
        pool: &TransferPool,
        actions: Vec<Action>,
        source: &Arc<dyn Storage>,
        target: &Arc<dyn Storage>,
    ) -> Vec<TransferResult> {
        let source = source.clone();
        let target = target.clone();
        pool.execute(actions, move |action| {
            let source = source.clone();
            let target = target.clone();
            async move { execute_action(action, source.as_ref(), target.as_ref()).await }
        })
        .await
    }
}

/// 执行单个动作，返回传输的字节数
async fn execute_action(
    action: Action,
    source: &dyn Storage,
    target: &dyn Storage,
) -> Result<u64, TransferError> {
    match action {
        Action::Copy { key, entry } => copy_object(&key, &entry, source, target).await,
        Action::Delete { key } => {
            debug!("删除: {}", key);
            target.delete(&key).await?;
            Ok(0)
        }
    }
}

async fn copy_object(
    key: &str,
    entry: &Entry,
    source: &dyn Storage,
    target: &dyn Storage,
) -> Result<u64, TransferError> {
    debug!("复制: {} ({} 字节)", key, entry.size);

    let data = source.read(key).await?;

    // 内容与列举时的校验和不一致时不写入
    if let Some(expected) = &entry.checksum {
        let actual = bytes_md5(&data);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(TransferError::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }

    let bytes = data.len() as u64;
    target.write(key, data).await?;
    debug!("  写入完成: {}", key);

    Ok(bytes)
}
