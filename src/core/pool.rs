//! 传输工作池
//!
//! 固定数量的 worker 从有界队列中取动作，每个 worker 完整执行一个动作后再取下一个。
//! 单个动作失败只记录在结果里，不影响其他动作。

use crate::core::planner::Action;
use crate::error::{Result, SyncError, TransferError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 单个动作的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum TransferOutcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub key: String,
    pub outcome: TransferOutcome,
    pub bytes_transferred: u64,
}

impl TransferResult {
    pub fn success(key: String, bytes: u64) -> Self {
        Self {
            key,
            outcome: TransferOutcome::Success,
            bytes_transferred: bytes,
        }
    }

    pub fn failed(key: String, error: TransferError) -> Self {
        Self {
            key,
            outcome: TransferOutcome::Failed(error.to_string()),
            bytes_transferred: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TransferOutcome::Success
    }
}

/// 有界并发的传输池
#[derive(Debug, Clone)]
pub struct TransferPool {
    concurrency: usize,
    item_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl TransferPool {
    /// 并发数必须 >= 1
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(SyncError::Configuration(
                "并发数必须大于 0".to_string(),
            ));
        }
        Ok(Self {
            concurrency,
            item_timeout: None,
            cancel: CancellationToken::new(),
        })
    }

    /// 设置单个传输的超时时间
    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// 取消后不再开始新的动作，进行中的动作会执行完
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 执行全部动作，每个动作恰好产生一个结果（顺序不保证）
    pub async fn execute<F, Fut>(&self, actions: Vec<Action>, transfer: F) -> Vec<TransferResult>
    where
        F: Fn(Action) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, TransferError>> + Send + 'static,
    {
        let total = actions.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.concurrency.min(total);
        debug!("启动 {} 个 worker 处理 {} 个动作", workers, total);

        let (queue_tx, queue_rx) = async_channel::bounded::<Action>(workers);
        let (result_tx, mut result_rx) = mpsc::channel::<TransferResult>(workers);
        let transfer = Arc::new(transfer);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue_rx = queue_rx.clone();
            let result_tx = result_tx.clone();
            let transfer = transfer.clone();
            let cancel = self.cancel.clone();
            let item_timeout = self.item_timeout;

            handles.push(tokio::spawn(async move {
                while let Ok(action) = queue_rx.recv().await {
                    let result = if cancel.is_cancelled() {
                        TransferResult::failed(action.key().to_string(), TransferError::Cancelled)
                    } else {
                        run_one(transfer.clone(), action, item_timeout).await
                    };

                    if let TransferOutcome::Failed(reason) = &result.outcome {
                        warn!("[worker {}] {} 失败: {}", worker_id, result.key, reason);
                    }

                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        // 只保留 worker 持有的端，全部 worker 退出后结果通道关闭
        drop(queue_rx);
        drop(result_tx);

        let feeder = tokio::spawn(async move {
            for action in actions {
                if queue_tx.send(action).await.is_err() {
                    break;
                }
            }
        });

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        let _ = feeder.await;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker 异常退出: {}", e);
            }
        }

        results
    }
}

/// 在独立任务中执行一个动作，panic 和超时都转成失败结果
///
/// transfer 本身也在任务内调用，同步 panic 同样只影响这一个动作。
async fn run_one<F, Fut>(
    transfer: Arc<F>,
    action: Action,
    item_timeout: Option<Duration>,
) -> TransferResult
where
    F: Fn(Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<u64, TransferError>> + Send + 'static,
{
    let key = action.key().to_string();
    let mut task = tokio::spawn(async move { transfer(action).await });

    let joined = match item_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return TransferResult::failed(key, TransferError::Timeout(limit));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(bytes)) => {
            debug!("完成: {} ({} 字节)", key, bytes);
            TransferResult::success(key, bytes)
        }
        Ok(Err(e)) => TransferResult::failed(key, e),
        Err(e) => TransferResult::failed(key, TransferError::Panicked(e.to_string())),
    }
}

/// 以给定并发数执行动作；并发数为 0 时不执行任何动作
pub async fn execute<F, Fut>(
    actions: Vec<Action>,
    concurrency: usize,
    transfer: F,
) -> Result<Vec<TransferResult>>
where
    F: Fn(Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<u64, TransferError>> + Send + 'static,
{
    let pool = TransferPool::new(concurrency)?;
    Ok(pool.execute(actions, transfer).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lister::Entry;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn copies(n: usize) -> Vec<Action> {
        (0..n)
            .map(|i| {
                let key = format!("obj-{:03}", i);
                Action::Copy {
                    key: key.clone(),
                    entry: Entry::new(key, i as u64, None),
                }
            })
            .collect()
    }

    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        max: AtomicUsize,
        calls: AtomicUsize,
    }

    async fn instrumented(stats: Arc<InFlight>, concurrency: usize, n: usize) -> Vec<TransferResult> {
        execute(copies(n), concurrency, move |action| {
            let stats = stats.clone();
            async move {
                stats.calls.fetch_add(1, Ordering::SeqCst);
                let now = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
                stats.max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                stats.current.fetch_sub(1, Ordering::SeqCst);
                match action {
                    Action::Copy { entry, .. } => Ok(entry.size),
                    Action::Delete { .. } => Ok(0),
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_action_exactly_once_and_bounded() {
        for (concurrency, n) in [(1, 10), (3, 25), (8, 8), (20, 5), (4, 0)] {
            let stats = Arc::new(InFlight::default());
            let results = instrumented(stats.clone(), concurrency, n).await;

            assert_eq!(results.len(), n);
            assert_eq!(stats.calls.load(Ordering::SeqCst), n);
            assert!(stats.max.load(Ordering::SeqCst) <= concurrency);

            let mut seen: HashMap<String, usize> = HashMap::new();
            for result in &results {
                assert!(result.is_success());
                *seen.entry(result.key.clone()).or_default() += 1;
            }
            assert_eq!(seen.len(), n);
            assert!(seen.values().all(|&count| count == 1));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reaches_concurrency_limit() {
        let stats = Arc::new(InFlight::default());
        instrumented(stats.clone(), 4, 40).await;
        assert_eq!(stats.max.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = execute(copies(3), 0, move |_action| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(0) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Configuration(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_pool() {
        let results = execute(copies(5), 2, |action| async move {
            if action.key() == "obj-002" {
                Err(TransferError::Io("network unreachable".to_string()))
            } else {
                Ok(1)
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 5);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "obj-002");
        assert_eq!(
            failed[0].outcome,
            TransferOutcome::Failed("network unreachable".to_string())
        );
        assert_eq!(failed[0].bytes_transferred, 0);
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let results = execute(copies(3), 3, |action| async move {
            if action.key() == "obj-001" {
                panic!("boom");
            }
            Ok(0)
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "obj-001");
    }

    #[tokio::test]
    async fn test_synchronous_panic_is_recorded_as_failure() {
        // 闭包在返回 future 之前就 panic
        let results = execute(copies(3), 1, |action| {
            if action.key() == "obj-000" {
                panic!("boom before future");
            }
            async { Ok(1) }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "obj-000");
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
    }

    #[tokio::test]
    async fn test_item_timeout() {
        let pool = TransferPool::new(2)
            .unwrap()
            .with_item_timeout(Some(Duration::from_millis(20)));

        let results = pool
            .execute(copies(3), |action| async move {
                if action.key() == "obj-000" {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(1)
            })
            .await;

        assert_eq!(results.len(), 3);
        let timed_out = results.iter().find(|r| r.key == "obj-000").unwrap();
        match &timed_out.outcome {
            TransferOutcome::Failed(reason) => assert!(reason.contains("超时")),
            other => panic!("应当超时: {:?}", other),
        }
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_pool_reports_every_action() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let pool = TransferPool::new(2).unwrap().with_cancel(cancel);
        let results = pool
            .execute(copies(4), move |_action| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(0) }
            })
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(results
            .iter()
            .all(|r| r.outcome == TransferOutcome::Failed("已取消".to_string())));
    }
}
