//! 离线变更队列 - sled 持久化的门店级 FIFO
//!
//! 键为单调递增序号（零填充，按字节序即入队序），补发严格从队首开始：
//! 队首失败则本条与其后所有条目原地保留、本轮停止，顺序永不打乱。

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{SyncTransport, WriteReceipt};
use crate::error::{Result, StoreSyncError};
use crate::events::{EventManager, SyncEvent};
use crate::storage::kv::KvStore;
use crate::storage::queue::mutation::OfflineMutation;
use crate::storage::queue::retry_policy::{FlushFailureReason, RetryPolicy};

/// 队列条目键前缀与序号键
const QUEUE_KEY_PREFIX: &str = "mutation_queue:";
const QUEUE_SEQ_KEY: &str = "mutation_queue_seq";

/// 一轮补发的结果
#[derive(Debug)]
pub struct FlushReport {
    /// 本轮成功送达的条目及其回执（按补发顺序）
    pub sent: Vec<(OfflineMutation, WriteReceipt)>,
    /// 本轮结束后仍在队列中的条目数
    pub remaining: usize,
    /// 本轮因何停止（None = 队列清空或后续条目未到补发时间）
    pub stopped_on: Option<FlushFailureReason>,
}

/// 离线变更队列
#[derive(Debug)]
pub struct OfflineMutationQueue {
    kv: Arc<KvStore>,
    policy: RetryPolicy,
    events: Arc<EventManager>,
}

impl OfflineMutationQueue {
    pub fn new(kv: Arc<KvStore>, policy: RetryPolicy, events: Arc<EventManager>) -> Self {
        Self { kv, policy, events }
    }

    /// 入队一条本地写入（持久化后才返回）
    pub async fn enqueue(
        &self,
        store_id: &str,
        collection: &str,
        payload: serde_json::Value,
    ) -> Result<OfflineMutation> {
        let mutation = OfflineMutation::new(store_id, collection, payload);
        let seq = self.kv.next_sequence(store_id, QUEUE_SEQ_KEY).await?;
        let key = format!("{}{:020}", QUEUE_KEY_PREFIX, seq);
        self.kv.set(store_id, &key, &mutation).await?;

        info!(
            "离线变更入队: store={}, collection={}, id={}",
            store_id, collection, mutation.mutation_id
        );
        self.events.emit(SyncEvent::MutationEnqueued {
            store_id: store_id.to_string(),
            mutation_id: mutation.mutation_id.clone(),
        });
        Ok(mutation)
    }

    /// 队列中全部条目（按入队顺序）
    pub async fn entries(&self, store_id: &str) -> Result<Vec<(String, OfflineMutation)>> {
        self.kv.scan_prefix(store_id, QUEUE_KEY_PREFIX).await
    }

    pub async fn len(&self, store_id: &str) -> Result<usize> {
        Ok(self.entries(store_id).await?.len())
    }

    pub async fn is_empty(&self, store_id: &str) -> Result<bool> {
        Ok(self.len(store_id).await? == 0)
    }

    /// 按 FIFO 顺序补发，一次一条。
    ///
    /// 队首发送失败时：本条记下失败原因与退避时间后原地保留，
    /// 本轮立即停止（它后面的条目一律不试），待下次连通恢复 / 心跳再来。
    /// `force` 为 true 时忽略退避时间（连通恢复沿走这里）。
    pub async fn flush(
        &self,
        transport: &dyn SyncTransport,
        store_id: &str,
        force: bool,
    ) -> Result<FlushReport> {
        let mut report = FlushReport {
            sent: Vec::new(),
            remaining: 0,
            stopped_on: None,
        };

        for (key, mut mutation) in self.entries(store_id).await? {
            let now = chrono::Utc::now().timestamp_millis();
            if !force && !mutation.ready_at(now) {
                break; // 队首还在退避窗口内，本轮不动
            }

            match transport
                .create_record(store_id, &mutation.collection, &mutation.payload)
                .await
            {
                Ok(receipt) => {
                    self.kv.delete(store_id, &key).await?;
                    info!(
                        "离线变更补发成功: store={}, id={}",
                        store_id, mutation.mutation_id
                    );
                    self.events.emit(SyncEvent::MutationFlushed {
                        store_id: store_id.to_string(),
                        mutation_id: mutation.mutation_id.clone(),
                    });
                    report.sent.push((mutation, receipt));
                }
                Err(api_err) => {
                    let error: StoreSyncError = api_err.into();
                    let reason = FlushFailureReason::classify(&error);
                    // 不论可否重试都退避封顶，避免反复锤同一个失败请求；
                    // 条目永不丢弃，至少一次送达由此保证。
                    let next_retry_at = Some(self.policy.next_retry_at(mutation.retry_count));
                    mutation.record_failure(error.to_string(), next_retry_at);
                    self.kv.set(store_id, &key, &mutation).await?;

                    warn!(
                        "离线变更补发失败，本轮停止: store={}, id={}, reason={:?}",
                        store_id, mutation.mutation_id, reason
                    );
                    if !reason.is_retryable() {
                        // 服务端明确拒绝：滞留队首并上报，等待人工处理
                        self.events.emit(SyncEvent::MutationRejected {
                            store_id: store_id.to_string(),
                            mutation_id: mutation.mutation_id.clone(),
                            error: error.to_string(),
                        });
                    }
                    report.stopped_on = Some(reason);
                    break;
                }
            }
        }

        report.remaining = self.len(store_id).await?;
        Ok(report)
    }
}
