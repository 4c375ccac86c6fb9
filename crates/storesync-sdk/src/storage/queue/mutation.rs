//! 离线变更条目

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 队列中的一条本地写入：必须至少送达服务端一次，门店内从不重排
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineMutation {
    /// 本地生成的变更 ID（uuid v4），补发与事件关联用
    pub mutation_id: String,
    /// 所属门店
    pub store_id: String,
    /// 目标集合（服务端路由名，如 "sales"）
    pub collection: String,
    /// 原始请求载荷，SDK 不解析，原样送服务端
    pub payload: serde_json::Value,
    /// 入队时间（UTC 毫秒）
    pub enqueued_at: i64,
    /// 已补发失败的次数
    pub retry_count: u32,
    /// 最近一次失败原因（供 UI 展示滞留原因）
    pub last_error: Option<String>,
    /// 下次允许补发的时间（UTC 毫秒；None = 随时）
    pub next_retry_at: Option<i64>,
}

impl OfflineMutation {
    pub fn new(store_id: impl Into<String>, collection: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            mutation_id: Uuid::new_v4().to_string(),
            store_id: store_id.into(),
            collection: collection.into(),
            payload,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
        }
    }

    /// 记录一次失败
    pub fn record_failure(&mut self, error: String, next_retry_at: Option<i64>) {
        self.retry_count += 1;
        self.last_error = Some(error);
        self.next_retry_at = next_retry_at;
    }

    /// 是否到了允许补发的时间
    pub fn ready_at(&self, now_ms: i64) -> bool {
        self.next_retry_at.map_or(true, |at| now_ms >= at)
    }

    /// 条目年龄（毫秒）
    pub fn age_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.enqueued_at
    }
}
