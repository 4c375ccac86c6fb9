//! 同步传输层 - 服务端同步 API 的抽象
//!
//! 引擎不直接依赖 HTTP：所有网络访问走 [`SyncTransport`] trait，
//! 生产环境由 [`http::HttpTransport`]（reqwest）实现，测试用内存实现替换。
//!
//! 线格式为 JSON，字段名与服务端一致（camelCase）。

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collections::CollectionKind;
use crate::error::StoreSyncError;
use crate::record::Record;
use crate::sync::timestamps::Stamp;

pub use http::HttpTransport;

/// 传输层错误：按会不会因重试而恢复分类，由上层折算进 SDK 错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 传输失败（超时、连接不可达）——瞬时，可整体重试
    #[error("network failure: {0}")]
    Network(String),
    /// 服务端返回非 2xx
    #[error("API error: {message} ({status})")]
    Status { status: u16, message: String },
    /// 响应体不符合约定
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl From<ApiError> for StoreSyncError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Network(e) => StoreSyncError::Network(e),
            ApiError::Status { status: 401, message } | ApiError::Status { status: 403, message } => {
                StoreSyncError::Auth(message)
            }
            ApiError::Status { status, message } => StoreSyncError::Api { status, message },
            ApiError::Payload(e) => StoreSyncError::InvalidData(e),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// 集合分页响应（全量 / 初始 / 增量共用同一形状）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
    pub records: Vec<Record>,
    pub has_more_records: bool,
    pub total_records: u64,
}

/// 服务端 TimestampSet 响应
///
/// `store_id` 缺失 / 为空 = 门店已删除或权限被回收（store-gone 信号）。
/// 各集合的 stamp 以集合名为 key 平铺在同层。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampSnapshot {
    #[serde(rename = "storeId", default)]
    pub store_id: Option<String>,
    #[serde(flatten)]
    pub stamps: HashMap<String, Stamp>,
}

impl TimestampSnapshot {
    /// 门店是否已不存在（对本调用方而言）
    pub fn is_store_gone(&self) -> bool {
        self.store_id.as_deref().map_or(true, str::is_empty)
    }

    pub fn stamp_for(&self, kind: CollectionKind) -> Option<&Stamp> {
        self.stamps.get(kind.as_str())
    }
}

/// 删除通知（墓碑）：独立于所属集合自身 stamp 的删除流水
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNotice {
    pub record_id: String,
    pub collection_name: String,
}

/// 写入回执：`last_action` 为写入前一刻该集合的 stamp（乐观写对账用），
/// `now` 为写入后的新 stamp。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReceipt {
    pub record: Record,
    pub now: Stamp,
    pub last_action: Stamp,
}

/// 同步传输接口（由 HTTP 实现；测试注入内存实现）
#[async_trait]
pub trait SyncTransport: Send + Sync + std::fmt::Debug {
    /// 拉一页集合记录。`after` 为 None 时是全量 / 冷启动分页，
    /// Some 时只返回该 stamp 之后变更的记录；`skip` 为本轮已取条数。
    async fn fetch_collection_page(
        &self,
        store_id: &str,
        kind: CollectionKind,
        after: Option<&Stamp>,
        skip: usize,
    ) -> ApiResult<CollectionPage>;

    /// 拉取门店当前的 TimestampSet
    async fn fetch_timestamps(&self, store_id: &str) -> ApiResult<TimestampSnapshot>;

    /// 拉取 `after` 之后的删除通知
    async fn fetch_delete_activity(&self, store_id: &str, after: &Stamp) -> ApiResult<Vec<DeleteNotice>>;

    /// 创建记录（离线队列补发也走这里）
    async fn create_record(
        &self,
        store_id: &str,
        collection: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<WriteReceipt>;

    /// 更新记录
    async fn update_record(
        &self,
        store_id: &str,
        collection: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<WriteReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_snapshot_store_gone() {
        let gone: TimestampSnapshot = serde_json::from_str(r#"{"items":"T1"}"#).unwrap();
        assert!(gone.is_store_gone());
        let gone: TimestampSnapshot = serde_json::from_str(r#"{"storeId":"","items":"T1"}"#).unwrap();
        assert!(gone.is_store_gone());

        let alive: TimestampSnapshot =
            serde_json::from_str(r#"{"storeId":"s1","items":"T1","banks":"T2"}"#).unwrap();
        assert!(!alive.is_store_gone());
        assert_eq!(alive.stamp_for(CollectionKind::Items).unwrap().as_str(), "T1");
        assert!(alive.stamp_for(CollectionKind::Customers).is_none());
    }

    #[test]
    fn write_receipt_wire_names() {
        let json = r#"{"record":{"id":"r1","name":"x"},"now":"T2","lastAction":"T1"}"#;
        let receipt: WriteReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.record.id, "r1");
        assert_eq!(receipt.last_action.as_str(), "T1");
        assert_eq!(receipt.now.as_str(), "T2");
    }

    #[test]
    fn api_error_classification() {
        let e: StoreSyncError = ApiError::Status { status: 401, message: "expired".into() }.into();
        assert!(e.is_auth_failure());
        let e: StoreSyncError = ApiError::Status { status: 503, message: "busy".into() }.into();
        assert!(e.is_transient());
        let e: StoreSyncError = ApiError::Network("timeout".into()).into();
        assert!(e.is_transient());
        let e: StoreSyncError = ApiError::Status { status: 404, message: "nope".into() }.into();
        assert!(!e.is_transient());
    }
}
