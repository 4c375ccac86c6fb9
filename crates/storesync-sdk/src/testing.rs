//! 测试支撑 - 内存版同步传输实现
//!
//! 用 HashMap 模拟服务端：可脚本化分页大小、stamp、增量变更、删除流水、
//! 写入回执与失败注入。仅编译进测试。

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiError, ApiResult, CollectionPage, DeleteNotice, SyncTransport, TimestampSnapshot, WriteReceipt};
use crate::collections::CollectionKind;
use crate::record::Record;
use crate::sync::timestamps::Stamp;

/// 注入的推送失败类型
#[derive(Debug, Clone)]
enum PushFailure {
    Network,
    Reject(u16),
}

#[derive(Debug, Default)]
struct MemoryServer {
    store_id: String,
    store_gone: bool,
    page_size: usize,
    /// 服务端各集合的全量记录
    collections: HashMap<CollectionKind, Vec<Record>>,
    /// 「after=stamp」增量查询返回的记录（最新在前）
    changed: HashMap<CollectionKind, Vec<Record>>,
    /// 各集合当前 stamp（集合名 → stamp）
    stamps: HashMap<String, Stamp>,
    /// 删除流水（fetch_delete_activity 原样返回）
    delete_notices: Vec<DeleteNotice>,
    /// 各集合被 fetch 的次数
    fetch_counts: HashMap<CollectionKind, usize>,
    /// 注入的 fetch 失败：集合 → 还要失败几次
    fetch_failures: HashMap<CollectionKind, usize>,
    /// 注入的 timestamps 失败次数
    timestamp_failures: usize,
    /// 所有写入尝试（含失败），(collection, payload)
    push_log: Vec<(String, Value)>,
    /// 按写入尝试序号注入的失败
    push_failures: HashMap<usize, PushFailure>,
    /// 写入计数（用于生成新 stamp / 服务端 id）
    write_counter: u64,
}

/// 内存传输（测试专用服务端替身）
#[derive(Debug)]
pub struct MemoryTransport {
    inner: Mutex<MemoryServer>,
}

impl MemoryTransport {
    pub fn new(store_id: &str) -> Self {
        Self {
            inner: Mutex::new(MemoryServer {
                store_id: store_id.to_string(),
                page_size: 100,
                ..MemoryServer::default()
            }),
        }
    }

    fn records_from(values: impl IntoIterator<Item = Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).expect("测试记录必须带 id"))
            .collect()
    }

    /// 填充某集合的服务端全量记录，并给它一个初始 stamp
    pub fn seed_collection(&self, kind: CollectionKind, values: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner.lock().unwrap();
        inner.collections.insert(kind, Self::records_from(values));
        inner
            .stamps
            .entry(kind.as_str().to_string())
            .or_insert_with(|| Stamp::from("T1"));
    }

    /// 设定「after=stamp」增量查询返回的变更（最新在前）
    pub fn seed_changed(&self, kind: CollectionKind, values: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner.lock().unwrap();
        inner.changed.insert(kind, Self::records_from(values));
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.inner.lock().unwrap().page_size = page_size;
    }

    pub fn set_stamp(&self, kind: CollectionKind, stamp: &str) {
        self.inner
            .lock()
            .unwrap()
            .stamps
            .insert(kind.as_str().to_string(), Stamp::from(stamp));
    }

    pub fn stamp_of(&self, kind: CollectionKind) -> Option<Stamp> {
        self.inner.lock().unwrap().stamps.get(kind.as_str()).cloned()
    }

    /// 服务端报告门店不存在（timestamps 响应缺 storeId）
    pub fn mark_store_gone(&self) {
        self.inner.lock().unwrap().store_gone = true;
    }

    pub fn set_delete_notices(&self, notices: Vec<DeleteNotice>) {
        self.inner.lock().unwrap().delete_notices = notices;
    }

    /// 让某集合接下来 `count` 次 fetch 失败（网络错）
    pub fn fail_fetches(&self, kind: CollectionKind, count: usize) {
        self.inner.lock().unwrap().fetch_failures.insert(kind, count);
    }

    /// 让接下来 `count` 次 timestamps 拉取失败（网络错）
    pub fn fail_timestamps(&self, count: usize) {
        self.inner.lock().unwrap().timestamp_failures = count;
    }

    /// 从第 `start` 次写入尝试（0 起）开始，连续 `count` 次网络失败
    pub fn fail_pushes(&self, start: usize, count: usize) {
        let mut inner = self.inner.lock().unwrap();
        for i in start..start + count {
            inner.push_failures.insert(i, PushFailure::Network);
        }
    }

    /// 从第 `start` 次写入尝试开始，连续 `count` 次被服务端以 `status` 拒绝
    pub fn reject_pushes(&self, start: usize, count: usize, status: u16) {
        let mut inner = self.inner.lock().unwrap();
        for i in start..start + count {
            inner.push_failures.insert(i, PushFailure::Reject(status));
        }
    }

    /// 某集合被 fetch 的次数
    pub fn fetch_count(&self, kind: CollectionKind) -> usize {
        *self
            .inner
            .lock()
            .unwrap()
            .fetch_counts
            .get(&kind)
            .unwrap_or(&0)
    }

    /// 全部写入尝试次数（含失败）
    pub fn push_attempts(&self) -> usize {
        self.inner.lock().unwrap().push_log.len()
    }

    /// 某集合的全部写入尝试载荷（含失败，按尝试顺序）
    pub fn pushed_payloads(&self, collection: &str) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .push_log
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// 服务端视角的某集合记录（断言「与全新全量拉取一致」用）
    pub fn server_records(&self, kind: CollectionKind) -> Vec<Record> {
        self.inner
            .lock()
            .unwrap()
            .collections
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn paged(records: &[Record], skip: usize, page_size: usize) -> CollectionPage {
        let total = records.len();
        let end = (skip + page_size).min(total);
        let slice = if skip >= total { Vec::new() } else { records[skip..end].to_vec() };
        CollectionPage {
            records: slice,
            has_more_records: end < total,
            total_records: total as u64,
        }
    }

    /// 写入的共同路径：记录尝试、注入失败、生成回执并推进服务端状态
    fn handle_push(&self, collection: &str, payload: &Value) -> ApiResult<WriteReceipt> {
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner.push_log.len();
        inner.push_log.push((collection.to_string(), payload.clone()));

        if let Some(failure) = inner.push_failures.get(&attempt).cloned() {
            return match failure {
                PushFailure::Network => Err(ApiError::Network("connection refused".into())),
                PushFailure::Reject(status) => Err(ApiError::Status {
                    status,
                    message: "rejected by server".into(),
                }),
            };
        }

        inner.write_counter += 1;
        let counter = inner.write_counter;
        let last_action = inner
            .stamps
            .get(collection)
            .cloned()
            .unwrap_or_else(|| Stamp::from(""));
        let now = Stamp::from(format!("W{}", counter));
        inner.stamps.insert(collection.to_string(), now.clone());

        let mut record: Record = match serde_json::from_value(payload.clone()) {
            Ok(record) => record,
            Err(_) => {
                // 载荷没带 id：服务端分配
                let mut value = payload.clone();
                if let Some(map) = value.as_object_mut() {
                    map.insert("id".to_string(), Value::String(format!("srv{}", counter)));
                }
                serde_json::from_value(value).expect("注入 id 后必可解析")
            }
        };
        record.fields.entry("updatedBy".to_string()).or_insert(Value::from("memory"));

        // 同步范围内的集合：写入同时推进服务端记录与增量流水
        if let Ok(kind) = CollectionKind::from_str(collection) {
            let records = inner.collections.entry(kind).or_default();
            if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
                *existing = record.clone();
            } else {
                records.push(record.clone());
            }
            inner.changed.entry(kind).or_default().insert(0, record.clone());
        }

        Ok(WriteReceipt { record, now, last_action })
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn fetch_collection_page(
        &self,
        _store_id: &str,
        kind: CollectionKind,
        after: Option<&Stamp>,
        skip: usize,
    ) -> ApiResult<CollectionPage> {
        let mut inner = self.inner.lock().unwrap();
        *inner.fetch_counts.entry(kind).or_insert(0) += 1;

        if let Some(remaining) = inner.fetch_failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Network("connection reset".into()));
            }
        }

        let page_size = inner.page_size;
        let records = match after {
            Some(_) => inner.changed.get(&kind).cloned().unwrap_or_default(),
            None => inner.collections.get(&kind).cloned().unwrap_or_default(),
        };
        Ok(Self::paged(&records, skip, page_size))
    }

    async fn fetch_timestamps(&self, _store_id: &str) -> ApiResult<TimestampSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        if inner.timestamp_failures > 0 {
            inner.timestamp_failures -= 1;
            return Err(ApiError::Network("connection reset".into()));
        }
        let store_id = if inner.store_gone {
            None
        } else {
            Some(inner.store_id.clone())
        };
        Ok(TimestampSnapshot {
            store_id,
            stamps: inner
                .stamps
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    async fn fetch_delete_activity(
        &self,
        _store_id: &str,
        _after: &Stamp,
    ) -> ApiResult<Vec<DeleteNotice>> {
        Ok(self.inner.lock().unwrap().delete_notices.clone())
    }

    async fn create_record(
        &self,
        _store_id: &str,
        collection: &str,
        payload: &Value,
    ) -> ApiResult<WriteReceipt> {
        self.handle_push(collection, payload)
    }

    async fn update_record(
        &self,
        _store_id: &str,
        collection: &str,
        payload: &Value,
    ) -> ApiResult<WriteReceipt> {
        self.handle_push(collection, payload)
    }
}
