//! 持久化桥 - 对账后状态的落盘与启动重建
//!
//! 职责：
//! - 每次状态变化后把整棵对账后状态（去掉易失切片）防抖地写入 KV blob
//! - 启动 / 选择门店时读回快照，按**显式枚举的逐片策略**合并到全新默认状态
//!
//! 合并策略刻意不做通用递归 deep-merge：哪些切片恢复、哪些重置，
//! 必须在 [`PersistedStoreState::restore`] 里一目了然，便于审计。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collections::CollectionKind;
use crate::error::Result;
use crate::record::RecordSet;
use crate::storage::kv::KvStore;
use crate::sync::timestamps::{Stamp, TimestampRegistry};
use crate::sync::StoreState;

/// 快照在门店 Tree 里的固定键
const SNAPSHOT_KEY: &str = "state:snapshot";

/// 落盘的门店状态快照（已去掉易失切片）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStoreState {
    pub collections: HashMap<CollectionKind, RecordSet>,
    pub stamps: HashMap<CollectionKind, Stamp>,
    pub master_data_loaded: bool,
    /// 落盘时间（UTC 毫秒，仅供诊断）
    pub persisted_at: i64,
}

impl PersistedStoreState {
    /// 从当前状态树采集快照。
    ///
    /// `status_message` / `sync_in_progress` 不进快照：它们是会话内的
    /// 瞬时状态，跨重启没有意义。
    pub fn capture(store_id: &str, store: &StoreState, registry: &TimestampRegistry) -> Self {
        Self {
            collections: store.collections.clone(),
            stamps: registry.store_stamps(store_id),
            master_data_loaded: store.session.master_data_loaded,
            persisted_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 把快照合并到全新默认状态上，逐片决策：
    ///
    /// | 切片                  | 策略                 |
    /// |-----------------------|----------------------|
    /// | collections           | 取快照               |
    /// | stamps                | 取快照               |
    /// | master_data_loaded    | 取快照               |
    /// | status_message        | 重置默认（易失）     |
    /// | sync_in_progress      | 重置默认（易失）     |
    pub fn restore(snapshot: Option<Self>) -> (StoreState, HashMap<CollectionKind, Stamp>) {
        let mut store = StoreState::default();
        match snapshot {
            Some(snapshot) => {
                store.collections = snapshot.collections;
                store.session.master_data_loaded = snapshot.master_data_loaded;
                (store, snapshot.stamps)
            }
            None => (store, HashMap::new()),
        }
    }
}

enum PersistMessage {
    Snapshot {
        store_id: String,
        snapshot: PersistedStoreState,
    },
    Flush(oneshot::Sender<()>),
}

/// 持久化桥：防抖落盘 + 启动重建
#[derive(Debug)]
pub struct PersistenceBridge {
    kv: Arc<KvStore>,
    tx: mpsc::UnboundedSender<PersistMessage>,
    #[allow(dead_code)]
    worker: JoinHandle<()>,
}

impl PersistenceBridge {
    /// 创建持久化桥并启动落盘任务。`debounce_ms` 为防抖窗口。
    pub fn new(kv: Arc<KvStore>, debounce_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run_worker(kv.clone(), rx, debounce_ms));
        Self { kv, tx, worker }
    }

    /// 请求落盘（fire-and-forget；同一防抖窗口内同门店只写最后一份）
    pub fn schedule(&self, store_id: &str, snapshot: PersistedStoreState) {
        let _ = self.tx.send(PersistMessage::Snapshot {
            store_id: store_id.to_string(),
            snapshot,
        });
    }

    /// 等待所有挂起的快照写完（关停前调用）
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// 读回某门店的快照（没有则 None）
    pub async fn rehydrate(&self, store_id: &str) -> Result<Option<PersistedStoreState>> {
        self.kv.get(store_id, SNAPSHOT_KEY).await
    }

    /// 删除某门店的快照（清缓存路径走 drop_store_tree，这里供单独清快照用）
    pub async fn discard(&self, store_id: &str) -> Result<()> {
        self.kv.delete(store_id, SNAPSHOT_KEY).await?;
        Ok(())
    }

    async fn run_worker(
        kv: Arc<KvStore>,
        mut rx: mpsc::UnboundedReceiver<PersistMessage>,
        debounce_ms: u64,
    ) {
        let mut pending: HashMap<String, PersistedStoreState> = HashMap::new();
        while let Some(msg) = rx.recv().await {
            let mut flush_acks = Vec::new();
            Self::collect(msg, &mut pending, &mut flush_acks);

            // 防抖窗口：显式 flush 不等，普通快照等一个窗口合并后续请求
            if flush_acks.is_empty() {
                tokio::time::sleep(tokio::time::Duration::from_millis(debounce_ms)).await;
            }
            while let Ok(msg) = rx.try_recv() {
                Self::collect(msg, &mut pending, &mut flush_acks);
            }

            for (store_id, snapshot) in pending.drain() {
                match kv.set(&store_id, SNAPSHOT_KEY, &snapshot).await {
                    Ok(()) => debug!("状态快照已落盘: store={}", store_id),
                    // fire-and-forget：落盘失败只告警，下一次变化会再触发
                    Err(e) => warn!("状态快照落盘失败: store={}, error={}", store_id, e),
                }
            }
            for ack in flush_acks {
                let _ = ack.send(());
            }
        }
    }

    fn collect(
        msg: PersistMessage,
        pending: &mut HashMap<String, PersistedStoreState>,
        flush_acks: &mut Vec<oneshot::Sender<()>>,
    ) {
        match msg {
            PersistMessage::Snapshot { store_id, snapshot } => {
                pending.insert(store_id, snapshot);
            }
            PersistMessage::Flush(ack) => flush_acks.push(ack),
        }
    }
}
