//! 同步协调器 - 冷启动、心跳、乐观写对账与门店生命周期的编排层
//!
//! 职责：
//! - 冷启动（master data）：参考集合整表拉取 + 大集合分页拉取，全有或全无
//! - 心跳：比对本地 / 服务端 TimestampSet，只重拉有差异的集合
//! - 乐观写对账：stamp 相符打补丁，不符回退重拉
//! - 墓碑：每次心跳必查，与集合自身 stamp 无关
//! - 重入保护：每门店一个 `sync_in_progress`，并发触发直接丢弃
//!
//! 状态树（集合记录集 + 版本戳注册表）由本协调器独占修改；
//! UI 只通过快照读，写意图经由 SDK 入口进来。

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::SyncTransport;
use crate::api::WriteReceipt;
use crate::collections::{CollectionKind, BOOTSTRAP_ORDER, SYNCABLE_KINDS};
use crate::error::{Result, StoreSyncError};
use crate::events::{EventManager, SyncEvent};
use crate::network::NetworkMonitor;
use crate::record::{Record, RecordSet};
use crate::storage::kv::KvStore;
use crate::storage::persistence::{PersistedStoreState, PersistenceBridge};
use crate::storage::queue::{FlushReport, OfflineMutationQueue};
use crate::sync::adapter::CollectionAdapter;
use crate::sync::timestamps::Stamp;
use crate::sync::tombstones::DeleteTombstoneLog;
use crate::sync::{
    ClientState, CollectionSyncOutcome, HeartbeatOutcome, SyncPhase, SyncSessionState, WriteOutcome,
};

/// 同步协调器
pub struct SyncCoordinator {
    /// 客户端状态树（独占所有权）
    state: Arc<RwLock<ClientState>>,
    /// 同步传输
    transport: Arc<dyn SyncTransport>,
    /// 离线变更队列
    queue: Arc<OfflineMutationQueue>,
    /// 持久化桥
    persistence: Arc<PersistenceBridge>,
    /// 事件管理器
    events: Arc<EventManager>,
    /// 网络监控
    network: Arc<NetworkMonitor>,
    /// KV 存储（清缓存用）
    kv: Arc<KvStore>,
}

impl SyncCoordinator {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        queue: Arc<OfflineMutationQueue>,
        persistence: Arc<PersistenceBridge>,
        events: Arc<EventManager>,
        network: Arc<NetworkMonitor>,
        kv: Arc<KvStore>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(ClientState::default())),
            transport,
            queue,
            persistence,
            events,
            network,
            kv,
        }
    }

    /// 状态树只读句柄（UI 快照读取用）
    pub fn state(&self) -> Arc<RwLock<ClientState>> {
        self.state.clone()
    }

    pub async fn selected_store(&self) -> Option<String> {
        self.state.read().await.selected_store.clone()
    }

    // ============================================================
    // 门店生命周期
    // ============================================================

    /// 选择门店：从持久化快照重建状态（没有快照则全新默认）
    pub async fn select_store(&self, store_id: &str) -> Result<()> {
        let snapshot = self.persistence.rehydrate(store_id).await?;
        let had_snapshot = snapshot.is_some();
        let (store_state, stamps) = PersistedStoreState::restore(snapshot);

        let mut state = self.state.write().await;
        state.selected_store = Some(store_id.to_string());
        state.stores.insert(store_id.to_string(), store_state);
        state.stamps.restore_store(store_id, stamps);
        drop(state);

        info!(
            "门店已选择: {} (本地快照: {})",
            store_id,
            if had_snapshot { "已恢复" } else { "无" }
        );
        Ok(())
    }

    /// 取消选择当前门店（内存状态丢弃，持久化数据保留）
    pub async fn deselect_store(&self) -> Option<String> {
        let store_id = {
            let state = self.state.read().await;
            state.selected_store.clone()?
        };
        // 先把最新状态排进落盘队列，再丢内存
        self.schedule_persist(&store_id).await;

        let mut state = self.state.write().await;
        state.selected_store = None;
        state.stores.remove(&store_id);
        state.stamps.clear_store(&store_id);
        drop(state);

        info!("门店已取消选择: {}", store_id);
        Some(store_id)
    }

    /// 清空某门店的全部本地缓存（快照、stamp、离线队列），回到「未加载」
    pub async fn clear_store_cache(&self, store_id: &str) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.selected_store.as_deref() == Some(store_id) {
                state.selected_store = None;
            }
            state.stores.remove(store_id);
            state.stamps.clear_store(store_id);
        }
        self.kv.drop_store_tree(store_id).await?;
        info!("门店缓存已清空: {}", store_id);
        Ok(())
    }

    /// 服务端报告门店不存在：取消选择并停止同步（不清持久化数据）
    async fn handle_store_gone(&self, store_id: &str) {
        warn!("门店已删除或权限被回收，停止同步: {}", store_id);
        let mut state = self.state.write().await;
        if state.selected_store.as_deref() == Some(store_id) {
            state.selected_store = None;
        }
        state.stores.remove(store_id);
        state.stamps.clear_store(store_id);
        drop(state);

        self.events.emit(SyncEvent::StoreGone {
            store_id: store_id.to_string(),
        });
    }

    // ============================================================
    // 调度入口
    // ============================================================

    /// 心跳调度器的统一入口：未加载走冷启动，已加载走心跳
    pub async fn tick(&self) -> Result<()> {
        let store_id = self
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        if !self.network.is_online().await {
            return Err(StoreSyncError::Offline);
        }
        let loaded = {
            let state = self.state.read().await;
            state
                .store(&store_id)
                .map(|s| s.session.master_data_loaded)
                .unwrap_or(false)
        };
        if loaded {
            self.sync_data().await.map(|_| ())
        } else {
            self.load_master_data().await
        }
    }

    // ============================================================
    // 冷启动（master data bootstrap）
    // ============================================================

    /// 冷启动全量加载。幂等但不可续传：任何一步失败整体放弃，
    /// `master_data_loaded` 保持 false，下一次触发从头再来。
    pub async fn load_master_data(&self) -> Result<()> {
        let store_id = self
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        self.try_begin_pass(&store_id, SyncPhase::Bootstrap).await?;
        self.events.emit(SyncEvent::SyncStarted {
            store_id: store_id.clone(),
            phase: SyncPhase::Bootstrap,
        });

        let result = self.run_bootstrap(&store_id).await;
        self.end_pass(&store_id).await;

        match result {
            Ok(()) => {
                self.set_status(&store_id, "数据已就绪").await;
                self.events.emit(SyncEvent::SyncCompleted {
                    store_id: store_id.clone(),
                    phase: SyncPhase::Bootstrap,
                });
                self.schedule_persist(&store_id).await;
                Ok(())
            }
            Err(e) => {
                if matches!(e, StoreSyncError::StoreGone(_)) {
                    return Err(e);
                }
                self.set_status(&store_id, "加载失败，等待重试").await;
                self.events.emit(SyncEvent::SyncFailed {
                    store_id: store_id.clone(),
                    phase: SyncPhase::Bootstrap,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_bootstrap(&self, store_id: &str) -> Result<()> {
        // 锚定冷启动开始时刻的 TimestampSet；加载期间的变更由第一次心跳补齐，
        // stamp 永远不超前于其对应的数据
        let snapshot = self.transport.fetch_timestamps(store_id).await?;
        if snapshot.is_store_gone() {
            self.handle_store_gone(store_id).await;
            return Err(StoreSyncError::StoreGone(store_id.to_string()));
        }

        for &kind in BOOTSTRAP_ORDER {
            self.set_status(store_id, kind.bootstrap_status()).await;
            let (set, outcome) = if kind.is_large() {
                let mut working = RecordSet::new();
                CollectionAdapter::bootstrap_paged(&*self.transport, store_id, kind, &mut working)
                    .await?;
                let count = working.len();
                (working, CollectionSyncOutcome::Bootstrapped { count })
            } else {
                let set = CollectionAdapter::full_reload(&*self.transport, store_id, kind).await?;
                let count = set.len();
                (set, CollectionSyncOutcome::FullReload { count })
            };

            {
                let mut state = self.state.write().await;
                *state.store_mut(store_id).collection_mut(kind) = set;
            }
            self.events.emit(SyncEvent::CollectionSynced {
                store_id: store_id.to_string(),
                collection: kind,
                outcome,
            });
        }

        // 全部成功后一次性记录冷启动时刻的所有 stamp（含 deleteActivity）
        let mut state = self.state.write().await;
        for &kind in SYNCABLE_KINDS {
            if let Some(stamp) = snapshot.stamp_for(kind) {
                state.stamps.set(store_id, kind, stamp.clone());
            }
        }
        if let Some(stamp) = snapshot.stamp_for(CollectionKind::DeleteActivity) {
            state
                .stamps
                .set(store_id, CollectionKind::DeleteActivity, stamp.clone());
        }
        state.store_mut(store_id).session.master_data_loaded = true;
        drop(state);

        info!("✅ master data 加载完成: store={}", store_id);
        Ok(())
    }

    // ============================================================
    // 心跳
    // ============================================================

    /// 周期心跳：先补发离线队列，再比对 stamp 做定向同步，最后消化墓碑。
    pub async fn sync_data(&self) -> Result<HeartbeatOutcome> {
        let store_id = self
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        if !self.network.is_online().await {
            return Err(StoreSyncError::Offline);
        }
        self.try_begin_pass(&store_id, SyncPhase::Heartbeat).await?;
        self.events.emit(SyncEvent::SyncStarted {
            store_id: store_id.clone(),
            phase: SyncPhase::Heartbeat,
        });

        let result = self.run_heartbeat(&store_id).await;
        self.end_pass(&store_id).await;

        match result {
            Ok(HeartbeatOutcome::StoreGone) => Ok(HeartbeatOutcome::StoreGone),
            Ok(outcome) => {
                self.events.emit(SyncEvent::SyncCompleted {
                    store_id: store_id.clone(),
                    phase: SyncPhase::Heartbeat,
                });
                self.schedule_persist(&store_id).await;
                Ok(outcome)
            }
            Err(e) => {
                self.events.emit(SyncEvent::SyncFailed {
                    store_id: store_id.clone(),
                    phase: SyncPhase::Heartbeat,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_heartbeat(&self, store_id: &str) -> Result<HeartbeatOutcome> {
        // 1. 先补发离线队列：本机的写先落服务端，随后的拉取自然带回它们的结果
        if !self.queue.is_empty(store_id).await? {
            let report = self.queue.flush(&*self.transport, store_id, false).await?;
            self.apply_flush_receipts(store_id, report).await?;
        }

        // 2. 拉取服务端 TimestampSet
        let snapshot = self.transport.fetch_timestamps(store_id).await?;
        if snapshot.is_store_gone() {
            self.handle_store_gone(store_id).await;
            return Ok(HeartbeatOutcome::StoreGone);
        }

        // 3. 逐集合比对 stamp，不一致才动它；落地后把本地 stamp 推进到
        //    **心跳开始时观察到的值**，适配器不得超前于触发它的 stamp
        let mut synced = 0usize;
        for &kind in SYNCABLE_KINDS {
            let Some(server_stamp) = snapshot.stamp_for(kind) else {
                continue;
            };
            let (local_stamp, current) = {
                let state = self.state.read().await;
                (
                    state.stamps.get(store_id, kind).cloned(),
                    state
                        .store(store_id)
                        .and_then(|s| s.collection(kind))
                        .cloned()
                        .unwrap_or_default(),
                )
            };
            if local_stamp.as_ref() == Some(server_stamp) {
                continue;
            }
            debug!(
                "stamp 不一致，同步集合 {}: local={:?}, server={}",
                kind, local_stamp, server_stamp
            );

            let (set, outcome) = CollectionAdapter::run(
                &*self.transport,
                store_id,
                kind,
                local_stamp.as_ref(),
                current,
            )
            .await?;

            {
                let mut state = self.state.write().await;
                *state.store_mut(store_id).collection_mut(kind) = set;
                state.stamps.set(store_id, kind, server_stamp.clone());
            }
            synced += 1;
            self.events.emit(SyncEvent::CollectionSynced {
                store_id: store_id.to_string(),
                collection: kind,
                outcome,
            });
        }

        // 4. 墓碑每次心跳必查：集合按自己的 stamp 是「新鲜」的也可能有待删记录
        let mut removed = 0usize;
        let local_da = {
            let state = self.state.read().await;
            state
                .stamps
                .get(store_id, CollectionKind::DeleteActivity)
                .cloned()
        };
        if let Some(after) = local_da {
            let notices =
                DeleteTombstoneLog::fetch_since(&*self.transport, store_id, &after).await?;
            if !notices.is_empty() {
                let mut state = self.state.write().await;
                removed = DeleteTombstoneLog::apply(state.store_mut(store_id), &notices);
            }
            if removed > 0 {
                self.events.emit(SyncEvent::TombstonesApplied {
                    store_id: store_id.to_string(),
                    removed,
                });
            }
        }
        if let Some(stamp) = snapshot.stamp_for(CollectionKind::DeleteActivity) {
            let mut state = self.state.write().await;
            state
                .stamps
                .set(store_id, CollectionKind::DeleteActivity, stamp.clone());
        }

        Ok(HeartbeatOutcome::Completed {
            collections_synced: synced,
            tombstones_applied: removed,
        })
    }

    // ============================================================
    // 乐观写对账
    // ============================================================

    /// 对账一次服务端写入回执。
    ///
    /// - 本地 stamp == 回执 `last_action`：写入期间无并发远端变更，
    ///   返回的记录直接作为本地补丁应用（便宜路径）
    /// - 不相等：其他终端在本机上次同步后改过该集合，放弃补丁、
    ///   按集合策略整体重拉，避免悄悄覆盖对方的变更
    ///
    /// 两个分支最后都把本地 stamp 推进到回执的 `now`。
    pub async fn reconcile_write(
        &self,
        store_id: &str,
        kind: CollectionKind,
        receipt: WriteReceipt,
    ) -> Result<WriteOutcome> {
        let local = {
            let state = self.state.read().await;
            state.stamps.get(store_id, kind).cloned()
        };

        let outcome = if local.as_ref() == Some(&receipt.last_action) {
            let mut state = self.state.write().await;
            state
                .store_mut(store_id)
                .collection_mut(kind)
                .merge(vec![receipt.record.clone()]);
            drop(state);
            self.events.emit(SyncEvent::RecordPatched {
                store_id: store_id.to_string(),
                collection: kind,
                record_id: receipt.record.id.clone(),
            });
            WriteOutcome::Patched
        } else {
            debug!(
                "写入对账 stamp 不符，回退重拉 {}: local={:?}, last_action={}",
                kind, local, receipt.last_action
            );
            let current = {
                let state = self.state.read().await;
                state
                    .store(store_id)
                    .and_then(|s| s.collection(kind))
                    .cloned()
                    .unwrap_or_default()
            };
            let (set, sync_outcome) =
                CollectionAdapter::run(&*self.transport, store_id, kind, local.as_ref(), current)
                    .await?;
            {
                let mut state = self.state.write().await;
                *state.store_mut(store_id).collection_mut(kind) = set;
            }
            self.events.emit(SyncEvent::CollectionSynced {
                store_id: store_id.to_string(),
                collection: kind,
                outcome: sync_outcome,
            });
            WriteOutcome::Resynced
        };

        {
            let mut state = self.state.write().await;
            state.stamps.set(store_id, kind, receipt.now.clone());
        }
        self.schedule_persist(store_id).await;
        Ok(outcome)
    }

    // ============================================================
    // 离线队列
    // ============================================================

    /// 补发当前门店的离线队列；`force` 忽略退避（连通恢复沿用）
    pub async fn flush_queue(&self, force: bool) -> Result<FlushReport> {
        let store_id = self
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        let report = self.queue.flush(&*self.transport, &store_id, force).await?;
        self.apply_flush_receipts(&store_id, report).await
    }

    /// 补发成功的回执里，目标集合在同步范围内的走写入对账
    async fn apply_flush_receipts(
        &self,
        store_id: &str,
        report: FlushReport,
    ) -> Result<FlushReport> {
        for (mutation, receipt) in &report.sent {
            if let Ok(kind) = CollectionKind::from_str(&mutation.collection) {
                self.reconcile_write(store_id, kind, receipt.clone()).await?;
            }
        }
        if !report.sent.is_empty() {
            self.schedule_persist(store_id).await;
        }
        Ok(report)
    }

    // ============================================================
    // 状态快照（UI / 上层读取）
    // ============================================================

    pub async fn collection_records(&self, store_id: &str, kind: CollectionKind) -> Vec<Record> {
        let state = self.state.read().await;
        state
            .store(store_id)
            .and_then(|s| s.collection(kind))
            .map(|set| set.records().to_vec())
            .unwrap_or_default()
    }

    pub async fn session(&self, store_id: &str) -> Option<SyncSessionState> {
        let state = self.state.read().await;
        state.store(store_id).map(|s| s.session.clone())
    }

    pub async fn local_stamp(&self, store_id: &str, kind: CollectionKind) -> Option<Stamp> {
        let state = self.state.read().await;
        state.stamps.get(store_id, kind).cloned()
    }

    // ============================================================
    // 私有辅助
    // ============================================================

    /// 重入保护：拿不到则本次触发被丢弃（下一次调度会补上）
    async fn try_begin_pass(&self, store_id: &str, phase: SyncPhase) -> Result<()> {
        let mut state = self.state.write().await;
        let store = state.store_mut(store_id);
        if store.session.sync_in_progress {
            return Err(StoreSyncError::SyncInProgress(format!(
                "{} 触发被丢弃: store={}",
                phase, store_id
            )));
        }
        store.session.sync_in_progress = true;
        Ok(())
    }

    async fn end_pass(&self, store_id: &str) {
        let mut state = self.state.write().await;
        if let Some(store) = state.stores.get_mut(store_id) {
            store.session.sync_in_progress = false;
        }
    }

    /// 更新状态文案（仅供展示，不参与正确性判断）
    async fn set_status(&self, store_id: &str, message: &str) {
        {
            let mut state = self.state.write().await;
            state.store_mut(store_id).session.status_message = message.to_string();
        }
        self.events.emit(SyncEvent::StatusMessage {
            store_id: store_id.to_string(),
            message: message.to_string(),
        });
    }

    /// 把当前选中门店的状态排进落盘队列（关停前由 SDK 调用）
    pub async fn request_persist(&self) {
        if let Some(store_id) = self.selected_store().await {
            self.schedule_persist(&store_id).await;
        }
    }

    /// 把当前门店状态排进防抖落盘队列
    async fn schedule_persist(&self, store_id: &str) {
        let state = self.state.read().await;
        if let Some(store) = state.store(store_id) {
            let snapshot = PersistedStoreState::capture(store_id, store, &state.stamps);
            self.persistence.schedule(store_id, snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkStatus;
    use crate::storage::queue::RetryPolicy;
    use crate::testing::MemoryTransport;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        coordinator: SyncCoordinator,
        transport: Arc<MemoryTransport>,
        queue: Arc<OfflineMutationQueue>,
        persistence: Arc<PersistenceBridge>,
        network: Arc<NetworkMonitor>,
        kv: Arc<KvStore>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::new(dir.path()).await.unwrap());
        let events = Arc::new(EventManager::new(256));
        let queue = Arc::new(OfflineMutationQueue::new(
            kv.clone(),
            RetryPolicy::default(),
            events.clone(),
        ));
        let persistence = Arc::new(PersistenceBridge::new(kv.clone(), 5));
        let network = Arc::new(NetworkMonitor::new());
        network.set_status(NetworkStatus::Online).await;
        let transport = Arc::new(MemoryTransport::new("s1"));
        let coordinator = SyncCoordinator::new(
            transport.clone(),
            queue.clone(),
            persistence.clone(),
            events,
            network.clone(),
            kv.clone(),
        );
        coordinator.select_store("s1").await.unwrap();
        Fixture {
            _dir: dir,
            coordinator,
            transport,
            queue,
            persistence,
            network,
            kv,
        }
    }

    fn seed_basic(transport: &MemoryTransport) {
        transport.seed_collection(CollectionKind::StoreRecord, vec![json!({"id": "s1", "name": "旗舰店"})]);
        transport.seed_collection(CollectionKind::Banks, vec![json!({"id": "b1", "name": "工商银行"})]);
        transport.seed_collection(CollectionKind::AccountHeads, vec![json!({"id": "a1"})]);
        transport.seed_collection(
            CollectionKind::Categories,
            vec![json!({"id": "c1"}), json!({"id": "c2"})],
        );
        transport.seed_collection(
            CollectionKind::ItemProperties,
            vec![json!({"id": "p1", "itemId": "i1"})],
        );
        transport.seed_collection(CollectionKind::AdjustmentReasons, vec![json!({"id": "r1"})]);
        transport.seed_collection(CollectionKind::Videos, vec![json!({"id": "v1"})]);
        transport.seed_collection(
            CollectionKind::Items,
            (0..5).map(|i| json!({"id": format!("i{}", i), "name": format!("商品{}", i)})),
        );
        transport.seed_collection(CollectionKind::Suppliers, vec![json!({"id": "sup1"})]);
        transport.seed_collection(CollectionKind::Customers, vec![json!({"id": "cus1"})]);
        transport.set_stamp(CollectionKind::DeleteActivity, "D1");
    }

    fn by_id(records: &[Record]) -> HashMap<String, Record> {
        records.iter().map(|r| (r.id.clone(), r.clone())).collect()
    }

    #[tokio::test]
    async fn bootstrap_loads_all_collections_and_records_stamps() {
        let fx = fixture().await;
        seed_basic(&fx.transport);

        fx.coordinator.load_master_data().await.unwrap();

        let session = fx.coordinator.session("s1").await.unwrap();
        assert!(session.master_data_loaded);
        assert!(!session.sync_in_progress);
        assert_eq!(session.status_message, "数据已就绪");

        assert_eq!(fx.coordinator.collection_records("s1", CollectionKind::Items).await.len(), 5);
        assert_eq!(fx.coordinator.collection_records("s1", CollectionKind::Banks).await.len(), 1);
        assert_eq!(fx.coordinator.collection_records("s1", CollectionKind::Categories).await.len(), 2);

        // 冷启动时刻的 stamp 被整套记录（含 deleteActivity）
        assert_eq!(
            fx.coordinator.local_stamp("s1", CollectionKind::Items).await,
            fx.transport.stamp_of(CollectionKind::Items)
        );
        assert_eq!(
            fx.coordinator
                .local_stamp("s1", CollectionKind::DeleteActivity)
                .await
                .unwrap()
                .as_str(),
            "D1"
        );
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        // 连跑两次（第二次前强制 master_data_loaded=false），记录集必须一致、无重复
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.transport.set_page_size(2); // 强制大集合分页

        fx.coordinator.load_master_data().await.unwrap();
        let first = fx.coordinator.collection_records("s1", CollectionKind::Items).await;

        {
            let state = fx.coordinator.state();
            let mut state = state.write().await;
            state.store_mut("s1").session.master_data_loaded = false;
        }
        fx.coordinator.load_master_data().await.unwrap();
        let second = fx.coordinator.collection_records("s1", CollectionKind::Items).await;

        assert_eq!(first.len(), 5);
        assert_eq!(by_id(&first), by_id(&second));
    }

    #[tokio::test]
    async fn bootstrap_aborts_wholesale_on_failure() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        // 序列最后一步（customers）网络失败 → 整次放弃
        fx.transport.fail_fetches(CollectionKind::Customers, 1);

        let err = fx.coordinator.load_master_data().await.unwrap_err();
        assert!(err.is_transient());

        let session = fx.coordinator.session("s1").await.unwrap();
        assert!(!session.master_data_loaded);
        // 任何 stamp 都不推进：失败的冷启动不会让本地自以为新鲜
        assert!(fx.coordinator.local_stamp("s1", CollectionKind::Items).await.is_none());

        // 下一次触发从头再来即可成功
        fx.coordinator.load_master_data().await.unwrap();
        assert!(fx.coordinator.session("s1").await.unwrap().master_data_loaded);
        assert_eq!(fx.coordinator.collection_records("s1", CollectionKind::Customers).await.len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_skips_collections_with_matching_stamps() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        let items_fetches = fx.transport.fetch_count(CollectionKind::Items);
        let outcome = fx.coordinator.sync_data().await.unwrap();
        assert_eq!(
            outcome,
            HeartbeatOutcome::Completed { collections_synced: 0, tombstones_applied: 0 }
        );
        // stamp 全部一致：一页都没拉
        assert_eq!(fx.transport.fetch_count(CollectionKind::Items), items_fetches);
    }

    #[tokio::test]
    async fn heartbeat_incremental_example_scenario() {
        // 本地 items stamp=T1；服务端报 T2；增量返回 2 改 1 新 →
        // 条数 +1，两个已有 id 反映新载荷，本地 stamp 变为 T2
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        fx.transport.set_stamp(CollectionKind::Items, "T2");
        fx.transport.seed_changed(
            CollectionKind::Items,
            vec![
                json!({"id": "i9", "name": "新商品"}),
                json!({"id": "i0", "name": "改过0"}),
                json!({"id": "i1", "name": "改过1"}),
            ],
        );

        let outcome = fx.coordinator.sync_data().await.unwrap();
        assert_eq!(
            outcome,
            HeartbeatOutcome::Completed { collections_synced: 1, tombstones_applied: 0 }
        );

        let items = fx.coordinator.collection_records("s1", CollectionKind::Items).await;
        assert_eq!(items.len(), 6);
        let map = by_id(&items);
        assert_eq!(map["i0"].field("name"), Some(&json!("改过0")));
        assert_eq!(map["i1"].field("name"), Some(&json!("改过1")));
        assert!(map.contains_key("i9"));
        // stamp 单调推进：等于心跳开始时观察到的服务端值，从不回退
        assert_eq!(
            fx.coordinator.local_stamp("s1", CollectionKind::Items).await.unwrap().as_str(),
            "T2"
        );
    }

    #[tokio::test]
    async fn store_gone_deselects_and_halts() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        fx.transport.mark_store_gone();
        let outcome = fx.coordinator.sync_data().await.unwrap();
        assert_eq!(outcome, HeartbeatOutcome::StoreGone);
        assert!(fx.coordinator.selected_store().await.is_none());

        // 之后的触发直接报「未选择门店」，不会无限重试
        assert!(matches!(
            fx.coordinator.sync_data().await.unwrap_err(),
            StoreSyncError::NoStoreSelected
        ));
    }

    #[tokio::test]
    async fn reentrancy_guard_drops_overlapping_triggers() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        {
            let state = fx.coordinator.state();
            let mut state = state.write().await;
            state.store_mut("s1").session.sync_in_progress = true;
        }
        assert!(matches!(
            fx.coordinator.sync_data().await.unwrap_err(),
            StoreSyncError::SyncInProgress(_)
        ));
        assert!(matches!(
            fx.coordinator.load_master_data().await.unwrap_err(),
            StoreSyncError::SyncInProgress(_)
        ));

        {
            let state = fx.coordinator.state();
            let mut state = state.write().await;
            state.store_mut("s1").session.sync_in_progress = false;
        }
        fx.coordinator.sync_data().await.unwrap();
    }

    #[tokio::test]
    async fn offline_heartbeat_is_refused() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        fx.network.set_status(NetworkStatus::Offline).await;
        assert!(matches!(
            fx.coordinator.sync_data().await.unwrap_err(),
            StoreSyncError::Offline
        ));
    }

    #[tokio::test]
    async fn reconcile_patches_when_no_concurrent_change() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        // 写入期间无他人动过 items：回执 lastAction == 本地 T1
        let receipt = fx
            .transport
            .create_record("s1", "items", &json!({"id": "i5", "name": "新品"}))
            .await
            .unwrap();
        let outcome = fx
            .coordinator
            .reconcile_write("s1", CollectionKind::Items, receipt.clone())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Patched);

        let items = fx.coordinator.collection_records("s1", CollectionKind::Items).await;
        assert_eq!(items.len(), 6);
        assert!(by_id(&items).contains_key("i5"));
        // 补丁路径也推进 stamp 到写入后的新值
        assert_eq!(
            fx.coordinator.local_stamp("s1", CollectionKind::Items).await.unwrap(),
            receipt.now
        );
    }

    #[tokio::test]
    async fn reconcile_resyncs_on_stamp_mismatch() {
        // 本地 stamp=T1；他端并发改动把集合 stamp 推到 T9；本机乐观写回执
        // lastAction=T9 ≠ T1 → 放弃补丁并重拉，终态等于全新全量拉取
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        fx.transport.seed_changed(CollectionKind::Items, vec![json!({"id": "i0", "name": "别家改的"})]);
        fx.transport.seed_collection(
            CollectionKind::Items,
            vec![
                json!({"id": "i0", "name": "别家改的"}),
                json!({"id": "i1", "name": "商品1"}),
                json!({"id": "i2", "name": "商品2"}),
                json!({"id": "i3", "name": "商品3"}),
                json!({"id": "i4", "name": "商品4"}),
            ],
        );
        fx.transport.set_stamp(CollectionKind::Items, "T9");

        let receipt = fx
            .transport
            .create_record("s1", "items", &json!({"id": "i5", "name": "新品"}))
            .await
            .unwrap();
        assert_eq!(receipt.last_action.as_str(), "T9");

        let outcome = fx
            .coordinator
            .reconcile_write("s1", CollectionKind::Items, receipt.clone())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Resynced);

        // 终态与服务端全量一致：他端的改动和本机的写都在，谁也没丢
        let local = by_id(&fx.coordinator.collection_records("s1", CollectionKind::Items).await);
        let server = by_id(&fx.transport.server_records(CollectionKind::Items));
        assert_eq!(local, server);
        assert_eq!(local["i0"].field("name"), Some(&json!("别家改的")));
        assert!(local.contains_key("i5"));
        assert_eq!(
            fx.coordinator.local_stamp("s1", CollectionKind::Items).await.unwrap(),
            receipt.now
        );
    }

    #[tokio::test]
    async fn tombstones_apply_even_when_owning_stamp_is_fresh() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        // items 自身 stamp 不变，但墓碑日志里有 i1 的删除通知
        fx.transport.set_delete_notices(vec![crate::api::DeleteNotice {
            record_id: "i1".to_string(),
            collection_name: "items".to_string(),
        }]);

        let outcome = fx.coordinator.sync_data().await.unwrap();
        // i1 本体 + itemId=i1 的属性子行
        assert_eq!(
            outcome,
            HeartbeatOutcome::Completed { collections_synced: 0, tombstones_applied: 2 }
        );
        let items = fx.coordinator.collection_records("s1", CollectionKind::Items).await;
        assert!(!by_id(&items).contains_key("i1"));
        let props = fx.coordinator.collection_records("s1", CollectionKind::ItemProperties).await;
        assert!(props.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_flushes_offline_queue_first() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();

        fx.queue
            .enqueue("s1", "sales", json!({"receiptNo": "R1", "total": 30}))
            .await
            .unwrap();
        fx.coordinator.sync_data().await.unwrap();

        assert_eq!(fx.transport.pushed_payloads("sales").len(), 1);
        assert!(fx.queue.is_empty("s1").await.unwrap());
    }

    #[tokio::test]
    async fn state_survives_restart_with_ephemeral_slices_reset() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();
        fx.persistence.flush().await;

        // 模拟重启：同一 KV 上建新协调器，重新选择门店
        let events = Arc::new(EventManager::new(64));
        let queue = Arc::new(OfflineMutationQueue::new(
            fx.kv.clone(),
            RetryPolicy::default(),
            events.clone(),
        ));
        let coordinator2 = SyncCoordinator::new(
            fx.transport.clone(),
            queue,
            fx.persistence.clone(),
            events,
            fx.network.clone(),
            fx.kv.clone(),
        );
        coordinator2.select_store("s1").await.unwrap();

        let session = coordinator2.session("s1").await.unwrap();
        assert!(session.master_data_loaded);
        // 易失切片回到默认
        assert!(!session.sync_in_progress);
        assert!(session.status_message.is_empty());
        assert_eq!(coordinator2.collection_records("s1", CollectionKind::Items).await.len(), 5);
        assert_eq!(
            coordinator2.local_stamp("s1", CollectionKind::Items).await,
            fx.transport.stamp_of(CollectionKind::Items)
        );
    }

    #[tokio::test]
    async fn clear_store_cache_resets_to_not_loaded() {
        let fx = fixture().await;
        seed_basic(&fx.transport);
        fx.coordinator.load_master_data().await.unwrap();
        fx.persistence.flush().await;

        fx.coordinator.clear_store_cache("s1").await.unwrap();
        assert!(fx.coordinator.selected_store().await.is_none());

        // 重新选择后没有快照，回到未加载状态
        fx.coordinator.select_store("s1").await.unwrap();
        let session = fx.coordinator.session("s1").await.unwrap();
        assert!(!session.master_data_loaded);
        assert!(fx.coordinator.collection_records("s1", CollectionKind::Items).await.is_empty());
    }

    #[tokio::test]
    async fn tick_dispatches_bootstrap_then_heartbeat() {
        let fx = fixture().await;
        seed_basic(&fx.transport);

        // 未加载：tick 走冷启动
        fx.coordinator.tick().await.unwrap();
        assert!(fx.coordinator.session("s1").await.unwrap().master_data_loaded);

        // 已加载：tick 走心跳（stamp 一致则不拉集合页）
        let items_fetches = fx.transport.fetch_count(CollectionKind::Items);
        fx.coordinator.tick().await.unwrap();
        assert_eq!(fx.transport.fetch_count(CollectionKind::Items), items_fetches);
    }
}
