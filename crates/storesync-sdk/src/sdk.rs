//! StoreSync SDK 入口 - 配置与生命周期管理
//!
//! SDK 是同步引擎对宿主应用的唯一入口：
//! - 初始化存储 / 传输 / 事件 / 网络监控，组装协调器
//! - 选择门店时重建本地状态并启动心跳调度
//! - 暴露写路径（乐观写 + 离线销售队列）与状态快照读取
//! - 「离线 → 在线」恢复沿：先补发队列，再立即触发一次同步

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::api::{HttpTransport, SyncTransport};
use crate::collections::CollectionKind;
use crate::error::{Result, StoreSyncError};
use crate::events::{EventManager, SyncEvent};
use crate::network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
use crate::record::Record;
use crate::storage::queue::{OfflineMutation, OfflineMutationQueue, RetryPolicy};
use crate::storage::{PersistenceBridge, StorageManager};
use crate::sync::{HeartbeatScheduler, SyncCoordinator, SyncSessionState};
use crate::version;

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(15),
            request_timeout_secs: Some(60),
        }
    }
}

/// StoreSync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 同步 API 基础 URL（如 https://api.example.com/sync）
    pub api_base_url: String,
    /// 心跳间隔（秒）
    pub heartbeat_interval: u64,
    /// 状态落盘防抖窗口（毫秒）
    pub persist_debounce_ms: u64,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// 离线队列重试策略
    pub retry_policy: RetryPolicy,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
}

impl Default for StoreSyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            api_base_url: "http://localhost:8080/sync".to_string(),
            heartbeat_interval: 30,
            persist_debounce_ms: 500,
            event_buffer_size: 1000,
            retry_policy: RetryPolicy::default(),
            http_client_config: HttpClientConfig::default(),
        }
    }
}

impl StoreSyncConfig {
    pub fn builder() -> StoreSyncConfigBuilder {
        StoreSyncConfigBuilder::new()
    }
}

/// 获取默认数据目录 ~/.storesync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".storesync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".storesync")
    } else {
        PathBuf::from("./storesync_data")
    }
}

/// StoreSync SDK 配置构建器
pub struct StoreSyncConfigBuilder {
    config: StoreSyncConfig,
}

impl StoreSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreSyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn heartbeat_interval(mut self, interval_secs: u64) -> Self {
        self.config.heartbeat_interval = interval_secs;
        self
    }

    pub fn persist_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.config.persist_debounce_ms = debounce_ms;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn build(self) -> StoreSyncConfig {
        self.config
    }
}

impl Default for StoreSyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// StoreSync SDK
pub struct StoreSyncSDK {
    config: StoreSyncConfig,
    #[allow(dead_code)]
    storage: Arc<StorageManager>,
    coordinator: Arc<SyncCoordinator>,
    events: Arc<EventManager>,
    network: Arc<NetworkMonitor>,
    queue: Arc<OfflineMutationQueue>,
    persistence: Arc<PersistenceBridge>,
    transport: Arc<dyn SyncTransport>,
    scheduler: RwLock<Option<HeartbeatScheduler>>,
    shutting_down: RwLock<bool>,
}

impl StoreSyncSDK {
    /// 初始化 SDK（生产路径：HTTP 传输）
    pub async fn initialize(config: StoreSyncConfig) -> Result<Arc<Self>> {
        let transport = Arc::new(HttpTransport::new(
            &config.http_client_config,
            config.api_base_url.clone(),
        )?);
        Self::initialize_with_transport(config, transport).await
    }

    /// 以注入的传输初始化（测试 / 自定义传输）
    pub async fn initialize_with_transport(
        config: StoreSyncConfig,
        transport: Arc<dyn SyncTransport>,
    ) -> Result<Arc<Self>> {
        let storage = Arc::new(StorageManager::new(&config.data_dir).await?);
        let kv = storage.kv();
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let network = Arc::new(NetworkMonitor::new());
        let queue = Arc::new(OfflineMutationQueue::new(
            kv.clone(),
            config.retry_policy.clone(),
            events.clone(),
        ));
        let persistence = Arc::new(PersistenceBridge::new(kv.clone(), config.persist_debounce_ms));
        let coordinator = Arc::new(SyncCoordinator::new(
            transport.clone(),
            queue.clone(),
            persistence.clone(),
            events.clone(),
            network.clone(),
            kv,
        ));

        let sdk = Arc::new(Self {
            config,
            storage,
            coordinator,
            events,
            network,
            queue,
            persistence,
            transport,
            scheduler: RwLock::new(None),
            shutting_down: RwLock::new(false),
        });
        sdk.clone().start_network_bridge();

        info!("✅ StoreSync SDK 已初始化 (版本: {})", version::SDK_VERSION);
        Ok(sdk)
    }

    /// 「网络事件 → 同步动作」桥：恢复在线先补发队列（忽略退避），再立即触发一次同步
    fn start_network_bridge(self: Arc<Self>) {
        let mut rx = self.network.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                self.events.emit(SyncEvent::NetworkChanged {
                    old_status: event.old_status,
                    new_status: event.new_status,
                });
                if !event.is_recovery() {
                    continue;
                }
                if self.is_shutting_down().await {
                    break;
                }
                info!("网络恢复在线，补发离线队列并触发同步");
                match self.coordinator.flush_queue(true).await {
                    Ok(report) if !report.sent.is_empty() => {
                        info!("恢复沿补发完成: {} 条，剩余 {}", report.sent.len(), report.remaining);
                    }
                    Ok(_) => {}
                    Err(StoreSyncError::NoStoreSelected) => continue,
                    Err(e) => warn!("恢复沿补发失败，待心跳重试: {}", e),
                }
                if let Err(e) = self.coordinator.tick().await {
                    match e {
                        StoreSyncError::NoStoreSelected
                        | StoreSyncError::Offline
                        | StoreSyncError::SyncInProgress(_) => debug!("恢复沿同步跳过: {}", e),
                        e => warn!("恢复沿同步失败，待心跳重试: {}", e),
                    }
                }
            }
        });
    }

    // ============================================================
    // 门店生命周期
    // ============================================================

    /// 选择门店：重建本地状态、启动心跳调度；在线则立即触发一次同步
    /// （首次选择时即为 master data 冷启动）。
    ///
    /// 立即触发的那次同步失败会原样返回错误，但门店保持选中、
    /// 调度器继续运行，下一拍心跳整体重试。
    pub async fn select_store(&self, store_id: &str) -> Result<()> {
        self.ensure_not_shutting_down().await?;

        // 切换门店：旧调度器先停
        if let Some(scheduler) = self.scheduler.write().await.take() {
            scheduler.stop();
        }
        self.coordinator.select_store(store_id).await?;
        *self.scheduler.write().await = Some(HeartbeatScheduler::start(
            self.coordinator.clone(),
            Duration::from_secs(self.config.heartbeat_interval),
        ));

        if self.network.is_online().await {
            match self.coordinator.tick().await {
                Ok(()) => {}
                Err(e @ StoreSyncError::SyncInProgress(_)) | Err(e @ StoreSyncError::Offline) => {
                    debug!("选择门店后的立即同步跳过: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 取消选择当前门店（心跳停止，持久化数据保留）
    pub async fn deselect_store(&self) -> Option<String> {
        if let Some(scheduler) = self.scheduler.write().await.take() {
            scheduler.stop();
        }
        self.coordinator.deselect_store().await
    }

    /// 清空某门店的全部本地缓存，回到「未加载」
    pub async fn clear_store_cache(&self, store_id: &str) -> Result<()> {
        if self.coordinator.selected_store().await.as_deref() == Some(store_id) {
            if let Some(scheduler) = self.scheduler.write().await.take() {
                scheduler.stop();
            }
        }
        self.coordinator.clear_store_cache(store_id).await
    }

    // ============================================================
    // 网络
    // ============================================================

    /// 宿主直接上报网络状态（无平台监听器时）
    pub async fn set_network_status(&self, status: NetworkStatus) {
        self.network.set_status(status).await;
    }

    /// 接入平台网络监听器
    pub async fn attach_network_listener(
        &self,
        listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<()> {
        self.network.attach_listener(listener).await
    }

    pub async fn is_online(&self) -> bool {
        self.network.is_online().await
    }

    // ============================================================
    // 写路径
    // ============================================================

    /// 提交销售单：总是先入持久化队列再补发，离线照常可用。
    ///
    /// 队列非空时直接发送会越过先入队的条目，破坏 FIFO，
    /// 所以在线时也走「入队 → 立即补发」。
    pub async fn submit_sale(&self, payload: serde_json::Value) -> Result<OfflineMutation> {
        let store_id = self
            .coordinator
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        let mutation = self.queue.enqueue(&store_id, "sales", payload).await?;

        if self.network.is_online().await {
            if let Err(e) = self.coordinator.flush_queue(false).await {
                debug!("入队后立即补发未完成，待心跳重试: {}", e);
            }
        }
        Ok(mutation)
    }

    /// 乐观创建：服务端成功后按 stamp 对账（相符打补丁，不符重拉）。
    /// 离线时主数据写路径不可用。
    pub async fn create_record(
        &self,
        kind: CollectionKind,
        payload: serde_json::Value,
    ) -> Result<Record> {
        self.write_record(kind, payload, false).await
    }

    /// 乐观更新，语义同 [`Self::create_record`]
    pub async fn update_record(
        &self,
        kind: CollectionKind,
        payload: serde_json::Value,
    ) -> Result<Record> {
        self.write_record(kind, payload, true).await
    }

    async fn write_record(
        &self,
        kind: CollectionKind,
        payload: serde_json::Value,
        is_update: bool,
    ) -> Result<Record> {
        let store_id = self
            .coordinator
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        if !self.network.is_online().await {
            return Err(StoreSyncError::Offline);
        }

        let receipt = if is_update {
            self.transport
                .update_record(&store_id, kind.as_str(), &payload)
                .await?
        } else {
            self.transport
                .create_record(&store_id, kind.as_str(), &payload)
                .await?
        };
        let record = receipt.record.clone();
        self.coordinator.reconcile_write(&store_id, kind, receipt).await?;
        Ok(record)
    }

    // ============================================================
    // 读路径与事件
    // ============================================================

    pub async fn selected_store(&self) -> Option<String> {
        self.coordinator.selected_store().await
    }

    /// 当前门店某集合的记录快照
    pub async fn collection_records(&self, kind: CollectionKind) -> Result<Vec<Record>> {
        let store_id = self
            .coordinator
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        Ok(self.coordinator.collection_records(&store_id, kind).await)
    }

    /// 当前门店的同步会话状态
    pub async fn session_state(&self) -> Result<SyncSessionState> {
        let store_id = self
            .coordinator
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        self.coordinator
            .session(&store_id)
            .await
            .ok_or(StoreSyncError::NoStoreSelected)
    }

    /// 订阅同步事件流
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// 手动触发一次同步（未加载走冷启动，已加载走心跳）
    pub async fn sync_now(&self) -> Result<()> {
        self.coordinator.tick().await
    }

    /// 当前门店离线队列长度
    pub async fn pending_mutations(&self) -> Result<usize> {
        let store_id = self
            .coordinator
            .selected_store()
            .await
            .ok_or(StoreSyncError::NoStoreSelected)?;
        self.queue.len(&store_id).await
    }

    // ============================================================
    // 关停
    // ============================================================

    pub async fn is_shutting_down(&self) -> bool {
        *self.shutting_down.read().await
    }

    async fn ensure_not_shutting_down(&self) -> Result<()> {
        if self.is_shutting_down().await {
            return Err(StoreSyncError::ShuttingDown("SDK 正在关闭".to_string()));
        }
        Ok(())
    }

    /// 关闭 SDK：停调度、把挂起的状态快照写完
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut flag = self.shutting_down.write().await;
            *flag = true;
        }
        if let Some(scheduler) = self.scheduler.write().await.take() {
            scheduler.stop();
        }
        self.coordinator.request_persist().await;
        self.persistence.flush().await;
        info!("StoreSync SDK 已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreSyncConfig {
        StoreSyncConfig::builder()
            .data_dir(dir.path())
            .api_base_url("http://localhost:9/sync") // 不会被访问（注入内存传输）
            .heartbeat_interval(3600) // 测试内不靠调度器触发
            .persist_debounce_ms(5)
            .build()
    }

    fn seeded_transport() -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new("s1"));
        transport.seed_collection(CollectionKind::Banks, vec![json!({"id": "b1"})]);
        transport.seed_collection(
            CollectionKind::Items,
            vec![json!({"id": "i1", "name": "可乐"})],
        );
        transport
    }

    #[test]
    fn config_builder_overrides_defaults() {
        let config = StoreSyncConfig::builder()
            .api_base_url("https://api.example.com/sync")
            .heartbeat_interval(10)
            .event_buffer_size(64)
            .build();
        assert_eq!(config.api_base_url, "https://api.example.com/sync");
        assert_eq!(config.heartbeat_interval, 10);
        assert_eq!(config.event_buffer_size, 64);
        // 未覆盖的保持默认
        assert_eq!(config.persist_debounce_ms, 500);
    }

    #[tokio::test]
    async fn select_store_online_runs_bootstrap() {
        let dir = TempDir::new().unwrap();
        let transport = seeded_transport();
        let sdk = StoreSyncSDK::initialize_with_transport(test_config(&dir), transport.clone())
            .await
            .unwrap();

        sdk.set_network_status(NetworkStatus::Online).await;
        sdk.select_store("s1").await.unwrap();

        let session = sdk.session_state().await.unwrap();
        assert!(session.master_data_loaded);
        assert_eq!(sdk.collection_records(CollectionKind::Items).await.unwrap().len(), 1);

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn offline_select_then_recovery_flushes_and_syncs() {
        let dir = TempDir::new().unwrap();
        let transport = seeded_transport();
        let sdk = StoreSyncSDK::initialize_with_transport(test_config(&dir), transport.clone())
            .await
            .unwrap();

        // 离线选择：不做冷启动，销售照常入队
        sdk.select_store("s1").await.unwrap();
        assert!(!sdk.session_state().await.unwrap().master_data_loaded);
        sdk.submit_sale(json!({"receiptNo": "R1", "total": 30})).await.unwrap();
        assert_eq!(sdk.pending_mutations().await.unwrap(), 1);
        assert!(transport.pushed_payloads("sales").is_empty());

        // 恢复在线：桥任务补发队列并触发冷启动
        sdk.set_network_status(NetworkStatus::Online).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sdk.pending_mutations().await.unwrap(), 0);
        assert_eq!(transport.pushed_payloads("sales").len(), 1);
        assert!(sdk.session_state().await.unwrap().master_data_loaded);

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn master_data_writes_require_online() {
        let dir = TempDir::new().unwrap();
        let sdk = StoreSyncSDK::initialize_with_transport(test_config(&dir), seeded_transport())
            .await
            .unwrap();
        sdk.select_store("s1").await.unwrap();

        let err = sdk
            .create_record(CollectionKind::Customers, json!({"name": "张三"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreSyncError::Offline));

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn create_record_patches_local_state() {
        let dir = TempDir::new().unwrap();
        let transport = seeded_transport();
        let sdk = StoreSyncSDK::initialize_with_transport(test_config(&dir), transport.clone())
            .await
            .unwrap();
        sdk.set_network_status(NetworkStatus::Online).await;
        sdk.select_store("s1").await.unwrap();

        let record = sdk
            .create_record(CollectionKind::Items, json!({"id": "i2", "name": "雪碧"}))
            .await
            .unwrap();
        assert_eq!(record.id, "i2");

        let items = sdk.collection_records(CollectionKind::Items).await.unwrap();
        assert_eq!(items.len(), 2);

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn operations_after_shutdown_are_refused() {
        let dir = TempDir::new().unwrap();
        let sdk = StoreSyncSDK::initialize_with_transport(test_config(&dir), seeded_transport())
            .await
            .unwrap();
        sdk.shutdown().await.unwrap();

        assert!(matches!(
            sdk.select_store("s1").await.unwrap_err(),
            StoreSyncError::ShuttingDown(_)
        ));
    }
}
