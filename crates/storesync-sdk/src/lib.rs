//! StoreSync SDK - 零售后台的离线优先增量同步引擎
//!
//! 本 SDK 为多门店零售后台客户端维护服务端集合的本地副本，提供：
//! - 🔄 冷启动 master data 全量加载（参考集合整表 + 大集合分页）
//! - 💓 心跳式 stamp 比对，只重拉有差异的集合
//! - ✍️ 乐观写对账：stamp 相符打补丁，不符回退重拉，不丢他端变更
//! - 🪦 墓碑日志驱动的删除传播（独立于集合自身 stamp）
//! - 📦 离线销售队列：持久化 FIFO，恢复连接后按序补发
//! - 💾 状态防抖落盘与启动重建（易失切片显式重置）
//! - ⚙️ 事件系统：同步进度 / 队列进度 / 网络变化的统一通知
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use storesync_sdk::{CollectionKind, NetworkStatus, StoreSyncConfig, StoreSyncSDK};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 配置 SDK
//!     let config = StoreSyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://api.example.com/sync")
//!         .heartbeat_interval(30)
//!         .build();
//!
//!     // 初始化并选择门店（首次选择触发 master data 冷启动）
//!     let sdk = StoreSyncSDK::initialize(config).await?;
//!     sdk.set_network_status(NetworkStatus::Online).await;
//!     sdk.select_store("store-001").await?;
//!
//!     // 读本地副本（离线也可用）
//!     let items = sdk.collection_records(CollectionKind::Items).await?;
//!     println!("本地商品数: {}", items.len());
//!
//!     // 销售单：离线入队，恢复连接后按序补发
//!     sdk.submit_sale(serde_json::json!({"receiptNo": "R1", "total": 59.0})).await?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod api;
pub mod collections;
pub mod error;
pub mod events;
pub mod network;
pub mod record;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出核心类型，方便使用
pub use api::{
    ApiError, CollectionPage, DeleteNotice, HttpTransport, SyncTransport, TimestampSnapshot,
    WriteReceipt,
};
pub use collections::{CollectionKind, SyncStrategy, BOOTSTRAP_ORDER, SYNCABLE_KINDS};
pub use error::{Result, StoreSyncError};
pub use events::{EventManager, SyncEvent};
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener};
pub use record::{Record, RecordSet};
pub use sdk::{HttpClientConfig, StoreSyncConfig, StoreSyncConfigBuilder, StoreSyncSDK};
pub use storage::queue::{
    FlushFailureReason, FlushReport, OfflineMutation, OfflineMutationQueue, RetryPolicy,
};
pub use storage::{KvStore, PersistedStoreState, PersistenceBridge, StorageManager};
pub use sync::{
    CollectionAdapter, CollectionSyncOutcome, DeleteTombstoneLog, HeartbeatOutcome,
    HeartbeatScheduler, Stamp, StoreState, SyncCoordinator, SyncPhase, SyncSessionState,
    TimestampRegistry, WriteOutcome,
};
pub use version::SDK_VERSION;
