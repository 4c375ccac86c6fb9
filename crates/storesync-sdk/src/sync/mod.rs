//! 增量同步模块
//!
//! 职责：
//! - 管理每个门店每个集合的版本戳（TimestampRegistry）
//! - 冷启动全量加载（分页的 master data bootstrap）
//! - 心跳比对 stamp 并触发定向重拉 / 增量拉取
//! - 乐观写对账（stamp 相符打补丁，不符回退重拉）
//! - 墓碑日志驱动的删除传播

pub mod adapter;
pub mod coordinator;
pub mod scheduler;
pub mod timestamps;
pub mod tombstones;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use adapter::CollectionAdapter;
pub use coordinator::SyncCoordinator;
pub use scheduler::HeartbeatScheduler;
pub use timestamps::{Stamp, TimestampRegistry};
pub use tombstones::DeleteTombstoneLog;

use crate::collections::CollectionKind;
use crate::record::RecordSet;

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// 冷启动全量加载（master data）
    Bootstrap,
    /// 周期心跳
    Heartbeat,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Bootstrap => write!(f, "bootstrap"),
            SyncPhase::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// 单个集合一次同步的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionSyncOutcome {
    /// 整表重拉并替换，记录最终条数
    FullReload { count: usize },
    /// 增量合并，记录本轮拉到的变更条数
    Incremental { fetched: usize },
    /// 冷启动分页加载，记录最终条数
    Bootstrapped { count: usize },
}

/// 一次心跳的整体结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// 正常完成
    Completed {
        collections_synced: usize,
        tombstones_applied: usize,
    },
    /// 服务端报告门店不存在，已取消选择并停止同步
    StoreGone,
}

/// 乐观写对账的两个分支
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// stamp 相符：返回的记录直接作为本地补丁应用
    Patched,
    /// stamp 不符：放弃补丁，已按集合策略重拉
    Resynced,
}

/// 每个门店的同步会话状态
///
/// `status_message` 与 `sync_in_progress` 是易失状态：仅对本次会话有意义，
/// 持久化重建时一律回到默认值（见 PersistenceBridge 的黑名单策略）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSessionState {
    /// master data 是否已完整加载过
    pub master_data_loaded: bool,
    /// 重入保护：一轮同步（冷启动或心跳）正在进行
    pub sync_in_progress: bool,
    /// 状态文案（仅供 UI 展示）
    pub status_message: String,
}

impl Default for SyncSessionState {
    fn default() -> Self {
        Self {
            master_data_loaded: false,
            sync_in_progress: false,
            status_message: String::new(),
        }
    }
}

/// 单个门店的对账后状态：各集合的本地记录集 + 会话状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub collections: HashMap<CollectionKind, RecordSet>,
    pub session: SyncSessionState,
}

impl StoreState {
    pub fn collection(&self, kind: CollectionKind) -> Option<&RecordSet> {
        self.collections.get(&kind)
    }

    pub fn collection_mut(&mut self, kind: CollectionKind) -> &mut RecordSet {
        self.collections.entry(kind).or_default()
    }
}

/// 客户端整体状态树：协调器独占所有权，UI 只读快照
#[derive(Debug, Default)]
pub struct ClientState {
    /// 当前选中的门店（同一时刻至多一个）
    pub selected_store: Option<String>,
    /// 各门店的对账后状态
    pub stores: HashMap<String, StoreState>,
    /// 版本戳注册表
    pub stamps: TimestampRegistry,
}

impl ClientState {
    pub fn store(&self, store_id: &str) -> Option<&StoreState> {
        self.stores.get(store_id)
    }

    pub fn store_mut(&mut self, store_id: &str) -> &mut StoreState {
        self.stores.entry(store_id.to_string()).or_default()
    }
}
