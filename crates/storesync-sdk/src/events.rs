//! 事件系统模块 - 同步引擎对 UI 的单向通知
//!
//! 功能包括：
//! - 同步生命周期事件（开始 / 完成 / 失败）
//! - 每个集合的同步结果
//! - 离线队列进度
//! - 门店失效、网络变化、状态文案
//!
//! UI 只订阅事件并读取对账后的状态快照，从不直接改引擎状态。

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::collections::CollectionKind;
use crate::network::NetworkStatus;
use crate::sync::{CollectionSyncOutcome, SyncPhase};

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 一轮同步开始（冷启动或心跳）
    SyncStarted { store_id: String, phase: SyncPhase },
    /// 一轮同步完成
    SyncCompleted { store_id: String, phase: SyncPhase },
    /// 一轮同步失败（整体放弃，等待下一次触发）
    SyncFailed {
        store_id: String,
        phase: SyncPhase,
        error: String,
    },
    /// 某个集合同步落地
    CollectionSynced {
        store_id: String,
        collection: CollectionKind,
        outcome: CollectionSyncOutcome,
    },
    /// 墓碑应用完成（本轮删除了多少条本地记录）
    TombstonesApplied { store_id: String, removed: usize },
    /// 乐观写直接打补丁成功
    RecordPatched {
        store_id: String,
        collection: CollectionKind,
        record_id: String,
    },
    /// 状态文案变化（仅供展示）
    StatusMessage { store_id: String, message: String },
    /// 门店已删除或权限被回收，已自动取消选择
    StoreGone { store_id: String },
    /// 离线变更入队
    MutationEnqueued { store_id: String, mutation_id: String },
    /// 离线变更补发成功
    MutationFlushed { store_id: String, mutation_id: String },
    /// 离线变更被服务端拒绝（不可重试），滞留队首等待处理
    MutationRejected {
        store_id: String,
        mutation_id: String,
        error: String,
    },
    /// 网络状态变化
    NetworkChanged {
        old_status: NetworkStatus,
        new_status: NetworkStatus,
    },
}

/// 事件管理器：broadcast 扇出，无订阅者时事件直接丢弃
#[derive(Debug)]
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventManager {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// 发出事件（fire-and-forget）
    pub fn emit(&self, event: SyncEvent) {
        debug!("事件: {:?}", event);
        let _ = self.sender.send(event);
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
