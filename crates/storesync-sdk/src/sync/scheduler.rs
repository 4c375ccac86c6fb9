//! 心跳调度器 - 周期触发协调器的同步入口
//!
//! 协调器自身不做重试 / 周期策略（遇错即返），所有生命周期编排在这里：
//! - 固定间隔调用 `tick()`（未加载走冷启动，已加载走心跳）
//! - 离线 / 同步进行中 / 触发被丢弃：降级为 debug 日志，等下一拍
//! - 门店取消选择（含 store-gone）：任务自行退出
//! - SDK 关停：通过 Notify 立即退出

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreSyncError;
use crate::sync::coordinator::SyncCoordinator;

/// 心跳调度器句柄
pub struct HeartbeatScheduler {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl HeartbeatScheduler {
    /// 启动调度任务。第一拍在一个完整间隔之后（选择门店时由上层立即触发一次）。
    pub fn start(coordinator: Arc<SyncCoordinator>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 错过的拍不补：落后时跳到下一拍，避免触发风暴
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // 第一次 tick 立即完成，丢弃

            loop {
                tokio::select! {
                    _ = shutdown_signal.notified() => {
                        info!("心跳调度器收到关停信号，退出");
                        break;
                    }
                    _ = ticker.tick() => {
                        match coordinator.tick().await {
                            Ok(()) => {}
                            Err(StoreSyncError::NoStoreSelected) => {
                                info!("门店已取消选择，心跳调度器退出");
                                break;
                            }
                            Err(StoreSyncError::Offline) => {
                                debug!("离线，跳过本拍心跳");
                            }
                            Err(StoreSyncError::SyncInProgress(msg)) => {
                                debug!("同步仍在进行，触发被丢弃: {}", msg);
                            }
                            Err(e) if e.is_auth_failure() => {
                                // 会话失效：停止同步，等待重新认证后重启调度
                                warn!("认证失效，心跳调度器停止: {}", e);
                                break;
                            }
                            Err(e) => {
                                // 瞬时失败整体重试：状态未被污染，下一拍从头再来
                                warn!("本拍同步失败，等待下一拍重试: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Self { handle, shutdown }
    }

    /// 停止调度（幂等；任务可能已自行退出）
    pub fn stop(self) {
        self.shutdown.notify_waiters();
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
