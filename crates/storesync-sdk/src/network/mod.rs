//! 网络状态监控
//!
//! 心跳只在在线时运行；掉线期间 UI 继续读本地副本，销售写入进离线队列；
//! 恢复在线时先补发队列再立即触发一次心跳。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Online => write!(f, "在线"),
            NetworkStatus::Offline => write!(f, "离线"),
        }
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

impl NetworkStatusEvent {
    /// 是否为「离线 → 在线」的恢复沿（触发队列补发 + 立即心跳）
    pub fn is_recovery(&self) -> bool {
        self.old_status == NetworkStatus::Offline && self.new_status == NetworkStatus::Online
    }
}

/// 网络状态监听器 trait（由平台层实现，如桌面 / 移动端的连通性探测）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;
}

/// 网络监控管理器：缓存当前状态并广播变化
#[derive(Debug)]
pub struct NetworkMonitor {
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<tokio::sync::RwLock<NetworkStatus>>,
}

impl NetworkMonitor {
    /// 创建监控器，初始视为离线（首个 Online 事件会触发补发）
    pub fn new() -> Self {
        let (status_sender, _) = broadcast::channel(100);
        Self {
            status_sender,
            current_status: Arc::new(tokio::sync::RwLock::new(NetworkStatus::Offline)),
        }
    }

    /// 接入平台监听器：把平台事件桥接到本监控器
    pub async fn attach_listener(&self, listener: Arc<dyn NetworkStatusListener>) -> Result<()> {
        let initial = listener.get_current_status().await;
        self.set_status(initial).await;

        let mut receiver = listener.start_monitoring().await?;
        let current_status = self.current_status.clone();
        let status_sender = self.status_sender.clone();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                {
                    let mut status = current_status.write().await;
                    *status = event.new_status;
                }
                let _ = status_sender.send(event);
            }
        });
        Ok(())
    }

    pub async fn get_status(&self) -> NetworkStatus {
        *self.current_status.read().await
    }

    pub async fn is_online(&self) -> bool {
        self.get_status().await == NetworkStatus::Online
    }

    /// 手动设置网络状态（平台层无监听器时由宿主直接上报）
    pub async fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write().await;
            let old = *status;
            *status = new_status;
            old
        };
        if old_status == new_status {
            return;
        }
        let _ = self.status_sender.send(NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
