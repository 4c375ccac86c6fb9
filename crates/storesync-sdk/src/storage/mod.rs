//! 存储模块 - 设备端持久化
//!
//! 引擎对存储介质的假设只有一条：一个可靠的 KV blob 存储。
//! 实现基于 sled，每个门店一棵独立的 Tree（租户隔离）。

pub mod kv;
pub mod persistence;
pub mod queue;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

pub use kv::KvStore;
pub use persistence::{PersistenceBridge, PersistedStoreState};

/// 存储管理器：持有 KV 存储与数据目录
#[derive(Debug)]
pub struct StorageManager {
    base_path: PathBuf,
    kv: Arc<KvStore>,
}

impl StorageManager {
    pub async fn new(base_path: &Path) -> Result<Self> {
        let kv = KvStore::new(base_path).await?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
            kv: Arc::new(kv),
        })
    }

    pub fn kv(&self) -> Arc<KvStore> {
        self.kv.clone()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 清空某门店的全部本地数据（状态快照、stamp、离线队列）
    pub async fn clear_store_data(&self, store_id: &str) -> Result<()> {
        self.kv.drop_store_tree(store_id).await
    }
}
