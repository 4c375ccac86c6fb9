//! KV 存储模块 - 基于 sled 的键值存储
//!
//! 本模块提供：
//! - 门店隔离的命名空间（每个门店一棵 Tree）
//! - 泛型 serde_json 读写
//! - 前缀扫描（离线队列按序遍历用）
//! - 原子自增序号（队列 FIFO 键）

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tokio::sync::RwLock;

use crate::error::{Result, StoreSyncError};

/// KV 存储组件
#[derive(Debug)]
pub struct KvStore {
    #[allow(dead_code)]
    base_path: PathBuf,
    /// 主数据库实例
    db: Arc<Db>,
    /// 门店专属的 Tree 实例缓存
    store_trees: Arc<RwLock<HashMap<String, Tree>>>,
}

impl KvStore {
    /// 创建新的 KV 存储实例
    pub async fn new(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| StoreSyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 打开 sled 数据库（上一实例可能刚释放锁，重试多次带退避）
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<sled::Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            StoreSyncError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        Ok(Self {
            base_path,
            db: Arc::new(db),
            store_trees: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 获取（必要时打开）门店 Tree
    async fn tree(&self, store_id: &str) -> Result<Tree> {
        {
            let trees = self.store_trees.read().await;
            if let Some(tree) = trees.get(store_id) {
                return Ok(tree.clone());
            }
        }

        let tree_name = format!("store_{}", store_id);
        let tree = self
            .db
            .open_tree(&tree_name)
            .map_err(|e| StoreSyncError::KvStore(format!("打开门店 Tree 失败: {}", e)))?;

        let mut trees = self.store_trees.write().await;
        let tree = trees.entry(store_id.to_string()).or_insert(tree).clone();
        Ok(tree)
    }

    /// 设置键值对
    pub async fn set<V: Serialize>(&self, store_id: &str, key: &str, value: &V) -> Result<()> {
        let tree = self.tree(store_id).await?;
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| StoreSyncError::Serialization(format!("序列化值失败: {}", e)))?;
        tree.insert(key, value_bytes)
            .map_err(|e| StoreSyncError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取键值对
    pub async fn get<V: for<'de> Deserialize<'de>>(
        &self,
        store_id: &str,
        key: &str,
    ) -> Result<Option<V>> {
        let tree = self.tree(store_id).await?;
        let result = tree
            .get(key)
            .map_err(|e| StoreSyncError::KvStore(format!("获取键值对失败: {}", e)))?;
        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| StoreSyncError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对
    pub async fn delete(&self, store_id: &str, key: &str) -> Result<bool> {
        let tree = self.tree(store_id).await?;
        let removed = tree
            .remove(key)
            .map_err(|e| StoreSyncError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(removed.is_some())
    }

    /// 检查键是否存在
    pub async fn exists(&self, store_id: &str, key: &str) -> Result<bool> {
        let tree = self.tree(store_id).await?;
        tree.contains_key(key)
            .map_err(|e| StoreSyncError::KvStore(format!("检查键存在失败: {}", e)))
    }

    /// 获取指定前缀的所有键值对（按键字节序升序）
    pub async fn scan_prefix<V: for<'de> Deserialize<'de>>(
        &self,
        store_id: &str,
        prefix: &str,
    ) -> Result<Vec<(String, V)>> {
        let tree = self.tree(store_id).await?;
        let mut results = Vec::new();
        for result in tree.scan_prefix(prefix.as_bytes()) {
            let (key, value_bytes) =
                result.map_err(|e| StoreSyncError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StoreSyncError::KvStore(format!("键不是合法 UTF-8: {}", e)))?;
            let value = serde_json::from_slice(&value_bytes)
                .map_err(|e| StoreSyncError::Serialization(format!("反序列化值失败: {}", e)))?;
            results.push((key, value));
        }
        Ok(results)
    }

    /// 原子自增序号（离线队列的 FIFO 键），返回新值
    pub async fn next_sequence(&self, store_id: &str, key: &str) -> Result<u64> {
        let tree = self.tree(store_id).await?;
        loop {
            let current = tree
                .get(key)
                .map_err(|e| StoreSyncError::KvStore(format!("获取序号失败: {}", e)))?;
            let current_value = match &current {
                Some(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| StoreSyncError::KvStore("序号值格式错误".to_string()))?,
                None => 0,
            };
            let new_value = current_value + 1;
            let swap = tree
                .compare_and_swap(key, current, Some(new_value.to_string().into_bytes()))
                .map_err(|e| StoreSyncError::KvStore(format!("序号自增失败: {}", e)))?;
            match swap {
                Ok(_) => return Ok(new_value),
                Err(_) => continue, // CAS 失败重试
            }
        }
    }

    /// 删除门店 Tree（清缓存 / 门店删除）
    pub async fn drop_store_tree(&self, store_id: &str) -> Result<()> {
        let mut trees = self.store_trees.write().await;
        trees.remove(store_id);
        let tree_name = format!("store_{}", store_id);
        self.db
            .drop_tree(&tree_name)
            .map_err(|e| StoreSyncError::KvStore(format!("删除门店 Tree 失败: {}", e)))?;
        tracing::info!("门店本地数据已清空: {}", store_id);
        Ok(())
    }
}
