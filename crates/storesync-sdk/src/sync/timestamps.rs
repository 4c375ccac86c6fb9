//! 版本戳注册表 - 每个门店每个集合「上次对齐到的服务端版本」
//!
//! 职责：
//! - 存储和更新 {store_id -> {collection -> stamp}}
//! - 提供相等性比对（stamp 不透明，只比相等，不比大小）
//!
//! 不变量：某集合的本地记录集只有在注册表里的 stamp 与服务端当前 stamp
//! 相等时才可信。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::collections::CollectionKind;

/// 不透明版本戳：服务端为每个集合维护，任何写入都会改变它。
///
/// 恰好是时间戳字符串，但客户端**只做相等比较**，从不排序。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stamp(String);

impl Stamp {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Stamp {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Stamp {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 版本戳注册表（纯数据 + 访问器，由协调器独占持有并修改）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampRegistry {
    stamps: HashMap<String, HashMap<CollectionKind, Stamp>>,
}

impl TimestampRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, store_id: &str, kind: CollectionKind) -> Option<&Stamp> {
        self.stamps.get(store_id)?.get(&kind)
    }

    pub fn set(&mut self, store_id: &str, kind: CollectionKind, stamp: Stamp) {
        self.stamps
            .entry(store_id.to_string())
            .or_default()
            .insert(kind, stamp);
    }

    /// 本地 stamp 是否与服务端一致（一致 = 本地集合可信，无需同步）
    pub fn matches(&self, store_id: &str, kind: CollectionKind, server: &Stamp) -> bool {
        self.get(store_id, kind) == Some(server)
    }

    /// 某门店的全部 stamp（持久化快照用）
    pub fn store_stamps(&self, store_id: &str) -> HashMap<CollectionKind, Stamp> {
        self.stamps.get(store_id).cloned().unwrap_or_default()
    }

    /// 整体装回某门店的 stamp（启动 rehydrate 用）
    pub fn restore_store(&mut self, store_id: &str, stamps: HashMap<CollectionKind, Stamp>) {
        self.stamps.insert(store_id.to_string(), stamps);
    }

    /// 清掉某门店的全部 stamp（登出 / 门店删除 / 清缓存）
    pub fn clear_store(&mut self, store_id: &str) {
        self.stamps.remove(store_id);
    }
}
