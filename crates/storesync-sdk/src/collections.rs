//! 集合类型枚举 - 服务端集合的受控枚举
//!
//! collection 名称为受控枚举，与服务端接口一致，新增需 SDK 与 Server 同步升级。

use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 集合类型（与服务端 URL / timestamps 响应中的名称一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Items,
    Suppliers,
    Customers,
    Categories,
    ItemProperties,
    AdjustmentReasons,
    Banks,
    AccountHeads,
    Videos,
    DeleteActivity,
    StoreRecord,
}

/// 集合的同步策略
///
/// 参考集合体量有上界，整表重拉最简单；大集合走「变更增量 + 分页」。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// 整表重拉，替换本地集合
    FullReload,
    /// 按 stamp 增量拉取，分页直到拉尽
    Incremental,
}

/// 冷启动（master data）加载顺序（有序）
///
/// 先参考集合后大集合：门店资料最先落库，商品 / 供应商 / 客户分页拉取放最后。
pub const BOOTSTRAP_ORDER: &[CollectionKind] = &[
    CollectionKind::StoreRecord,
    CollectionKind::Banks,
    CollectionKind::AccountHeads,
    CollectionKind::Categories,
    CollectionKind::ItemProperties,
    CollectionKind::AdjustmentReasons,
    CollectionKind::Videos,
    CollectionKind::Items,
    CollectionKind::Suppliers,
    CollectionKind::Customers,
];

/// 心跳时参与 stamp 对比的集合（deleteActivity 单独经墓碑日志处理）
pub const SYNCABLE_KINDS: &[CollectionKind] = BOOTSTRAP_ORDER;

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Suppliers => "suppliers",
            Self::Customers => "customers",
            Self::Categories => "categories",
            Self::ItemProperties => "itemProperties",
            Self::AdjustmentReasons => "adjustmentReasons",
            Self::Banks => "banks",
            Self::AccountHeads => "accountHeads",
            Self::Videos => "videos",
            Self::DeleteActivity => "deleteActivity",
            Self::StoreRecord => "storeRecord",
        }
    }

    /// 大集合：冷启动分页拉取，心跳走增量
    pub fn is_large(self) -> bool {
        matches!(self, Self::Items | Self::Suppliers | Self::Customers)
    }

    pub fn strategy(self) -> SyncStrategy {
        if self.is_large() {
            SyncStrategy::Incremental
        } else {
            SyncStrategy::FullReload
        }
    }

    /// 父记录删除时需要级联清理的子集合及其外键字段
    ///
    /// 商品删除会连带其规格 / 属性子行（服务端只发父记录的墓碑）。
    pub fn dependent_children(self) -> Option<(CollectionKind, &'static str)> {
        match self {
            Self::Items => Some((Self::ItemProperties, "itemId")),
            _ => None,
        }
    }

    /// 冷启动各步骤的状态文案（仅供 UI 展示，不参与正确性判断）
    pub fn bootstrap_status(self) -> &'static str {
        match self {
            Self::StoreRecord => "正在加载门店资料…",
            Self::Banks => "正在加载银行列表…",
            Self::AccountHeads => "正在加载会计科目…",
            Self::Categories => "正在加载商品分类…",
            Self::ItemProperties => "正在加载商品属性…",
            Self::AdjustmentReasons => "正在加载调整原因…",
            Self::Videos => "正在加载帮助内容…",
            Self::Items => "正在加载商品…",
            Self::Suppliers => "正在加载供应商…",
            Self::Customers => "正在加载客户…",
            Self::DeleteActivity => "正在同步删除记录…",
        }
    }
}

impl FromStr for CollectionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "items" => Ok(Self::Items),
            "suppliers" => Ok(Self::Suppliers),
            "customers" => Ok(Self::Customers),
            "categories" => Ok(Self::Categories),
            "itemProperties" => Ok(Self::ItemProperties),
            "adjustmentReasons" => Ok(Self::AdjustmentReasons),
            "banks" => Ok(Self::Banks),
            "accountHeads" => Ok(Self::AccountHeads),
            "videos" => Ok(Self::Videos),
            "deleteActivity" => Ok(Self::DeleteActivity),
            "storeRecord" => Ok(Self::StoreRecord),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// 手写 serde：保证作为 JSON map key 时序列化为服务端名称
impl Serialize for CollectionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CollectionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|_| D::Error::custom(format!("unknown collection: {}", s)))
    }
}
