//! 集合同步适配器 - 全量重拉 / 增量拉取 / 冷启动分页
//!
//! 适配器只做「拉取 + 在工作副本上合并」，不碰状态树也不写 stamp：
//! 调用方（协调器）拿到完整结果后一次性提交，分页中途的半成品永远不对外发布。
//!
//! ## NOTE: 适配器不做重试
//!
//! 任何一页失败都让整次同步失败，由下一次心跳 / 冷启动触发整体重来。

use tracing::{debug, info};

use crate::api::SyncTransport;
use crate::collections::{CollectionKind, SyncStrategy};
use crate::error::Result;
use crate::record::RecordSet;
use crate::sync::timestamps::Stamp;
use crate::sync::CollectionSyncOutcome;

/// 集合同步适配器（无状态，按集合策略分发）
pub struct CollectionAdapter;

impl CollectionAdapter {
    /// 统一入口：对 `kind` 执行一次同步，返回新的完整记录集。
    ///
    /// - 参考集合：整表重拉
    /// - 大集合且有本地 stamp：按 stamp 增量拉取，合并进 `current` 副本
    /// - 大集合且无本地 stamp（从未冷启动完成）：清空后分页全量拉取
    pub async fn run(
        transport: &dyn SyncTransport,
        store_id: &str,
        kind: CollectionKind,
        since: Option<&Stamp>,
        current: RecordSet,
    ) -> Result<(RecordSet, CollectionSyncOutcome)> {
        match (kind.strategy(), since) {
            (SyncStrategy::FullReload, _) => {
                let set = Self::full_reload(transport, store_id, kind).await?;
                let count = set.len();
                Ok((set, CollectionSyncOutcome::FullReload { count }))
            }
            (SyncStrategy::Incremental, Some(stamp)) => {
                let mut working = current;
                let fetched =
                    Self::incremental_sync(transport, store_id, kind, stamp, &mut working).await?;
                Ok((working, CollectionSyncOutcome::Incremental { fetched }))
            }
            (SyncStrategy::Incremental, None) => {
                let mut working = RecordSet::new();
                Self::bootstrap_paged(transport, store_id, kind, &mut working).await?;
                let count = working.len();
                Ok((working, CollectionSyncOutcome::Bootstrapped { count }))
            }
        }
    }

    /// 整表重拉并替换（参考集合，总量有上界，一次取完）
    pub async fn full_reload(
        transport: &dyn SyncTransport,
        store_id: &str,
        kind: CollectionKind,
    ) -> Result<RecordSet> {
        let page = transport
            .fetch_collection_page(store_id, kind, None, 0)
            .await?;
        debug!("整表重拉 {}: {} 条", kind, page.records.len());
        Ok(RecordSet::from_records(page.records))
    }

    /// 冷启动分页全量加载：先清空，skip = 当前本地条数，直到服务端报告没有更多。
    ///
    /// 先清空是为了上一次冷启动被打断后重跑不产生重复记录。
    /// 返回最后一页报告的 total_records。
    pub async fn bootstrap_paged(
        transport: &dyn SyncTransport,
        store_id: &str,
        kind: CollectionKind,
        set: &mut RecordSet,
    ) -> Result<u64> {
        set.clear();
        loop {
            let page = transport
                .fetch_collection_page(store_id, kind, None, set.len())
                .await?;
            set.append_page(page.records);
            debug!("冷启动分页 {}: 已加载 {} / {}", kind, set.len(), page.total_records);
            if !page.has_more_records {
                info!("冷启动 {} 完成: {} 条", kind, set.len());
                return Ok(page.total_records);
            }
        }
    }

    /// 增量拉取 `since` 之后的变更并按 id 合并，分页直到拉尽。
    ///
    /// skip 为本轮已取条数；每页按倒序合并，页内同 id 以最新一条为准。
    pub async fn incremental_sync(
        transport: &dyn SyncTransport,
        store_id: &str,
        kind: CollectionKind,
        since: &Stamp,
        set: &mut RecordSet,
    ) -> Result<usize> {
        let mut fetched = 0usize;
        loop {
            let page = transport
                .fetch_collection_page(store_id, kind, Some(since), fetched)
                .await?;
            fetched += page.records.len();
            set.merge(page.records);
            debug!("增量拉取 {}: 本轮累计 {} 条变更", kind, fetched);
            if !page.has_more_records {
                break;
            }
        }
        info!("增量同步 {} 完成: {} 条变更", kind, fetched);
        Ok(fetched)
    }
}
