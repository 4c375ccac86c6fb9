//! 删除墓碑日志 - 服务端删除流水到本地删除的映射
//!
//! 墓碑独立于所属集合自身的 stamp：集合按自己的 stamp 看是「新鲜」的，
//! 也可能还有未消化的删除。因此每次心跳都查墓碑，与集合 stamp 是否变化无关。

use std::str::FromStr;

use tracing::{debug, warn};

use crate::api::{DeleteNotice, SyncTransport};
use crate::collections::CollectionKind;
use crate::error::Result;
use crate::sync::timestamps::Stamp;
use crate::sync::StoreState;

/// 删除墓碑日志
pub struct DeleteTombstoneLog;

impl DeleteTombstoneLog {
    /// 拉取 `after` 之后服务端发出的删除通知
    pub async fn fetch_since(
        transport: &dyn SyncTransport,
        store_id: &str,
        after: &Stamp,
    ) -> Result<Vec<DeleteNotice>> {
        let notices = transport.fetch_delete_activity(store_id, after).await?;
        debug!("墓碑日志: {} 条删除通知 (after={})", notices.len(), after);
        Ok(notices)
    }

    /// 把删除通知逐条落到本地状态，返回实际删除的记录数（含级联子行）。
    ///
    /// 未知集合名只告警跳过：墓碑流水里可能带有客户端未同步的集合。
    pub fn apply(state: &mut StoreState, notices: &[DeleteNotice]) -> usize {
        let mut removed = 0usize;
        for notice in notices {
            let kind = match CollectionKind::from_str(&notice.collection_name) {
                Ok(kind) => kind,
                Err(()) => {
                    warn!("墓碑指向未知集合，跳过: {}", notice.collection_name);
                    continue;
                }
            };
            removed += Self::apply_one(state, kind, &notice.record_id);
        }
        removed
    }

    /// 删除单条记录；父记录带子集合时连带清理子行
    fn apply_one(state: &mut StoreState, kind: CollectionKind, record_id: &str) -> usize {
        let mut removed = 0usize;
        if state.collection_mut(kind).remove(record_id) {
            removed += 1;
        }
        if let Some((child_kind, parent_field)) = kind.dependent_children() {
            let children = state.collection_mut(child_kind);
            let before = children.len();
            children.retain(|r| r.field_as_id(parent_field).as_deref() != Some(record_id));
            removed += before - children.len();
        }
        removed
    }
}
