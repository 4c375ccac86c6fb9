//! 离线变更队列模块
//!
//! 断网期间本地发起的写入（销售单等）进入持久化 FIFO，
//! 恢复连接或心跳时按入队顺序补发；顺序永不打乱，条目永不静默丢弃。

pub mod mutation;
pub mod offline_queue;
pub mod retry_policy;

pub use mutation::OfflineMutation;
pub use offline_queue::{FlushReport, OfflineMutationQueue};
pub use retry_policy::{FlushFailureReason, RetryPolicy};
