//! 补发失败分类与重试策略

use serde::{Deserialize, Serialize};

use crate::error::StoreSyncError;

/// 补发失败原因分类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlushFailureReason {
    /// 网络失败（超时 / 不可达）- 等待恢复后重试
    Network,
    /// 服务端错误 - 根据状态码决定
    ServerError(u16),
    /// 认证失败 - 需要重新登录后重试
    AuthFailure,
    /// 服务端拒绝（4xx 业务错误）- 不重试，滞留队首等待处理
    Rejected(u16),
    /// 未知错误
    Unknown(String),
}

impl FlushFailureReason {
    /// 从 SDK 错误归类
    pub fn classify(error: &StoreSyncError) -> Self {
        match error {
            StoreSyncError::Network(_) | StoreSyncError::Offline => Self::Network,
            StoreSyncError::Auth(_) => Self::AuthFailure,
            StoreSyncError::Api { status, .. } => {
                if *status >= 500 && *status < 600 {
                    Self::ServerError(*status)
                } else {
                    Self::Rejected(*status)
                }
            }
            other => Self::Unknown(other.to_string()),
        }
    }

    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network => true,
            Self::ServerError(_) => true,
            Self::AuthFailure => true, // 重新认证后可重试
            Self::Rejected(_) => false,
            Self::Unknown(_) => true, // 保守策略：未知错误可重试
        }
    }
}

/// 重试策略配置（指数退避 + 抖动）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 基础延迟（秒）
    pub base_delay_seconds: u64,
    /// 最大延迟（秒）
    pub max_delay_seconds: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_seconds: 2,
            max_delay_seconds: 300, // 5分钟
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 计算下次补发时间（UTC 毫秒）。
    ///
    /// 队列条目从不因重试次数淘汰（至少一次送达），退避只封顶不放弃。
    pub fn next_retry_at(&self, retry_count: u32) -> i64 {
        let base_delay =
            self.base_delay_seconds as f64 * self.backoff_factor.powf(retry_count as f64);
        let capped = base_delay.min(self.max_delay_seconds as f64);
        // 随机抖动，避免多台终端同时补发
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let delay_secs = (capped + jitter).max(0.0);
        chrono::Utc::now().timestamp_millis() + (delay_secs * 1000.0) as i64
    }
}
