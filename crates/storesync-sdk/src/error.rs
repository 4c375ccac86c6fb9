use std::fmt;

#[derive(Debug)]
pub enum StoreSyncError {
    KvStore(String),
    Serialization(String),
    IO(String),
    InvalidData(String),
    Other(String),
    // 网络 / API 层错误
    Network(String),        // 传输层失败（超时、连接不可达），可整体重试
    Api { status: u16, message: String },
    Auth(String),           // 认证 / 会话失效，需重新登录
    StoreGone(String),      // 门店已删除或权限被回收
    Offline,                // 当前离线，写路径不可用
    // 同步编排相关错误
    NoStoreSelected,
    SyncInProgress(String), // 重入保护：本轮触发被丢弃
    Config(String),
    NotInitialized(String),
    ShuttingDown(String),
}

impl fmt::Display for StoreSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSyncError::KvStore(e) => write!(f, "KV store error: {}", e),
            StoreSyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreSyncError::IO(e) => write!(f, "IO error: {}", e),
            StoreSyncError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            StoreSyncError::Other(e) => write!(f, "Other error: {}", e),
            StoreSyncError::Network(e) => write!(f, "Network error: {}", e),
            StoreSyncError::Api { status, message } => {
                write!(f, "API error [{}]: {}", status, message)
            }
            StoreSyncError::Auth(e) => write!(f, "Authentication error: {}", e),
            StoreSyncError::StoreGone(e) => write!(f, "Store gone: {}", e),
            StoreSyncError::Offline => write!(f, "Offline"),
            StoreSyncError::NoStoreSelected => write!(f, "No store selected"),
            StoreSyncError::SyncInProgress(e) => write!(f, "Sync in progress: {}", e),
            StoreSyncError::Config(e) => write!(f, "Config error: {}", e),
            StoreSyncError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            StoreSyncError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
        }
    }
}

impl std::error::Error for StoreSyncError {}

impl From<serde_json::Error> for StoreSyncError {
    fn from(error: serde_json::Error) -> Self {
        StoreSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for StoreSyncError {
    fn from(error: std::io::Error) -> Self {
        StoreSyncError::IO(error.to_string())
    }
}

impl From<sled::Error> for StoreSyncError {
    fn from(error: sled::Error) -> Self {
        StoreSyncError::KvStore(error.to_string())
    }
}

impl StoreSyncError {
    /// 是否为瞬时网络失败（§错误分类 a 类）：整体重试即可，无需人工介入
    pub fn is_transient(&self) -> bool {
        match self {
            StoreSyncError::Network(_) => true,
            StoreSyncError::Api { status, .. } => *status >= 500 && *status < 600,
            _ => false,
        }
    }

    /// 是否为认证 / 会话失效（§错误分类 b 类）：停止同步，要求重新认证
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, StoreSyncError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreSyncError>;
