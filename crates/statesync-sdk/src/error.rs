use std::fmt;

#[derive(Debug)]
pub enum StateSyncSDKError {
    KvStore(String),
    Serialization(String),
    IO(String),
    InvalidData(String),
    NotInitialized(String),
    ShuttingDown(String),
    Config(String),
    Timeout(String),
    Network(String),    // 网络层错误（连接失败、DNS、超时等）
    Auth(String),       // 认证错误
    // 远端状态存储错误 - 携带 HTTP 状态码（如果有）
    Remote {
        status: Option<u16>,
        message: String,
    },
    Other(String),
}

impl fmt::Display for StateSyncSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSyncSDKError::KvStore(e) => write!(f, "KV store error: {}", e),
            StateSyncSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StateSyncSDKError::IO(e) => write!(f, "IO error: {}", e),
            StateSyncSDKError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            StateSyncSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            StateSyncSDKError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
            StateSyncSDKError::Config(e) => write!(f, "Config error: {}", e),
            StateSyncSDKError::Timeout(e) => write!(f, "Timeout: {}", e),
            StateSyncSDKError::Network(e) => write!(f, "Network error: {}", e),
            StateSyncSDKError::Auth(e) => write!(f, "Authentication error: {}", e),
            StateSyncSDKError::Remote { status, message } => match status {
                Some(code) => write!(f, "Remote error [{}]: {}", code, message),
                None => write!(f, "Remote error: {}", message),
            },
            StateSyncSDKError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for StateSyncSDKError {}

impl From<serde_json::Error> for StateSyncSDKError {
    fn from(error: serde_json::Error) -> Self {
        StateSyncSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for StateSyncSDKError {
    fn from(error: std::io::Error) -> Self {
        StateSyncSDKError::IO(error.to_string())
    }
}

impl From<sled::Error> for StateSyncSDKError {
    fn from(error: sled::Error) -> Self {
        StateSyncSDKError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for StateSyncSDKError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return StateSyncSDKError::Timeout(error.to_string());
        }
        match error.status() {
            Some(code) => StateSyncSDKError::Remote {
                status: Some(code.as_u16()),
                message: error.to_string(),
            },
            None => StateSyncSDKError::Network(error.to_string()),
        }
    }
}

impl StateSyncSDKError {
    /// 获取 HTTP 状态码（如果这是一个远端错误）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StateSyncSDKError::Remote { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StateSyncSDKError>;
