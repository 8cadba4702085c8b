//! 存储模块 - 本地持久化层
//!
//! 分层设计：
//! - KvStore: 基于 sled 的键值底座，所有持久化键都落在这里
//! - DurableStateStore: 规范状态快照的本地缓存（带 schema 校验，尽力而为写入）
//! - PendingChangeStore: 至多一条的待同步快照缓冲（独立于规范缓存，跨重启存活）
//! - SyncLock: 跨上下文（多标签页/多进程）的咨询式互斥锁

use crate::error::{Result, StateSyncSDKError};

pub mod kv;
pub mod local;
pub mod lock;
pub mod pending;

pub use kv::KvStore;
pub use local::DurableStateStore;
pub use lock::{KvLockBackend, LockBackend, LockRecord, MemoryLockBackend, SyncLock};
pub use pending::PendingChangeStore;

/// 持久化键常量
///
/// 所有本地键都集中定义在这里，模块之间不得私造字符串键。
pub mod keys {
    /// 规范状态快照（带 schema 版本）
    pub const STATE_SNAPSHOT: &str = "state:snapshot";
    /// 待同步快照缓冲
    pub const PENDING_CHANGE: &str = "state:pending";
    /// 跨上下文同步锁记录
    pub const SYNC_LOCK: &str = "sync:lock";
    /// 曾经登录过的痕迹（确认登出时据此判断是否需要清空本地数据）
    pub const WAS_AUTHENTICATED: &str = "auth:was_authenticated";
    /// 最近一次登录邮箱（离线降级解析会话用）
    pub const LAST_AUTH_EMAIL: &str = "auth:last_email";
    /// 最近一次登录的认证提供方
    pub const LAST_AUTH_PROVIDER: &str = "auth:last_provider";
    /// OAuth 跳转进行中标记（登出事件到达时据此识别瞬时中断）
    pub const OAUTH_IN_PROGRESS: &str = "auth:oauth_in_progress";
    /// 待验证会话（OTP）创建时间戳
    pub const VERIFICATION_PENDING_AT: &str = "auth:verification_pending_at";
}

/// 将错误统一包装为 KvStore 错误（内部辅助）
pub(crate) fn kv_err(context: &str, e: impl std::fmt::Display) -> StateSyncSDKError {
    StateSyncSDKError::KvStore(format!("{}: {}", context, e))
}

/// 校验 value 可被 JSON 序列化（内部辅助，集中错误文案）
pub(crate) fn encode_json<V: serde::Serialize>(value: &V) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StateSyncSDKError::Serialization(format!("序列化值失败: {}", e)))
}
