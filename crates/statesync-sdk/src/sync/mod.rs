//! 同步模块 - 本地状态与远端权威副本之间的对账
//!
//! 分层：
//! - machine: 纯转移函数 `(状态, 事件) -> (新状态, 副作用列表)`，不做任何 I/O
//! - engine: 执行副作用（拉取/推送/缓冲/加锁），持有内存快照
//! - retry: 失败态的后台定时排空
//! - failure: 失败分类（瞬时 vs 永久）
//! - debounce: 本地变更的防抖推送

use serde::{Deserialize, Serialize};

pub mod debounce;
pub mod engine;
pub mod failure;
pub mod machine;
pub mod retry;

pub use debounce::Debouncer;
pub use engine::SyncEngine;
pub use failure::{classify_failure, FailureClass};
pub use machine::{MachineState, SyncEffect, SyncEvent, Transition};
pub use retry::RetryScheduler;

/// 同步状态（进程级单例，只由状态机修改，UI 和重试调度器只读）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// 无同步活动（guest 模式，或尚未初始化）
    Idle,
    /// 一次尝试进行中
    Syncing,
    /// 上次尝试成功，无待同步数据
    Ok,
    /// 上次尝试因无网络被推迟，变更已入缓冲
    Offline,
    /// 上次尝试因非网络原因失败，变更已入缓冲
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Ok => write!(f, "ok"),
            SyncStatus::Offline => write!(f, "offline"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudMode {
    /// 纯本地持久化，不发起任何远端交互
    Guest,
    /// 已解析出身份（含匿名），尝试远端同步
    Cloud,
}

impl std::fmt::Display for CloudMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudMode::Guest => write!(f, "guest"),
            CloudMode::Cloud => write!(f, "cloud"),
        }
    }
}
