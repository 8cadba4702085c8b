//! 待同步快照缓冲
//!
//! 不变式：
//! - 至多存在一条待同步快照；set 永远覆盖，不追加 —— 这里建模的是
//!   "最新的未送达状态"，不是变更日志
//! - 缓冲中存在记录 ⇔ 远端副本相对本地已过期
//! - 只有推送被远端确认成功后才允许清除；进程被杀不影响缓冲内容

use std::sync::Arc;

use crate::error::Result;
use crate::snapshot::StateSnapshot;
use crate::storage::{keys, KvStore};

#[derive(Debug, Clone)]
pub struct PendingChangeStore {
    kv: Arc<KvStore>,
}

impl PendingChangeStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// 写入（覆盖）待同步快照
    pub fn set(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.kv.set(keys::PENDING_CHANGE, snapshot)
    }

    /// 读取待同步快照
    pub fn get(&self) -> Result<Option<StateSnapshot>> {
        self.kv.get(keys::PENDING_CHANGE)
    }

    /// 清除缓冲（仅在推送确认成功后调用）
    pub fn clear(&self) -> Result<()> {
        self.kv.delete(keys::PENDING_CHANGE)
    }

    /// 是否存在待同步快照
    pub fn has(&self) -> bool {
        self.kv.exists(keys::PENDING_CHANGE).unwrap_or(false)
    }
}
