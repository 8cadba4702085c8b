//! 规范状态快照的本地持久化缓存
//!
//! 语义边界：
//! - load 严格校验 schema 版本，版本缺失或不符的记录整体视为不存在，绝不部分信任
//! - save / clear 是尽力而为：存储失败（配额等）只记日志，绝不向调用方抛错
//!   —— 内存 store 才是数据属主，这里只是可丢弃的缓存

use std::sync::Arc;
use tracing::warn;

use crate::snapshot::StateSnapshot;
use crate::storage::{keys, KvStore};

#[derive(Debug, Clone)]
pub struct DurableStateStore {
    kv: Arc<KvStore>,
}

impl DurableStateStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// 加载本地快照
    ///
    /// 读失败、解码失败、schema 版本不符，一律返回 None。
    pub fn load(&self) -> Option<StateSnapshot> {
        let bytes = match self.kv.get_raw(keys::STATE_SNAPSHOT) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("⚠️ 读取本地快照失败，按不存在处理: {}", e);
                return None;
            }
        };

        let snapshot: StateSnapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!("⚠️ 本地快照解码失败，按不存在处理: {}", e);
                return None;
            }
        };

        if !snapshot.is_current_schema() {
            warn!(
                "⚠️ 本地快照 schema 版本不符（{}），按不存在处理",
                snapshot.schema_version
            );
            return None;
        }

        Some(snapshot)
    }

    /// 保存快照（尽力而为）
    pub fn save(&self, snapshot: &StateSnapshot) {
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(b) => b,
            Err(e) => {
                warn!("⚠️ 快照序列化失败，跳过本地持久化: {}", e);
                return;
            }
        };
        if let Err(e) = self.kv.set_raw(keys::STATE_SNAPSHOT, &bytes) {
            warn!("⚠️ 快照本地持久化失败（忽略）: {}", e);
        }
    }

    /// 清除本地快照（尽力而为）
    pub fn clear(&self) {
        if let Err(e) = self.kv.delete(keys::STATE_SNAPSHOT) {
            warn!("⚠️ 清除本地快照失败（忽略）: {}", e);
        }
    }
}
