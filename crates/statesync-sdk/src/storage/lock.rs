//! 跨上下文同步锁 - 基于共享存储的咨询式互斥
//!
//! 语义：
//! - 非阻塞、快速失败：acquire 只尝试一次，锁被占且未过期就返回 false，
//!   失败方的数据仍安全地留在待同步缓冲里，等下一轮再试
//! - 自愈：锁记录带时间戳，`now - locked_at >= timeout` 即视为失效，
//!   任何竞争者都可以直接抢占 —— 持锁上下文崩溃后不需要人工清理
//! - release 幂等，且只清除本上下文自己写入的记录

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{keys, KvStore};

/// 锁记录（落在共享存储里，所有上下文可见）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// 加锁时间（UTC 毫秒时间戳）
    pub locked_at: i64,
    /// 持锁上下文 ID
    pub owner: String,
}

/// 锁记录的存取后端
///
/// 多上下文现实环境用共享 sled 存储；单上下文单测用内存实现。
#[async_trait]
pub trait LockBackend: Send + Sync + std::fmt::Debug {
    async fn read(&self) -> Result<Option<LockRecord>>;
    async fn write(&self, record: &LockRecord) -> Result<()>;
    async fn remove(&self) -> Result<()>;
}

/// sled 后端：记录写入共享 KV，对同一数据目录的所有上下文可见
#[derive(Debug)]
pub struct KvLockBackend {
    kv: Arc<KvStore>,
}

impl KvLockBackend {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl LockBackend for KvLockBackend {
    async fn read(&self) -> Result<Option<LockRecord>> {
        self.kv.get(keys::SYNC_LOCK)
    }

    async fn write(&self, record: &LockRecord) -> Result<()> {
        self.kv.set(keys::SYNC_LOCK, record)
    }

    async fn remove(&self) -> Result<()> {
        self.kv.delete(keys::SYNC_LOCK)
    }
}

/// 内存后端（测试用）
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    slot: parking_lot::Mutex<Option<LockRecord>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn read(&self) -> Result<Option<LockRecord>> {
        Ok(self.slot.lock().clone())
    }

    async fn write(&self, record: &LockRecord) -> Result<()> {
        *self.slot.lock() = Some(record.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// 跨上下文同步锁
#[derive(Debug, Clone)]
pub struct SyncLock {
    backend: Arc<dyn LockBackend>,
    timeout_ms: u64,
    /// 本上下文 ID（每个 SDK 实例一个）
    context_id: String,
}

impl SyncLock {
    pub fn new(backend: Arc<dyn LockBackend>, timeout_ms: u64) -> Self {
        Self {
            backend,
            timeout_ms,
            context_id: Uuid::new_v4().to_string(),
        }
    }

    /// 本上下文 ID
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// 尝试加锁（非阻塞）
    ///
    /// 返回 true 表示拿到锁。存储读写失败一律按"没拿到"处理：
    /// 宁可推迟一轮推送，也不能冒两个上下文同时推送的风险。
    pub async fn acquire(&self) -> bool {
        let now = Utc::now().timestamp_millis();

        match self.backend.read().await {
            Ok(Some(record)) => {
                let age = now - record.locked_at;
                if age < self.timeout_ms as i64 {
                    debug!(
                        "🔒 同步锁被占用（owner={}, age={}ms），本轮放弃",
                        record.owner, age
                    );
                    return false;
                }
                // 过期锁：持有方大概率已崩溃，直接抢占
                debug!(
                    "🔓 发现过期锁记录（owner={}, age={}ms），抢占",
                    record.owner, age
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!("⚠️ 读取锁记录失败，按未拿到锁处理: {}", e);
                return false;
            }
        }

        let record = LockRecord {
            locked_at: now,
            owner: self.context_id.clone(),
        };
        match self.backend.write(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ 写入锁记录失败，按未拿到锁处理: {}", e);
                false
            }
        }
    }

    /// 释放锁（幂等）
    ///
    /// 必须放在受保护区段的保证清理路径上，无论成功、出错还是提前返回。
    /// 只清除本上下文自己写入的记录，不碰别人的锁。
    pub async fn release(&self) {
        match self.backend.read().await {
            Ok(Some(record)) if record.owner == self.context_id => {
                if let Err(e) = self.backend.remove().await {
                    warn!("⚠️ 释放锁失败（将依赖超时自愈）: {}", e);
                }
            }
            Ok(_) => {
                // 没有记录，或记录属于别的上下文（可能已被抢占）—— 不动
            }
            Err(e) => {
                warn!("⚠️ 读取锁记录失败，跳过释放（将依赖超时自愈）: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lock(timeout_ms: u64) -> (Arc<MemoryLockBackend>, SyncLock) {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = SyncLock::new(backend.clone(), timeout_ms);
        (backend, lock)
    }

    #[tokio::test]
    async fn test_acquire_then_contend() {
        let backend = Arc::new(MemoryLockBackend::new());
        let first = SyncLock::new(backend.clone(), 5000);
        let second = SyncLock::new(backend.clone(), 5000);

        assert!(first.acquire().await);
        // 第二个上下文在超时窗口内必须拿不到
        assert!(!second.acquire().await);

        first.release().await;
        assert!(second.acquire().await);
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimable() {
        let backend = Arc::new(MemoryLockBackend::new());
        let crashed = SyncLock::new(backend.clone(), 50);
        let contender = SyncLock::new(backend.clone(), 50);

        // 持锁方"崩溃"：从不 release
        assert!(crashed.acquire().await);

        tokio::time::sleep(tokio::time::Duration::from_millis(80)).await;

        // 超时后新竞争者无需显式释放即可抢占
        assert!(contender.acquire().await);

        let record = backend.read().await.unwrap().unwrap();
        assert_eq!(record.owner, contender.context_id());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_backend, lock) = make_lock(5000);

        assert!(lock.acquire().await);
        lock.release().await;
        // 重复 release 不报错、不 panic
        lock.release().await;
        assert!(lock.acquire().await);
    }

    #[tokio::test]
    async fn test_release_does_not_touch_foreign_lock() {
        let backend = Arc::new(MemoryLockBackend::new());
        let winner = SyncLock::new(backend.clone(), 5000);
        let loser = SyncLock::new(backend.clone(), 5000);

        assert!(winner.acquire().await);
        // 失败方 release 不得清掉胜者的记录
        loser.release().await;
        let record = backend.read().await.unwrap().unwrap();
        assert_eq!(record.owner, winner.context_id());
    }
}
