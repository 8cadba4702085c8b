//! KV 存储底座 - 基于 sled 的键值存储
//!
//! 本模块提供：
//! - 设备级共享的键值存储（快照、缓冲、锁记录、会话痕迹都落在这里）
//! - JSON 编码的类型安全读写
//! - 打开重试：同一数据目录可能被刚退出的进程短暂占锁

use std::path::{Path, PathBuf};
use std::sync::Arc;
use sled::{Db, Tree};
use serde::{Deserialize, Serialize};
use crate::error::{Result, StateSyncSDKError};
use crate::storage::{encode_json, kv_err};

/// KV 存储组件
///
/// 跨上下文共享同一份底层文件：多个标签页/进程打开同一 data_dir 时，
/// 写入彼此可见。这正是同步锁和待同步缓冲需要的可见性语义。
#[derive(Debug, Clone)]
pub struct KvStore {
    base_path: PathBuf,
    db: Arc<Db>,
    tree: Tree,
}

impl KvStore {
    /// 打开（或创建）KV 存储
    pub async fn open(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| StateSyncSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 打开 sled 数据库（旧实例可能刚释放锁，重试多次带退避）
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<sled::Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            StateSyncSDKError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = db
            .open_tree("statesync")
            .map_err(|e| kv_err("打开 statesync Tree 失败", e))?;

        Ok(Self {
            base_path,
            db: Arc::new(db),
            tree,
        })
    }

    /// 数据目录
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 设置键值对
    pub fn set<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let value_bytes = encode_json(value)?;
        self.tree
            .insert(key, value_bytes)
            .map_err(|e| kv_err("设置键值对失败", e))?;
        Ok(())
    }

    /// 获取键值对
    pub fn get<V: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<V>> {
        let result = self
            .tree
            .get(key)
            .map_err(|e| kv_err("获取键值对失败", e))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| StateSyncSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对
    pub fn delete(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| kv_err("删除键值对失败", e))?;
        Ok(())
    }

    /// 检查键是否存在
    pub fn exists(&self, key: &str) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| kv_err("检查键存在失败", e))
    }

    /// 写入原始字节（schema 校验由调用方负责的场景）
    pub fn set_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.tree
            .insert(key, value)
            .map_err(|e| kv_err("写入原始值失败", e))?;
        Ok(())
    }

    /// 读取原始字节
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .tree
            .get(key)
            .map_err(|e| kv_err("读取原始值失败", e))?;
        Ok(result.map(|v| v.to_vec()))
    }

    /// 刷盘（shutdown 时调用）
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| kv_err("刷盘失败", e))?;
        Ok(())
    }
}
