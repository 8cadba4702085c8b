//! 应用状态快照 - 本地与远端之间交换的完整状态文档
//!
//! 设计要点：
//! - 带 schema 版本号，加载时严格校验，版本不符的记录整体视为不存在
//! - 所有领域字段都是 Option：存储层的"缺失"就是"未设置"，默认值只在访问层应用
//! - 快照不可变：每次变更通过 `with_*` 方法产生一个新快照，不原地修改

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 当前支持的快照 schema 版本
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// 安全设置（应用锁相关）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// 是否启用应用锁
    pub app_lock_enabled: Option<bool>,
    /// 应用锁自动锁定时长（秒）
    pub lock_timeout_secs: Option<u32>,
    /// 是否允许生物识别解锁
    pub biometric_unlock: Option<bool>,
}

impl SecuritySettings {
    pub fn is_app_lock_enabled(&self) -> bool {
        self.app_lock_enabled.unwrap_or(false)
    }

    pub fn is_biometric_unlock_enabled(&self) -> bool {
        self.biometric_unlock.unwrap_or(false)
    }
}

/// 应用状态快照
///
/// 内存 store 是唯一的数据属主；本地持久化副本和待同步缓冲里的副本
/// 都只是可丢弃的缓存，不是 source of truth。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// schema 版本号，必须等于 SNAPSHOT_SCHEMA_VERSION
    pub schema_version: u32,
    /// 引导页是否已看过（None = 未设置）
    pub onboarding_seen: Option<bool>,
    /// 安全设置（None = 从未配置过）
    pub security: Option<SecuritySettings>,
    /// 客户端扩展字段（SDK 不解析，原样透传到远端）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    /// 最后修改时间（UTC 毫秒时间戳）
    pub updated_at: i64,
}

impl StateSnapshot {
    /// 创建空白快照（当前 schema 版本，所有字段未设置）
    pub fn empty() -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            onboarding_seen: None,
            security: None,
            extra: None,
            updated_at: Utc::now().timestamp_millis(),
        }
    }

    /// schema 版本是否为当前支持的版本
    pub fn is_current_schema(&self) -> bool {
        self.schema_version == SNAPSHOT_SCHEMA_VERSION
    }

    /// 引导页是否已看过（访问层默认值：false）
    pub fn is_onboarding_seen(&self) -> bool {
        self.onboarding_seen.unwrap_or(false)
    }

    /// 安全设置（访问层默认值：全部关闭）
    pub fn security_or_default(&self) -> SecuritySettings {
        self.security.clone().unwrap_or_default()
    }

    /// 产生一个新快照：更新引导页标记
    pub fn with_onboarding_seen(&self, seen: bool) -> Self {
        let mut next = self.clone();
        next.onboarding_seen = Some(seen);
        next.updated_at = Utc::now().timestamp_millis();
        next
    }

    /// 产生一个新快照：替换安全设置
    pub fn with_security(&self, security: SecuritySettings) -> Self {
        let mut next = self.clone();
        next.security = Some(security);
        next.updated_at = Utc::now().timestamp_millis();
        next
    }

    /// 产生一个新快照：替换扩展字段
    pub fn with_extra(&self, extra: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.extra = Some(extra);
        next.updated_at = Utc::now().timestamp_millis();
        next
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
