//! 外部协作方接口
//!
//! 认证、远端状态存储、推送注册、订阅权益都是外部子系统，
//! SDK 只在这些窄接口边界上与它们交互，内部实现一概不关心。
//! 引擎逻辑全部面向 trait 编程，便于单测注入内存实现。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::session::Identity;
use crate::snapshot::StateSnapshot;

pub mod memory;
pub mod rest;

pub use memory::{MemoryAuthProvider, MemoryRemoteStore, NoopPushService, StaticSubscriptionService};
pub use rest::RestRemoteStateStore;

/// 认证事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// 认证会话
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub identity: Identity,
    /// 访问令牌（SDK 不解析，只透传）
    pub access_token: Option<String>,
    /// 是否处于待验证状态（OTP 挑战未完成）
    pub pending_verification: bool,
}

/// 认证提供方
#[async_trait]
pub trait AuthProvider: Send + Sync + std::fmt::Debug {
    /// 获取当前会话（可能很慢，调用方自行裁剪超时）
    async fn get_current_session(&self) -> Result<Option<AuthSession>>;

    /// 建立匿名会话
    async fn sign_in_anonymously(&self) -> Result<AuthSession>;

    /// 登出
    async fn sign_out(&self) -> Result<()>;

    /// 订阅认证事件（至少投递 SignedIn / SignedOut）
    fn subscribe_auth_events(&self) -> broadcast::Receiver<(AuthEvent, Option<AuthSession>)>;

    /// 把匿名身份关联到正式账号
    async fn link_anonymous_to_user(&self, user_id: &str) -> Result<()>;

    /// 请求服务端清理已被替换的匿名账号（尽力而为）
    async fn request_orphan_cleanup(&self, anonymous_user_id: &str) -> Result<()>;
}

/// 远端状态存储
///
/// 每个身份一行；upsert 是整文档替换，不是字段级 patch。
#[async_trait]
pub trait RemoteStateStore: Send + Sync + std::fmt::Debug {
    async fn fetch_state(&self, user_id: &str) -> Result<Option<StateSnapshot>>;

    async fn upsert_state(&self, user_id: &str, snapshot: &StateSnapshot) -> Result<()>;
}

/// 设备推送注册
#[async_trait]
pub trait PushService: Send + Sync + std::fmt::Debug {
    async fn register_device(&self) -> Result<()>;

    async fn deregister_device(&self) -> Result<()>;

    /// 把匿名身份名下的推送注册迁移到正式账号
    async fn migrate_anonymous_registration(
        &self,
        anonymous_user_id: &str,
        user_id: &str,
    ) -> Result<()>;
}

/// 订阅档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Free,
    Plus,
    Pro,
}

/// 订阅权益状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub tier: SubscriptionTier,
    pub active: bool,
    /// 到期时间（UTC 毫秒时间戳，None = 不过期）
    pub expires_at: Option<i64>,
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            active: true,
            expires_at: None,
        }
    }
}

/// 订阅权益服务
#[async_trait]
pub trait SubscriptionService: Send + Sync + std::fmt::Debug {
    async fn fetch_entitlement(&self, user_id: &str) -> Result<SubscriptionState>;
}
