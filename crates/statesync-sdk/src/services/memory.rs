//! 内存版协作方实现
//!
//! 单测与 demo 用：不依赖任何外部服务，行为可注入（失败模式、延迟、
//! 瞬时未命中），便于精确复现各类同步场景。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Result, StateSyncSDKError};
use crate::session::Identity;
use crate::snapshot::StateSnapshot;
use super::{
    AuthEvent, AuthProvider, AuthSession, PushService, RemoteStateStore, SubscriptionService,
    SubscriptionState,
};

/// 内存认证提供方
#[derive(Debug)]
pub struct MemoryAuthProvider {
    session: tokio::sync::RwLock<Option<AuthSession>>,
    events: broadcast::Sender<(AuthEvent, Option<AuthSession>)>,
    /// 接下来 N 次 get_current_session 返回 None（复现开发环境瞬时竞态）
    transient_misses: AtomicU32,
    /// 会话查询人工延迟（毫秒，复现超时分支）
    lookup_delay_ms: AtomicU64,
    orphan_cleanups: parking_lot::Mutex<Vec<String>>,
    linked_users: parking_lot::Mutex<Vec<String>>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            session: tokio::sync::RwLock::new(None),
            events,
            transient_misses: AtomicU32::new(0),
            lookup_delay_ms: AtomicU64::new(0),
            orphan_cleanups: parking_lot::Mutex::new(Vec::new()),
            linked_users: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_session(session: AuthSession) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            session: tokio::sync::RwLock::new(Some(session)),
            events,
            transient_misses: AtomicU32::new(0),
            lookup_delay_ms: AtomicU64::new(0),
            orphan_cleanups: parking_lot::Mutex::new(Vec::new()),
            linked_users: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// 构造匿名会话（user_id 有、email 无）
    pub fn anonymous_session() -> AuthSession {
        AuthSession {
            identity: Identity {
                user_id: Some(format!("anon_{}", Uuid::new_v4())),
                email: None,
                display_name: None,
                avatar_url: None,
                provider: Some("anonymous".to_string()),
            },
            access_token: Some(Uuid::new_v4().to_string()),
            pending_verification: false,
        }
    }

    /// 构造正式账号会话
    pub fn user_session(email: &str) -> AuthSession {
        AuthSession {
            identity: Identity {
                user_id: Some(format!("user_{}", Uuid::new_v4())),
                email: Some(email.to_string()),
                display_name: Some(email.split('@').next().unwrap_or(email).to_string()),
                avatar_url: None,
                provider: Some("email".to_string()),
            },
            access_token: Some(Uuid::new_v4().to_string()),
            pending_verification: false,
        }
    }

    pub async fn set_session(&self, session: Option<AuthSession>) {
        *self.session.write().await = session;
    }

    /// 广播认证事件（宿主侧驱动）
    pub fn emit(&self, event: AuthEvent, session: Option<AuthSession>) {
        let _ = self.events.send((event, session));
    }

    pub fn miss_next_lookups(&self, n: u32) {
        self.transient_misses.store(n, Ordering::SeqCst);
    }

    pub fn set_lookup_delay_ms(&self, ms: u64) {
        self.lookup_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn orphan_cleanups(&self) -> Vec<String> {
        self.orphan_cleanups.lock().clone()
    }

    pub fn linked_users(&self) -> Vec<String> {
        self.linked_users.lock().clone()
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn get_current_session(&self) -> Result<Option<AuthSession>> {
        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
        }
        if self.transient_misses.load(Ordering::SeqCst) > 0 {
            self.transient_misses.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        }
        Ok(self.session.read().await.clone())
    }

    async fn sign_in_anonymously(&self) -> Result<AuthSession> {
        let session = Self::anonymous_session();
        *self.session.write().await = Some(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.write().await = None;
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<(AuthEvent, Option<AuthSession>)> {
        self.events.subscribe()
    }

    async fn link_anonymous_to_user(&self, user_id: &str) -> Result<()> {
        self.linked_users.lock().push(user_id.to_string());
        Ok(())
    }

    async fn request_orphan_cleanup(&self, anonymous_user_id: &str) -> Result<()> {
        self.orphan_cleanups.lock().push(anonymous_user_id.to_string());
        Ok(())
    }
}

/// 远端失败注入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailMode {
    /// 返回指定 HTTP 状态码
    Status(u16),
    /// 网络层失败（连接拒绝）
    Network,
    /// 超时
    Timeout,
}

/// 内存远端状态存储（每个身份一行）
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    rows: tokio::sync::RwLock<HashMap<String, StateSnapshot>>,
    fail_mode: parking_lot::Mutex<Option<RemoteFailMode>>,
    upsert_count: AtomicU32,
    fetch_count: AtomicU32,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_mode(&self, mode: Option<RemoteFailMode>) {
        *self.fail_mode.lock() = mode;
    }

    pub async fn insert_row(&self, user_id: &str, snapshot: StateSnapshot) {
        self.rows.write().await.insert(user_id.to_string(), snapshot);
    }

    pub async fn row(&self, user_id: &str) -> Option<StateSnapshot> {
        self.rows.read().await.get(user_id).cloned()
    }

    pub fn upsert_count(&self) -> u32 {
        self.upsert_count.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Option<StateSyncSDKError> {
        self.fail_mode.lock().map(|mode| match mode {
            RemoteFailMode::Status(code) => StateSyncSDKError::Remote {
                status: Some(code),
                message: format!("injected status {}", code),
            },
            RemoteFailMode::Network => {
                StateSyncSDKError::Network("connection refused".to_string())
            }
            RemoteFailMode::Timeout => StateSyncSDKError::Timeout("injected timeout".to_string()),
        })
    }
}

#[async_trait]
impl RemoteStateStore for MemoryRemoteStore {
    async fn fetch_state(&self, user_id: &str) -> Result<Option<StateSnapshot>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        Ok(self.rows.read().await.get(user_id).cloned())
    }

    async fn upsert_state(&self, user_id: &str, snapshot: &StateSnapshot) -> Result<()> {
        self.upsert_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        self.rows
            .write()
            .await
            .insert(user_id.to_string(), snapshot.clone());
        Ok(())
    }
}

/// 空推送服务（记录调用，便于断言）
#[derive(Debug, Default)]
pub struct NoopPushService {
    registered: AtomicU32,
    deregistered: AtomicU32,
    migrations: parking_lot::Mutex<Vec<(String, String)>>,
}

impl NoopPushService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_count(&self) -> u32 {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn deregister_count(&self) -> u32 {
        self.deregistered.load(Ordering::SeqCst)
    }

    pub fn migrations(&self) -> Vec<(String, String)> {
        self.migrations.lock().clone()
    }
}

#[async_trait]
impl PushService for NoopPushService {
    async fn register_device(&self) -> Result<()> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deregister_device(&self) -> Result<()> {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn migrate_anonymous_registration(
        &self,
        anonymous_user_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.migrations
            .lock()
            .push((anonymous_user_id.to_string(), user_id.to_string()));
        Ok(())
    }
}

/// 固定返回同一权益的订阅服务
#[derive(Debug)]
pub struct StaticSubscriptionService {
    state: SubscriptionState,
    calls: AtomicU32,
}

impl StaticSubscriptionService {
    pub fn new(state: SubscriptionState) -> Self {
        Self {
            state,
            calls: AtomicU32::new(0),
        }
    }

    pub fn free() -> Self {
        Self::new(SubscriptionState::default())
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionService for StaticSubscriptionService {
    async fn fetch_entitlement(&self, _user_id: &str) -> Result<SubscriptionState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.clone())
    }
}
