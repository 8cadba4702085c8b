//! 生命周期管理 - 身份迁移与前后台切换
//!
//! 两部分：
//! - AccountTransitionHandler: 响应认证子系统的身份事件（登出确认、
//!   匿名登录、正式登录），驱动清库、缓存失效与重新对账
//! - LifecycleManager / LifecycleHook: App 前后台切换的统一分发，
//!   各模块通过实现 Hook 来响应

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::services::{AuthEvent, AuthProvider, AuthSession, PushService};
use crate::session::VerificationState;
use crate::sync::{CloudMode, SyncEngine};

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败会记录错误但继续执行其他 Hook
    pub async fn notify_background(&self) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到后台");

        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_background().await {
                warn!("⚠️ Hook #{} 后台切换失败: {}", index, e);
                errors.push(e);
            }
        }

        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }
        Ok(())
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到前台");

        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_foreground().await {
                warn!("⚠️ Hook #{} 前台切换失败: {}", index, e);
                errors.push(e);
            }
        }

        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }
        Ok(())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 同步引擎的生命周期 Hook
///
/// 前台 → 重新对账；后台 → 当前快照立即入缓冲（进程随时可能被回收）。
pub struct SyncLifecycleHook {
    engine: Arc<SyncEngine>,
}

impl SyncLifecycleHook {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl LifecycleHook for SyncLifecycleHook {
    async fn on_background(&self) -> Result<()> {
        self.engine.handle_app_background();
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        self.engine.reconcile().await;
        Ok(())
    }
}

/// 身份迁移处理器
#[derive(Clone)]
pub struct AccountTransitionHandler {
    engine: Arc<SyncEngine>,
    auth: Arc<dyn AuthProvider>,
    push: Arc<dyn PushService>,
}

impl AccountTransitionHandler {
    pub fn new(
        engine: Arc<SyncEngine>,
        auth: Arc<dyn AuthProvider>,
        push: Arc<dyn PushService>,
    ) -> Self {
        Self { engine, auth, push }
    }

    /// 认证事件分发入口（由 SDK 的认证监听任务调用）
    pub async fn handle_auth_event(&self, event: AuthEvent, session: Option<AuthSession>) {
        match event {
            AuthEvent::SignedOut => self.handle_sign_out().await,
            AuthEvent::SignedIn => match session {
                Some(s) if s.identity.is_anonymous() => self.handle_anonymous_sign_in().await,
                Some(s) => self.handle_user_sign_in(s).await,
                None => warn!("⚠️ SignedIn 事件没有携带会话，忽略"),
            },
            AuthEvent::TokenRefreshed | AuthEvent::UserUpdated => {
                debug!("认证事件 {:?} 无需处理", event)
            }
        }
    }

    /// 确认登出
    ///
    /// OAuth 跳转中断和待验证会话都不是确认登出，直接放行；
    /// 真正的登出做破坏性本地清理，然后立即建立新的匿名会话，
    /// 让 guest 侧的云端积累透明地继续。
    pub async fn handle_sign_out(&self) {
        let crumbs = self.engine.resolver().breadcrumbs();
        if crumbs.oauth_in_progress() {
            info!("🔀 OAuth 跳转进行中，登出事件视为瞬时中断");
            return;
        }
        if self.engine.resolver().check_pending_verification() == VerificationState::Fresh {
            info!("⏳ 存在新鲜的待验证会话，登出事件视为瞬时中断");
            return;
        }

        info!("👋 确认登出，开始本地清理");

        if let Err(e) = self.push.deregister_device().await {
            warn!("⚠️ 注销设备推送失败（忽略）: {}", e);
        }

        // 清空本地/缓冲/持久化状态 + 会话痕迹，回到 guest/idle
        self.engine.force_guest_reset().await;

        // 重新建立匿名会话，恢复匿名云同步
        match self.auth.sign_in_anonymously().await {
            Ok(_) => self.engine.reconcile().await,
            Err(e) => warn!("⚠️ 建立匿名会话失败，维持纯 guest: {}", e),
        }
    }

    /// 匿名登录
    ///
    /// 已在 cloud 模式且已初始化时是 no-op —— 重复事件不得引发对账风暴。
    pub async fn handle_anonymous_sign_in(&self) {
        if self.engine.mode() == CloudMode::Cloud && self.engine.is_initialized() {
            debug!("匿名登录事件重复，忽略");
            return;
        }
        self.engine.reconcile().await;
    }

    /// 正式账号登录
    ///
    /// 清理过期标记与旧痕迹后，把迁移（推送注册、订阅权益归属）、
    /// 对账、孤儿清理放到一个独立任务里执行 —— 关键路径不等它们。
    pub async fn handle_user_sign_in(&self, session: AuthSession) {
        self.engine.set_session_expired(false);
        self.engine.resolver().breadcrumbs().clear();
        self.engine.mark_uninitialized();

        let previous_anonymous = {
            let identity = self.engine.identity();
            if identity.is_anonymous() {
                identity.user_id
            } else {
                None
            }
        };
        let new_user_id = session.identity.user_id.clone();

        let engine = self.engine.clone();
        let auth = self.auth.clone();
        let push = self.push.clone();
        tokio::spawn(async move {
            if let (Some(anonymous_id), Some(user_id)) = (&previous_anonymous, &new_user_id) {
                if let Err(e) = auth.link_anonymous_to_user(user_id).await {
                    warn!("⚠️ 关联匿名身份失败（忽略）: {}", e);
                }
                if let Err(e) = push
                    .migrate_anonymous_registration(anonymous_id, user_id)
                    .await
                {
                    warn!("⚠️ 迁移推送注册失败（忽略）: {}", e);
                }
            }

            engine.reconcile().await;

            // 对账完成后顺手请求清理孤儿匿名账号；失败无所谓
            if let Some(anonymous_id) = previous_anonymous {
                if let Err(e) = auth.request_orphan_cleanup(&anonymous_id).await {
                    debug!("孤儿匿名账号清理请求失败（忽略）: {}", e);
                }
            }
        });
    }
}
