//! StateSync SDK 门面
//!
//! 把存储、网络监控、会话解析、同步引擎、重试调度、生命周期处理
//! 组装成一个对宿主应用友好的单一入口：
//! - initialize: 建目录 → 开存储 → 起监控 → 首轮对账 → 起后台任务
//! - 运行期: 快照读写、状态观察、事件订阅、前后台通知
//! - shutdown: 停任务 → 取消防抖 → 刷盘

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::StateSyncConfig;
use crate::error::{Result, StateSyncSDKError};
use crate::events::{EventManager, SDKEvent};
use crate::lifecycle::{AccountTransitionHandler, LifecycleManager, SyncLifecycleHook};
use crate::network::{NetworkMonitor, NetworkStatusListener};
use crate::services::{
    AuthProvider, PushService, RemoteStateStore, SubscriptionService, SubscriptionState,
};
use crate::session::{Identity, SessionBreadcrumbs, SessionResolver, VerificationState};
use crate::snapshot::{SecuritySettings, StateSnapshot};
use crate::storage::{
    DurableStateStore, KvLockBackend, KvStore, PendingChangeStore, SyncLock,
};
use crate::sync::{CloudMode, RetryScheduler, SyncEngine, SyncStatus};
use crate::version;

/// 外部协作方集合
#[derive(Clone)]
pub struct SdkServices {
    pub auth: Arc<dyn AuthProvider>,
    pub remote: Arc<dyn RemoteStateStore>,
    pub push: Arc<dyn PushService>,
    pub subscription: Arc<dyn SubscriptionService>,
    pub network_listener: Arc<dyn NetworkStatusListener>,
}

/// StateSync SDK
pub struct StateSyncSDK {
    config: Arc<StateSyncConfig>,
    kv: Arc<KvStore>,
    auth: Arc<dyn AuthProvider>,
    engine: Arc<SyncEngine>,
    lifecycle: Arc<AccountTransitionHandler>,
    lifecycle_manager: LifecycleManager,
    events: EventManager,
    retry: RetryScheduler,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl StateSyncSDK {
    /// 初始化 SDK
    pub async fn initialize(config: StateSyncConfig, services: SdkServices) -> Result<Arc<Self>> {
        info!(
            "🚀 StateSync SDK 初始化: version={}, data_dir={}",
            version::SDK_VERSION,
            config.data_dir.display()
        );

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| StateSyncSDKError::IO(format!("创建数据目录失败: {}", e)))?;

        let config = Arc::new(config);
        let kv = Arc::new(KvStore::open(&config.data_dir).await?);
        let events = EventManager::default();

        let network = Arc::new(NetworkMonitor::new(services.network_listener.clone()));
        network.start().await?;

        let resolver = Arc::new(SessionResolver::new(
            services.auth.clone(),
            network.clone(),
            SessionBreadcrumbs::new(kv.clone()),
            config.clone(),
        ));

        let engine = SyncEngine::new(
            config.clone(),
            DurableStateStore::new(kv.clone()),
            PendingChangeStore::new(kv.clone()),
            SyncLock::new(Arc::new(KvLockBackend::new(kv.clone())), config.lock_timeout_ms),
            network.clone(),
            services.remote.clone(),
            services.subscription.clone(),
            resolver,
            events.clone(),
        );

        let lifecycle = Arc::new(AccountTransitionHandler::new(
            engine.clone(),
            services.auth.clone(),
            services.push.clone(),
        ));

        // 待验证会话超龄是唯一主动丢弃进行中认证状态的场景：
        // 强制登出并要求宿主重新加载；新鲜的待验证会话正常放行
        match engine.resolver().check_pending_verification() {
            VerificationState::Abandoned => {
                warn!("⏳ 待验证会话已超龄，强制登出");
                events.emit(SDKEvent::ForcedSignOut {
                    reason: "待验证会话已超龄".to_string(),
                });
                if let Err(e) = services.auth.sign_out().await {
                    warn!("⚠️ 强制登出调用失败（继续本地清理）: {}", e);
                }
                lifecycle.handle_sign_out().await;
            }
            _ => {
                engine.reconcile().await;
            }
        }

        // 有会话则注册设备推送（尽力而为）
        if engine.mode() == CloudMode::Cloud {
            if let Err(e) = services.push.register_device().await {
                warn!("⚠️ 注册设备推送失败（忽略）: {}", e);
            }
        }

        // 网络监听任务：在线 → 排空缓冲；离线 → 快照入缓冲
        let mut network_rx = network.subscribe();
        let engine_for_network = engine.clone();
        let network_task = tokio::spawn(async move {
            while let Ok(event) = network_rx.recv().await {
                if event.went_online() {
                    engine_for_network.handle_network_transition(true).await;
                } else if event.went_offline() {
                    engine_for_network.handle_network_transition(false).await;
                }
            }
        });

        // 认证事件任务：身份迁移统一走生命周期处理器
        let mut auth_rx = services.auth.subscribe_auth_events();
        let lifecycle_for_auth = lifecycle.clone();
        let auth_task = tokio::spawn(async move {
            while let Ok((event, session)) = auth_rx.recv().await {
                lifecycle_for_auth.handle_auth_event(event, session).await;
            }
        });

        let retry = RetryScheduler::start(
            engine.clone(),
            Duration::from_secs(config.retry_interval_secs),
        );

        let mut lifecycle_manager = LifecycleManager::new();
        lifecycle_manager.register_hook(Arc::new(SyncLifecycleHook::new(engine.clone())));

        info!("✅ StateSync SDK 初始化完成: mode={}", engine.mode());

        Ok(Arc::new(Self {
            config,
            kv,
            auth: services.auth,
            engine,
            lifecycle,
            lifecycle_manager,
            events,
            retry,
            tasks: parking_lot::Mutex::new(vec![network_task, auth_task]),
            shutting_down: AtomicBool::new(false),
        }))
    }

    // ============================================================
    // 快照读写
    // ============================================================

    /// 当前内存快照（纯读）
    pub fn snapshot(&self) -> StateSnapshot {
        self.engine.snapshot()
    }

    /// 整体替换内存 + 本地持久化状态
    pub fn replace_all_data(&self, snapshot: StateSnapshot) {
        self.engine.replace_all_data(snapshot);
    }

    pub fn set_onboarding_seen(&self, seen: bool) {
        self.engine.set_onboarding_seen(seen);
    }

    pub fn update_security(&self, security: SecuritySettings) {
        self.engine.update_security(security);
    }

    // ============================================================
    // 状态观察
    // ============================================================

    pub fn sync_status(&self) -> SyncStatus {
        self.engine.status()
    }

    pub fn cloud_mode(&self) -> CloudMode {
        self.engine.mode()
    }

    pub fn identity(&self) -> Identity {
        self.engine.identity()
    }

    pub fn entitlement(&self) -> Option<SubscriptionState> {
        self.engine.entitlement()
    }

    pub fn is_session_expired(&self) -> bool {
        self.engine.is_session_expired()
    }

    /// 会话过期标记（UI 恢复提示用）
    pub fn set_session_expired(&self, expired: bool) {
        self.engine.set_session_expired(expired);
    }

    /// OAuth 跳转进行中标记
    ///
    /// 宿主在发起 OAuth 跳转前置 true、回调完成后置 false；
    /// 标记存在期间到达的登出事件会被当作瞬时中断忽略。
    pub fn set_oauth_in_progress(&self, in_progress: bool) {
        self.engine
            .resolver()
            .breadcrumbs()
            .set_oauth_in_progress(in_progress);
    }

    /// 订阅 SDK 事件流
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<SDKEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &StateSyncConfig {
        &self.config
    }

    // ============================================================
    // 同步与生命周期
    // ============================================================

    /// 手动触发一次完整对账
    pub async fn reconcile(&self) {
        self.engine.reconcile().await;
    }

    /// 登出（确认登出的后续清理由认证事件监听任务驱动）
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await
    }

    /// App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        self.lifecycle_manager.notify_foreground().await
    }

    /// App 切换到后台
    pub async fn notify_background(&self) -> Result<()> {
        self.lifecycle_manager.notify_background().await
    }

    /// 身份迁移处理器（宿主直接驱动身份事件时使用）
    pub fn account_transitions(&self) -> &AccountTransitionHandler {
        &self.lifecycle
    }

    /// 关闭 SDK：停后台任务、取消防抖、刷盘
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Err(StateSyncSDKError::ShuttingDown(
                "SDK 正在关闭".to_string(),
            ));
        }
        info!("🛑 StateSync SDK 关闭中");

        self.retry.stop();
        self.engine.cancel_scheduled_push();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.kv.flush().await?;

        info!("✅ StateSync SDK 已关闭");
        Ok(())
    }
}

impl std::fmt::Debug for StateSyncSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSyncSDK")
            .field("mode", &self.engine.mode())
            .field("status", &self.engine.status())
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ManualNetworkListener;
    use crate::services::{
        MemoryAuthProvider, MemoryRemoteStore, NoopPushService, StaticSubscriptionService,
    };
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        auth: Arc<MemoryAuthProvider>,
        remote: Arc<MemoryRemoteStore>,
        push: Arc<NoopPushService>,
        listener: Arc<ManualNetworkListener>,
        services: SdkServices,
        config: StateSyncConfig,
    }

    fn make_services(online: bool) -> (
        Arc<MemoryAuthProvider>,
        Arc<MemoryRemoteStore>,
        Arc<NoopPushService>,
        Arc<ManualNetworkListener>,
        SdkServices,
    ) {
        let auth = Arc::new(MemoryAuthProvider::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let push = Arc::new(NoopPushService::new());
        let listener = Arc::new(ManualNetworkListener::new(online));
        let services = SdkServices {
            auth: auth.clone(),
            remote: remote.clone(),
            push: push.clone(),
            subscription: Arc::new(StaticSubscriptionService::free()),
            network_listener: listener.clone(),
        };
        (auth, remote, push, listener, services)
    }

    fn make_fixture(online: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let (auth, remote, push, listener, services) = make_services(online);
        let config = StateSyncConfig::builder()
            .data_dir(temp.path())
            .push_debounce_ms(10)
            .build();
        Fixture {
            _temp: temp,
            auth,
            remote,
            push,
            listener,
            services,
            config,
        }
    }

    #[tokio::test]
    async fn test_initialize_without_session_is_guest_idle() {
        let fixture = make_fixture(true);
        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();

        assert_eq!(sdk.cloud_mode(), CloudMode::Guest);
        assert_eq!(sdk.sync_status(), SyncStatus::Idle);
        // guest 不注册推送
        assert_eq!(fixture.push.register_count(), 0);
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_with_session_syncs_and_registers_push() {
        let fixture = make_fixture(true);
        let session = MemoryAuthProvider::user_session("init@example.com");
        let user_id = session.identity.user_id.clone().unwrap();
        fixture.auth.set_session(Some(session)).await;

        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();

        assert_eq!(sdk.cloud_mode(), CloudMode::Cloud);
        assert_eq!(sdk.sync_status(), SyncStatus::Ok);
        assert!(fixture.remote.row(&user_id).await.is_some());
        assert_eq!(fixture.push.register_count(), 1);
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_network_listener_task_drives_engine_end_to_end() {
        let fixture = make_fixture(true);
        let session = MemoryAuthProvider::user_session("e2e@example.com");
        let user_id = session.identity.user_id.clone().unwrap();
        fixture.auth.set_session(Some(session)).await;

        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();

        // 断网 → 监听任务自动缓冲并置 offline
        fixture.listener.set_online(false).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sdk.sync_status(), SyncStatus::Offline);

        // 离线期间的本地变更
        sdk.set_onboarding_seen(true);
        tokio::time::sleep(Duration::from_millis(60)).await;

        // 恢复联网 → 监听任务自动排空缓冲
        fixture.listener.set_online(true).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sdk.sync_status(), SyncStatus::Ok);
        let row = fixture.remote.row(&user_id).await.unwrap();
        assert_eq!(row.onboarding_seen, Some(true));
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_event_task_drives_lifecycle() {
        let fixture = make_fixture(true);
        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();
        assert_eq!(sdk.cloud_mode(), CloudMode::Guest);

        // 宿主完成登录，认证子系统广播 SignedIn
        let session = MemoryAuthProvider::user_session("event@example.com");
        let user_id = session.identity.user_id.clone().unwrap();
        fixture.auth.set_session(Some(session.clone())).await;
        fixture
            .auth
            .emit(crate::services::AuthEvent::SignedIn, Some(session));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sdk.cloud_mode(), CloudMode::Cloud);
        assert!(sdk.identity().is_authenticated_user());
        assert!(fixture.remote.row(&user_id).await.is_some());
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_e_abandoned_verification_forces_sign_out() {
        let fixture = make_fixture(true);
        // 预置一个 11 分钟前的待验证痕迹（模拟上次会话留下的）
        {
            let kv = Arc::new(KvStore::open(fixture._temp.path()).await.unwrap());
            let crumbs = SessionBreadcrumbs::new(kv.clone());
            let eleven_min_ago = chrono::Utc::now().timestamp_millis() - 11 * 60 * 1000;
            crumbs.set_verification_pending_at(Some(eleven_min_ago));
            kv.flush().await.unwrap();
        }
        // 认证侧还挂着一个未完成验证的会话
        let mut session = MemoryAuthProvider::user_session("otp@example.com");
        session.pending_verification = true;
        fixture.auth.set_session(Some(session)).await;

        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();

        // 强制登出已执行：旧会话被丢弃，新匿名会话接管
        let current = fixture.auth.get_current_session().await.unwrap().unwrap();
        assert!(current.identity.is_anonymous());
        assert!(sdk.identity().is_anonymous());
        // 痕迹清空
        let crumbs = SessionBreadcrumbs::new(sdk.kv.clone());
        assert!(crumbs.verification_pending_at().is_none());
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_verification_continues_normally() {
        let fixture = make_fixture(true);
        {
            let kv = Arc::new(KvStore::open(fixture._temp.path()).await.unwrap());
            let crumbs = SessionBreadcrumbs::new(kv.clone());
            let five_min_ago = chrono::Utc::now().timestamp_millis() - 5 * 60 * 1000;
            crumbs.set_verification_pending_at(Some(five_min_ago));
            kv.flush().await.unwrap();
        }
        let mut session = MemoryAuthProvider::user_session("fresh@example.com");
        session.pending_verification = true;
        fixture.auth.set_session(Some(session)).await;

        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();

        // 正常继续：会话保留，不强制登出
        let current = fixture.auth.get_current_session().await.unwrap().unwrap();
        assert!(current.identity.is_authenticated_user());
        assert_eq!(sdk.cloud_mode(), CloudMode::Cloud);
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_rejected() {
        let fixture = make_fixture(true);
        let sdk = StateSyncSDK::initialize(fixture.config.clone(), fixture.services.clone())
            .await
            .unwrap();

        sdk.shutdown().await.unwrap();
        assert!(sdk.shutdown().await.is_err());
    }
}
