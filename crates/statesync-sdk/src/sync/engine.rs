//! 同步引擎 - 状态机副作用的执行者
//!
//! 职责：
//! - 持有内存快照（唯一数据属主）与状态机状态
//! - 执行 machine 给出的副作用指令：拉取、推送、缓冲、清理
//! - 对账（reconcile）与推送（push）的完整编排，包括跨上下文锁的
//!   获取与保证释放
//!
//! 错误传播约定：引擎不向上层抛任何同步失败 —— 每条失败路径都以
//! 状态转移 + 数据保全收尾，日志只是旁路。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::StateSyncConfig;
use crate::events::{EventManager, SDKEvent};
use crate::network::NetworkMonitor;
use crate::services::{RemoteStateStore, SubscriptionService, SubscriptionState};
use crate::session::{Identity, ResolveHint, SessionResolver};
use crate::snapshot::{SecuritySettings, StateSnapshot};
use crate::storage::{DurableStateStore, PendingChangeStore, SyncLock};
use crate::sync::debounce::Debouncer;
use crate::sync::failure::classify_failure;
use crate::sync::machine::{transition, MachineState, SyncEffect, SyncEvent};
use crate::sync::{CloudMode, SyncStatus};

pub struct SyncEngine {
    weak_self: Weak<SyncEngine>,
    /// 内存快照 - 唯一的数据属主；持久化副本都是缓存
    snapshot: parking_lot::RwLock<StateSnapshot>,
    machine: parking_lot::RwLock<MachineState>,
    identity: parking_lot::RwLock<Identity>,
    entitlement: parking_lot::RwLock<Option<SubscriptionState>>,
    session_expired: AtomicBool,
    local: DurableStateStore,
    pending: PendingChangeStore,
    lock: SyncLock,
    network: Arc<NetworkMonitor>,
    remote: Arc<dyn RemoteStateStore>,
    subscription: Arc<dyn SubscriptionService>,
    resolver: Arc<SessionResolver>,
    events: EventManager,
    debouncer: Debouncer,
    /// 上下文内串行化 reconcile：事件环上允许重入，这里用异步互斥把
    /// 并发的 reconcile 排队，避免 initialized 标志被交错写坏
    reconcile_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let machine = self.machine.read();
        f.debug_struct("SyncEngine")
            .field("mode", &machine.mode)
            .field("status", &machine.status)
            .field("initialized", &machine.initialized)
            .field("has_pending", &machine.has_pending)
            .finish()
    }
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<StateSyncConfig>,
        local: DurableStateStore,
        pending: PendingChangeStore,
        lock: SyncLock,
        network: Arc<NetworkMonitor>,
        remote: Arc<dyn RemoteStateStore>,
        subscription: Arc<dyn SubscriptionService>,
        resolver: Arc<SessionResolver>,
        events: EventManager,
    ) -> Arc<Self> {
        // 冷启动：本地快照即初始内存状态；缓冲非空说明上次会话
        // 有未送达的变更，冷启动后第一轮对账会优先推送它
        let initial_snapshot = local.load().unwrap_or_else(StateSnapshot::empty);
        let mut initial_machine = MachineState::initial();
        initial_machine.has_pending = pending.has();

        let debounce = Duration::from_millis(config.push_debounce_ms);

        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            snapshot: parking_lot::RwLock::new(initial_snapshot),
            machine: parking_lot::RwLock::new(initial_machine),
            identity: parking_lot::RwLock::new(Identity::none()),
            entitlement: parking_lot::RwLock::new(None),
            session_expired: AtomicBool::new(false),
            local,
            pending,
            lock,
            network,
            remote,
            subscription,
            resolver,
            events,
            debouncer: Debouncer::new(debounce),
            reconcile_gate: tokio::sync::Mutex::new(()),
        })
    }

    // ============================================================
    // 对外只读接口
    // ============================================================

    /// 当前内存快照（纯读）
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.read().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.machine.read().status
    }

    pub fn mode(&self) -> CloudMode {
        self.machine.read().mode
    }

    pub fn is_initialized(&self) -> bool {
        self.machine.read().initialized
    }

    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    pub fn entitlement(&self) -> Option<SubscriptionState> {
        self.entitlement.read().clone()
    }

    pub fn is_session_expired(&self) -> bool {
        self.session_expired.load(Ordering::SeqCst)
    }

    pub fn set_session_expired(&self, expired: bool) {
        let previous = self.session_expired.swap(expired, Ordering::SeqCst);
        if previous != expired {
            self.events.emit(SDKEvent::SessionExpiredChanged { expired });
        }
    }

    pub(crate) fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    /// 生命周期层在正式登录前调用：下一轮对账重新走完整初始化
    pub(crate) fn mark_uninitialized(&self) {
        self.machine.write().initialized = false;
    }

    // ============================================================
    // 快照变更
    // ============================================================

    /// 整体替换内存 + 本地持久化状态（云端拉取结果 / 登出重置共用）
    pub fn replace_all_data(&self, snapshot: StateSnapshot) {
        let updated_at = snapshot.updated_at;
        *self.snapshot.write() = snapshot.clone();
        self.local.save(&snapshot);
        self.events.emit(SDKEvent::SnapshotReplaced { updated_at });
    }

    /// 更新引导页标记
    pub fn set_onboarding_seen(&self, seen: bool) {
        self.mutate_snapshot(|s| s.with_onboarding_seen(seen));
    }

    /// 更新安全设置
    pub fn update_security(&self, security: SecuritySettings) {
        self.mutate_snapshot(|s| s.with_security(security));
    }

    /// 应用一次本地变更：产生新快照、先行本地持久化、再按模式调度推送
    fn mutate_snapshot<F>(&self, mutate: F)
    where
        F: FnOnce(&StateSnapshot) -> StateSnapshot,
    {
        let next = {
            let current = self.snapshot.read();
            mutate(&current)
        };
        let updated_at = next.updated_at;
        *self.snapshot.write() = next.clone();
        // 本地持久化永远先行，与是否联网无关
        self.local.save(&next);
        self.events.emit(SDKEvent::SnapshotMutated { updated_at });

        let effects = self.apply_event(SyncEvent::LocalMutation);
        if effects.contains(&SyncEffect::ScheduleDebouncedPush) {
            self.schedule_debounced_push();
        }
    }

    // ============================================================
    // 状态机驱动
    // ============================================================

    /// 喂一个事件给纯状态机，落盘新状态并广播变化，返回副作用指令
    fn apply_event(&self, event: SyncEvent) -> Vec<SyncEffect> {
        let (old, next, effects) = {
            let mut machine = self.machine.write();
            let old = *machine;
            let result = transition(&machine, event);
            *machine = result.next;
            (old, result.next, result.effects)
        };

        if old.status != next.status {
            info!("🔄 同步状态: {} → {}", old.status, next.status);
            self.events.emit(SDKEvent::SyncStatusChanged {
                old: old.status,
                new: next.status,
            });
        }
        if old.mode != next.mode {
            info!("🔄 运行模式: {} → {}", old.mode, next.mode);
            self.events.emit(SDKEvent::CloudModeChanged {
                old: old.mode,
                new: next.mode,
            });
        }

        effects
    }

    // ============================================================
    // 对账
    // ============================================================

    /// 完整对账：解析会话 → 选择模式 → 拉取或推送
    pub async fn reconcile(&self) {
        let _gate = self.reconcile_gate.lock().await;

        let believed_cloud_with_user = {
            let machine = self.machine.read();
            machine.mode == CloudMode::Cloud && self.identity.read().is_authenticated_user()
        };
        let resolved = self
            .resolver
            .resolve(ResolveHint {
                believed_cloud_with_user,
            })
            .await;

        {
            let mut identity = self.identity.write();
            if *identity != resolved.identity {
                *identity = resolved.identity.clone();
                self.events.emit(SDKEvent::IdentityChanged {
                    digest: resolved.identity.digest(),
                    anonymous: resolved.identity.is_anonymous(),
                });
            }
        }

        let online = !resolved.degraded_offline && self.network.check_connection().await;
        let effects = self.apply_event(SyncEvent::SessionResolved {
            has_session: resolved.identity.has_session(),
            was_cloud_user: believed_cloud_with_user,
            online,
        });

        for effect in effects {
            match effect {
                SyncEffect::WipeLocalState => self.wipe_local(),
                SyncEffect::BufferCurrentSnapshot => self.buffer_current(),
                SyncEffect::AcquireLock => self.locked_sync().await,
                other => debug!("对账主路径忽略副作用: {:?}", other),
            }
        }
    }

    /// 锁保护的同步区段；release 在所有出口路径上保证执行
    async fn locked_sync(&self) {
        if !self.lock.acquire().await {
            // 另一个上下文在处理；本地数据仍安全地留在缓冲里
            info!("🔒 同步锁竞争失败，乐观视为别处已同步");
            self.apply_event(SyncEvent::LockContended);
            return;
        }

        self.synchronize_locked().await;
        self.lock.release().await;
    }

    async fn synchronize_locked(&self) {
        let effects = self.apply_event(SyncEvent::LockAcquired);
        for effect in effects {
            match effect {
                SyncEffect::PushPending => self.push_pending().await,
                SyncEffect::PullRemote => self.pull_remote().await,
                other => debug!("锁内路径忽略副作用: {:?}", other),
            }
        }
    }

    /// 拉取远端快照并按结果分派
    async fn pull_remote(&self) {
        let user_id = {
            match self.identity.read().user_id.clone() {
                Some(u) => u,
                None => {
                    // 降级身份没有行地址，等下一轮在线解析补全
                    warn!("⚠️ 身份缺少 user_id，跳过本轮拉取");
                    self.apply_event(SyncEvent::PullFailed {
                        class: crate::sync::failure::FailureClass::Transient,
                    });
                    return;
                }
            }
        };

        match self.remote.fetch_state(&user_id).await {
            Ok(found_opt) => {
                let effects = self.apply_event(SyncEvent::RemoteFetched {
                    found: found_opt.is_some(),
                });
                for effect in effects {
                    match effect {
                        SyncEffect::ReplaceLocalWithRemote => {
                            if let Some(remote_snapshot) = &found_opt {
                                info!("📥 远端有数据，整体替换本地状态");
                                self.replace_all_data(remote_snapshot.clone());
                            }
                        }
                        SyncEffect::FetchEntitlement => self.fetch_entitlement(&user_id).await,
                        SyncEffect::PushCurrentAsSeed => {
                            info!("🌱 远端无数据（首次登录），推送本地快照作为种子");
                            let current = self.snapshot();
                            self.push(current).await;
                        }
                        other => debug!("拉取路径忽略副作用: {:?}", other),
                    }
                }
            }
            Err(e) => {
                let online = self.network.check_connection().await;
                let class = classify_failure(&e, online);
                warn!("⚠️ 拉取远端状态失败（{:?}）: {}", class, e);
                self.apply_event(SyncEvent::PullFailed { class });
            }
        }
    }

    /// 拉取订阅权益（尽力而为，失败只记日志）
    async fn fetch_entitlement(&self, user_id: &str) {
        match self.subscription.fetch_entitlement(user_id).await {
            Ok(state) => {
                debug!("💳 订阅权益已更新: {:?}", state.tier);
                *self.entitlement.write() = Some(state);
            }
            Err(e) => warn!("⚠️ 拉取订阅权益失败（忽略）: {}", e),
        }
    }

    // ============================================================
    // 推送
    // ============================================================

    /// 推送缓冲中的待同步快照
    pub(crate) async fn push_pending(&self) {
        let buffered = match self.pending.get() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                // 标志位与持久层漂移：就地修复
                self.machine.write().has_pending = false;
                return;
            }
            Err(e) => {
                warn!("⚠️ 读取待同步缓冲失败，等下一轮触发: {}", e);
                return;
            }
        };
        self.push(buffered).await;
    }

    /// 推送一个快照到远端
    ///
    /// 失败路径的顺序不变式：先把快照写回缓冲，再做状态转移 ——
    /// 无论哪一步出问题，数据都不会同时从缓冲和远端消失。
    pub(crate) async fn push(&self, snapshot: StateSnapshot) {
        let mode = { self.machine.read().mode };
        if mode != CloudMode::Cloud {
            debug!("guest 模式忽略推送请求");
            return;
        }

        if !self.network.check_connection().await {
            self.buffer_snapshot(&snapshot);
            self.apply_event(SyncEvent::PushDeferredOffline);
            return;
        }

        let user_id = {
            match self.identity.read().user_id.clone() {
                Some(u) => u,
                None => {
                    // 降级身份推不了：缓冲住，等在线解析补全行地址
                    self.buffer_snapshot(&snapshot);
                    self.apply_event(SyncEvent::PushDeferredOffline);
                    return;
                }
            }
        };

        self.apply_event(SyncEvent::PushStarted);

        match self.remote.upsert_state(&user_id, &snapshot).await {
            Ok(()) => {
                if let Err(e) = self.pending.clear() {
                    warn!("⚠️ 清除待同步缓冲失败（下轮推送幂等覆盖）: {}", e);
                }
                self.apply_event(SyncEvent::PushSucceeded);
                info!("✅ 推送完成，远端已确认");
            }
            Err(e) => {
                self.buffer_snapshot(&snapshot);
                let online = self.network.check_connection().await;
                let class = classify_failure(&e, online);
                warn!("⚠️ 推送失败（{:?}）: {}", class, e);
                self.apply_event(SyncEvent::PushFailed { class });
            }
        }
    }

    // ============================================================
    // 连通性 / 定时器 / 防抖触发
    // ============================================================

    /// 连通性变化入口（由 SDK 的网络监听任务调用）
    pub async fn handle_network_transition(&self, went_online: bool) {
        let event = if went_online {
            SyncEvent::WentOnline
        } else {
            SyncEvent::WentOffline
        };
        let effects = self.apply_event(event);
        for effect in effects {
            match effect {
                SyncEffect::PushPending => {
                    info!("📶 网络恢复，排空待同步缓冲");
                    self.push_pending().await;
                }
                SyncEffect::BufferCurrentSnapshot => {
                    info!("📴 网络丢失，当前快照立即入缓冲");
                    self.buffer_current();
                }
                other => debug!("连通性路径忽略副作用: {:?}", other),
            }
        }
    }

    /// 重试定时器入口（仅排空 error 态）
    pub async fn handle_retry_tick(&self) {
        let effects = self.apply_event(SyncEvent::RetryTick);
        for effect in effects {
            if effect == SyncEffect::PushPending {
                debug!("⏲️ 重试定时器触发，再次尝试推送");
                self.push_pending().await;
            }
        }
    }

    /// App 退到后台：当前快照立即入缓冲
    ///
    /// 后台进程随时可能被系统回收，和断网走同一条保全路径。
    pub(crate) fn handle_app_background(&self) {
        let machine = { *self.machine.read() };
        if machine.mode == CloudMode::Cloud && machine.initialized {
            info!("🌙 App 退到后台，当前快照入缓冲");
            self.buffer_current();
        }
    }

    /// 防抖推送：触发时重新检查连通性，离线直接短路入缓冲
    fn schedule_debounced_push(&self) {
        let weak = self.weak_self.clone();
        self.debouncer.schedule(move || async move {
            let engine = match weak.upgrade() {
                Some(engine) => engine,
                None => return,
            };
            if !engine.network.check_connection().await {
                engine.buffer_current();
                engine.apply_event(SyncEvent::PushDeferredOffline);
                return;
            }
            let current = engine.snapshot();
            engine.push(current).await;
        });
    }

    /// 取消未触发的防抖任务（shutdown 用）
    pub(crate) fn cancel_scheduled_push(&self) {
        self.debouncer.cancel();
    }

    // ============================================================
    // 缓冲与清理
    // ============================================================

    fn buffer_current(&self) {
        let current = self.snapshot();
        self.buffer_snapshot(&current);
    }

    fn buffer_snapshot(&self, snapshot: &StateSnapshot) {
        if let Err(e) = self.pending.set(snapshot) {
            // 缓冲失败意味着真实的数据丢失风险，这里必须用 error 级别
            tracing::error!("❌ 写入待同步缓冲失败: {}", e);
            return;
        }
        self.machine.write().has_pending = true;
    }

    /// 确认登出后的完整重置：清空本地数据并回到 guest/idle
    pub(crate) async fn force_guest_reset(&self) {
        let online = self.network.check_connection().await;
        let effects = self.apply_event(SyncEvent::SessionResolved {
            has_session: false,
            was_cloud_user: true,
            online,
        });
        for effect in effects {
            if effect == SyncEffect::WipeLocalState {
                self.wipe_local();
            }
        }
    }

    /// 破坏性本地清理：确认登出后调用，guest 数据不得跨账号泄漏
    pub(crate) fn wipe_local(&self) {
        info!("🧹 清空本地状态（登出重置）");
        let empty = StateSnapshot::empty();
        self.local.clear();
        self.replace_all_data(empty);
        if let Err(e) = self.pending.clear() {
            warn!("⚠️ 清除待同步缓冲失败（忽略）: {}", e);
        }
        {
            let mut machine = self.machine.write();
            machine.has_pending = false;
        }
        *self.identity.write() = Identity::none();
        *self.entitlement.write() = None;
        self.resolver.breadcrumbs().clear();
    }
}
