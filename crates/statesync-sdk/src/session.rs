//! 会话解析 - 从认证子系统与本地缓存的会话痕迹里解析出当前身份
//!
//! 解析策略：
//! - 在线：主查询（get_current_session）与超时定时器赛跑，先到者胜，
//!   输家的结果（如果有）直接丢弃 —— 不是真取消，底层调用不中止
//! - 离线或主查询超时：降级读本地缓存的会话痕迹，命中非匿名痕迹则
//!   以缓存身份进入 cloud 模式（状态 offline），让应用无网也能渲染
//!   正确的已登录外壳
//! - 待验证会话（OTP）按年龄分流：新鲜的放行，超龄的判定为已放弃

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StateSyncConfig;
use crate::network::NetworkMonitor;
use crate::services::{AuthProvider, AuthSession};
use crate::storage::{keys, KvStore};
use crate::sync::CloudMode;

/// 已解析身份
///
/// 全 None = 无会话；user_id 有而 email 无 = 匿名会话。
/// 匿名会话对"选择 cloud 模式"算有效会话（匿名云同步是受支持的状态，
/// 允许用户在注册前就积累云端数据），但对"是否保留历史"的决策算无身份。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: Option<String>,
}

impl Identity {
    /// 无会话
    pub fn none() -> Self {
        Self::default()
    }

    /// 是否存在有效会话（含匿名、含离线降级解析出的缓存身份）
    pub fn has_session(&self) -> bool {
        self.user_id.is_some() || self.email.is_some()
    }

    /// 是否匿名会话（有会话但没有邮箱）
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_some() && self.email.is_none()
    }

    /// 是否已认证的正式账号
    pub fn is_authenticated_user(&self) -> bool {
        self.has_session() && !self.is_anonymous()
    }

    /// 身份摘要（日志用，避免把邮箱原文写进日志）
    pub fn digest(&self) -> String {
        let seed = self
            .user_id
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("none");
        let hash = Sha256::digest(seed.as_bytes());
        hex::encode(&hash[..8])
    }
}

/// 本地缓存的会话痕迹
///
/// 写入时机：每次成功解析出正式账号会话。
/// 读取时机：离线或主查询超时的降级解析。
#[derive(Debug, Clone)]
pub struct SessionBreadcrumbs {
    kv: Arc<KvStore>,
}

impl SessionBreadcrumbs {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    pub fn was_authenticated(&self) -> bool {
        self.kv
            .get::<bool>(keys::WAS_AUTHENTICATED)
            .unwrap_or(None)
            .unwrap_or(false)
    }

    pub fn last_email(&self) -> Option<String> {
        self.kv.get(keys::LAST_AUTH_EMAIL).unwrap_or(None)
    }

    pub fn last_provider(&self) -> Option<String> {
        self.kv.get(keys::LAST_AUTH_PROVIDER).unwrap_or(None)
    }

    pub fn oauth_in_progress(&self) -> bool {
        self.kv
            .get::<bool>(keys::OAUTH_IN_PROGRESS)
            .unwrap_or(None)
            .unwrap_or(false)
    }

    pub fn set_oauth_in_progress(&self, in_progress: bool) {
        let result = if in_progress {
            self.kv.set(keys::OAUTH_IN_PROGRESS, &true)
        } else {
            self.kv.delete(keys::OAUTH_IN_PROGRESS)
        };
        if let Err(e) = result {
            warn!("⚠️ 写 OAuth 进行中标记失败（忽略）: {}", e);
        }
    }

    /// 待验证会话的创建时间（UTC 毫秒时间戳）
    pub fn verification_pending_at(&self) -> Option<i64> {
        self.kv.get(keys::VERIFICATION_PENDING_AT).unwrap_or(None)
    }

    pub fn set_verification_pending_at(&self, at: Option<i64>) {
        let result = match at {
            Some(ts) => self.kv.set(keys::VERIFICATION_PENDING_AT, &ts),
            None => self.kv.delete(keys::VERIFICATION_PENDING_AT),
        };
        if let Err(e) = result {
            warn!("⚠️ 写待验证时间戳失败（忽略）: {}", e);
        }
    }

    /// 记录一次成功解析的会话
    ///
    /// 只有正式账号会留下痕迹；匿名会话不算"曾经登录过"。
    pub fn record_session(&self, session: &AuthSession) {
        if !session.identity.is_authenticated_user() {
            return;
        }
        if let Err(e) = self.kv.set(keys::WAS_AUTHENTICATED, &true) {
            warn!("⚠️ 写登录痕迹失败（忽略）: {}", e);
        }
        if let Some(email) = &session.identity.email {
            if let Err(e) = self.kv.set(keys::LAST_AUTH_EMAIL, email) {
                warn!("⚠️ 写邮箱痕迹失败（忽略）: {}", e);
            }
        }
        if let Some(provider) = &session.identity.provider {
            if let Err(e) = self.kv.set(keys::LAST_AUTH_PROVIDER, provider) {
                warn!("⚠️ 写提供方痕迹失败（忽略）: {}", e);
            }
        }
        if session.pending_verification {
            if self.verification_pending_at().is_none() {
                self.set_verification_pending_at(Some(Utc::now().timestamp_millis()));
            }
        } else {
            self.set_verification_pending_at(None);
        }
    }

    /// 清空全部痕迹（确认登出时调用）
    pub fn clear(&self) {
        for key in [
            keys::WAS_AUTHENTICATED,
            keys::LAST_AUTH_EMAIL,
            keys::LAST_AUTH_PROVIDER,
            keys::OAUTH_IN_PROGRESS,
            keys::VERIFICATION_PENDING_AT,
        ] {
            if let Err(e) = self.kv.delete(key) {
                warn!("⚠️ 清除会话痕迹失败（忽略）: key={}, {}", key, e);
            }
        }
    }
}

/// 待验证会话的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    /// 没有待验证会话
    None,
    /// 有，且还在有效窗口内 —— 放行，不强制登出
    Fresh,
    /// 超龄，判定为已放弃 —— 必须强制登出并要求重新加载
    Abandoned,
}

/// 解析结果
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub identity: Identity,
    pub mode: CloudMode,
    /// true = 离线降级解析：引擎应直接置 offline，不发起远端调用
    pub degraded_offline: bool,
}

/// 解析提示（引擎当前的自我认知，用于识别开发环境竞态）
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveHint {
    /// 引擎当前认为自己处于 cloud 模式且有已知用户
    pub believed_cloud_with_user: bool,
}

/// 会话解析器
#[derive(Debug)]
pub struct SessionResolver {
    auth: Arc<dyn AuthProvider>,
    network: Arc<NetworkMonitor>,
    breadcrumbs: SessionBreadcrumbs,
    config: Arc<StateSyncConfig>,
}

impl SessionResolver {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        network: Arc<NetworkMonitor>,
        breadcrumbs: SessionBreadcrumbs,
        config: Arc<StateSyncConfig>,
    ) -> Self {
        Self {
            auth,
            network,
            breadcrumbs,
            config,
        }
    }

    pub fn breadcrumbs(&self) -> &SessionBreadcrumbs {
        &self.breadcrumbs
    }

    /// 检查待验证会话的年龄
    pub fn check_pending_verification(&self) -> VerificationState {
        match self.breadcrumbs.verification_pending_at() {
            None => VerificationState::None,
            Some(ts) => {
                let age_ms = Utc::now().timestamp_millis() - ts;
                if age_ms > (self.config.verification_max_age_secs * 1000) as i64 {
                    VerificationState::Abandoned
                } else {
                    VerificationState::Fresh
                }
            }
        }
    }

    /// 解析当前身份
    pub async fn resolve(&self, hint: ResolveHint) -> ResolvedSession {
        if !self.network.check_connection().await {
            debug!("📴 离线，降级读本地会话痕迹");
            return self.resolve_from_cache();
        }

        let timeout = tokio::time::Duration::from_millis(self.config.session_lookup_timeout_ms);
        let lookup = tokio::time::timeout(timeout, self.auth.get_current_session()).await;

        match lookup {
            Err(_elapsed) => {
                // 超时：输家的最终结果（如果有）被丢弃，不中止底层调用
                warn!(
                    "⏱️ 会话查询超过 {}ms，降级读本地会话痕迹",
                    self.config.session_lookup_timeout_ms
                );
                self.resolve_from_cache()
            }
            Ok(Err(e)) => {
                warn!("⚠️ 会话查询失败，降级读本地会话痕迹: {}", e);
                self.resolve_from_cache()
            }
            Ok(Ok(Some(session))) => self.accept_session(session),
            Ok(Ok(None)) => {
                // 开发环境竞态：store 已处于 cloud 模式且有已知用户时，
                // 会话查询可能瞬时返回空。此时不能触发破坏性重置，
                // 必须短暂等待后重查一次，再接受否定结果。
                if hint.believed_cloud_with_user {
                    debug!("🔁 会话瞬时缺失但引擎认为已登录，延迟后重查一次");
                    tokio::time::sleep(tokio::time::Duration::from_millis(
                        self.config.session_race_retry_delay_ms,
                    ))
                    .await;
                    if let Ok(Some(session)) = self.auth.get_current_session().await {
                        return self.accept_session(session);
                    }
                }
                ResolvedSession {
                    identity: Identity::none(),
                    mode: CloudMode::Guest,
                    degraded_offline: false,
                }
            }
        }
    }

    fn accept_session(&self, session: AuthSession) -> ResolvedSession {
        self.breadcrumbs.record_session(&session);
        info!(
            "👤 会话解析完成: identity={}, anonymous={}",
            session.identity.digest(),
            session.identity.is_anonymous()
        );
        ResolvedSession {
            identity: session.identity,
            mode: CloudMode::Cloud,
            degraded_offline: false,
        }
    }

    /// 离线降级：只看本地缓存的会话痕迹
    fn resolve_from_cache(&self) -> ResolvedSession {
        if self.breadcrumbs.was_authenticated() {
            if let Some(email) = self.breadcrumbs.last_email() {
                let identity = Identity {
                    user_id: None,
                    email: Some(email),
                    display_name: None,
                    avatar_url: None,
                    provider: self.breadcrumbs.last_provider(),
                };
                info!("📴 离线降级解析: 命中缓存身份 {}", identity.digest());
                return ResolvedSession {
                    identity,
                    mode: CloudMode::Cloud,
                    degraded_offline: true,
                };
            }
        }
        ResolvedSession {
            identity: Identity::none(),
            mode: CloudMode::Guest,
            degraded_offline: false,
        }
    }
}
