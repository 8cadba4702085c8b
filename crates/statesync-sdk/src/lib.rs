//! StateSync SDK - 离线优先的应用状态同步层
//!
//! 在本地设备与远端存储之间对账同一份可变应用状态文档，覆盖：
//! - 📴 离线优先：变更永远先落本地，联网后自动送达远端
//! - 📦 待同步缓冲：至多一条、跨重启存活，失败路径永不丢数据
//! - 🔒 跨上下文互斥：多标签页/多进程共享存储时，推送全局串行
//! - 👤 身份迁移：匿名 → 正式账号、登出、会话过期的完整处理
//! - 🔄 显式状态机：idle/syncing/ok/offline/error，UI 可观察
//! - ⏲️ 自动重试：在线事件排空 offline，定时器排空 error
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statesync_sdk::{StateSyncSDK, StateSyncConfig, SdkServices};
//! use statesync_sdk::services::{MemoryAuthProvider, MemoryRemoteStore, NoopPushService, StaticSubscriptionService};
//! use statesync_sdk::network::ManualNetworkListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StateSyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .build();
//!
//!     let services = SdkServices {
//!         auth: Arc::new(MemoryAuthProvider::new()),
//!         remote: Arc::new(MemoryRemoteStore::new()),
//!         push: Arc::new(NoopPushService::new()),
//!         subscription: Arc::new(StaticSubscriptionService::free()),
//!         network_listener: Arc::new(ManualNetworkListener::new(true)),
//!     };
//!
//!     let sdk = StateSyncSDK::initialize(config, services).await?;
//!
//!     // 本地变更：立即持久化，防抖后自动推送
//!     sdk.set_onboarding_seen(true);
//!
//!     // 观察同步状态
//!     println!("status = {}", sdk.sync_status());
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod network;
pub mod sdk;
pub mod services;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{HttpClientConfig, StateSyncConfig, StateSyncConfigBuilder};
pub use error::{Result, StateSyncSDKError};
pub use events::{EventManager, SDKEvent};
pub use lifecycle::{AccountTransitionHandler, LifecycleHook, LifecycleManager};
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener};
pub use sdk::{SdkServices, StateSyncSDK};
pub use services::{
    AuthEvent, AuthProvider, AuthSession, PushService, RemoteStateStore, RestRemoteStateStore,
    SubscriptionService, SubscriptionState, SubscriptionTier,
};
pub use session::{Identity, ResolvedSession, SessionResolver, VerificationState};
pub use snapshot::{SecuritySettings, StateSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use storage::{DurableStateStore, KvStore, PendingChangeStore, SyncLock};
pub use sync::{CloudMode, SyncEngine, SyncStatus};
