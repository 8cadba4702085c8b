//! 同步状态演示
//!
//! 用内存协作方走一遍完整的状态流转：
//! guest → 匿名云同步 → 离线缓冲 → 联网排空 → 正式账号迁移

use statesync_sdk::network::ManualNetworkListener;
use statesync_sdk::services::{
    AuthEvent, MemoryAuthProvider, MemoryRemoteStore, NoopPushService, StaticSubscriptionService,
};
use statesync_sdk::{AuthProvider, SdkServices, StateSyncConfig, StateSyncSDK};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 StateSync 状态流转演示\n");
    println!("====================================\n");

    let auth = Arc::new(MemoryAuthProvider::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let listener = Arc::new(ManualNetworkListener::new(true));

    let services = SdkServices {
        auth: auth.clone(),
        remote: remote.clone(),
        push: Arc::new(NoopPushService::new()),
        subscription: Arc::new(StaticSubscriptionService::free()),
        network_listener: listener.clone(),
    };

    let config = StateSyncConfig::builder()
        .data_dir("/tmp/statesync_status_demo")
        .push_debounce_ms(200)
        .build();

    println!("📦 正在初始化 SDK...");
    let sdk = StateSyncSDK::initialize(config, services).await?;
    println!(
        "✅ 初始化完成: mode={}, status={}\n",
        sdk.cloud_mode(),
        sdk.sync_status()
    );

    // === 阶段 1：匿名云同步 ===
    println!("【阶段 1】建立匿名会话，开始云端积累");
    let session = auth.sign_in_anonymously().await?;
    sdk.account_transitions()
        .handle_auth_event(AuthEvent::SignedIn, Some(session))
        .await;
    println!(
        "   mode={}, status={}, anonymous={}\n",
        sdk.cloud_mode(),
        sdk.sync_status(),
        sdk.identity().is_anonymous()
    );

    // === 阶段 2：离线期间的本地变更 ===
    println!("【阶段 2】断网后修改本地设置");
    listener.set_online(false).await;
    sleep(Duration::from_millis(100)).await;
    sdk.set_onboarding_seen(true);
    sleep(Duration::from_millis(400)).await;
    println!("   status={}（变更已入待同步缓冲）\n", sdk.sync_status());

    // === 阶段 3：恢复联网，自动排空 ===
    println!("【阶段 3】恢复联网");
    listener.set_online(true).await;
    sleep(Duration::from_millis(200)).await;
    println!("   status={}（缓冲已送达远端）\n", sdk.sync_status());

    // === 阶段 4：升级为正式账号 ===
    println!("【阶段 4】注册正式账号，迁移匿名数据");
    let user_session = MemoryAuthProvider::user_session("demo@example.com");
    auth.set_session(Some(user_session.clone())).await;
    sdk.account_transitions()
        .handle_auth_event(AuthEvent::SignedIn, Some(user_session))
        .await;
    sleep(Duration::from_millis(300)).await;
    println!(
        "   mode={}, status={}, identity={}\n",
        sdk.cloud_mode(),
        sdk.sync_status(),
        sdk.identity().email.as_deref().unwrap_or("-")
    );

    println!("====================================");
    println!("🎉 演示结束");
    sdk.shutdown().await?;
    Ok(())
}
