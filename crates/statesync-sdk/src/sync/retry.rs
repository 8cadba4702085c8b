//! 重试调度器 - error 态的后台静默排空
//!
//! 只负责 error：offline 有专属的"转为在线"触发器，不归定时器管。
//! 中间失败不对外暴露，除了状态字段的更新没有任何别的可见效果。

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use super::engine::SyncEngine;

#[derive(Debug)]
pub struct RetryScheduler {
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RetryScheduler {
    /// 启动定时重试任务
    ///
    /// 初始延迟加了最多 10% 的随机抖动：多个上下文的定时器不要同相触发，
    /// 否则每个周期都会稳定地撞一次锁。
    pub fn start(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let jitter_ms = {
            let max_jitter = (interval.as_millis() as u64 / 10).max(1);
            rand::thread_rng().gen_range(0..max_jitter)
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.handle_retry_tick().await;
            }
        });

        info!(
            "⏲️ 重试调度器已启动: interval={}s, jitter={}ms",
            interval.as_secs(),
            jitter_ms
        );

        Self {
            handle: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// 停止调度（shutdown 时调用，幂等）
    pub fn stop(&self) {
        if let Some(task) = self.handle.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateSyncConfig;
    use crate::events::EventManager;
    use crate::network::{ManualNetworkListener, NetworkMonitor};
    use crate::services::memory::RemoteFailMode;
    use crate::services::{MemoryAuthProvider, MemoryRemoteStore, StaticSubscriptionService};
    use crate::session::{SessionBreadcrumbs, SessionResolver};
    use crate::storage::{
        DurableStateStore, KvStore, MemoryLockBackend, PendingChangeStore, SyncLock,
    };
    use crate::sync::SyncStatus;
    use tempfile::TempDir;

    async fn make_engine_in_error(
        remote: Arc<MemoryRemoteStore>,
    ) -> (TempDir, Arc<SyncEngine>, PendingChangeStore) {
        let temp = TempDir::new().unwrap();
        let config = Arc::new(StateSyncConfig::builder().push_debounce_ms(10).build());
        let kv = Arc::new(KvStore::open(temp.path()).await.unwrap());

        let auth = Arc::new(MemoryAuthProvider::new());
        auth.set_session(Some(MemoryAuthProvider::user_session("retry@example.com")))
            .await;
        let listener = Arc::new(ManualNetworkListener::new(true));
        let network = Arc::new(NetworkMonitor::new(listener));
        network.start().await.unwrap();

        let resolver = Arc::new(SessionResolver::new(
            auth,
            network.clone(),
            SessionBreadcrumbs::new(kv.clone()),
            config.clone(),
        ));
        let pending = PendingChangeStore::new(kv.clone());
        let engine = SyncEngine::new(
            config.clone(),
            DurableStateStore::new(kv.clone()),
            pending.clone(),
            SyncLock::new(Arc::new(MemoryLockBackend::new()), config.lock_timeout_ms),
            network,
            remote.clone(),
            Arc::new(StaticSubscriptionService::free()),
            resolver,
            EventManager::default(),
        );

        // 进入 error 态：推送撞上永久类失败
        engine.reconcile().await;
        remote.set_fail_mode(Some(RemoteFailMode::Status(400)));
        let marked = engine.snapshot().with_onboarding_seen(true);
        engine.push(marked).await;
        assert_eq!(engine.status(), SyncStatus::Error);

        (temp, engine, pending)
    }

    #[tokio::test]
    async fn test_scheduler_drains_error_state() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (_temp, engine, pending) = make_engine_in_error(remote.clone()).await;

        // 故障恢复，调度器应在首个 tick 排空缓冲
        remote.set_fail_mode(None);
        let scheduler = RetryScheduler::start(engine.clone(), Duration::from_secs(1));

        // 首个 tick 在抖动（≤100ms）后立即触发
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(engine.status(), SyncStatus::Ok);
        assert!(!pending.has());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (_temp, engine, _pending) = make_engine_in_error(remote).await;

        let scheduler = RetryScheduler::start(engine, Duration::from_secs(30));
        scheduler.stop();
        scheduler.stop();
    }
}
