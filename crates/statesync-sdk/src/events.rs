//! 事件系统 - SDK 对外的观察通道
//!
//! UI 层通过订阅事件感知状态变化，而不是轮询字段。
//! 事件只是通知，不携带契约义务：没有订阅者时直接丢弃。

use tokio::sync::broadcast;
use tracing::debug;

use crate::sync::{CloudMode, SyncStatus};

/// SDK 事件类型
#[derive(Debug, Clone)]
pub enum SDKEvent {
    /// 同步状态变更
    SyncStatusChanged { old: SyncStatus, new: SyncStatus },
    /// 运行模式变更
    CloudModeChanged { old: CloudMode, new: CloudMode },
    /// 内存快照被整体替换（云端拉取或登出重置）
    SnapshotReplaced { updated_at: i64 },
    /// 本地字段变更（防抖推送的源头）
    SnapshotMutated { updated_at: i64 },
    /// 身份变更（digest 为脱敏摘要）
    IdentityChanged { digest: String, anonymous: bool },
    /// 会话过期标记变更（UI 恢复提示用）
    SessionExpiredChanged { expired: bool },
    /// 强制登出（待验证会话超龄等），宿主应重新加载
    ForcedSignOut { reason: String },
}

/// 事件管理器
#[derive(Debug, Clone)]
pub struct EventManager {
    sender: broadcast::Sender<SDKEvent>,
}

impl EventManager {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// 广播一个事件（无订阅者时静默丢弃）
    pub fn emit(&self, event: SDKEvent) {
        debug!("📢 SDK 事件: {:?}", event);
        let _ = self.sender.send(event);
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_emitted_events() {
        let manager = EventManager::default();
        let mut rx = manager.subscribe();

        manager.emit(SDKEvent::SessionExpiredChanged { expired: true });

        match rx.recv().await.unwrap() {
            SDKEvent::SessionExpiredChanged { expired } => assert!(expired),
            other => panic!("意外事件: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let manager = EventManager::default();
        manager.emit(SDKEvent::ForcedSignOut {
            reason: "test".to_string(),
        });
    }
}
