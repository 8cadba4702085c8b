//! 网络状态监控
//!
//! 同步引擎把每一次"转为在线"当作排空待同步缓冲的触发器，
//! 把每一次"转为离线"当作立即快照入缓冲的触发器。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 网络受限
    Limited,
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: u64,
}

impl NetworkStatusEvent {
    /// 本次变化是否是"转为在线"
    pub fn went_online(&self) -> bool {
        !reachable(&self.old_status) && reachable(&self.new_status)
    }

    /// 本次变化是否是"转为离线"
    pub fn went_offline(&self) -> bool {
        reachable(&self.old_status) && !reachable(&self.new_status)
    }
}

fn reachable(status: &NetworkStatus) -> bool {
    matches!(status, NetworkStatus::Online | NetworkStatus::Limited)
}

/// 网络状态监听器 trait（由平台层实现，如 Android/iOS/浏览器壳）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 网络监控管理器
#[derive(Debug)]
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<tokio::sync::RwLock<NetworkStatus>>,
}

impl NetworkMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        let (status_sender, _) = broadcast::channel(100);

        Self {
            listener,
            status_sender,
            current_status: Arc::new(tokio::sync::RwLock::new(NetworkStatus::Offline)),
        }
    }

    /// 启动网络监控
    pub async fn start(&self) -> Result<()> {
        // 先取一次当前状态作为初值，避免启动窗口内误判离线
        let initial = self.listener.get_current_status().await;
        {
            let mut status = self.current_status.write().await;
            *status = initial;
        }

        let mut receiver = self.listener.start_monitoring().await?;
        let status_sender = self.status_sender.clone();
        let current_status = self.current_status.clone();

        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                {
                    let mut status = current_status.write().await;
                    *status = event.new_status.clone();
                }
                let _ = status_sender.send(event);
            }
        });

        Ok(())
    }

    /// 获取当前网络状态
    pub async fn get_status(&self) -> NetworkStatus {
        self.current_status.read().await.clone()
    }

    /// 手动设置网络状态（探测成功/失败后更新）
    pub async fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write().await;
            let old = status.clone();
            *status = new_status.clone();
            old
        };

        if old_status == new_status {
            return;
        }

        let event = NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let _ = self.status_sender.send(event);
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }

    /// 当前是否可达
    pub async fn check_connection(&self) -> bool {
        reachable(&self.get_status().await)
    }
}

/// 手动控制的网络监听器
///
/// 没有平台探测能力的环境（单测、demo、headless 宿主）用它，
/// 由宿主代码显式调用 `set_online` 驱动状态。
#[derive(Debug)]
pub struct ManualNetworkListener {
    status: Arc<tokio::sync::RwLock<NetworkStatus>>,
    sender: broadcast::Sender<NetworkStatusEvent>,
}

impl ManualNetworkListener {
    pub fn new(initial_online: bool) -> Self {
        let (sender, _) = broadcast::channel(16);
        let initial = if initial_online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        Self {
            status: Arc::new(tokio::sync::RwLock::new(initial)),
            sender,
        }
    }

    /// 切换在线/离线并广播变化
    pub async fn set_online(&self, online: bool) {
        let new_status = if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        let old_status = {
            let mut status = self.status.write().await;
            let old = status.clone();
            *status = new_status.clone();
            old
        };
        if old_status == new_status {
            return;
        }
        let _ = self.sender.send(NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        });
    }
}

#[async_trait]
impl NetworkStatusListener for ManualNetworkListener {
    async fn get_current_status(&self) -> NetworkStatus {
        self.status.read().await.clone()
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
        Ok(self.sender.subscribe())
    }

    async fn stop_monitoring(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_tracks_listener_transitions() {
        let listener = Arc::new(ManualNetworkListener::new(true));
        let monitor = NetworkMonitor::new(listener.clone());
        monitor.start().await.unwrap();

        assert!(monitor.check_connection().await);

        let mut rx = monitor.subscribe();
        listener.set_online(false).await;

        let event = rx.recv().await.unwrap();
        assert!(event.went_offline());
        assert!(!monitor.check_connection().await);
    }

    #[tokio::test]
    async fn test_limited_counts_as_reachable() {
        let listener = Arc::new(ManualNetworkListener::new(false));
        let monitor = NetworkMonitor::new(listener);
        monitor.start().await.unwrap();

        monitor.set_status(NetworkStatus::Limited).await;
        assert!(monitor.check_connection().await);
    }

    #[tokio::test]
    async fn test_set_status_deduplicates() {
        let listener = Arc::new(ManualNetworkListener::new(true));
        let monitor = NetworkMonitor::new(listener);
        monitor.start().await.unwrap();

        let mut rx = monitor.subscribe();
        monitor.set_status(NetworkStatus::Online).await; // 无变化，不广播
        monitor.set_status(NetworkStatus::Offline).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.new_status, NetworkStatus::Offline);
        assert!(rx.try_recv().is_err());
    }
}
