//! 防抖定时器 - cancel-and-reschedule 语义
//!
//! 每次 schedule 都会取消上一次尚未触发的任务并重新计时；
//! 只有静默满一个窗口，动作才真正执行。

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            handle: parking_lot::Mutex::new(None),
        }
    }

    /// 调度一次动作；若已有未触发的调度则先取消再重新计时
    pub fn schedule<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        });

        let mut slot = self.handle.lock();
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// 取消未触发的调度（shutdown 时调用）
    pub fn cancel(&self) {
        if let Some(task) = self.handle.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reschedule_cancels_previous() {
        let counter = Arc::new(AtomicU32::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(30));

        for _ in 0..5 {
            let counter = counter.clone();
            debouncer.schedule(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        // 连续五次调度只有最后一次触发
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let counter = Arc::new(AtomicU32::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(20));

        {
            let counter = counter.clone();
            debouncer.schedule(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fires_after_quiet_window() {
        let counter = Arc::new(AtomicU32::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(10));

        let c = counter.clone();
        debouncer.schedule(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
