/// Single-slot cancellable delayed task
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Holds at most one scheduled task. Scheduling again aborts whatever was
/// pending, so only the most recent schedule can ever run; dropping the slot
/// aborts it too.
#[derive(Debug, Default)]
pub struct DelayedTask {
    handle: Option<JoinHandle<()>>,
}

impl DelayedTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any pending schedule. A zero delay
    /// starts the task right away.
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            task.await;
        }));
    }

    /// Abort the pending task. Returns true if one was still running.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_only_last_schedule_runs() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut slot = DelayedTask::new();

        let mut last = 0;
        for (i, at) in [0u64, 100, 200, 490].into_iter().enumerate() {
            tokio::time::advance(Duration::from_millis(at - last)).await;
            last = at;
            let f = fired.clone();
            slot.schedule(Duration::from_millis(500), async move {
                f.lock().unwrap().push(i);
            });
        }

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*fired.lock().unwrap(), vec![3]);
        assert!(!slot.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_abort() {
        let hits = Arc::new(AtomicUsize::new(0));

        let mut slot = DelayedTask::new();
        let h = hits.clone();
        slot.schedule(Duration::from_secs(3), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.is_pending());
        assert!(slot.cancel());
        assert!(!slot.cancel());

        let h = hits.clone();
        slot.schedule(Duration::from_secs(3), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        drop(slot);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
