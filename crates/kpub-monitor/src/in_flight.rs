use std::sync::Arc;

use tokio::sync::watch;

/// Counts file pipelines that have started but not finished.
#[derive(Debug, Clone)]
pub struct InFlightFiles {
    count: Arc<watch::Sender<usize>>,
}

impl Default for InFlightFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightFiles {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(0);
        Self {
            count: Arc::new(sender),
        }
    }

    /// Registers one task; it is released when the guard drops.
    pub fn begin(&self) -> InFlightGuard {
        self.count.send_modify(|count| *count += 1);
        InFlightGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut receiver = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
