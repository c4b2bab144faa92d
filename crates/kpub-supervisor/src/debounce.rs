use std::time::Duration;

use tokio::sync::mpsc;

/// Coalesces bursts of change notifications into single batches.
///
/// A batch opens on the first notification and closes once `window` passes
/// with no further notification.
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Waits for the next quiet batch and returns how many notifications it
    /// absorbed. `None` once every sender is gone and nothing is pending.
    pub async fn next_batch(&self, events: &mut mpsc::UnboundedReceiver<()>) -> Option<usize> {
        events.recv().await?;
        let mut absorbed = 1;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(()) => absorbed += 1,
                    None => return Some(absorbed),
                },
                _ = tokio::time::sleep(self.window) => return Some(absorbed),
            }
        }
    }
}
