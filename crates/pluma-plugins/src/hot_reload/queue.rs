//! Trailing-edge debounce in front of the watcher's work queue

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Coalesces bursts of changes per path into a single queued item.
///
/// A path is "pending" from its first event until the consumer takes it.
/// Further events while pending only refresh its last-seen time, so a path is
/// processed once the debounce window has passed since its *latest* event.
pub(crate) struct DebounceQueue {
    delay: Duration,
    /// Last-seen time of every pending path
    pending: Mutex<HashMap<PathBuf, Instant>>,
    tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
}

impl DebounceQueue {
    pub(crate) fn new(
        delay: Duration,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Arc::new(Self {
            delay,
            pending: Mutex::new(HashMap::new()),
            tx,
            cancel,
        });
        (queue, rx)
    }

    /// Record a change to `path`.
    ///
    /// Returns `true` when this event started a new pending entry.
    pub(crate) fn schedule(self: &Arc<Self>, path: PathBuf) -> bool {
        self.insert_pending(path, Instant::now(), self.delay)
    }

    /// Queue `path` without waiting out the debounce window.
    ///
    /// Used for files found by a directory scan, which are already settled.
    pub(crate) fn schedule_now(self: &Arc<Self>, path: PathBuf) -> bool {
        let now = Instant::now();
        let seen = now.checked_sub(self.delay).unwrap_or(now);
        self.insert_pending(path, seen, Duration::ZERO)
    }

    fn insert_pending(self: &Arc<Self>, path: PathBuf, seen: Instant, wait: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        {
            let mut pending = self.pending.lock();
            if let Some(last_seen) = pending.get_mut(&path) {
                *last_seen = (*last_seen).max(seen);
                trace!(path = ?path, "Debounced change");
                return false;
            }
            pending.insert(path.clone(), seen);
        }

        self.enqueue_after(path, wait);
        true
    }

    /// Called by the consumer for every dequeued path.
    ///
    /// Returns `None` when the path is ready to process (and clears it from
    /// the pending set), or the remaining wait when a newer event arrived
    /// after it was queued.
    pub(crate) fn take(&self, path: &Path) -> Option<Duration> {
        let mut pending = self.pending.lock();
        let elapsed = pending.get(path)?.elapsed();
        if elapsed < self.delay {
            return Some(self.delay - elapsed);
        }
        pending.remove(path);
        None
    }

    /// Re-queue a path returned by [`take`](Self::take) after `wait`.
    pub(crate) fn defer(self: &Arc<Self>, path: PathBuf, wait: Duration) {
        debug!(path = ?path, wait_ms = wait.as_millis() as u64, "Deferring settling change");
        self.enqueue_after(path, wait);
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, path: &Path) -> bool {
        self.pending.lock().contains_key(path)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn enqueue_after(self: &Arc<Self>, path: PathBuf, wait: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            tokio::select! {
                _ = queue.cancel.cancelled() => {}
                sent = queue.tx.send(path) => {
                    if let Err(e) = sent {
                        debug!(path = ?e.0, "Work queue closed, dropping change");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_collapses_to_one_item() {
        let cancel = CancellationToken::new();
        let (queue, mut rx) = DebounceQueue::new(Duration::from_millis(50), 16, cancel.clone());
        let path = PathBuf::from("/plugins/note.so");

        assert!(queue.schedule(path.clone()));
        assert!(!queue.schedule(path.clone()));
        assert!(!queue.schedule(path.clone()));
        assert_eq!(queue.pending_len(), 1);

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, path);

        // Ready or still settling; either way it is processed exactly once.
        if let Some(wait) = queue.take(&path) {
            queue.defer(path.clone(), wait);
            let again = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(again, path);
            assert_eq!(queue.take(&path), None);
        }
        assert!(!queue.is_pending(&path));

        let extra = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(extra.is_err(), "no second item expected");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_schedule_now_is_immediately_ready() {
        let cancel = CancellationToken::new();
        let (queue, mut rx) = DebounceQueue::new(Duration::from_secs(60), 16, cancel.clone());
        let path = PathBuf::from("/plugins/chat.so");

        assert!(queue.schedule_now(path.clone()));
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, path);
        assert_eq!(queue.take(&path), None);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_queue_drops_changes() {
        let cancel = CancellationToken::new();
        let (queue, mut rx) = DebounceQueue::new(Duration::from_millis(20), 16, cancel.clone());

        assert!(queue.schedule(PathBuf::from("/plugins/a.so")));
        cancel.cancel();
        assert!(!queue.schedule(PathBuf::from("/plugins/b.so")));

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(received, Ok(Some(_))));
    }
}
