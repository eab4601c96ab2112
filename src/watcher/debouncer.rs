//! Per-path debouncing of file change events.
//!
//! Editors and copy tools touch a file several times while writing it. Each
//! event for a path cancels that path's pending timer and schedules a new one
//! on a shared [`DelayQueue`], so a burst collapses into a single [`Settled`]
//! signal once the path has been quiet for the configured delay.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

use super::event::{ChangeEvent, ChangeKind};

/// A path that has been quiet for the full debounce delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub path: PathBuf,
    /// Kind of the last event before the quiet period.
    pub last_kind: ChangeKind,
    /// Number of raw events collapsed into this signal.
    pub events: usize,
    /// When the last event was recorded.
    pub last_event_at: Instant,
}

impl Settled {
    /// A settle signal not produced by the timer, e.g. an initial load.
    pub fn now(path: PathBuf, last_kind: ChangeKind) -> Self {
        Self {
            path,
            last_kind,
            events: 0,
            last_event_at: Instant::now(),
        }
    }
}

/// Debounce state for one path with in-flight activity.
#[derive(Debug)]
struct PendingTimer {
    key: Key,
    last_seen: Instant,
    fire_at: Instant,
    last_kind: ChangeKind,
    events: usize,
}

/// Debounces change events by path.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    queue: DelayQueue<PathBuf>,
    pending: HashMap<PathBuf, PendingTimer>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            queue: DelayQueue::new(),
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a change, (re)starting the timer for its path.
    pub fn record(&mut self, event: ChangeEvent) {
        let now = Instant::now();
        let fire_at = now + self.delay;

        match self.pending.get_mut(&event.path) {
            Some(timer) => {
                self.queue.reset(&timer.key, self.delay);
                timer.last_seen = now;
                timer.fire_at = fire_at;
                timer.last_kind = event.kind;
                timer.events += 1;
                crate::debug_event!(
                    "debounce",
                    "rescheduled",
                    "{} ({} events)",
                    event.path.display(),
                    timer.events
                );
            }
            None => {
                let key = self.queue.insert(event.path.clone(), self.delay);
                crate::debug_event!("debounce", "scheduled", "{}", event.path.display());
                self.pending.insert(
                    event.path,
                    PendingTimer {
                        key,
                        last_seen: now,
                        fire_at,
                        last_kind: event.kind,
                        events: 1,
                    },
                );
            }
        }
    }

    /// Drop the pending timer for a path. Returns whether one existed.
    pub fn cancel(&mut self, path: &Path) -> bool {
        match self.pending.remove(path) {
            Some(timer) => {
                self.queue.remove(&timer.key);
                true
            }
            None => false,
        }
    }

    /// Drop every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.queue.clear();
        count
    }

    /// Check if there are any pending changes.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Scheduled fire time for a pending path.
    pub fn fire_at(&self, path: &Path) -> Option<Instant> {
        self.pending.get(path).map(|t| t.fire_at)
    }

    /// Pending path with the earliest fire time.
    pub fn next_due(&self) -> Option<&Path> {
        self.pending
            .iter()
            .min_by_key(|(_, timer)| timer.fire_at)
            .map(|(path, _)| path.as_path())
    }

    /// Poll for the next settled path.
    ///
    /// Returns `Ready(None)` when nothing is pending.
    pub fn poll_settled(&mut self, cx: &mut Context<'_>) -> Poll<Option<Settled>> {
        loop {
            let expired = match self.queue.poll_expired(cx) {
                Poll::Ready(Some(expired)) => expired,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            let path = expired.into_inner();
            // A cancelled entry can't expire, but stay tolerant
            let Some(timer) = self.pending.remove(&path) else {
                continue;
            };

            return Poll::Ready(Some(Settled {
                path,
                last_kind: timer.last_kind,
                events: timer.events,
                last_event_at: timer.last_seen,
            }));
        }
    }

    /// Wait for the next settled path. Returns `None` when nothing is pending.
    pub async fn next_settled(&mut self) -> Option<Settled> {
        std::future::poll_fn(|cx| self.poll_settled(cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn change(path: &str, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent::new(PathBuf::from(path), kind)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_basic() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let start = Instant::now();

        debouncer.record(change("/routes/bar.xml", ChangeKind::Created));
        assert!(debouncer.has_pending());

        let settled = debouncer.next_settled().await.unwrap();
        assert_eq!(settled.path, PathBuf::from("/routes/bar.xml"));
        assert_eq!(settled.events, 1);
        assert!(Instant::now() - start >= Duration::from_millis(50));
        assert!(!debouncer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_settle() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        debouncer.record(change("/routes/bar.xml", ChangeKind::Created));
        advance(Duration::from_millis(30)).await;
        debouncer.record(change("/routes/bar.xml", ChangeKind::Modified));
        advance(Duration::from_millis(30)).await;
        debouncer.record(change("/routes/bar.xml", ChangeKind::Modified));
        let last = Instant::now();

        let settled = debouncer.next_settled().await.unwrap();
        assert_eq!(settled.events, 3);
        assert_eq!(settled.last_kind, ChangeKind::Modified);
        assert_eq!(settled.last_event_at, last);
        // Strictly respects the delay from the last event
        assert!(Instant::now() - last >= Duration::from_millis(50));

        // Nothing else fires for that burst
        assert!(debouncer.next_settled().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_before_delay() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.record(change("/routes/bar.xml", ChangeKind::Modified));

        advance(Duration::from_millis(49)).await;
        let early = tokio::time::timeout(Duration::ZERO, debouncer.next_settled()).await;
        assert!(early.is_err());
        assert!(debouncer.is_pending(Path::new("/routes/bar.xml")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        debouncer.record(change("/routes/a.xml", ChangeKind::Created));
        advance(Duration::from_millis(30)).await;
        debouncer.record(change("/routes/b.xml", ChangeKind::Created));
        assert_eq!(debouncer.next_due(), Some(Path::new("/routes/a.xml")));

        let first = debouncer.next_settled().await.unwrap();
        assert_eq!(first.path, PathBuf::from("/routes/a.xml"));
        assert!(debouncer.is_pending(Path::new("/routes/b.xml")));

        let second = debouncer.next_settled().await.unwrap();
        assert_eq!(second.path, PathBuf::from("/routes/b.xml"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_is_last_kind() {
        let mut debouncer = Debouncer::new(Duration::from_millis(20));
        debouncer.record(change("/routes/a.xml", ChangeKind::Modified));
        debouncer.record(change("/routes/a.xml", ChangeKind::Deleted));

        let settled = debouncer.next_settled().await.unwrap();
        assert_eq!(settled.last_kind, ChangeKind::Deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.record(change("/routes/a.xml", ChangeKind::Created));
        debouncer.record(change("/routes/b.xml", ChangeKind::Created));

        assert!(debouncer.cancel(Path::new("/routes/a.xml")));
        assert!(!debouncer.cancel(Path::new("/routes/a.xml")));
        assert_eq!(debouncer.pending_count(), 1);

        assert_eq!(debouncer.cancel_all(), 1);
        assert!(!debouncer.has_pending());
        assert!(debouncer.next_settled().await.is_none());
    }
}
