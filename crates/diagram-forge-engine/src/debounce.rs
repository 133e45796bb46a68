//! Trailing-edge debouncing.
//!
//! A [`Debouncer`] holds at most one pending value. Every [`push`] replaces
//! the value and restarts the quiet period; [`fired`] resolves once the
//! period elapses with no further pushes. Nothing is ever emitted twice.
//!
//! [`push`]: Debouncer::push
//! [`fired`]: Debouncer::fired

use std::future;
use std::time::Duration;

use diagram_forge_core::{Configuration, Snapshot};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Cancellable, resettable timer carrying the latest value.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending value and restart the quiet period.
    pub fn push(&mut self, value: T) {
        self.pending = Some((Instant::now() + self.delay, value));
    }

    /// Drop the pending value without emitting it.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(_, value)| value)
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending value will be emitted.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(deadline, _)| *deadline)
    }

    /// Wait for the quiet period to elapse and take the value.
    ///
    /// Pending forever while disarmed. Cancel-safe: dropping the future
    /// before it completes leaves the value in place.
    pub async fn fired(&mut self) -> T {
        loop {
            match self.deadline() {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
            if let Some((_, value)) = self.pending.take() {
                return value;
            }
        }
    }
}

/// Turns a continuously edited configuration into settled [`Snapshot`]s.
#[derive(Debug)]
pub struct DebouncedSnapshotter {
    timer: Debouncer<Configuration>,
    revision: u64,
}

impl DebouncedSnapshotter {
    pub fn new(delay: Duration) -> Self {
        Self {
            timer: Debouncer::new(delay),
            revision: 0,
        }
    }

    /// Record an edit. The configuration is copied, so later edits never
    /// reach a snapshot that was already taken.
    pub fn push(&mut self, config: &Configuration) {
        self.timer.push(config.clone());
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Revision of the most recently emitted snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Wait for the next settled snapshot.
    pub async fn settled(&mut self) -> Snapshot {
        let configuration = self.timer.fired().await;
        self.take_snapshot(configuration)
    }

    /// Emit the pending edit immediately, if any.
    pub fn flush(&mut self) -> Option<Snapshot> {
        let configuration = self.timer.cancel()?;
        Some(self.take_snapshot(configuration))
    }

    fn take_snapshot(&mut self, configuration: Configuration) -> Snapshot {
        self.revision += 1;
        debug!(revision = self.revision, "Configuration settled");
        Snapshot::new(self.revision, configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rapid_pushes_collapse_to_last_value() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let start = Instant::now();

        for i in 0..10 {
            debouncer.push(i);
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        assert_eq!(debouncer.fired().await, 9);
        // Last push at 900ms, fired 500ms later
        assert_eq!(start.elapsed(), Duration::from_millis(1400));
        assert!(!debouncer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_debouncer_never_fires() {
        let mut debouncer: Debouncer<u8> = Debouncer::new(Duration::from_millis(50));
        let outcome = tokio::time::timeout(Duration::from_secs(10), debouncer.fired()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_value() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.push("a");
        assert_eq!(debouncer.cancel(), Some("a"));

        let outcome = tokio::time::timeout(Duration::from_secs(1), debouncer.fired()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_keeps_value() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        debouncer.push(1);

        let early = tokio::time::timeout(Duration::from_millis(100), debouncer.fired()).await;
        assert!(early.is_err());
        assert!(debouncer.is_armed());
        assert_eq!(debouncer.fired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_are_copies_with_increasing_revisions() {
        let mut snapshotter = DebouncedSnapshotter::new(Duration::from_millis(500));
        let mut config = Configuration::default();

        config.source_folder = "first".into();
        snapshotter.push(&config);
        config.source_folder = "second".into();
        snapshotter.push(&config);

        let snapshot = snapshotter.settled().await;
        config.source_folder = "third".into();

        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.configuration.source_folder, "second");

        snapshotter.push(&config);
        let flushed = snapshotter.flush().unwrap();
        assert_eq!(flushed.revision, 2);
        assert_eq!(flushed.configuration.source_folder, "third");
        assert!(snapshotter.flush().is_none());
    }
}
