//! Keyed, deduplicating request execution with staleness detection.
//!
//! A [`RequestCache`] tracks one *live* key: the key derived from the most
//! recent configuration. Requests run as spawned tasks and report back
//! through an internal channel; [`RequestCache::next_completion`] only
//! yields results that still belong to a tracked entry, so a response for a
//! key the configuration has moved away from is never observed.
//!
//! Each in-flight entry owns a [`CancellationToken`]. Moving the live key
//! away from a loading entry cancels the token, which aborts the fetch, and
//! forgets the entry. Late completions are recognised by their ticket and
//! discarded.

use std::collections::{HashMap, VecDeque};
use std::future::Future;

use diagram_forge_core::CacheKey;
use diagram_forge_ops::BackendError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finished results (successes and errors) kept per cache.
const FINISHED_CAPACITY: usize = 32;

/// Where a request stands.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus<P> {
    /// Inputs are incomplete; nothing was requested.
    Idle,
    Loading,
    Success(P),
    Error(BackendError),
}

impl<P> RequestStatus<P> {
    pub fn is_loading(&self) -> bool {
        matches!(self, RequestStatus::Loading)
    }

    pub fn payload(&self) -> Option<&P> {
        match self {
            RequestStatus::Success(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BackendError> {
        match self {
            RequestStatus::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Idle => "idle",
            RequestStatus::Loading => "loading",
            RequestStatus::Success(_) => "success",
            RequestStatus::Error(_) => "error",
        }
    }
}

/// A key and the state of its request.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest<P> {
    pub key: CacheKey,
    pub status: RequestStatus<P>,
}

/// A request that finished while its key was still tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<P> {
    pub key: CacheKey,
    pub result: Result<P, BackendError>,
}

#[derive(Debug)]
enum EntryState<P> {
    Loading(CancellationToken),
    Success(P),
    Error(BackendError),
}

#[derive(Debug)]
struct Entry<P> {
    ticket: u64,
    state: EntryState<P>,
}

/// Message sent by a finished fetch task.
#[derive(Debug)]
struct Finished<P> {
    key: CacheKey,
    ticket: u64,
    result: Result<P, BackendError>,
}

/// Deduplicating cache of backend requests keyed by [`CacheKey`].
#[derive(Debug)]
pub struct RequestCache<P> {
    name: &'static str,
    live: Option<CacheKey>,
    entries: HashMap<CacheKey, Entry<P>>,
    /// Keys of finished entries, oldest first.
    finished: VecDeque<CacheKey>,
    next_ticket: u64,
    fetches: u64,
    tx: mpsc::UnboundedSender<Finished<P>>,
    rx: mpsc::UnboundedReceiver<Finished<P>>,
}

impl<P> RequestCache<P>
where
    P: Clone + Send + 'static,
{
    /// Create an empty cache. `name` labels its log lines and errors.
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            live: None,
            entries: HashMap::new(),
            finished: VecDeque::new(),
            next_ticket: 0,
            fetches: 0,
            tx,
            rx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Key of the current configuration, if one was observed.
    pub fn live_key(&self) -> Option<&CacheKey> {
        self.live.as_ref()
    }

    /// Number of fetches started since creation.
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    /// Make `key` the live key without requesting anything.
    ///
    /// A request still loading for the previous key is cancelled and
    /// forgotten.
    pub fn observe(&mut self, key: &CacheKey) {
        if self.live.as_ref() == Some(key) {
            return;
        }
        if let Some(previous) = self.live.replace(key.clone()) {
            self.abandon(&previous);
        }
    }

    /// Return the state for `key`, starting `fetcher` only when needed.
    ///
    /// - `required == false`: returns [`RequestStatus::Idle`] without fetching.
    /// - `key` loading or successful: returns that state without fetching.
    /// - `key` errored: returns the error; see [`invalidate_errors`].
    ///
    /// [`invalidate_errors`]: Self::invalidate_errors
    pub fn get<F, Fut>(&mut self, key: CacheKey, required: bool, fetcher: F) -> PendingRequest<P>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P, BackendError>> + Send + 'static,
    {
        self.observe(&key);

        if !required {
            debug!(cache = self.name, key = %key, "Inputs incomplete, staying idle");
            return PendingRequest {
                key,
                status: RequestStatus::Idle,
            };
        }

        if let Some(entry) = self.entries.get(&key) {
            debug!(cache = self.name, key = %key, "Cache hit");
            let status = status_of(&entry.state);
            if !status.is_loading() {
                self.touch(&key);
            }
            return PendingRequest { key, status };
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.fetches += 1;

        let token = CancellationToken::new();
        let child = token.clone();
        let tx = self.tx.clone();
        let task_key = key.clone();
        let name = self.name;
        let fetch = fetcher();

        info!(cache = name, key = %key, ticket, "Issuing request");
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = child.cancelled() => Err(BackendError::cancelled(name)),
                result = fetch => result,
            };
            // The receiver only disappears with the cache itself.
            let _ = tx.send(Finished {
                key: task_key,
                ticket,
                result,
            });
        });

        self.entries.insert(
            key.clone(),
            Entry {
                ticket,
                state: EntryState::Loading(token),
            },
        );
        PendingRequest {
            key,
            status: RequestStatus::Loading,
        }
    }

    /// State of the live key.
    pub fn status(&self) -> RequestStatus<P> {
        self.live
            .as_ref()
            .and_then(|key| self.entries.get(key))
            .map(|entry| status_of(&entry.state))
            .unwrap_or(RequestStatus::Idle)
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Loading(_)))
            .count()
    }

    /// Number of entries currently held, in any state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait for the next request that finishes while still tracked.
    ///
    /// Stale results are dropped here and never returned. Cancel-safe.
    pub async fn next_completion(&mut self) -> Completion<P> {
        loop {
            let Some(finished) = self.rx.recv().await else {
                // Unreachable while `self.tx` is alive.
                std::future::pending::<()>().await;
                continue;
            };

            let tracked = self.entries.get(&finished.key).is_some_and(|entry| {
                entry.ticket == finished.ticket && matches!(entry.state, EntryState::Loading(_))
            });
            if !tracked {
                debug!(
                    cache = self.name,
                    key = %finished.key,
                    ticket = finished.ticket,
                    "Discarding stale response"
                );
                continue;
            }

            let state = match &finished.result {
                Ok(payload) => {
                    info!(cache = self.name, key = %finished.key, "Request succeeded");
                    EntryState::Success(payload.clone())
                }
                Err(err) => {
                    warn!(cache = self.name, key = %finished.key, error = %err, "Request failed");
                    EntryState::Error(err.clone())
                }
            };
            if let Some(entry) = self.entries.get_mut(&finished.key) {
                entry.state = state;
            }
            self.remember(&finished.key);

            return Completion {
                key: finished.key,
                result: finished.result,
            };
        }
    }

    /// Forget every errored entry so the next `get` fetches again.
    pub fn invalidate_errors(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !matches!(entry.state, EntryState::Error(_)));
        let entries = &self.entries;
        self.finished.retain(|key| entries.contains_key(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, "Invalidated errors");
        }
        removed
    }

    /// Cancel everything and forget all entries and the live key.
    pub fn clear(&mut self) {
        for entry in self.entries.values() {
            if let EntryState::Loading(token) = &entry.state {
                token.cancel();
            }
        }
        self.entries.clear();
        self.finished.clear();
        self.live = None;
    }

    /// Cancel and drop `key` if it is still loading.
    fn abandon(&mut self, key: &CacheKey) {
        let loading = self
            .entries
            .get(key)
            .is_some_and(|entry| matches!(entry.state, EntryState::Loading(_)));
        if !loading {
            return;
        }
        if let Some(Entry {
            state: EntryState::Loading(token),
            ticket,
        }) = self.entries.remove(key)
        {
            debug!(cache = self.name, key = %key, ticket, "Live key moved on, cancelling request");
            token.cancel();
        }
    }

    /// Move a finished key to the back of the eviction queue.
    fn touch(&mut self, key: &CacheKey) {
        if let Some(position) = self.finished.iter().position(|k| k == key) {
            if let Some(key) = self.finished.remove(position) {
                self.finished.push_back(key);
            }
        }
    }

    /// Queue a finished key and evict the oldest ones beyond capacity.
    ///
    /// The live key is never evicted; it goes back to the end of the queue.
    fn remember(&mut self, key: &CacheKey) {
        self.finished.retain(|k| k != key);
        self.finished.push_back(key.clone());
        while self.finished.len() > FINISHED_CAPACITY {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            if self.live.as_ref() == Some(&oldest) {
                self.finished.push_back(oldest);
                continue;
            }
            debug!(cache = self.name, key = %oldest, "Evicting finished entry");
            self.entries.remove(&oldest);
        }
    }
}

fn status_of<P: Clone>(state: &EntryState<P>) -> RequestStatus<P> {
    match state {
        EntryState::Loading(_) => RequestStatus::Loading,
        EntryState::Success(payload) => RequestStatus::Success(payload.clone()),
        EntryState::Error(err) => RequestStatus::Error(err.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn key(text: &str) -> CacheKey {
        CacheKey::raw(text)
    }

    /// Fetcher answering `value` after `delay`, counting invocations.
    fn fetcher(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
        delay: Duration,
    ) -> impl FnOnce() -> std::pin::Pin<
        Box<dyn Future<Output = Result<String, BackendError>> + Send>,
    > {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(value.to_string())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_inputs_stay_idle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = RequestCache::new("test");

        let pending = cache.get(key("k"), false, fetcher(&calls, "v", Duration::ZERO));
        assert_eq!(pending.status, RequestStatus::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.live_key(), Some(&key("k")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_keys_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = RequestCache::new("test");
        let delay = Duration::from_millis(100);

        assert!(cache.get(key("k"), true, fetcher(&calls, "v", delay)).status.is_loading());
        assert!(cache.get(key("k"), true, fetcher(&calls, "v", delay)).status.is_loading());

        let done = cache.next_completion().await;
        assert_eq!(done.result, Ok("v".to_string()));

        let hit = cache.get(key("k"), true, fetcher(&calls, "v", delay));
        assert_eq!(hit.status, RequestStatus::Success("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_request_is_cancelled_and_discarded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = RequestCache::new("test");

        cache.get(key("k1"), true, fetcher(&calls, "slow", Duration::from_secs(5)));
        cache.get(key("k2"), true, fetcher(&calls, "fast", Duration::from_millis(10)));
        assert_eq!(cache.in_flight(), 1);

        let done = cache.next_completion().await;
        assert_eq!(done.key, key("k2"));
        assert_eq!(done.result, Ok("fast".to_string()));

        // The cancelled k1 task reports back, but it must never surface.
        let late = tokio::time::timeout(Duration::from_secs(10), cache.next_completion()).await;
        assert!(late.is_err());
        assert_eq!(cache.status(), RequestStatus::Success("fast".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_ignoring_cancellation_is_still_discarded() {
        let mut cache: RequestCache<String> = RequestCache::new("test");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        // Fetch that finishes on its own schedule, racing the token.
        cache.get(key("k1"), true, move || async move {
            let _ = release_rx.await;
            Ok("old".to_string())
        });
        cache.observe(&key("k2"));
        let _ = release_tx.send(());

        let late = tokio::time::timeout(Duration::from_secs(1), cache.next_completion()).await;
        assert!(late.is_err());
        assert_eq!(cache.status(), RequestStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_cached_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache: RequestCache<String> = RequestCache::new("test");

        let counter = Arc::clone(&calls);
        let failing = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::from_status("/x", 500, "boom")) }
        };
        cache.get(key("k"), true, failing.clone());
        let done = cache.next_completion().await;
        assert!(done.result.is_err());

        let again = cache.get(key("k"), true, failing.clone());
        assert!(matches!(again.status, RequestStatus::Error(BackendError::Server { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.invalidate_errors(), 1);
        assert!(cache.get(key("k"), true, failing).status.is_loading());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returning_to_cached_key_is_a_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = RequestCache::new("test");

        cache.get(key("a"), true, fetcher(&calls, "A", Duration::ZERO));
        cache.next_completion().await;
        cache.get(key("b"), true, fetcher(&calls, "B", Duration::ZERO));
        cache.next_completion().await;

        let back = cache.get(key("a"), true, fetcher(&calls, "A", Duration::ZERO));
        assert_eq!(back.status, RequestStatus::Success("A".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_forgets_everything() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = RequestCache::new("test");

        cache.get(key("a"), true, fetcher(&calls, "A", Duration::from_secs(1)));
        cache.clear();
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.live_key(), None);
        assert_eq!(cache.status(), RequestStatus::Idle);

        let late = tokio::time::timeout(Duration::from_secs(5), cache.next_completion()).await;
        assert!(late.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_keys_are_bounded() {
        let mut cache: RequestCache<String> = RequestCache::new("test");

        for i in 0..100 {
            cache.get(key(&format!("k{i}")), true, || async {
                Err(BackendError::from_status("/x", 503, "down"))
            });
            let done = cache.next_completion().await;
            assert!(done.result.is_err());
        }

        assert!(cache.len() <= FINISHED_CAPACITY);
        assert!(cache.status().error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recently_hit_key_outlives_older_ones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = RequestCache::new("test");

        cache.get(key("a"), true, fetcher(&calls, "A", Duration::ZERO));
        cache.next_completion().await;
        for i in 0..FINISHED_CAPACITY - 1 {
            cache.get(key(&format!("o{i}")), true, fetcher(&calls, "O", Duration::ZERO));
            cache.next_completion().await;
        }
        assert_eq!(cache.len(), FINISHED_CAPACITY);

        // Hitting "a" makes "o0" the oldest entry.
        assert!(cache.get(key("a"), true, fetcher(&calls, "A", Duration::ZERO)).status.payload().is_some());
        for name in ["n0", "n1"] {
            cache.get(key(name), true, fetcher(&calls, "N", Duration::ZERO));
            cache.next_completion().await;
        }
        assert_eq!(cache.len(), FINISHED_CAPACITY);

        let before = calls.load(Ordering::SeqCst);
        let hit = cache.get(key("a"), true, fetcher(&calls, "A", Duration::ZERO));
        assert_eq!(hit.status, RequestStatus::Success("A".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), before);

        assert!(cache.get(key("o0"), true, fetcher(&calls, "O", Duration::ZERO)).status.is_loading());
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    }
}
