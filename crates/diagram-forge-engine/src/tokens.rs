//! Token and word estimates for the instruction text.
//!
//! Purely informational: nothing in the generation path waits on it.

use std::sync::Arc;
use std::time::Duration;

use diagram_forge_core::wire::{TokenCount, TokenCountRequest};
use diagram_forge_core::CacheKey;
use diagram_forge_ops::DiagramBackend;

use crate::cache::{Completion, PendingRequest, RequestCache, RequestStatus};
use crate::debounce::Debouncer;

/// What the estimator produced while the engine waited on it.
#[derive(Debug)]
pub enum TokenEvent {
    /// The text settled and a lookup was started or answered from cache.
    Settled(PendingRequest<TokenCount>),
    /// A count arrived for the live text.
    Completed(Completion<TokenCount>),
}

/// Debounced, cached `/token_count` lookups keyed on (text, vendor).
pub struct TokenCountEstimator {
    timer: Debouncer<TokenCountRequest>,
    cache: RequestCache<TokenCount>,
    /// Last request that settled, for retries.
    last: Option<TokenCountRequest>,
    backend: Arc<dyn DiagramBackend>,
}

impl TokenCountEstimator {
    pub fn new(delay: Duration, backend: Arc<dyn DiagramBackend>) -> Self {
        Self {
            timer: Debouncer::new(delay),
            cache: RequestCache::new("token_count"),
            last: None,
            backend,
        }
    }

    /// Note new text or vendor; the lookup happens once it stops changing.
    pub fn schedule(&mut self, text: &str, vendor: &str) {
        let request = TokenCountRequest::new(text, vendor);
        self.cache.observe(&CacheKey::of(&request));
        self.timer.push(request);
    }

    /// Wait for the text to settle or a lookup to finish.
    pub async fn next_event(&mut self) -> TokenEvent {
        let settled = tokio::select! {
            request = self.timer.fired() => request,
            completion = self.cache.next_completion() => return TokenEvent::Completed(completion),
        };
        TokenEvent::Settled(self.lookup(settled))
    }

    /// Run the last settled lookup again, after errors were invalidated.
    ///
    /// Does nothing while newer text is still settling, or once the live
    /// text has moved past the last lookup.
    pub fn retry(&mut self) -> Option<PendingRequest<TokenCount>> {
        self.cache.invalidate_errors();
        if self.timer.is_armed() {
            return None;
        }
        let request = self.last.clone()?;
        if self.cache.live_key() != Some(&CacheKey::of(&request)) {
            return None;
        }
        Some(self.lookup(request))
    }

    /// Latest count for the live text.
    pub fn count(&self) -> Option<TokenCount> {
        self.cache.status().payload().copied()
    }

    pub fn status(&self) -> RequestStatus<TokenCount> {
        self.cache.status()
    }

    pub fn fetch_count(&self) -> u64 {
        self.cache.fetch_count()
    }

    pub fn reset(&mut self) {
        self.timer.cancel();
        self.cache.clear();
        self.last = None;
    }

    fn lookup(&mut self, request: TokenCountRequest) -> PendingRequest<TokenCount> {
        let key = CacheKey::of(&request);
        let required = request.is_complete();
        let backend = Arc::clone(&self.backend);
        self.last = Some(request.clone());

        self.cache.get(key, required, move || async move {
            backend.token_count(&request).await
        })
    }
}
