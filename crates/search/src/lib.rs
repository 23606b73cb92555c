//! Search orchestration for duplicate detection while a form is typed.
//!
//! `DuplicateSearch` gates, debounces and deduplicates search requests,
//! keeps at most one search alive at a time, and publishes the current
//! state for UI consumers. Requests return immediately; results arrive
//! through the state channel and callbacks.

use runna_backend_http::{BackendError, MatchingProvider};
use runna_explain::{classify, highest_tier, MEDIA_THRESHOLD};
use runna_model::{AlertTier, MatchResult, PartialIdentity};
use runna_query::{
    check_justification, fingerprint, should_search, QueryError, SearchKind,
    DEFAULT_MIN_JUSTIFICATION_LENGTH,
};
use runna_rerank::sort_by_score;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Quiet period before a name-based search runs
    pub debounce_ms: u64,
    /// Minimum score for a result to be reported
    pub threshold: f64,
    /// Minimum justification length for overriding an alert
    pub min_justification_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            threshold: MEDIA_THRESHOLD,
            min_justification_length: DEFAULT_MIN_JUSTIFICATION_LENGTH,
        }
    }
}

impl SearchConfig {
    /// Load overrides from `RUNNA_DEBOUNCE_MS`, `RUNNA_DUPLICATE_THRESHOLD`
    /// and `RUNNA_MIN_JUSTIFICATION`.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            debounce_ms: var("RUNNA_DEBOUNCE_MS").unwrap_or(defaults.debounce_ms),
            threshold: var::<f64>("RUNNA_DUPLICATE_THRESHOLD")
                .map(|t| t.clamp(0.0, 1.0))
                .unwrap_or(defaults.threshold),
            min_justification_length: var("RUNNA_MIN_JUSTIFICATION")
                .unwrap_or(defaults.min_justification_length),
        }
    }
}

/// Lifecycle of the current search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStatus {
    #[default]
    Idle,
    /// Waiting for the debounce window to elapse
    Scheduled,
    /// Provider call in flight
    Searching,
    Succeeded,
    Failed,
    Cancelled,
}

/// Why a request did not start a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither a valid DNI nor both names
    InsufficientInput,
    /// Same fingerprint as the last search
    DuplicateQuery,
    /// Called outside a tokio runtime
    NoRuntime,
}

/// Immediate result of `request_search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Skipped(SkipReason),
    /// Debounced search scheduled
    Scheduled,
    /// Search started without debounce
    Started,
}

/// Snapshot published to UI consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub status: SearchStatus,
    pub is_searching: bool,
    /// Results at or above the threshold, best first
    pub results: Vec<MatchResult>,
    pub has_results: bool,
    /// User-displayable message of the last failure
    pub error: Option<String>,
}

impl SearchState {
    /// Each result paired with its alert tier.
    pub fn alerts(&self) -> Vec<(&MatchResult, AlertTier)> {
        self.results.iter().map(|r| (r, classify(r.score))).collect()
    }

    /// Most urgent tier among the current results.
    pub fn highest_alert(&self) -> AlertTier {
        highest_tier(&self.results)
    }

    fn set_status(&mut self, status: SearchStatus) {
        self.status = status;
        self.is_searching = status == SearchStatus::Searching;
    }
}

type DuplicatesCallback = Arc<dyn Fn(&[MatchResult]) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Request-shaping state owned by one orchestrator.
#[derive(Default)]
struct SearchSession {
    last_fingerprint: Option<String>,
    /// Token of the pending or in-flight search
    pending: Option<CancellationToken>,
    /// Incremented for every started search; stale tasks compare against it
    generation: u64,
}

impl SearchSession {
    fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn is_current(&self, generation: u64, token: &CancellationToken) -> bool {
        self.generation == generation && !token.is_cancelled()
    }
}

struct Inner<P> {
    provider: P,
    config: SearchConfig,
    session: Mutex<SearchSession>,
    state: watch::Sender<SearchState>,
    on_duplicates_found: Option<DuplicatesCallback>,
    on_error: Option<ErrorCallback>,
}

/// Builder for `DuplicateSearch`.
pub struct DuplicateSearchBuilder<P> {
    provider: P,
    config: SearchConfig,
    on_duplicates_found: Option<DuplicatesCallback>,
    on_error: Option<ErrorCallback>,
}

impl<P: MatchingProvider> DuplicateSearchBuilder<P> {
    pub fn config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Called with the filtered results whenever a search finds duplicates.
    pub fn on_duplicates_found(
        mut self,
        callback: impl Fn(&[MatchResult]) + Send + Sync + 'static,
    ) -> Self {
        self.on_duplicates_found = Some(Arc::new(callback));
        self
    }

    /// Called with a user-displayable message when the provider fails.
    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> DuplicateSearch<P> {
        let (state, _) = watch::channel(SearchState::default());
        DuplicateSearch {
            inner: Arc::new(Inner {
                provider: self.provider,
                config: self.config,
                session: Mutex::new(SearchSession::default()),
                state,
                on_duplicates_found: self.on_duplicates_found,
                on_error: self.on_error,
            }),
        }
    }
}

/// Debounced, cancellable duplicate search against a matching provider.
///
/// At most one search is alive at a time; a newer request always
/// supersedes the previous one. Dropping the orchestrator clears it.
pub struct DuplicateSearch<P: MatchingProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: MatchingProvider> DuplicateSearch<P> {
    /// Create an orchestrator with default configuration and no callbacks.
    pub fn new(provider: P) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: P) -> DuplicateSearchBuilder<P> {
        DuplicateSearchBuilder {
            provider,
            config: SearchConfig::default(),
            on_duplicates_found: None,
            on_error: None,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.inner.config
    }

    /// Request a search for the current form snapshot.
    ///
    /// Never blocks and never fails: insufficient or repeated input is
    /// reported as `Skipped` and leaves any pending search untouched.
    /// Must be called from within a tokio runtime.
    pub fn request_search(&self, partial: PartialIdentity) -> SearchOutcome {
        let kind = match should_search(&partial) {
            Ok(kind) => kind,
            Err(_) => {
                tracing::trace!("Skipping duplicate search: insufficient input");
                return SearchOutcome::Skipped(SkipReason::InsufficientInput);
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("Duplicate search requested outside a tokio runtime");
                return SearchOutcome::Skipped(SkipReason::NoRuntime);
            }
        };

        let key = fingerprint(&partial);
        let mut session = self.inner.session.lock();

        if session.last_fingerprint.as_deref() == Some(key.as_str()) {
            tracing::trace!("Skipping duplicate search: same query as last search");
            return SearchOutcome::Skipped(SkipReason::DuplicateQuery);
        }

        if session.cancel_pending() {
            tracing::debug!("Superseding previous duplicate search");
        }

        session.last_fingerprint = Some(key);
        session.generation += 1;
        let generation = session.generation;
        let token = CancellationToken::new();
        session.pending = Some(token.clone());

        let (delay, status, outcome) = match kind {
            SearchKind::Immediate => (None, SearchStatus::Searching, SearchOutcome::Started),
            SearchKind::Debounced => (
                Some(Duration::from_millis(self.inner.config.debounce_ms)),
                SearchStatus::Scheduled,
                SearchOutcome::Scheduled,
            ),
        };

        self.inner.state.send_modify(|state| {
            state.set_status(status);
            state.error = None;
        });

        tracing::debug!(generation, ?status, "Duplicate search requested");

        runtime.spawn(run_search(
            Arc::clone(&self.inner),
            partial,
            generation,
            token,
            delay,
        ));

        outcome
    }

    /// Cancel pending or in-flight work, keeping the current results.
    ///
    /// The last fingerprint is forgotten so the same query can be
    /// requested again. This, or `clear`, is also how a failed search is
    /// retried.
    pub fn cancel(&self) {
        let mut session = self.inner.session.lock();
        session.last_fingerprint = None;
        if session.cancel_pending() {
            tracing::debug!("Duplicate search cancelled");
            self.inner
                .state
                .send_modify(|state| state.set_status(SearchStatus::Cancelled));
        }
    }

    /// Cancel any work, drop results and errors, and return to idle.
    pub fn clear(&self) {
        let mut session = self.inner.session.lock();
        session.cancel_pending();
        session.last_fingerprint = None;
        self.inner.state.send_replace(SearchState::default());
    }

    /// Current state snapshot.
    pub fn state(&self) -> SearchState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.state.subscribe()
    }

    /// Validate the justification required to proceed despite an alert.
    pub fn check_justification(&self, text: &str) -> Result<(), QueryError> {
        check_justification(text, self.inner.config.min_justification_length)
    }
}

impl<P: MatchingProvider> Drop for DuplicateSearch<P> {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn run_search<P: MatchingProvider>(
    inner: Arc<Inner<P>>,
    query: PartialIdentity,
    generation: u64,
    token: CancellationToken,
    delay: Option<Duration>,
) {
    if let Some(delay) = delay {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let session = inner.session.lock();
        if !session.is_current(generation, &token) {
            return;
        }
        inner
            .state
            .send_modify(|state| state.set_status(SearchStatus::Searching));
    }

    tracing::debug!(generation, provider = inner.provider.name(), "Running duplicate search");

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(BackendError::Cancelled),
        result = inner.provider.find_candidates(&query, token.child_token()) => result,
    };

    finish_search(&inner, generation, &token, result);
}

fn finish_search<P>(
    inner: &Inner<P>,
    generation: u64,
    token: &CancellationToken,
    result: Result<Vec<MatchResult>, BackendError>,
) {
    let mut session = inner.session.lock();

    if !session.is_current(generation, token) {
        tracing::trace!(generation, "Discarding stale duplicate search response");
        return;
    }
    session.pending = None;

    match result {
        Ok(mut results) => {
            results.retain(|r| r.score >= inner.config.threshold);
            sort_by_score(&mut results);

            tracing::info!(generation, matches = results.len(), "Duplicate search finished");

            inner.state.send_modify(|state| {
                state.set_status(SearchStatus::Succeeded);
                state.has_results = !results.is_empty();
                state.results = results.clone();
                state.error = None;
            });
            drop(session);

            if !results.is_empty() {
                if let Some(callback) = &inner.on_duplicates_found {
                    callback(&results);
                }
            }
        }
        Err(BackendError::Cancelled) => {
            inner
                .state
                .send_modify(|state| state.set_status(SearchStatus::Cancelled));
        }
        Err(error) => {
            tracing::warn!(generation, error = %error, "Duplicate search failed");

            let message = error.user_message();
            inner.state.send_modify(|state| {
                state.set_status(SearchStatus::Failed);
                state.error = Some(message.clone());
            });
            drop(session);

            if let Some(callback) = &inner.on_error {
                callback(&message);
            }
        }
    }
}
