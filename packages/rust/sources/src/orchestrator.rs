//! Concurrent source fan-out engine.
//!
//! One search call per query segment; per result item, an optional expert
//! follow-up when the retrieved description is too thin to score. Every
//! outbound call passes through the shared token-bucket limiter and the
//! operation-timeout policy. Candidates are emitted in arrival order, each
//! charged against the per-request resource budget before buffering.
//!
//! Failure semantics: an individual source failure degrades to a
//! partial-result error event and the stream continues; a total failure
//! with zero delivered candidates terminates the request after retries.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use knowstream_shared::{
    Candidate, Event, EventSender, KnowStreamError, LimitsConfig, ProvidersConfig, ResourceBudget,
    Result, SearchResultInfo, SourceOrigin,
};

use crate::limiter::RateLimiter;
use crate::provider::{ExpertProvider, RawSearchItem, SearchProvider};

/// Longest description slice carried into a search-result event.
const EVENT_DESCRIPTION_MAX: usize = 240;

// ---------------------------------------------------------------------------
// SourceStats
// ---------------------------------------------------------------------------

/// Summary of one completed fan-out run.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Candidates delivered to the pipeline.
    pub candidates_delivered: usize,
    /// Segments whose search call failed after retries.
    pub segment_failures: usize,
    /// Items skipped because identical content already arrived.
    pub duplicates_skipped: usize,
}

// ---------------------------------------------------------------------------
// SourceOrchestrator
// ---------------------------------------------------------------------------

/// Fans a list of query segments out to the search and expert providers,
/// delivering candidates to the pipeline as each source responds.
pub struct SourceOrchestrator {
    search: Arc<dyn SearchProvider>,
    expert: Arc<dyn ExpertProvider>,
    limiter: Arc<RateLimiter>,
    limits: LimitsConfig,
    providers: ProvidersConfig,
}

impl SourceOrchestrator {
    /// Create an orchestrator over the given providers. The rate limiter is
    /// built from the configured requests/sec and burst.
    pub fn new(
        search: Arc<dyn SearchProvider>,
        expert: Arc<dyn ExpertProvider>,
        limits: LimitsConfig,
        providers: ProvidersConfig,
    ) -> Self {
        let limiter = RateLimiter::new(limits.requests_per_sec, limits.burst);
        Self {
            search,
            expert,
            limiter,
            limits,
            providers,
        }
    }

    /// Run the fan-out for one request.
    ///
    /// Candidates flow to `candidates` in arrival order while wire events
    /// flow to `events`. Returns stats on success; a fatal error (total
    /// source failure, resource breach, cancellation) aborts the run and
    /// is surfaced by the coordinator as the terminal error event.
    #[instrument(skip_all, fields(segments = segments.len()))]
    pub async fn run(
        &self,
        segments: &[String],
        events: &EventSender,
        candidates: mpsc::Sender<Candidate>,
        budget: Arc<ResourceBudget>,
        cancel: CancellationToken,
    ) -> Result<SourceStats> {
        let ctx = Arc::new(SegmentCtx {
            search: self.search.clone(),
            expert: self.expert.clone(),
            limiter: self.limiter.clone(),
            limits: self.limits.clone(),
            providers: self.providers.clone(),
            events: events.clone(),
            candidates,
            budget,
            cancel,
            seq: AtomicU64::new(0),
            seen: Mutex::new(HashSet::new()),
        });

        let mut join = JoinSet::new();
        for segment in segments {
            join.spawn(run_segment(ctx.clone(), segment.clone()));
        }

        let mut stats = SourceStats::default();
        let mut failures: Vec<KnowStreamError> = Vec::new();
        let mut fatal: Option<KnowStreamError> = None;

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(SegmentOutcome::Done {
                    delivered,
                    duplicates,
                }) => {
                    stats.candidates_delivered += delivered;
                    stats.duplicates_skipped += duplicates;
                }
                Ok(SegmentOutcome::Failed(err)) => {
                    warn!(error = %err, "segment failed after retries");
                    failures.push(err);
                }
                Ok(SegmentOutcome::Fatal(err)) => {
                    fatal = Some(err);
                    join.abort_all();
                    break;
                }
                Err(join_err) => {
                    failures.push(KnowStreamError::provider(format!(
                        "segment task aborted: {join_err}"
                    )));
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        stats.segment_failures = failures.len();

        if stats.candidates_delivered == 0 && !failures.is_empty() {
            // Total source failure: no provider produced anything.
            let message = failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(KnowStreamError::UpstreamUnavailable {
                message,
                partial: false,
            });
        }

        // Individual failures degrade to partial-result error events.
        for err in &failures {
            ctx.events
                .emit(Event::Error {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    partial: true,
                })
                .await;
        }

        info!(
            delivered = stats.candidates_delivered,
            failures = stats.segment_failures,
            duplicates = stats.duplicates_skipped,
            "source fan-out complete"
        );

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Per-segment work
// ---------------------------------------------------------------------------

/// Shared state for the fan-out tasks of one request.
struct SegmentCtx {
    search: Arc<dyn SearchProvider>,
    expert: Arc<dyn ExpertProvider>,
    limiter: Arc<RateLimiter>,
    limits: LimitsConfig,
    providers: ProvidersConfig,
    events: EventSender,
    candidates: mpsc::Sender<Candidate>,
    budget: Arc<ResourceBudget>,
    cancel: CancellationToken,
    /// Arrival sequence counter across all segments.
    seq: AtomicU64,
    /// Content fingerprints already delivered, for cross-segment dedup.
    seen: Mutex<HashSet<String>>,
}

enum SegmentOutcome {
    Done { delivered: usize, duplicates: usize },
    /// This segment produced nothing; others may still succeed.
    Failed(KnowStreamError),
    /// The whole request must stop (budget breach, cancellation).
    Fatal(KnowStreamError),
}

async fn run_segment(ctx: Arc<SegmentCtx>, segment: String) -> SegmentOutcome {
    let items = {
        let search = ctx.search.clone();
        let query = segment.clone();
        match call_with_retries(&ctx, "search", move || {
            let search = search.clone();
            let query = query.clone();
            async move { search.search(&query).await }
        })
        .await
        {
            Ok(items) => items,
            Err(err) if err.is_fatal() => return SegmentOutcome::Fatal(err),
            Err(err) => return SegmentOutcome::Failed(err),
        }
    };

    let mut delivered = 0usize;
    let mut duplicates = 0usize;

    for item in items.into_iter().take(ctx.providers.max_results_per_query) {
        let fingerprint = content_fingerprint(&item.url, &item.description);
        {
            let mut seen = ctx.seen.lock().await;
            if !seen.insert(fingerprint) {
                duplicates += 1;
                continue;
            }
        }

        let content = if item.description.trim().is_empty() {
            item.title.clone()
        } else {
            item.description.clone()
        };
        let needs_followup = content.len() < ctx.providers.followup_min_chars;

        let origin = SourceOrigin::SearchResult {
            title: item.title.clone(),
            url: item.url.clone(),
            description: item.description.clone(),
            published_at: item.published_at,
        };
        match deliver_candidate(&ctx, origin, content).await {
            Ok(true) => delivered += 1,
            Ok(false) => return SegmentOutcome::Fatal(KnowStreamError::Cancelled),
            Err(err) => return SegmentOutcome::Fatal(err),
        }

        if needs_followup {
            match expert_followup(&ctx, &segment, &item).await {
                Ok(true) => delivered += 1,
                Ok(false) => return SegmentOutcome::Fatal(KnowStreamError::Cancelled),
                Err(err) if err.is_fatal() => return SegmentOutcome::Fatal(err),
                Err(err) => {
                    // The search item itself was already delivered; the
                    // failed follow-up only degrades the result.
                    warn!(url = %item.url, error = %err, "expert follow-up failed");
                    ctx.events
                        .emit(Event::Error {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                            partial: true,
                        })
                        .await;
                }
            }
        }
    }

    SegmentOutcome::Done {
        delivered,
        duplicates,
    }
}

/// Build, budget, and emit one candidate. `Ok(false)` means the consumer
/// went away; an error means the resource budget was breached.
async fn deliver_candidate(
    ctx: &SegmentCtx,
    origin: SourceOrigin,
    content: String,
) -> Result<bool> {
    let candidate = Candidate {
        id: Uuid::now_v7().to_string(),
        origin,
        content,
        seq: ctx.seq.fetch_add(1, Ordering::SeqCst),
        retrieved_at: Utc::now(),
    };

    ctx.budget.try_reserve(candidate.estimated_bytes())?;

    let event = Event::SearchResult {
        index: candidate.seq,
        result: wire_info(&candidate),
    };
    if !ctx.events.emit(event).await {
        return Ok(false);
    }
    if ctx.candidates.send(candidate).await.is_err() {
        return Ok(false);
    }
    Ok(true)
}

/// Ask the expert provider to expand a thin search result and deliver the
/// response as its own candidate.
async fn expert_followup(
    ctx: &SegmentCtx,
    segment: &str,
    item: &RawSearchItem,
) -> Result<bool> {
    let prompt = format!(
        "Summarize the key facts about \"{segment}\" covered by the source titled \
         \"{}\" at {}.",
        item.title, item.url
    );
    let model = ctx.providers.expert_model.clone();

    let text = {
        let expert = ctx.expert.clone();
        let prompt = prompt.clone();
        let model = model.clone();
        call_with_retries(ctx, "expert follow-up", move || {
            let expert = expert.clone();
            let prompt = prompt.clone();
            let model = model.clone();
            async move { expert.complete(&prompt, &model).await }
        })
        .await?
    };

    let origin = SourceOrigin::ExpertResponse {
        model,
        about_url: Some(item.url.clone()),
    };
    deliver_candidate(ctx, origin, text).await
}

/// Run one provider call through the limiter, timeout, and retry policy.
async fn call_with_retries<T, F, Fut>(
    ctx: &SegmentCtx,
    what: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = ctx.limits.retry_backoff();
    let mut last: Option<KnowStreamError> = None;

    for attempt in 0..=ctx.limits.max_retries {
        if ctx.cancel.run_until_cancelled(ctx.limiter.acquire()).await.is_none() {
            return Err(KnowStreamError::Cancelled);
        }

        let outcome = match ctx
            .cancel
            .run_until_cancelled(timeout(ctx.limits.operation_timeout(), call()))
            .await
        {
            None => return Err(KnowStreamError::Cancelled),
            Some(Err(_elapsed)) => Err(KnowStreamError::Timeout { what: what.into() }),
            Some(Ok(result)) => result,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                if attempt < ctx.limits.max_retries {
                    warn!(%what, attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "retrying");
                    if ctx.cancel.run_until_cancelled(sleep(backoff)).await.is_none() {
                        return Err(KnowStreamError::Cancelled);
                    }
                    backoff *= 2;
                }
                last = Some(err);
            }
        }
    }

    Err(last.unwrap_or(KnowStreamError::RateLimitExceeded))
}

/// SHA-256 fingerprint for cross-segment content dedup.
fn content_fingerprint(url: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\x00");
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Wire representation of a candidate for its search-result event.
fn wire_info(candidate: &Candidate) -> SearchResultInfo {
    match &candidate.origin {
        SourceOrigin::SearchResult {
            title,
            url,
            description,
            ..
        } => SearchResultInfo {
            title: title.clone(),
            url: url.clone(),
            description: truncate(description, EVENT_DESCRIPTION_MAX),
        },
        SourceOrigin::ExpertResponse { model, about_url } => SearchResultInfo {
            title: format!("Expert response ({model})"),
            url: about_url.clone().unwrap_or_default(),
            description: truncate(&candidate.content, EVENT_DESCRIPTION_MAX),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knowstream_shared::event_channel;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    // -- fakes --------------------------------------------------------------

    struct FakeSearch {
        items: Vec<RawSearchItem>,
        /// Calls that fail before the first success.
        fail_first: AtomicUsize,
        /// Queries that always fail, regardless of retry count.
        fail_query: Option<String>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeSearch {
        fn returning(items: Vec<RawSearchItem>) -> Arc<Self> {
            Arc::new(Self {
                items,
                fail_first: AtomicUsize::new(0),
                fail_query: None,
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn failing_first(items: Vec<RawSearchItem>, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                items,
                fail_first: AtomicUsize::new(failures),
                fail_query: None,
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn failing_for(items: Vec<RawSearchItem>, query: &str) -> Arc<Self> {
            Arc::new(Self {
                items,
                fail_first: AtomicUsize::new(0),
                fail_query: Some(query.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn always_failing() -> Arc<Self> {
            Self::failing_first(Vec::new(), usize::MAX)
        }

        fn slow(items: Vec<RawSearchItem>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                items,
                fail_first: AtomicUsize::new(0),
                fail_query: None,
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, query: &str) -> Result<Vec<RawSearchItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_query.as_deref() == Some(query) {
                return Err(KnowStreamError::Network("provider down".into()));
            }
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != usize::MAX {
                    self.fail_first.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(KnowStreamError::Network("provider down".into()));
            }
            Ok(self.items.clone())
        }
    }

    struct FakeExpert {
        text: String,
        fail: bool,
    }

    impl FakeExpert {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                text: text.into(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                text: String::new(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl ExpertProvider for FakeExpert {
        async fn complete(&self, _prompt: &str, _model: &str) -> Result<String> {
            if self.fail {
                return Err(KnowStreamError::Network("expert down".into()));
            }
            Ok(self.text.clone())
        }
    }

    fn item(url: &str, description: &str) -> RawSearchItem {
        RawSearchItem {
            title: format!("Title for {url}"),
            url: url.into(),
            description: description.into(),
            published_at: None,
        }
    }

    fn long_description(tag: &str) -> String {
        format!("{tag}: a sufficiently detailed description that easily clears the follow-up floor for scoring purposes")
    }

    fn limits_fast() -> LimitsConfig {
        LimitsConfig {
            requests_per_sec: 1000,
            burst: 100,
            retry_backoff_ms: 1,
            ..LimitsConfig::default()
        }
    }

    struct Run {
        stats: Result<SourceStats>,
        candidates: Vec<Candidate>,
        events: Vec<Event>,
    }

    async fn run_orchestrator(
        search: Arc<dyn SearchProvider>,
        expert: Arc<dyn ExpertProvider>,
        limits: LimitsConfig,
        segments: &[&str],
        budget_bytes: usize,
    ) -> Run {
        let orchestrator = SourceOrchestrator::new(
            search,
            expert,
            limits,
            ProvidersConfig::default(),
        );
        let (tx, mut rx) = event_channel(256);
        let (cand_tx, mut cand_rx) = mpsc::channel(256);
        let budget = ResourceBudget::new(budget_bytes);
        let cancel = tx.cancel_token();

        let segments: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
        let stats = orchestrator
            .run(&segments, &tx, cand_tx, budget, cancel)
            .await;

        drop(tx);
        let mut candidates = Vec::new();
        while let Ok(c) = cand_rx.try_recv() {
            candidates.push(c);
        }
        let mut events = Vec::new();
        while let Some(e) = rx.next().await {
            events.push(e);
        }
        Run {
            stats,
            candidates,
            events,
        }
    }

    // -- tests --------------------------------------------------------------

    #[tokio::test]
    async fn delivers_candidates_with_events() {
        let search = FakeSearch::returning(vec![
            item("https://a.example/1", &long_description("one")),
            item("https://a.example/2", &long_description("two")),
        ]);
        let run = run_orchestrator(
            search,
            FakeExpert::ok("x"),
            limits_fast(),
            &["rust"],
            1 << 20,
        )
        .await;

        let stats = run.stats.expect("run succeeds");
        assert_eq!(stats.candidates_delivered, 2);
        assert_eq!(run.candidates.len(), 2);

        let result_events = run
            .events
            .iter()
            .filter(|e| matches!(e, Event::SearchResult { .. }))
            .count();
        assert_eq!(result_events, 2);

        // Arrival order: sequence numbers are consecutive from zero.
        let mut seqs: Vec<u64> = run.candidates.iter().map(|c| c.seq).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[tokio::test]
    async fn thin_results_trigger_expert_followup() {
        let search = FakeSearch::returning(vec![item("https://a.example/thin", "tiny")]);
        let run = run_orchestrator(
            search,
            FakeExpert::ok("a detailed expert expansion of the thin source"),
            limits_fast(),
            &["rust"],
            1 << 20,
        )
        .await;

        let stats = run.stats.expect("run succeeds");
        assert_eq!(stats.candidates_delivered, 2);
        assert!(run.candidates.iter().any(|c| matches!(
            &c.origin,
            SourceOrigin::ExpertResponse { about_url: Some(url), .. }
                if url == "https://a.example/thin"
        )));
    }

    #[tokio::test]
    async fn failed_followup_degrades_to_partial_error() {
        let search = FakeSearch::returning(vec![item("https://a.example/thin", "tiny")]);
        let run = run_orchestrator(
            search,
            FakeExpert::failing(),
            limits_fast(),
            &["rust"],
            1 << 20,
        )
        .await;

        let stats = run.stats.expect("run still succeeds");
        assert_eq!(stats.candidates_delivered, 1);
        assert!(run.events.iter().any(|e| matches!(
            e,
            Event::Error { partial: true, .. }
        )));
    }

    #[tokio::test]
    async fn one_failed_segment_degrades_others_continue() {
        let flaky = FakeSearch::failing_for(
            vec![item("https://a.example/1", &long_description("a"))],
            "python",
        );
        let run = run_orchestrator(
            flaky,
            FakeExpert::ok("x"),
            limits_fast(),
            &["python", "javascript"],
            1 << 20,
        )
        .await;

        let stats = run.stats.expect("run succeeds with one delivered segment");
        assert_eq!(stats.candidates_delivered, 1);
        assert_eq!(stats.segment_failures, 1);
        assert!(run.events.iter().any(|e| matches!(
            e,
            Event::Error { partial: true, .. }
        )));
    }

    #[tokio::test]
    async fn total_failure_is_fatal_upstream_unavailable() {
        let run = run_orchestrator(
            FakeSearch::always_failing(),
            FakeExpert::ok("x"),
            limits_fast(),
            &["python", "javascript"],
            1 << 20,
        )
        .await;

        match run.stats {
            Err(KnowStreamError::UpstreamUnavailable { partial, .. }) => assert!(!partial),
            other => panic!("expected fatal upstream error, got {other:?}"),
        }
        assert!(run.candidates.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let search = FakeSearch::failing_first(
            vec![item("https://a.example/1", &long_description("a"))],
            2,
        );
        let calls = search.clone();
        let run = run_orchestrator(search, FakeExpert::ok("x"), limits_fast(), &["rust"], 1 << 20)
            .await;

        assert_eq!(run.stats.expect("succeeds").candidates_delivered, 1);
        assert_eq!(calls.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn duplicate_content_across_segments_collapses() {
        let search = FakeSearch::returning(vec![
            item("https://a.example/same", &long_description("same")),
        ]);
        let run = run_orchestrator(
            search,
            FakeExpert::ok("x"),
            limits_fast(),
            &["python", "javascript"],
            1 << 20,
        )
        .await;

        let stats = run.stats.expect("succeeds");
        assert_eq!(stats.candidates_delivered, 1);
        assert_eq!(stats.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn budget_breach_is_fatal() {
        let search = FakeSearch::returning(vec![
            item("https://a.example/1", &long_description("one")),
            item("https://a.example/2", &long_description("two")),
        ]);
        // Budget fits roughly one candidate.
        let run = run_orchestrator(
            search,
            FakeExpert::ok("x"),
            limits_fast(),
            &["rust"],
            300,
        )
        .await;

        match run.stats {
            Err(KnowStreamError::ResourceExhausted { .. }) => {}
            other => panic!("expected resource exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let limits = LimitsConfig {
            requests_per_sec: 1000,
            burst: 100,
            max_retries: 0,
            operation_timeout_secs: 25,
            ..LimitsConfig::default()
        };
        let search = FakeSearch::slow(
            vec![item("https://a.example/1", &long_description("a"))],
            Duration::from_secs(60),
        );
        let run = run_orchestrator(search, FakeExpert::ok("x"), limits, &["rust"], 1 << 20).await;

        match run.stats {
            Err(KnowStreamError::UpstreamUnavailable { partial, message }) => {
                assert!(!partial);
                assert!(message.contains("timeout"), "{message}");
            }
            other => panic!("expected timeout-driven failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_immediately() {
        let orchestrator = SourceOrchestrator::new(
            FakeSearch::returning(vec![item("https://a.example/1", "d")]),
            FakeExpert::ok("x"),
            limits_fast(),
            ProvidersConfig::default(),
        );
        let (tx, _rx) = event_channel(8);
        let (cand_tx, _cand_rx) = mpsc::channel(8);
        let budget = ResourceBudget::new(1 << 20);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .run(&["rust".to_string()], &tx, cand_tx, budget, cancel)
            .await;
        assert!(matches!(result, Err(KnowStreamError::Cancelled)));
    }
}
