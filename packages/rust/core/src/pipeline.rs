//! End-to-end `aggregate` pipeline: query → analysis → source fan-out →
//! validation/scoring/enrichment → selection → synthesis, delivered as a
//! typed event stream.
//!
//! The coordinator owns the request lifecycle: it spawns the fan-out,
//! consumes candidates in arrival order, emits interim analyses on a fixed
//! cadence, computes the one-time source selection, and guarantees the
//! stream never ends without a terminal event (final synthesis or error).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, warn};

use knowstream_analyzer::QueryAnalyzer;
use knowstream_scoring::{ContentEnricher, QualityScorer, SourceValidator};
use knowstream_shared::{
    AppConfig, EnrichedCandidate, Event, EventSender, EventStream, FeatureFlags, KnowStreamError,
    RequestId, ResourceBudget, Result, SelectedSource, SynthesisMode, ValidatedCandidate,
    event_channel, validate_config,
};
use knowstream_sources::{
    ExpertProvider, HttpExpertProvider, HttpSearchProvider, SearchProvider, SourceOrchestrator,
};
use knowstream_synthesis::{KnowledgeSynthesizer, interim_patterns};

/// Wire event buffer per request.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-flight candidate buffer between fan-out and scoring.
const CANDIDATE_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Options and summary
// ---------------------------------------------------------------------------

/// Per-request overrides; unset fields fall back to the `[defaults]`
/// section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Minimum validated sources required before synthesis.
    pub min_sources: Option<usize>,
    /// Cap on the one-time source selection.
    pub max_results: Option<usize>,
    /// Synthesis mode override.
    pub mode: Option<SynthesisMode>,
    /// Synthesis feature-flag override.
    pub features: Option<FeatureFlags>,
}

/// What one completed request did, logged at the end of the run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub request_id: RequestId,
    pub candidates_delivered: usize,
    pub validated_passed: usize,
    pub rejected: usize,
    pub selected: usize,
    pub duplicates_skipped: usize,
    pub segment_failures: usize,
    pub confidence: f64,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The aggregation pipeline. Cheap to clone per request; providers are
/// shared behind `Arc`.
pub struct Pipeline {
    config: AppConfig,
    search: Arc<dyn SearchProvider>,
    expert: Arc<dyn ExpertProvider>,
}

impl Pipeline {
    /// Build the pipeline with the HTTP providers from the configuration.
    pub fn new(config: AppConfig) -> Result<Self> {
        validate_config(&config)?;
        let search = Arc::new(HttpSearchProvider::new(&config.providers, &config.limits)?);
        let expert = Arc::new(HttpExpertProvider::new(&config.providers, &config.limits)?);
        Ok(Self::with_providers(config, search, expert))
    }

    /// Build the pipeline over caller-supplied providers.
    pub fn with_providers(
        config: AppConfig,
        search: Arc<dyn SearchProvider>,
        expert: Arc<dyn ExpertProvider>,
    ) -> Self {
        Self {
            config,
            search,
            expert,
        }
    }

    /// Start one aggregation request and return its event stream.
    ///
    /// The request runs in a background task. Dropping the returned stream
    /// cancels all in-flight work; otherwise the stream always ends with a
    /// final synthesis or a terminal error event.
    pub fn aggregate(&self, query: &str, options: AggregateOptions) -> EventStream {
        let request_id = RequestId::new();
        let (events, stream) = event_channel(EVENT_CHANNEL_CAPACITY);

        let ctx = RequestCtx {
            config: self.config.clone(),
            search: self.search.clone(),
            expert: self.expert.clone(),
            query: query.to_string(),
            min_sources: options
                .min_sources
                .unwrap_or(self.config.defaults.min_sources),
            max_results: options
                .max_results
                .unwrap_or(self.config.defaults.max_results),
            mode: options.mode.unwrap_or_else(|| self.default_mode()),
            features: options
                .features
                .unwrap_or_else(|| self.config.features.clone()),
            events,
        };

        let span = info_span!("aggregate", request = %request_id);
        tokio::spawn(run_request(request_id, ctx).instrument(span));

        stream
    }

    fn default_mode(&self) -> SynthesisMode {
        self.config
            .defaults
            .synthesis_mode
            .parse()
            .unwrap_or_else(|err| {
                warn!(%err, "bad default synthesis mode in config, using research");
                SynthesisMode::default()
            })
    }
}

struct RequestCtx {
    config: AppConfig,
    search: Arc<dyn SearchProvider>,
    expert: Arc<dyn ExpertProvider>,
    query: String,
    min_sources: usize,
    max_results: usize,
    mode: SynthesisMode,
    features: FeatureFlags,
    events: EventSender,
}

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

async fn run_request(request_id: RequestId, ctx: RequestCtx) {
    let budget = ResourceBudget::new(ctx.config.limits.max_memory_bytes());
    let mut delivered = 0usize;

    match drive(request_id, &ctx, budget.clone(), &mut delivered).await {
        Ok(summary) => {
            info!(
                candidates = summary.candidates_delivered,
                validated = summary.validated_passed,
                rejected = summary.rejected,
                selected = summary.selected,
                confidence = summary.confidence,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "request complete"
            );
        }
        Err(err) => {
            warn!(error = %err, kind = err.kind(), "request failed");
            // Cancellation means the consumer is gone; the emit below is a
            // no-op in that case.
            ctx.events
                .emit(Event::Error {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    partial: delivered > 0,
                })
                .await;
        }
    }

    budget.cleanup();
}

async fn drive(
    request_id: RequestId,
    ctx: &RequestCtx,
    budget: Arc<ResourceBudget>,
    delivered: &mut usize,
) -> Result<RunSummary> {
    let started = Instant::now();

    ctx.events
        .emit(Event::status("analyzing", "analyzing query"))
        .await;
    let analyzer = QueryAnalyzer::new(ctx.config.analyzer.clone());
    let analysis = analyzer.analyze(&ctx.query)?;

    ctx.events
        .emit(Event::status(
            "searching",
            format!("searching {} segment(s)", analysis.segments.len()),
        ))
        .await;

    // Fan-out runs concurrently; candidates flow back over this channel in
    // arrival order.
    let (cand_tx, mut cand_rx) = mpsc::channel(CANDIDATE_CHANNEL_CAPACITY);
    let orchestrator = SourceOrchestrator::new(
        ctx.search.clone(),
        ctx.expert.clone(),
        ctx.config.limits.clone(),
        ctx.config.providers.clone(),
    );
    let orch_handle = tokio::spawn({
        let segments = analysis.segments.clone();
        let events = ctx.events.clone();
        let budget = budget.clone();
        let cancel = ctx.events.cancel_token();
        async move {
            orchestrator
                .run(&segments, &events, cand_tx, budget, cancel)
                .await
        }
    });

    let validator = SourceValidator::new(ctx.config.validation.clone());
    let mut scorer = QualityScorer::new(ctx.config.quality.clone());
    let enricher = ContentEnricher::new(ctx.config.enrichment.clone())?;

    let batch_size = ctx.config.limits.batch_size.max(1);
    let mut enriched: Vec<EnrichedCandidate> = Vec::new();
    let mut passed = 0usize;
    let mut selection_armed = false;
    let mut cancelled = false;

    while let Some(candidate) = cand_rx.recv().await {
        *delivered += 1;

        let validated = validator.validate(candidate);
        if !validated.rejected {
            passed += 1;
            if !selection_armed && passed >= ctx.min_sources {
                selection_armed = true;
                debug!(passed, "source selection armed");
                ctx.events
                    .emit(Event::status(
                        "searching",
                        format!("selection armed with {passed} validated sources"),
                    ))
                    .await;
            }
        }
        let scored = scorer.score(validated);
        enriched.push(enricher.enrich(scored));

        // Interim analysis covers exactly the candidates processed so far.
        if *delivered % batch_size == 0 {
            let validated_refs: Vec<&ValidatedCandidate> =
                enriched.iter().map(|e| &e.scored.validated).collect();
            let emitted = ctx
                .events
                .emit(Event::InterimAnalysis {
                    results_analyzed: *delivered,
                    patterns: interim_patterns(&validated_refs),
                })
                .await;
            if !emitted {
                cancelled = true;
                break;
            }
        }
    }

    // The fan-out stops once cancellation or the closed candidate channel
    // reaches it; cap the wait with the configured cleanup deadline.
    let stats = match timeout(ctx.config.limits.cleanup_timeout(), orch_handle).await {
        Ok(joined) => joined
            .map_err(|e| KnowStreamError::provider(format!("source task failed: {e}")))??,
        Err(_elapsed) => {
            warn!("fan-out still running past the cleanup deadline, abandoning it");
            return Err(KnowStreamError::Cancelled);
        }
    };
    if cancelled {
        return Err(KnowStreamError::Cancelled);
    }

    let mut survivors: Vec<&EnrichedCandidate> = enriched
        .iter()
        .filter(|e| !e.scored.validated.rejected)
        .collect();
    if survivors.len() < ctx.min_sources {
        return Err(KnowStreamError::InsufficientSources {
            validated: survivors.len(),
            required: ctx.min_sources,
        });
    }

    // The one-time selection: rank every validated survivor, then truncate.
    survivors.sort_by(|a, b| {
        let av = &a.scored.validated;
        let bv = &b.scored.validated;
        bv.trust
            .partial_cmp(&av.trust)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                bv.reliability
                    .partial_cmp(&av.reliability)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    survivors.truncate(ctx.max_results);

    let sources: Vec<SelectedSource> = survivors
        .iter()
        .map(|e| SelectedSource {
            url: e
                .candidate()
                .origin
                .url()
                .map(str::to_string)
                .unwrap_or_else(|| e.candidate().origin.label()),
            relevance: e.scored.validated.trust,
        })
        .collect();
    let selected_count = sources.len();
    if !ctx.events.emit(Event::SourceSelection { sources }).await {
        return Err(KnowStreamError::Cancelled);
    }

    ctx.events
        .emit(Event::status(
            "synthesizing",
            format!("synthesizing in {} mode", ctx.mode),
        ))
        .await;

    let selected: Vec<EnrichedCandidate> = survivors.into_iter().cloned().collect();
    let synthesizer = KnowledgeSynthesizer::new(ctx.mode, &ctx.features);
    let result = synthesizer.synthesize(&ctx.query, &selected)?;

    if !ctx.events.emit(Event::final_synthesis(&result)).await {
        return Err(KnowStreamError::Cancelled);
    }

    Ok(RunSummary {
        request_id,
        candidates_delivered: *delivered,
        validated_passed: passed,
        rejected: *delivered - passed,
        selected: selected_count,
        duplicates_skipped: stats.duplicates_skipped,
        segment_failures: stats.segment_failures,
        confidence: result.confidence,
        elapsed: started.elapsed(),
    })
}
