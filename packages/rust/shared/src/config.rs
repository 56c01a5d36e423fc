//! Application configuration for KnowStream.
//!
//! User config lives at `~/.knowstream/knowstream.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! All scoring thresholds, weights, rate limits, and timeouts consumed by
//! the pipeline are defined here; the pipeline itself receives an immutable
//! snapshot at construction and never reads ambient global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KnowStreamError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "knowstream.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".knowstream";

/// Tolerance when checking that composite weights sum to 1.0.
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Config structs (matching knowstream.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Request defaults (min sources, max results, synthesis mode).
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Outbound call limits: rate, timeouts, retries, memory budget.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Query analyzer settings.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Provider endpoints and follow-up policy.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Validation thresholds and domain patterns.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Quality scoring thresholds.
    #[serde(default)]
    pub quality: QualityConfig,

    /// Enrichment weights (must sum to 1.0).
    #[serde(default)]
    pub enrichment: EnrichmentWeights,

    /// Feature flags for advanced synthesis strategies. Off by default;
    /// enabling one currently falls back to confidence-weighted merging.
    #[serde(default)]
    pub features: FeatureFlags,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Minimum validated candidates before source selection is armed.
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,

    /// Maximum candidates in selection and synthesis.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Default synthesis mode: "research", "analysis", "coding", "creative".
    #[serde(default = "default_synthesis_mode")]
    pub synthesis_mode: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            min_sources: default_min_sources(),
            max_results: default_max_results(),
            synthesis_mode: default_synthesis_mode(),
        }
    }
}

fn default_min_sources() -> usize {
    5
}
fn default_max_results() -> usize {
    20
}
fn default_synthesis_mode() -> String {
    "research".into()
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Outbound requests per second (token-bucket refill rate).
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: u32,

    /// Token-bucket burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-call operation timeout in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Cleanup deadline after cancellation, in seconds.
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,

    /// Maximum retries for a failed provider call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff in ms; doubles per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-request memory budget in megabytes.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,

    /// Candidates per interim-analysis batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: default_requests_per_sec(),
            burst: default_burst(),
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_memory_mb: default_max_memory_mb(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_requests_per_sec() -> u32 {
    20
}
fn default_burst() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_operation_timeout_secs() -> u64 {
    25
}
fn default_cleanup_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_max_memory_mb() -> usize {
    10
}
fn default_batch_size() -> usize {
    5
}

/// `[analyzer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Classification confidence below which the type is `ambiguous`.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Maximum query segments; excess segments merge into the last one.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_segments: default_max_segments(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.6
}
fn default_max_segments() -> usize {
    4
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Search provider endpoint.
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,

    /// Expert (LLM) provider endpoint.
    #[serde(default = "default_expert_endpoint")]
    pub expert_endpoint: String,

    /// Model id sent on expert calls.
    #[serde(default = "default_expert_model")]
    pub expert_model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum search results consumed per query segment.
    #[serde(default = "default_max_results_per_query")]
    pub max_results_per_query: usize,

    /// Search results with a description shorter than this trigger an
    /// expert follow-up call to obtain scoreable content.
    #[serde(default = "default_followup_min_chars")]
    pub followup_min_chars: usize,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            search_endpoint: default_search_endpoint(),
            expert_endpoint: default_expert_endpoint(),
            expert_model: default_expert_model(),
            api_key_env: default_api_key_env(),
            max_results_per_query: default_max_results_per_query(),
            followup_min_chars: default_followup_min_chars(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://api.search.example/v1/search".into()
}
fn default_expert_endpoint() -> String {
    "https://api.expert.example/v1/complete".into()
}
fn default_expert_model() -> String {
    "expert-large".into()
}
fn default_api_key_env() -> String {
    "KNOWSTREAM_API_KEY".into()
}
fn default_max_results_per_query() -> usize {
    20
}
fn default_followup_min_chars() -> usize {
    80
}

/// `[validation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum trust score for acceptance.
    #[serde(default = "default_min_trust")]
    pub min_trust: f64,

    /// Minimum reliability score for acceptance.
    #[serde(default = "default_min_reliability")]
    pub min_reliability: f64,

    /// Minimum authority score for acceptance.
    #[serde(default = "default_min_authority")]
    pub min_authority: f64,

    /// Minimum freshness score for acceptance.
    #[serde(default = "default_min_freshness")]
    pub min_freshness: f64,

    /// Minimum citation count for acceptance.
    #[serde(default = "default_min_citations")]
    pub min_citations: u32,

    /// Domain allow patterns (glob-like). Matching domains get a trust boost.
    #[serde(default)]
    pub allow_domains: Vec<String>,

    /// Domain deny patterns. Matching domains score zero trust.
    #[serde(default)]
    pub deny_domains: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_trust: default_min_trust(),
            min_reliability: default_min_reliability(),
            min_authority: default_min_authority(),
            min_freshness: default_min_freshness(),
            min_citations: default_min_citations(),
            allow_domains: Vec::new(),
            deny_domains: Vec::new(),
        }
    }
}

fn default_min_trust() -> f64 {
    0.8
}
fn default_min_reliability() -> f64 {
    0.8
}
fn default_min_authority() -> f64 {
    0.7
}
fn default_min_freshness() -> f64 {
    0.7
}
fn default_min_citations() -> u32 {
    2
}

/// `[quality]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum content-quality score.
    #[serde(default = "default_min_quality")]
    pub min_quality: f64,

    /// Minimum diversity score.
    #[serde(default = "default_min_diversity")]
    pub min_diversity: f64,

    /// Minimum depth score.
    #[serde(default = "default_min_depth")]
    pub min_depth: f64,

    /// How many prior scored candidates the diversity window retains.
    #[serde(default = "default_diversity_window")]
    pub diversity_window: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            min_diversity: default_min_diversity(),
            min_depth: default_min_depth(),
            diversity_window: default_diversity_window(),
        }
    }
}

fn default_min_quality() -> f64 {
    0.8
}
fn default_min_diversity() -> f64 {
    0.7
}
fn default_min_depth() -> f64 {
    0.7
}
fn default_diversity_window() -> usize {
    16
}

/// `[enrichment]` section: weights for the composite quality metric.
///
/// The four score weights must sum to 1.0; violation fails at config load,
/// not per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentWeights {
    /// Weight applied to candidates from the search provider.
    #[serde(default = "default_search_source_weight")]
    pub search_source_weight: f64,

    /// Weight applied to candidates from expert responses.
    #[serde(default = "default_expert_source_weight")]
    pub expert_source_weight: f64,

    /// Composite weight of the trust score.
    #[serde(default = "default_trust_weight")]
    pub trust_weight: f64,

    /// Composite weight of the reliability score.
    #[serde(default = "default_reliability_weight")]
    pub reliability_weight: f64,

    /// Composite weight of the quality score.
    #[serde(default = "default_quality_weight")]
    pub quality_weight: f64,

    /// Composite weight of the depth score.
    #[serde(default = "default_depth_weight")]
    pub depth_weight: f64,
}

impl Default for EnrichmentWeights {
    fn default() -> Self {
        Self {
            search_source_weight: default_search_source_weight(),
            expert_source_weight: default_expert_source_weight(),
            trust_weight: default_trust_weight(),
            reliability_weight: default_reliability_weight(),
            quality_weight: default_quality_weight(),
            depth_weight: default_depth_weight(),
        }
    }
}

fn default_search_source_weight() -> f64 {
    0.9
}
fn default_expert_source_weight() -> f64 {
    0.75
}
fn default_trust_weight() -> f64 {
    0.3
}
fn default_reliability_weight() -> f64 {
    0.2
}
fn default_quality_weight() -> f64 {
    0.3
}
fn default_depth_weight() -> f64 {
    0.2
}

/// `[features]` section: advanced synthesis strategies, all off by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Mixture-of-experts routing (reserved; no algorithm behind it yet).
    #[serde(default)]
    pub moe_routing: bool,

    /// Task-vector merging (reserved).
    #[serde(default)]
    pub task_vectors: bool,

    /// SLERP merging (reserved).
    #[serde(default)]
    pub slerp_merging: bool,
}

impl FeatureFlags {
    /// Whether any reserved strategy is enabled.
    pub fn any_advanced(&self) -> bool {
        self.moe_routing || self.task_vectors || self.slerp_merging
    }
}

// ---------------------------------------------------------------------------
// Duration helpers
// ---------------------------------------------------------------------------

impl LimitsConfig {
    /// TCP connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-call operation timeout as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Cleanup deadline as a [`Duration`].
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    /// Initial retry backoff as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Memory budget in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.knowstream/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KnowStreamError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.knowstream/knowstream.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does
/// not exist. The loaded config is always validated.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        let config = AppConfig::default();
        validate_config(&config)?;
        return Ok(config);
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| KnowStreamError::config(format!("read {}: {e}", path.display())))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        KnowStreamError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)
        .map_err(|e| KnowStreamError::config(format!("create {}: {e}", dir.display())))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KnowStreamError::config(e.to_string()))?;

    std::fs::write(&path, content)
        .map_err(|e| KnowStreamError::config(format!("write {}: {e}", path.display())))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Validate invariants the pipeline depends on. Called at load so that a
/// bad config fails fast at startup, never per request.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let w = &config.enrichment;
    let sum = w.trust_weight + w.reliability_weight + w.quality_weight + w.depth_weight;
    if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
        return Err(KnowStreamError::config(format!(
            "enrichment composite weights must sum to 1.0, got {sum}"
        )));
    }

    if config.limits.requests_per_sec == 0 {
        return Err(KnowStreamError::config("requests_per_sec must be > 0"));
    }
    if config.analyzer.max_segments == 0 {
        return Err(KnowStreamError::config("max_segments must be >= 1"));
    }
    if config.defaults.min_sources == 0 {
        return Err(KnowStreamError::config("min_sources must be >= 1"));
    }
    if config.quality.diversity_window == 0 {
        return Err(KnowStreamError::config("diversity_window must be >= 1"));
    }

    for threshold in [
        config.validation.min_trust,
        config.validation.min_reliability,
        config.validation.min_authority,
        config.validation.min_freshness,
        config.quality.min_quality,
        config.quality.min_diversity,
        config.quality.min_depth,
        config.analyzer.confidence_threshold,
    ] {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(KnowStreamError::config(format!(
                "score thresholds must be within [0, 1], got {threshold}"
            )));
        }
    }

    Ok(())
}

/// Check that the provider API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.providers.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(KnowStreamError::config(format!(
            "provider API key not found. Set the {var_name} environment variable."
        ))),
    }
}
