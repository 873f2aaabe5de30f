//! TOML configuration.
//!
//! Loaded once at startup and shared as `Arc<Config>`. Every section except
//! `[db]` is optional and falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/docgate.sqlite"
//!
//! [gate]
//! accept = 0.7
//! enhance = 0.3
//! reject = 0.1
//!
//! [embedding]
//! provider = "hash"    # hash | openai | ollama | local
//! dims = 384
//!
//! [[triggers]]
//! category = "safety incident"
//! reference_text = "injury near the press line, area evacuated"
//! threshold = 0.8
//!
//! [connectors.filesystem]
//! root = "./inbox"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docgate_core::chunk::ChunkParams;
use docgate_core::gate::GatePolicy;
use docgate_core::models::TriggerRule;
use docgate_core::quality::QualityPolicy;
use docgate_core::search::{SearchMode, SearchParams};
use docgate_core::store::ReconcilePolicy;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub enhance: EnhanceConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub triggers: Vec<TriggerRuleConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_min_side")]
    pub min_width: u32,
    #[serde(default = "default_min_side")]
    pub min_height: u32,
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f32,
    #[serde(default = "default_contrast_threshold")]
    pub contrast_threshold: f32,
    #[serde(default = "default_density_poor_pct")]
    pub density_poor_pct: f32,
    #[serde(default = "default_density_good_pct")]
    pub density_good_pct: f32,
    #[serde(default = "default_size_warn_mb")]
    pub size_warn_mb: u64,
    #[serde(default = "default_size_max_mb")]
    pub size_max_mb: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_width: default_min_side(),
            min_height: default_min_side(),
            blur_threshold: default_blur_threshold(),
            contrast_threshold: default_contrast_threshold(),
            density_poor_pct: default_density_poor_pct(),
            density_good_pct: default_density_good_pct(),
            size_warn_mb: default_size_warn_mb(),
            size_max_mb: default_size_max_mb(),
        }
    }
}

impl QualityConfig {
    pub fn policy(&self) -> QualityPolicy {
        QualityPolicy {
            min_width: self.min_width,
            min_height: self.min_height,
            blur_threshold: self.blur_threshold,
            contrast_threshold: self.contrast_threshold,
            density_poor_pct: self.density_poor_pct,
            density_good_pct: self.density_good_pct,
            size_warn_bytes: self.size_warn_mb * MB,
            size_max_bytes: self.size_max_mb * MB,
        }
    }
}

fn default_min_side() -> u32 {
    300
}
fn default_blur_threshold() -> f32 {
    100.0
}
fn default_contrast_threshold() -> f32 {
    100.0
}
fn default_density_poor_pct() -> f32 {
    5.0
}
fn default_density_good_pct() -> f32 {
    10.0
}
fn default_size_warn_mb() -> u64 {
    50
}
fn default_size_max_mb() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_accept")]
    pub accept: f32,
    #[serde(default = "default_enhance")]
    pub enhance: f32,
    #[serde(default = "default_reject")]
    pub reject: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            accept: default_accept(),
            enhance: default_enhance(),
            reject: default_reject(),
        }
    }
}

impl GateConfig {
    pub fn policy(&self) -> GatePolicy {
        GatePolicy {
            accept: self.accept,
            enhance: self.enhance,
            reject: self.reject,
        }
    }
}

fn default_accept() -> f32 {
    0.7
}
fn default_enhance() -> f32 {
    0.3
}
fn default_reject() -> f32 {
    0.1
}

/// Image enhancement applied before the single OCR retry.
#[derive(Debug, Deserialize, Clone)]
pub struct EnhanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub deskew: bool,
    #[serde(default = "default_true")]
    pub denoise: bool,
    /// Upscale 2x when the shorter side is below this many pixels.
    #[serde(default = "default_upscale_below_px")]
    pub upscale_below_px: u32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deskew: true,
            denoise: true,
            upscale_below_px: default_upscale_below_px(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_upscale_below_px() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `tesseract` or `disabled`.
    #[serde(default = "default_ocr_engine")]
    pub engine: String,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    /// Tesseract language list, e.g. `eng+ara`.
    #[serde(default = "default_ocr_languages")]
    pub languages: String,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: default_ocr_engine(),
            command: default_ocr_command(),
            languages: default_ocr_languages(),
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

fn default_ocr_engine() -> String {
    "tesseract".to_string()
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_languages() -> String {
    "eng+ara".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    /// Fraction of the previous chunk repeated at the start of the next.
    #[serde(default = "default_overlap")]
    pub overlap: f32,
    /// Filename/opening-text keywords that switch to section chunking.
    #[serde(default = "default_section_keywords")]
    pub section_keywords: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_tokens: default_min_tokens(),
            overlap: default_overlap(),
            section_keywords: default_section_keywords(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
            overlap: self.overlap,
        }
    }
}

fn default_max_tokens() -> usize {
    1000
}
fn default_min_tokens() -> usize {
    200
}
fn default_overlap() -> f32 {
    0.15
}
fn default_section_keywords() -> Vec<String> {
    ["incident", "maintenance", "work order", "log", "report"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash`, `openai`, `ollama` or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    /// Entries kept by the content-hash embedding cache (0 disables it).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> Option<usize> {
    Some(384)
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub default_mode: SearchMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
            default_mode: SearchMode::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self, top_k: Option<usize>) -> SearchParams {
        SearchParams {
            vector_weight: self.vector_weight,
            lexical_weight: self.lexical_weight,
            candidate_k: self.candidate_k,
            top_k: top_k.unwrap_or(self.top_k),
        }
    }
}

fn default_vector_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_candidate_k() -> usize {
    50
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerRuleConfig {
    pub category: String,
    pub reference_text: String,
    #[serde(default = "default_trigger_threshold")]
    pub threshold: f32,
}

impl TriggerRuleConfig {
    pub fn rule(&self) -> TriggerRule {
        TriggerRule {
            category: self.category.clone(),
            reference_text: self.reference_text.clone(),
            threshold: self.threshold,
        }
    }
}

fn default_trigger_threshold() -> f32 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Concurrent documents; 0 means available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// Documents fetched from a connector per round.
    #[serde(default = "default_pipeline_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cad_confidence_cap")]
    pub cad_confidence_cap: f32,
    #[serde(default)]
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            lease_timeout_secs: default_lease_timeout_secs(),
            batch_size: default_pipeline_batch_size(),
            cad_confidence_cap: default_cad_confidence_cap(),
            reconcile_policy: ReconcilePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

fn default_lease_timeout_secs() -> u64 {
    300
}
fn default_pipeline_batch_size() -> usize {
    32
}
fn default_cad_confidence_cap() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    /// POST every trigger event as JSON to this URL.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also append logs to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub tags: docgate_core::models::Tags,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate gate thresholds
    let g = &config.gate;
    if !(0.0 <= g.reject && g.reject <= g.enhance && g.enhance <= g.accept && g.accept <= 1.0) {
        bail!(
            "gate thresholds must satisfy 0 <= reject ({}) <= enhance ({}) <= accept ({}) <= 1",
            g.reject,
            g.enhance,
            g.accept
        );
    }

    // Validate quality
    let q = &config.quality;
    if q.size_warn_mb > q.size_max_mb {
        bail!("quality.size_warn_mb must not exceed quality.size_max_mb");
    }
    if q.density_poor_pct > q.density_good_pct {
        bail!("quality.density_poor_pct must not exceed quality.density_good_pct");
    }

    // Validate chunking
    config.chunking.params().validate()?;

    // Validate retrieval
    let r = &config.retrieval;
    if r.vector_weight < 0.0 || r.lexical_weight < 0.0 {
        bail!("retrieval weights must be non-negative");
    }
    if ((r.vector_weight + r.lexical_weight) - 1.0).abs() > 1e-6 {
        bail!(
            "retrieval.vector_weight + retrieval.lexical_weight must be 1.0, got {}",
            r.vector_weight + r.lexical_weight
        );
    }
    if r.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if r.candidate_k < r.top_k {
        bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }

    // Validate embedding
    let e = &config.embedding;
    match e.provider.as_str() {
        "hash" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if e.dims.is_none() || e.dims == Some(0) {
        bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
    }
    if e.is_remote() && e.model.is_none() {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            e.provider
        );
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate triggers
    for t in &config.triggers {
        if !(t.threshold > 0.0 && t.threshold <= 1.0) {
            bail!(
                "trigger '{}' threshold must be in (0, 1], got {}",
                t.category,
                t.threshold
            );
        }
        if t.reference_text.trim().is_empty() {
            bail!("trigger '{}' has an empty reference_text", t.category);
        }
    }

    // Validate pipeline
    if config.pipeline.lease_timeout_secs == 0 {
        bail!("pipeline.lease_timeout_secs must be > 0");
    }
    if config.pipeline.batch_size == 0 {
        bail!("pipeline.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.pipeline.cad_confidence_cap) {
        bail!("pipeline.cad_confidence_cap must be in [0.0, 1.0]");
    }

    match config.ocr.engine.as_str() {
        "tesseract" | "disabled" => {}
        other => bail!(
            "Unknown OCR engine: '{}'. Must be tesseract or disabled.",
            other
        ),
    }

    Ok(config)
}
