use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_standards_dir")]
    pub standards_dir: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default = "default_keyword_db")]
    pub keyword_db: PathBuf,
    #[serde(default = "default_feedback")]
    pub feedback: PathBuf,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_usage_log")]
    pub usage_log: PathBuf,
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            standards_dir: default_standards_dir(),
            index_dir: default_index_dir(),
            manifest: default_manifest(),
            keyword_db: default_keyword_db(),
            feedback: default_feedback(),
            uploads_dir: default_uploads_dir(),
            results_dir: default_results_dir(),
            usage_log: default_usage_log(),
            system_prompt: None,
        }
    }
}

fn default_standards_dir() -> PathBuf {
    PathBuf::from("din_norms")
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("din_norms/din_index")
}
fn default_manifest() -> PathBuf {
    PathBuf::from("din_norms/processing_metadata.json")
}
fn default_keyword_db() -> PathBuf {
    PathBuf::from("din_norms/simple_din_db.json")
}
fn default_feedback() -> PathBuf {
    PathBuf::from("din_norms/feedback_db.json")
}
fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("analysis_results")
}
fn default_usage_log() -> PathBuf {
    PathBuf::from("usage_log.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    100
}
fn default_min_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_ocr_threshold_chars")]
    pub ocr_threshold_chars: usize,
    #[serde(default = "default_ocr_max_pages")]
    pub ocr_max_pages: u32,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_true")]
    pub vision_enabled: bool,
    #[serde(default = "default_vision_max_pages")]
    pub vision_max_pages: u32,
    #[serde(default = "default_vision_dpi")]
    pub vision_dpi: u32,
    #[serde(default = "default_vision_delay_ms")]
    pub vision_delay_ms: u64,
    #[serde(default = "default_vision_keywords")]
    pub vision_keywords: Vec<String>,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            ocr_enabled: true,
            ocr_threshold_chars: default_ocr_threshold_chars(),
            ocr_max_pages: default_ocr_max_pages(),
            ocr_dpi: default_ocr_dpi(),
            ocr_language: default_ocr_language(),
            vision_enabled: true,
            vision_max_pages: default_vision_max_pages(),
            vision_dpi: default_vision_dpi(),
            vision_delay_ms: default_vision_delay_ms(),
            vision_keywords: default_vision_keywords(),
            vision_model: default_vision_model(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["*.pdf".to_string()]
}
fn default_ocr_threshold_chars() -> usize {
    500
}
fn default_ocr_max_pages() -> u32 {
    10
}
fn default_ocr_dpi() -> u32 {
    200
}
fn default_ocr_language() -> String {
    "deu+eng".to_string()
}
fn default_vision_max_pages() -> u32 {
    5
}
fn default_vision_dpi() -> u32 {
    150
}
fn default_vision_delay_ms() -> u64 {
    1000
}
fn default_vision_keywords() -> Vec<String> {
    [
        "din",
        "ril",
        "ztv",
        "technical",
        "engineering",
        "bau",
        "construction",
        "standard",
        "norm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of the provider API. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    0
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_context_k")]
    pub context_k: usize,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_query_chars")]
    pub query_chars: usize,
    #[serde(default = "default_payload_chars")]
    pub payload_chars: usize,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: default_analysis_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            retrieval_k: default_retrieval_k(),
            context_k: default_context_k(),
            context_chars: default_context_chars(),
            query_chars: default_query_chars(),
            payload_chars: default_payload_chars(),
            api_base: default_api_base(),
        }
    }
}

fn default_analysis_model() -> String {
    "gpt-4".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_retrieval_k() -> usize {
    8
}
fn default_context_k() -> usize {
    5
}
fn default_context_chars() -> usize {
    800
}
fn default_query_chars() -> usize {
    2000
}
fn default_payload_chars() -> usize {
    3000
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_max_monthly")]
    pub max_monthly: f64,
    #[serde(default = "default_warn_at")]
    pub warn_at: f64,
    #[serde(default = "default_cost_per_1k_tokens")]
    pub cost_per_1k_tokens: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_monthly: default_max_monthly(),
            warn_at: default_warn_at(),
            cost_per_1k_tokens: default_cost_per_1k_tokens(),
        }
    }
}

fn default_max_monthly() -> f64 {
    20.0
}
fn default_warn_at() -> f64 {
    15.0
}
fn default_cost_per_1k_tokens() -> f64 {
    0.03
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    // Validate extraction
    if config.extraction.include_globs.is_empty() {
        anyhow::bail!("extraction.include_globs must not be empty");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate analysis
    if config.analysis.retrieval_k == 0 || config.analysis.context_k == 0 {
        anyhow::bail!("analysis.retrieval_k and analysis.context_k must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.analysis.temperature) {
        anyhow::bail!("analysis.temperature must be in [0.0, 2.0]");
    }

    // Validate budget
    if config.budget.max_monthly <= 0.0 || config.budget.warn_at > config.budget.max_monthly {
        anyhow::bail!("budget.max_monthly must be > 0 and >= budget.warn_at");
    }

    Ok(())
}
