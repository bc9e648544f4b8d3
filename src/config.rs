//! TOML configuration.
//!
//! Every section except `[db]` and `[library]` is optional and falls back
//! to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/paperweave.sqlite"
//!
//! [library]
//! input_dir = "~/papers/inbox"
//! output_dir = "~/papers/archive"
//! archive_mode = "copy"          # or "move"
//!
//! [classifier]
//! provider = "openai"            # or "disabled"
//! base_url = "https://api.deepseek.com/v1"
//! model = "deepseek-chat"
//! taxonomy = ["Computer Science/Machine Learning", "Biology/Genomics"]
//!
//! [graph]
//! similarity_threshold = 0.2
//! cluster_min_size = 3
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use paperweave_core::authors::AuthorRules;
use paperweave_core::graph::GraphParams;
use paperweave_core::metadata::HeuristicLimits;
use paperweave_core::taxonomy::{normalize_path, UNCLASSIFIED_ROOT};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub authors: AuthorsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Leave the input file in place and archive a copy.
    #[default]
    Copy,
    /// Remove the input file once the archive copy is committed.
    Move,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub archive_mode: ArchiveMode,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.PDF".to_string()]
}
fn default_max_file_bytes() -> u64 {
    200 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_abstract_chars")]
    pub max_abstract_chars: usize,
    #[serde(default = "default_max_authors")]
    pub max_authors: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_extraction_timeout(),
            max_pages: default_max_pages(),
            max_abstract_chars: default_max_abstract_chars(),
            max_authors: default_max_authors(),
            max_keywords: default_max_keywords(),
        }
    }
}

impl ExtractionConfig {
    pub fn limits(&self) -> HeuristicLimits {
        HeuristicLimits {
            max_abstract_chars: self.max_abstract_chars,
            max_authors: self.max_authors,
            max_keywords: self.max_keywords,
        }
    }
}

fn default_extraction_timeout() -> u64 {
    30
}
fn default_max_pages() -> u32 {
    5
}
fn default_max_abstract_chars() -> usize {
    2000
}
fn default_max_authors() -> usize {
    10
}
fn default_max_keywords() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to `PAPERWEAVE_API_KEY`, then `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_min_match_similarity")]
    pub min_match_similarity: f64,
    /// Subject paths, segments separated by `/`.
    #[serde(default)]
    pub taxonomy: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_classifier_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
            min_match_similarity: default_min_match_similarity(),
            taxonomy: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("PAPERWEAVE_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_attempts() -> u32 {
    4
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_classifier_timeout() -> u64 {
    60
}
fn default_max_concurrent_requests() -> usize {
    2
}
fn default_min_match_similarity() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_cluster_min_size")]
    pub cluster_min_size: usize,
    #[serde(default = "default_full_rebuild_cutoff")]
    pub full_rebuild_cutoff: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            cluster_min_size: default_cluster_min_size(),
            full_rebuild_cutoff: default_full_rebuild_cutoff(),
        }
    }
}

impl GraphConfig {
    pub fn params(&self) -> GraphParams {
        GraphParams {
            similarity_threshold: self.similarity_threshold,
            cluster_min_size: self.cluster_min_size,
            full_rebuild_cutoff: self.full_rebuild_cutoff,
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.2
}
fn default_cluster_min_size() -> usize {
    3
}
fn default_full_rebuild_cutoff() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorsConfig {
    #[serde(default = "default_true")]
    pub strip_diacritics: bool,
    #[serde(default = "default_true")]
    pub collapse_given_names: bool,
}

impl Default for AuthorsConfig {
    fn default() -> Self {
        Self {
            strip_diacritics: true,
            collapse_given_names: true,
        }
    }
}

impl AuthorsConfig {
    pub fn rules(&self) -> AuthorRules {
        AuthorRules {
            strip_diacritics: self.strip_diacritics,
            collapse_given_names: self.collapse_given_names,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.workers == 0 {
        anyhow::bail!("pipeline.workers must be > 0");
    }

    if config.extraction.timeout_secs == 0 {
        anyhow::bail!("extraction.timeout_secs must be > 0");
    }
    if config.extraction.max_pages == 0 {
        anyhow::bail!("extraction.max_pages must be > 0");
    }

    if !(0.0..=1.0).contains(&config.graph.similarity_threshold) {
        anyhow::bail!("graph.similarity_threshold must be in [0.0, 1.0]");
    }

    let classifier = &config.classifier;
    match classifier.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown classifier provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if classifier.max_attempts == 0 {
        anyhow::bail!("classifier.max_attempts must be > 0");
    }
    if classifier.max_concurrent_requests == 0 {
        anyhow::bail!("classifier.max_concurrent_requests must be > 0");
    }
    if !(0.0..=1.0).contains(&classifier.min_match_similarity) {
        anyhow::bail!("classifier.min_match_similarity must be in [0.0, 1.0]");
    }
    for raw in &classifier.taxonomy {
        let Some(path) = normalize_path(raw) else {
            anyhow::bail!("classifier.taxonomy contains an empty path");
        };
        let root = path.split('/').next().unwrap_or_default();
        if root.eq_ignore_ascii_case(UNCLASSIFIED_ROOT) {
            anyhow::bail!(
                "classifier.taxonomy path '{}' uses the reserved '{}' root",
                raw,
                UNCLASSIFIED_ROOT
            );
        }
    }

    if config.library.input_dir == config.library.output_dir {
        anyhow::bail!("library.input_dir and library.output_dir must differ");
    }

    Ok(config)
}
