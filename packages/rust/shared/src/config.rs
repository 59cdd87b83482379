//! Application configuration for benchforge.
//!
//! User config lives at `~/.benchforge/benchforge.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored here, only the names of the env vars holding them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "benchforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".benchforge";

// ---------------------------------------------------------------------------
// Config structs (matching benchforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Generative completion service.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Embedding service used for capability classification.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Remote dataset store (Langfuse).
    #[serde(default)]
    pub dataset_store: DatasetStoreConfig,

    /// Corpus sources on the Hugging Face hub.
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Annotation prompt settings.
    #[serde(default)]
    pub annotation: AnnotationConfig,

    /// Keyword + magnitude selection settings.
    #[serde(default)]
    pub keyword: KeywordConfig,

    /// Capability descriptors used by the similarity classifier.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<CapabilityConfig>,

    /// Ordered operation rules; the first matching label wins.
    #[serde(default = "default_operations")]
    pub operations: Vec<OperationRule>,

    /// Dataset name → benchmark file mapping used by `upload`.
    #[serde(default = "default_uploads")]
    pub uploads: Vec<UploadTarget>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            dataset_store: DatasetStoreConfig::default(),
            corpus: CorpusConfig::default(),
            annotation: AnnotationConfig::default(),
            keyword: KeywordConfig::default(),
            capabilities: default_capabilities(),
            operations: default_operations(),
            uploads: default_uploads(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory benchmark files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum items kept per (level, capability) bucket.
    #[serde(default = "default_quota_per_capability")]
    pub quota_per_capability: usize,

    /// Local database for the annotation cache and the offline dataset store.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            quota_per_capability: default_quota_per_capability(),
            db_path: default_db_path(),
        }
    }
}

fn default_output_dir() -> String {
    "datasets".into()
}
fn default_quota_per_capability() -> usize {
    5
}
fn default_db_path() -> String {
    "var/benchforge.db".into()
}

/// `[completion]` section (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_completion_key_env")]
    pub api_key_env: String,

    /// Model used for annotation.
    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            api_key_env: default_completion_key_env(),
            model: default_completion_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_completion_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_completion_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_completion_model() -> String {
    "google/gemini-2.5-flash".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[embedding]` section (OpenAI-compatible embeddings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_key_env(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_key_env() -> String {
    "EMBEDDING_API_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

/// `[dataset_store]` section (Langfuse public API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStoreConfig {
    /// Env var holding the store base URL.
    #[serde(default = "default_host_env")]
    pub host_env: String,

    #[serde(default = "default_public_key_env")]
    pub public_key_env: String,

    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,

    /// Env var holding an optional PEM CA bundle path (air-gapped installs).
    #[serde(default = "default_ca_bundle_env")]
    pub ca_bundle_env: String,

    /// Number of buffered item inserts that triggers a drain.
    #[serde(default = "default_flush_at")]
    pub flush_at: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DatasetStoreConfig {
    fn default() -> Self {
        Self {
            host_env: default_host_env(),
            public_key_env: default_public_key_env(),
            secret_key_env: default_secret_key_env(),
            ca_bundle_env: default_ca_bundle_env(),
            flush_at: default_flush_at(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_host_env() -> String {
    "LANGFUSE_HOST".into()
}
fn default_public_key_env() -> String {
    "LANGFUSE_PUBLIC_KEY".into()
}
fn default_secret_key_env() -> String {
    "LANGFUSE_SECRET_KEY".into()
}
fn default_ca_bundle_env() -> String {
    "REQUESTS_CA_BUNDLE".into()
}
fn default_flush_at() -> usize {
    15
}

/// `[corpus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Base URL of the Hugging Face datasets-server.
    #[serde(default = "default_hub_base_url")]
    pub hub_base_url: String,

    /// Env var holding the hub token (GAIA is gated).
    #[serde(default = "default_hub_token_env")]
    pub token_env: String,

    #[serde(default = "default_gaia_dataset")]
    pub gaia: HubDatasetConfig,

    #[serde(default = "default_gsm8k_dataset")]
    pub gsm8k: HubDatasetConfig,

    /// Per-request timeout for hub page fetches.
    #[serde(default = "default_hub_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            hub_base_url: default_hub_base_url(),
            token_env: default_hub_token_env(),
            gaia: default_gaia_dataset(),
            gsm8k: default_gsm8k_dataset(),
            timeout_secs: default_hub_timeout_secs(),
        }
    }
}

fn default_hub_timeout_secs() -> u64 {
    60
}

/// A dataset/config/split triple on the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubDatasetConfig {
    pub dataset: String,
    pub config: String,
    pub split: String,
}

fn default_hub_base_url() -> String {
    "https://datasets-server.huggingface.co".into()
}
fn default_hub_token_env() -> String {
    "HF_TOKEN".into()
}
fn default_gaia_dataset() -> HubDatasetConfig {
    HubDatasetConfig {
        dataset: "gaia-benchmark/GAIA".into(),
        config: "2023_all".into(),
        split: "validation".into(),
    }
}
fn default_gsm8k_dataset() -> HubDatasetConfig {
    HubDatasetConfig {
        dataset: "openai/gsm8k".into(),
        config: "main".into(),
        split: "train".into(),
    }
}

/// `[annotation]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// JSON file replacing the built-in node prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_prompts_path: Option<String>,
}

/// `[keyword]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Maximum items kept per operation label.
    #[serde(default = "default_keyword_quota")]
    pub quota: usize,

    /// A question qualifies only if its largest number exceeds this.
    #[serde(default = "default_magnitude_threshold")]
    pub magnitude_threshold: f64,

    /// Tone recorded in `expected_behavior`.
    #[serde(default = "default_tone")]
    pub tone: String,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            quota: default_keyword_quota(),
            magnitude_threshold: default_magnitude_threshold(),
            tone: default_tone(),
        }
    }
}

fn default_keyword_quota() -> usize {
    10
}
fn default_magnitude_threshold() -> f64 {
    5000.0
}
fn default_tone() -> String {
    "professional and precise".into()
}

/// `[[capabilities]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub id: String,
    pub description: String,
}

fn default_capabilities() -> Vec<CapabilityConfig> {
    vec![
        CapabilityConfig {
            id: "direct_answer".into(),
            description: "General reasoning, logic, or questions that can be answered using \
                          internal knowledge without external data lookup."
                .into(),
        },
        CapabilityConfig {
            id: "sql_trino".into(),
            description: "Querying internal databases and structured tables. Use this for any \
                          specific data points, records, or facts stored in the organization's \
                          datasets via Trino SQL."
                .into(),
        },
        CapabilityConfig {
            id: "calculator".into(),
            description: "Mathematical computations, percentages, and statistical analysis on \
                          provided or retrieved numbers."
                .into(),
        },
    ]
}

/// `[[operations]]` entry: a label and the keywords that select it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRule {
    pub label: String,
    pub keywords: Vec<String>,
}

fn default_operations() -> Vec<OperationRule> {
    let rule = |label: &str, keywords: &[&str]| OperationRule {
        label: label.into(),
        keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
    };
    vec![
        rule("division", &["divide", "divided by", "/"]),
        rule("multiplication", &["multiply", "multiplied by", "times", "*"]),
        rule("addition", &["add", "sum", "total", "plus", "+"]),
        rule("subtraction", &["subtract", "minus", "difference", "-"]),
        rule("exponent", &["power of", "square", "cube", "exponent"]),
    ]
}

/// `[[uploads]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub dataset_name: String,
    pub file: String,
}

fn default_uploads() -> Vec<UploadTarget> {
    vec![
        UploadTarget {
            dataset_name: "GSM8K-Math-Benchmark-v1".into(),
            file: "datasets/gsm8k_advanced_math_benchmark.json".into(),
        },
        UploadTarget {
            dataset_name: "GAIA-node-reasoning-levels-123-v1".into(),
            file: "datasets/gaia_node_annotated_benchmark.json".into(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check every invariant the pipeline relies on. Run once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.capabilities.is_empty() {
            return Err(BenchError::config("no capabilities configured"));
        }
        let mut seen = HashSet::new();
        for cap in &self.capabilities {
            if cap.id.trim().is_empty() {
                return Err(BenchError::config("capability with empty id"));
            }
            if cap.description.trim().is_empty() {
                return Err(BenchError::config(format!(
                    "capability '{}' has an empty description",
                    cap.id
                )));
            }
            if !seen.insert(cap.id.as_str()) {
                return Err(BenchError::config(format!(
                    "duplicate capability id '{}'",
                    cap.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.operations {
            if rule.label.trim().is_empty() {
                return Err(BenchError::config("operation rule with empty label"));
            }
            if !seen.insert(rule.label.as_str()) {
                return Err(BenchError::config(format!(
                    "duplicate operation label '{}'",
                    rule.label
                )));
            }
            if rule.keywords.is_empty() {
                return Err(BenchError::config(format!(
                    "operation '{}' has no keywords",
                    rule.label
                )));
            }
            if rule.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(BenchError::config(format!(
                    "operation '{}' has a blank keyword",
                    rule.label
                )));
            }
        }

        if self.defaults.quota_per_capability == 0 || self.keyword.quota == 0 {
            return Err(BenchError::config("quotas must be at least 1"));
        }
        if !self.keyword.magnitude_threshold.is_finite() {
            return Err(BenchError::config("magnitude_threshold must be finite"));
        }
        if self.dataset_store.flush_at == 0 {
            return Err(BenchError::config("dataset_store.flush_at must be at least 1"));
        }

        for (name, base) in [
            ("completion.base_url", &self.completion.base_url),
            ("embedding.base_url", &self.embedding.base_url),
            ("corpus.hub_base_url", &self.corpus.hub_base_url),
        ] {
            url::Url::parse(base)
                .map_err(|e| BenchError::config(format!("invalid {name} '{base}': {e}")))?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.benchforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| BenchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.benchforge/benchforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BenchError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BenchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BenchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BenchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a required secret from the named env var.
pub fn resolve_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(BenchError::config(format!(
            "missing credential: set the {var_name} environment variable"
        ))),
    }
}

/// Read an optional secret; unset and empty are both `None`.
pub fn optional_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .filter(|val| !val.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("LANGFUSE_PUBLIC_KEY"));
        assert!(toml_str.contains("[[capabilities]]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.quota_per_capability, 5);
        assert_eq!(parsed.capabilities, config.capabilities);
        assert_eq!(parsed.operations, config.operations);
        assert_eq!(parsed.keyword.magnitude_threshold, 5000.0);
    }

    #[test]
    fn default_config_is_valid() {
        AppConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn operations_keep_file_order() {
        let toml_str = r#"
[[operations]]
label = "percent"
keywords = ["percent", "%"]

[[operations]]
label = "average"
keywords = ["average", "mean"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let labels: Vec<_> = config.operations.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["percent", "average"]);
        // Unspecified tables fall back to defaults.
        assert_eq!(config.capabilities.len(), 3);
    }

    #[test]
    fn empty_capabilities_rejected() {
        let mut config = AppConfig::default();
        config.capabilities.clear();
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("no capabilities"));
    }

    #[test]
    fn duplicate_capability_rejected() {
        let mut config = AppConfig::default();
        config.capabilities.push(config.capabilities[0].clone());
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn keywordless_operation_rejected() {
        let mut config = AppConfig::default();
        config.operations.push(OperationRule {
            label: "modulo".into(),
            keywords: vec![],
        });
        assert!(config.validate().unwrap_err().to_string().contains("no keywords"));
    }

    #[test]
    fn blank_keyword_among_others_rejected() {
        let mut config = AppConfig::default();
        config.operations[0].keywords.push(" ".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("blank keyword"));
    }

    #[test]
    fn mixed_case_keywords_accepted() {
        let mut config = AppConfig::default();
        config.operations.push(OperationRule {
            label: "percent".into(),
            keywords: vec!["Percent".into()],
        });
        config.validate().expect("mixed case is allowed");
    }

    #[test]
    fn corpus_timeout_independent_of_completion() {
        assert_eq!(AppConfig::default().corpus.timeout_secs, 60);

        let config: AppConfig = toml::from_str(
            r#"
[completion]
timeout_secs = 300

[corpus]
timeout_secs = 15
"#,
        )
        .expect("parse timeouts");
        assert_eq!(config.completion.timeout_secs, 300);
        assert_eq!(config.corpus.timeout_secs, 15);

        let config: AppConfig = toml::from_str("[completion]\ntimeout_secs = 300\n").unwrap();
        assert_eq!(config.corpus.timeout_secs, 60);
    }

    #[test]
    fn zero_quota_rejected() {
        let mut config = AppConfig::default();
        config.keyword.quota = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_secret_is_config_error() {
        // Use a unique env var name to avoid interfering with other tests
        let result = resolve_secret("BF_TEST_NONEXISTENT_KEY_12345");
        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("BF_TEST_NONEXISTENT_KEY_12345"));
        assert!(optional_secret("BF_TEST_NONEXISTENT_KEY_12345").is_none());
    }
}
