use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_CONFIG_PATH: &str = "RISK_INTEL_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_CANDIDATE_MODEL: &str = "CANDIDATE_MODEL";
const ENV_UPLOAD_DIR: &str = "UPLOAD_DIR";
const ENV_ALLOWED_ROLES: &str = "ALLOWED_ROLES";
const ENV_INGESTION_SYNC: &str = "INGESTION_SYNC";
const ENV_STORE: &str = "RISK_INTEL_STORE";
const ENV_BROWSERLESS_URL: &str = "BROWSERLESS_URL";
const ENV_BROWSERLESS_TOKEN: &str = "BROWSERLESS_TOKEN";

const DEFAULT_CANDIDATE_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_ALLOWED_ROLES: &str = "Analyst,Reviewer,Admin";

/// Thresholds and windows used while analysing a document
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum overlap score for a claim-to-snippet link
    pub citation_min_score: f64,
    /// Similarity at which a new document is annotated as a near-duplicate
    pub near_duplicate_threshold: f64,
    /// Evidence snippets persisted per document
    pub max_evidence_snippets: usize,
    pub recent_window_days: i64,
    /// Total lookback; the baseline window is `lookback_days - recent_window_days`
    pub lookback_days: i64,
    /// A `processing` job younger than this is left to the worker that started it
    pub processing_lease_secs: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            citation_min_score: 0.15,
            near_duplicate_threshold: 0.9,
            max_evidence_snippets: 500,
            recent_window_days: 14,
            lookback_days: 70,
            processing_lease_secs: 900,
        }
    }
}

/// Content extraction limits and the optional headless renderer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub fetch_timeout_secs: u64,
    pub render_timeout_secs: u64,
    /// Browserless base URL; page rendering is skipped when absent
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub max_paragraph_snippets: usize,
    pub max_snippet_chars: usize,
    pub max_page_snippet_chars: usize,
    /// Below this length the readable region is discarded for the whole page
    pub min_main_content_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 25,
            render_timeout_secs: 30,
            browserless_url: None,
            browserless_token: None,
            max_paragraph_snippets: 300,
            max_snippet_chars: 2000,
            max_page_snippet_chars: 2500,
            min_main_content_chars: 300,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Enables the model-backed candidate strategy when set
    pub openai_api_key: Option<String>,
    pub model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: DEFAULT_CANDIDATE_MODEL.to_string(),
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub allowed_roles: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allowed_roles: parse_roles(DEFAULT_ALLOWED_ROLES),
        }
    }
}

impl AuthConfig {
    pub fn is_role_allowed(&self, role: &str) -> bool {
        self.allowed_roles.iter().any(|r| r == role)
    }
}

/// Persistence backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingestion_sync: Option<bool>,
    #[serde(default)]
    pub store: Option<StoreBackend>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub extraction: ExtractionConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    /// Process ingestions inside the request instead of queueing them
    pub ingestion_sync: bool,
    pub store: StoreBackend,
    pub port: u16,
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            extraction: ExtractionConfig::default(),
            generation: GenerationConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            ingestion_sync: true,
            store: StoreBackend::default(),
            port: 8080,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let config_path = std::env::var(ENV_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = Self::load_config_file(&config_path).unwrap_or_default();

        Self::from_file(file).with_env_overrides(|key| std::env::var(key).ok())
    }

    fn from_file(file: ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            pipeline: file.pipeline,
            extraction: file.extraction,
            generation: file.generation,
            storage: file.storage,
            auth: file.auth,
            ingestion_sync: file.ingestion_sync.unwrap_or(defaults.ingestion_sync),
            store: file.store.unwrap_or(defaults.store),
            ..defaults
        }
    }

    /// Environment variables win over the config file
    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(key) = var(ENV_OPENAI_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.generation.openai_api_key = Some(key);
        }
        if let Some(model) = var(ENV_CANDIDATE_MODEL) {
            self.generation.model = model;
        }
        if let Some(dir) = var(ENV_UPLOAD_DIR) {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(roles) = var(ENV_ALLOWED_ROLES) {
            self.auth.allowed_roles = parse_roles(&roles);
        }
        if let Some(sync) = var(ENV_INGESTION_SYNC).and_then(|v| parse_bool(&v)) {
            self.ingestion_sync = sync;
        }
        match var(ENV_STORE).as_deref() {
            Some("memory") => self.store = StoreBackend::Memory,
            Some("postgres") => self.store = StoreBackend::Postgres,
            Some(other) => {
                tracing::warn!(value = %other, "Unknown store backend, keeping configured value");
            }
            None => {}
        }
        if let Some(url) = var(ENV_BROWSERLESS_URL) {
            self.extraction.browserless_url = Some(url);
        }
        if let Some(token) = var(ENV_BROWSERLESS_TOKEN) {
            self.extraction.browserless_token = Some(token);
        }
        self
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => {
                let contents = contents.trim();
                if contents.is_empty() {
                    tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
                    return Some(ConfigFile::default());
                }

                match serde_yaml::from_str(contents) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "Loaded configuration from file");
                        Some(config)
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.citation_min_score, 0.15);
        assert_eq!(config.pipeline.max_evidence_snippets, 500);
        assert_eq!(config.extraction.fetch_timeout_secs, 25);
        assert_eq!(config.generation.model, "gpt-4.1-mini");
        assert_eq!(config.auth.allowed_roles, vec!["Analyst", "Reviewer", "Admin"]);
        assert!(config.ingestion_sync);
        assert_eq!(config.store, StoreBackend::Postgres);
    }

    #[test]
    fn test_yaml_sections_override_defaults() {
        let yaml = r#"
pipeline:
  citation_min_score: 0.25
extraction:
  browserless_url: "http://browserless:3000"
store: memory
ingestion_sync: false
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let config = Config::from_file(file);

        assert_eq!(config.pipeline.citation_min_score, 0.25);
        assert_eq!(config.pipeline.lookback_days, 70);
        assert_eq!(config.pipeline.processing_lease_secs, 900);
        assert_eq!(
            config.extraction.browserless_url.as_deref(),
            Some("http://browserless:3000")
        );
        assert_eq!(config.extraction.max_snippet_chars, 2000);
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(!config.ingestion_sync);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9090"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ALLOWED_ROLES", " Reviewer , Admin ,"),
            ("INGESTION_SYNC", "false"),
            ("RISK_INTEL_STORE", "memory"),
        ]);
        let config =
            Config::default().with_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, 9090);
        assert_eq!(config.generation.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.auth.allowed_roles, vec!["Reviewer", "Admin"]);
        assert!(!config.auth.is_role_allowed("Analyst"));
        assert!(!config.ingestion_sync);
        assert_eq!(config.store, StoreBackend::Memory);
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let config = Config::default()
            .with_env_overrides(|k| (k == "OPENAI_API_KEY").then(|| "  ".to_string()));
        assert!(config.generation.openai_api_key.is_none());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let generation = GenerationConfig {
            openai_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", generation);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
