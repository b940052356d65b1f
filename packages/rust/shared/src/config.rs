//! Application configuration for ConceptGraph.
//!
//! User config lives at `~/.conceptgraph/conceptgraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConceptGraphError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "conceptgraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".conceptgraph";

// ---------------------------------------------------------------------------
// Config structs (matching conceptgraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Generation service settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Extraction channel settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Graph materialization settings.
    #[serde(default)]
    pub graph: GraphConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// libSQL database holding jobs and the concept graph.
    #[serde(default = "default_database")]
    pub database: String,

    /// Directory for content-addressed concept tree artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// URL prefix under which uploaded source documents are served.
    #[serde(default = "default_static_url")]
    pub static_url: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            output_dir: default_output_dir(),
            static_url: default_static_url(),
        }
    }
}

fn default_database() -> String {
    "var/conceptgraph.db".into()
}
fn default_output_dir() -> String {
    "data".into()
}
fn default_static_url() -> String {
    "/static/".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used to generate concept graphs.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the generation API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_timeout_secs() -> u64 {
    300
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Whether the OCR channel runs at all.
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,

    /// Path to the `tesseract` binary.
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,

    /// Path to the `pdftoppm` binary used to render PDF pages.
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: String,

    /// Render resolution for PDF pages.
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Tesseract language(s), e.g. `eng` or `eng+fra`.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            tesseract_path: default_tesseract_path(),
            pdftoppm_path: default_pdftoppm_path(),
            dpi: default_dpi(),
            language: default_language(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_tesseract_path() -> String {
    "tesseract".into()
}
fn default_pdftoppm_path() -> String {
    "pdftoppm".into()
}
fn default_dpi() -> u32 {
    200
}
fn default_language() -> String {
    "eng".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts for the hierarchy repair pass before the job fails.
    #[serde(default = "default_repair_attempts")]
    pub repair_attempts: u32,

    /// Delay between repair attempts in ms.
    #[serde(default = "default_repair_retry_delay_ms")]
    pub repair_retry_delay_ms: u64,

    /// Poll interval of the progress feed in ms.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repair_attempts: default_repair_attempts(),
            repair_retry_delay_ms: default_repair_retry_delay_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

fn default_repair_attempts() -> u32 {
    3
}
fn default_repair_retry_delay_ms() -> u64 {
    1000
}
fn default_progress_interval_ms() -> u64 {
    1000
}

/// `[graph]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Relation names accepted from `connections`. Empty accepts any
    /// identifier-shaped name.
    #[serde(default)]
    pub allowed_relations: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.conceptgraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConceptGraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.conceptgraph/conceptgraph.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ConceptGraphError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ConceptGraphError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ConceptGraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ConceptGraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConceptGraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the generation API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.generation.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ConceptGraphError::config(format!(
            "generation API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("GOOGLE_API_KEY"));
        assert!(toml_str.contains("repair_attempts"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
database = "/tmp/cg.db"

[graph]
allowed_relations = ["PREREQUISITE_FOR", "DEPENDS_ON"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.database, "/tmp/cg.db");
        assert_eq!(config.defaults.static_url, "/static/");
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.extraction.dpi, 200);
        assert_eq!(config.pipeline.repair_attempts, 3);
        assert_eq!(config.pipeline.progress_interval_ms, 1000);
        assert_eq!(config.graph.allowed_relations.len(), 2);
    }

    #[test]
    fn config_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("cg_config_{}.toml", uuid::Uuid::now_v7()));
        let mut config = AppConfig::default();
        config.extraction.ocr_enabled = false;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = load_config_from(&path).expect("load");
        assert!(!loaded.extraction.ocr_enabled);
        assert_eq!(loaded.extraction.language, "eng");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.generation.api_key_env = "CG_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
