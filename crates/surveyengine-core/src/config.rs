use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8099;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_CHECKPOINT_TTL_SECS: u64 = 60 * 60 * 24;

/// Environment selector named in the Configuration section of the
/// external-interfaces spec: `local|test|prod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Test,
    Prod,
}

/// Top-level config (survey.toml + SURVEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub chat_log: ChatLogConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub template_store: TemplateStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port(), bind: default_bind() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_provider")]
    pub provider: String,
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_oracle_provider(),
            base_url: default_oracle_base_url(),
            api_key: String::new(),
            model: default_oracle_model(),
            timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

/// Embedding/vector-store credentials. Kept as a validated, inert config
/// section — the engine itself never calls out to it, since ancillary
/// memory is out of scope, but a complete deployment config still needs
/// one place to configure every model credential.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_node")]
    pub node: String,
    #[serde(default = "default_checkpoint_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_checkpoint_pool_size")]
    pub pool_size: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            node: default_checkpoint_node(),
            ttl_secs: default_checkpoint_ttl_secs(),
            pool_size: default_checkpoint_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogConfig {
    #[serde(default = "default_chat_log_dir")]
    pub directory: String,
}

impl Default for ChatLogConfig {
    fn default() -> Self {
        Self { directory: default_chat_log_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStoreKind {
    #[default]
    File,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStoreConfig {
    #[serde(default)]
    pub kind: TemplateStoreKind,
    #[serde(default = "default_template_file_path")]
    pub file_path: String,
}

impl Default for TemplateStoreConfig {
    fn default() -> Self {
        Self { kind: TemplateStoreKind::default(), file_path: default_template_file_path() }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_oracle_provider() -> String {
    "openai-compatible".to_string()
}
fn default_oracle_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_oracle_timeout_ms() -> u64 {
    30_000
}
fn default_checkpoint_node() -> String {
    "memory://local".to_string()
}
fn default_checkpoint_ttl_secs() -> u64 {
    DEFAULT_CHECKPOINT_TTL_SECS
}
fn default_checkpoint_pool_size() -> u32 {
    8
}
fn default_chat_log_dir() -> String {
    "logs/chat_logs".to_string()
}
fn default_db_path() -> String {
    "survey.db".to_string()
}
fn default_template_file_path() -> String {
    "template/survey_template.json".to_string()
}

impl SurveyConfig {
    /// Load config from a TOML file with SURVEY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("survey.toml");

        let config: SurveyConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SURVEY_").split("_"))
            .extract()
            .map_err(|e| crate::error::SurveyError::Config(e.to_string()))?;

        Ok(config)
    }
}
