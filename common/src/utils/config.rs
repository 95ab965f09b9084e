use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnv {
    Development,
    Production,
}

fn default_env() -> RuntimeEnv {
    RuntimeEnv::Development
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    /// Document store endpoint, e.g. `ws://localhost:8000` or `mem://`.
    pub store_uri: String,
    pub database_name: String,
    #[serde(default = "default_namespace")]
    pub store_namespace: String,
    #[serde(default = "default_store_credential")]
    pub store_username: String,
    #[serde(default = "default_store_credential")]
    pub store_password: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Optional bearer token raising the source host rate ceiling.
    #[serde(default)]
    pub source_host_token: Option<String>,
    #[serde(default)]
    pub ai_api_key: Option<String>,
    #[serde(default)]
    pub ai_provider: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Shared secret checked against `X-API-Key` outside development.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_env")]
    pub env: RuntimeEnv,
}

fn default_namespace() -> String {
    "codemap".to_string()
}

fn default_store_credential() -> String {
    "root".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.env == RuntimeEnv::Development
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
