use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::extract::DEFAULT_MAX_XML_ENTRY_BYTES;
use crate::extraction::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PDF_WORKERS};

/// Environment variable that overrides `[backend].url`.
pub const ENV_BACKEND_URL: &str = "RAG_API_URL";
/// Environment variable that overrides `[store].url`.
pub const ENV_STORE_URL: &str = "STORE_URL";
/// Environment variable holding the hosted store's service key.
pub const ENV_STORE_KEY: &str = "STORE_SERVICE_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_add_timeout_secs")]
    pub add_timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            add_timeout_secs: default_add_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_add_timeout_secs() -> u64 {
    30
}
fn default_query_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_max_xml_entry_bytes")]
    pub max_xml_entry_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_xml_entry_bytes: default_max_xml_entry_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}
fn default_max_xml_entry_bytes() -> u64 {
    DEFAULT_MAX_XML_ENTRY_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct PdfConfig {
    #[serde(default = "default_pdf_workers")]
    pub workers: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            workers: default_pdf_workers(),
        }
    }
}

fn default_pdf_workers() -> usize {
    DEFAULT_PDF_WORKERS
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            url: None,
        }
    }
}

fn default_store_provider() -> String {
    "memory".to_string()
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
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// All defaults plus environment overrides; used when no file is present.
    pub fn minimal() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Some(url) = non_empty_env(ENV_BACKEND_URL) {
            self.backend.url = Some(url);
        }
        if let Some(url) = non_empty_env(ENV_STORE_URL) {
            self.store.url = Some(url);
        }
    }

    /// The backend base URL without a trailing slash, if configured.
    pub fn backend_url(&self) -> Option<&str> {
        self.backend
            .url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_env();
    validate(&config)?;
    Ok(config)
}

/// Parses and validates config text without consulting the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.upload.max_bytes == 0 {
        anyhow::bail!("upload.max_bytes must be > 0");
    }
    if config.upload.max_xml_entry_bytes == 0 {
        anyhow::bail!("upload.max_xml_entry_bytes must be > 0");
    }
    if config.pdf.workers == 0 {
        anyhow::bail!("pdf.workers must be >= 1");
    }
    if config.backend.add_timeout_secs == 0 || config.backend.query_timeout_secs == 0 {
        anyhow::bail!("backend timeouts must be > 0");
    }

    match config.store.provider.as_str() {
        "memory" => {}
        "postgrest" => {
            if config.store.url.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!(
                    "store.url (or {}) must be set when provider is 'postgrest'",
                    ENV_STORE_URL
                );
            }
        }
        other => anyhow::bail!(
            "Unknown store provider: '{}'. Must be memory or postgrest.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.upload.max_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.backend.add_timeout_secs, 30);
        assert_eq!(cfg.backend.query_timeout_secs, 60);
        assert_eq!(cfg.pdf.workers, 2);
        assert_eq!(cfg.store.provider, "memory");
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
        assert!(cfg.backend_url().is_none());
    }

    #[test]
    fn backend_url_is_normalised() {
        let cfg = parse_config("[backend]\nurl = \"http://rag.local:8000/\"\n").unwrap();
        assert_eq!(cfg.backend_url(), Some("http://rag.local:8000"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(parse_config("[upload]\nmax_bytes = 0\n").is_err());
        assert!(parse_config("[pdf]\nworkers = 0\n").is_err());
    }

    #[test]
    fn postgrest_requires_url() {
        let err = parse_config("[store]\nprovider = \"postgrest\"\n").unwrap_err();
        assert!(err.to_string().contains("store.url"));
        assert!(parse_config("[store]\nprovider = \"postgrest\"\nurl = \"https://db.example\"\n").is_ok());
    }

    #[test]
    fn unknown_store_provider_is_rejected() {
        let err = parse_config("[store]\nprovider = \"mongo\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown store provider"));
    }
}
