use crate::application::agent::LimitOverrides;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/ariadne.toml";
const DEFAULT_INFERENCE_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_INFERENCE_MODEL: &str = "gemini-2.0-flash";

const API_KEY_ENV: &str = "ARIADNE_API_KEY";
const TENANT_ENV: &str = "ARIADNE_TENANT_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    pub retrieval: Option<RetrievalConfig>,
    pub providers: Vec<ProviderConfig>,
    pub tenant_id: Option<String>,
    pub limits: LimitOverrides,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_inference_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_inference_endpoint(),
            model: default_inference_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// One tool provider entry. The command and workdir accept `~` and
/// environment references, expanded at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub workdir: Option<String>,
    /// Providers scoped to a tenant get the configured tenant identifier
    /// injected into calls that omit one.
    #[serde(default)]
    pub needs_tenant: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    inference: Option<InferenceConfig>,
    #[serde(default)]
    retrieval: Option<RetrievalConfig>,
    #[serde(default)]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    limits: Option<LimitOverrides>,
}

impl AppConfig {
    /// Loads from the given path, or from the default path, falling back to
    /// built-in defaults when no file exists. Secrets and the tenant
    /// identifier may come from the environment instead of the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path).map(Self::with_env_fallbacks);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(Self::with_env_fallbacks(config)),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::with_env_fallbacks(Self::default()))
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            retrieval: None,
            providers: Vec::new(),
            tenant_id: None,
            limits: LimitOverrides::default(),
        }
    }

    fn with_env_fallbacks(mut self) -> Self {
        if self.inference.api_key.is_none() {
            self.inference.api_key = env::var(API_KEY_ENV).ok();
        }
        if self.tenant_id.is_none() {
            self.tenant_id = env::var(TENANT_ENV).ok();
        }
        self
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(AppConfig {
        inference: parsed.inference.unwrap_or_default(),
        retrieval: parsed.retrieval,
        providers: parsed
            .providers
            .into_iter()
            .map(expand_provider_paths)
            .collect(),
        tenant_id: parsed.tenant_id,
        limits: parsed.limits.unwrap_or_default(),
    })
}

fn expand_provider_paths(mut provider: ProviderConfig) -> ProviderConfig {
    provider.command = expand(&provider.command);
    provider.workdir = provider.workdir.as_deref().map(expand);
    provider
}

fn expand(raw: &str) -> String {
    match shellexpand::full(raw) {
        Ok(expanded) => expanded.into_owned(),
        Err(err) => {
            warn!(value = raw, %err, "Failed to expand configured path; using it verbatim");
            raw.to_string()
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_inference_endpoint() -> String {
    DEFAULT_INFERENCE_ENDPOINT.to_string()
}

fn default_inference_model() -> String {
    DEFAULT_INFERENCE_MODEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn missing_optional_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ariadne.toml");
        fs::write(&path, "tenant_id = \"acme-cloud\"").expect("write");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.inference.endpoint, DEFAULT_INFERENCE_ENDPOINT);
        assert_eq!(config.inference.model, DEFAULT_INFERENCE_MODEL);
        assert!(config.retrieval.is_none());
        assert!(config.providers.is_empty());
        assert_eq!(config.tenant_id.as_deref(), Some("acme-cloud"));
        assert!(config.limits.max_steps.is_none());
    }

    #[test]
    fn reads_providers_and_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ariadne.toml");
        let mut file = File::create(&path).expect("create config");
        writeln!(
            file,
            r#"
tenant_id = "acme-cloud"

[inference]
model = "gemini-2.5-pro"
api_key = "from-file"

[retrieval]
endpoint = "http://localhost:9090"

[limits]
max_steps = 5
min_confidence = 0.6

[[providers]]
name = "tracker"
command = "npx"
args = ["-y", "tracker-mcp"]
needs_tenant = true

[[providers]]
name = "database"
command = "db-mcp"
enabled = false
"#
        )
        .expect("write");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.inference.model, "gemini-2.5-pro");
        assert_eq!(config.inference.api_key.as_deref(), Some("from-file"));
        assert_eq!(
            config.retrieval.as_ref().map(|r| r.endpoint.as_str()),
            Some("http://localhost:9090")
        );
        assert_eq!(config.limits.max_steps, Some(5));
        assert_eq!(config.limits.min_confidence, Some(0.6));
        assert!(config.limits.max_similar_steps.is_none());

        assert_eq!(config.providers.len(), 2);
        let tracker = &config.providers[0];
        assert!(tracker.enabled);
        assert!(tracker.needs_tenant);
        assert_eq!(tracker.args, vec!["-y", "tracker-mcp"]);
        assert!(!config.providers[1].enabled);
        assert!(!config.providers[1].needs_tenant);
    }

    #[test]
    fn provider_paths_are_expanded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ariadne.toml");
        fs::write(
            &path,
            r#"
[[providers]]
name = "wiki"
command = "~/bin/wiki-mcp"
"#,
        )
        .expect("write");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert!(!config.providers[0].command.starts_with('~'));
    }

    #[test]
    fn parse_errors_are_reported_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ariadne.toml");
        fs::write(&path, "providers = \"not a table\"").expect("write");

        let err = AppConfig::load(Some(&path)).expect_err("must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
