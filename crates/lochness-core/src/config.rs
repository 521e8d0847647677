use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::validator_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::catalog::{DataSink, DataSource};
use crate::keystore::{EnvKeystore, Keystore, StaticKeystore};
use crate::model::ClaimFilter;

pub const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";
pub const DEFAULT_BIND: &str = "127.0.0.1:8095";
pub const DEFAULT_STATE_DIR: &str = "state";
pub const DB_FILE_NAME: &str = "lochness.sqlite";

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8095`.
    #[serde(default)]
    pub bind: Option<String>,
    /// Reject job submissions without an `x-lochness-principal` header.
    #[serde(default)]
    pub require_principal: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct StorageConfig {
    #[serde(default)]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub sqlite_busy_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClaimConfig {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct SchedulerConfig {
    /// Number of worker loops polling the ledger.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Upper bound on a single connector call.
    #[serde(default)]
    pub connector_timeout_secs: Option<u64>,
    /// Running jobs older than this are forced into `error`.
    #[serde(default)]
    pub stuck_after_secs: Option<u64>,
    #[serde(default)]
    pub watchdog_interval_secs: Option<u64>,
    #[serde(default)]
    pub claim: ClaimConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreBackend {
    #[default]
    Env,
    File,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct KeystoreConfig {
    #[serde(default)]
    pub backend: KeystoreBackend,
    /// TOML secrets file for the `file` backend.
    #[serde(default)]
    pub path: Option<String>,
}

impl KeystoreConfig {
    pub fn build(&self) -> Result<Arc<dyn Keystore>> {
        match self.backend {
            KeystoreBackend::Env => Ok(Arc::new(EnvKeystore)),
            KeystoreBackend::File => {
                let path = self
                    .path
                    .as_deref()
                    .context("keystore.path is required for the file backend")?;
                let store = StaticKeystore::load(Path::new(path))?;
                tracing::info!(path, entries = store.len(), "loaded file keystore");
                Ok(Arc::new(store))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub data_sinks: Vec<DataSink>,
}

impl Config {
    pub fn bind(&self) -> String {
        self.server
            .bind
            .clone()
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    pub fn require_principal(&self) -> bool {
        self.server.require_principal.unwrap_or(false)
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(
            self.storage
                .state_dir
                .as_deref()
                .unwrap_or(DEFAULT_STATE_DIR),
        )
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir().join(DB_FILE_NAME)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.sqlite_busy_ms.unwrap_or(5_000))
    }

    pub fn workers(&self) -> usize {
        self.scheduler.workers.unwrap_or(2).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.poll_interval_ms.unwrap_or(200).max(10))
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.connector_timeout_secs.unwrap_or(300).max(1))
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.scheduler.stuck_after_secs.unwrap_or(3_600).max(1))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.watchdog_interval_secs.unwrap_or(30).max(1))
    }

    pub fn claim_filter(&self) -> ClaimFilter {
        let claim = &self.scheduler.claim;
        ClaimFilter {
            job_type: claim.job_type.as_deref().map(crate::model::JobType::from_slug),
            project_id: claim.project_id.clone(),
            site_id: claim.site_id.clone(),
        }
    }

    /// Applies `LOCHNESS_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("LOCHNESS_STATE_DIR") {
            self.storage.state_dir = Some(v);
        }
        if let Some(v) = env_string("LOCHNESS_BIND") {
            self.server.bind = Some(v);
        }
        if let Some(v) = env_parse::<usize>("LOCHNESS_WORKERS") {
            self.scheduler.workers = Some(v);
        }
        if let Some(v) = env_string("LOCHNESS_REQUIRE_PRINCIPAL") {
            self.server.require_principal = Some(matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ));
        }
        if let Some(v) = env_parse::<u64>("LOCHNESS_SQLITE_BUSY_MS") {
            self.storage.sqlite_busy_ms = Some(v);
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable override");
            None
        }
    }
}

/// Returns the JSON schema describing the configuration structure.
pub fn config_schema_json() -> Result<serde_json::Value> {
    let schema = schemars::schema_for!(Config);
    Ok(serde_json::to_value(&schema)?)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let schema = config_schema_json()?;
    let validator =
        validator_for(&schema).map_err(|e| anyhow::anyhow!("invalid config schema: {e}"))?;
    let validation_errors: Vec<_> = validator
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}

/// `LOCHNESS_CONFIG` when set, else `configs/default.toml` if it exists.
pub fn discover_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env_string("LOCHNESS_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
    fallback.exists().then_some(fallback)
}

/// Loads the discovered (or explicit) config file, falling back to
/// defaults when none exists, then applies env overrides.
pub fn load_effective(explicit: Option<&Path>) -> Result<Config> {
    let path = explicit.map(Path::to_path_buf).or_else(discover_config_path);
    let mut cfg = match path {
        Some(path) => {
            let cfg = load_config(&path)?;
            tracing::info!(path = %path.display(), "loaded config");
            cfg
        }
        None => {
            tracing::info!("no config file found; using defaults");
            Config::default()
        }
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}
