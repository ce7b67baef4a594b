use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::IdaError;
use crate::layout::Layout;

pub const DEFAULT_CONFIG_FILE: &str = "tess-ida.json";
pub const DEFAULT_IDA_DIR: &str = "IDA";
pub const DEFAULT_ECSV_DIR: &str = "ECSV";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 32;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    /// NextCloud share serving the IDA files.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub aux_store: Option<String>,
    #[serde(default)]
    pub ida_dir: Option<String>,
    #[serde(default)]
    pub ecsv_dir: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub force: Option<bool>,
}

/// Command-line values; any `Some` wins over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub aux_store: Option<String>,
    pub ida_dir: Option<String>,
    pub ecsv_dir: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub deadline_secs: Option<u64>,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub schema_version: u32,
    pub base_url: Option<String>,
    pub aux_store: Utf8PathBuf,
    pub ida_dir: Utf8PathBuf,
    pub ecsv_dir: Utf8PathBuf,
    pub concurrency: usize,
    pub timeout: Duration,
    pub deadline: Option<Duration>,
    pub force: bool,
}

impl PipelineConfig {
    pub fn layout(&self) -> Layout {
        Layout::new(self.ida_dir.clone(), self.ecsv_dir.clone())
    }

    pub fn require_base_url(&self) -> Result<&str, IdaError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| IdaError::InvalidConfig("base_url is not set (config file or --base-url)".to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `tess-ida.json` when it exists, and applies `overrides`.
    pub fn resolve(path: Option<&str>, overrides: ConfigOverrides) -> Result<PipelineConfig, IdaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| IdaError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| IdaError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(config: Config, overrides: ConfigOverrides) -> Result<PipelineConfig, IdaError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(IdaError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let concurrency = overrides
            .concurrency
            .or(config.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(IdaError::InvalidConfig(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {concurrency}"
            )));
        }
        let timeout_secs = overrides
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(IdaError::InvalidConfig("timeout_secs must be positive".to_string()));
        }

        let aux_store = match overrides.aux_store.or(config.aux_store) {
            Some(path) => Utf8PathBuf::from(path),
            None => default_aux_store(),
        };

        Ok(PipelineConfig {
            schema_version,
            base_url: overrides
                .base_url
                .or(config.base_url)
                .filter(|url| !url.trim().is_empty()),
            aux_store,
            ida_dir: Utf8PathBuf::from(
                overrides
                    .ida_dir
                    .or(config.ida_dir)
                    .unwrap_or_else(|| DEFAULT_IDA_DIR.to_string()),
            ),
            ecsv_dir: Utf8PathBuf::from(
                overrides
                    .ecsv_dir
                    .or(config.ecsv_dir)
                    .unwrap_or_else(|| DEFAULT_ECSV_DIR.to_string()),
            ),
            concurrency,
            timeout: Duration::from_secs(timeout_secs),
            deadline: overrides
                .deadline_secs
                .or(config.deadline_secs)
                .map(Duration::from_secs),
            force: overrides.force || config.force.unwrap_or(false),
        })
    }
}

/// `<data dir>/tess-ida/aux.db`, or `aux.db` in the working directory.
pub fn default_aux_store() -> Utf8PathBuf {
    ProjectDirs::from("", "", "tess-ida")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join("aux.db")).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("aux.db"))
}
