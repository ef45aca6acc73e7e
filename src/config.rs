use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::NmdcError;

pub const DEFAULT_MAX_PAGES: usize = 10_000;
pub const DEFAULT_ID_BATCH_SIZE: usize = 100;

/// Deployment of the NMDC runtime API a client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApiEnv {
    #[default]
    Prod,
    Dev,
    Backup,
}

impl ApiEnv {
    pub fn base_url(self) -> &'static str {
        match self {
            ApiEnv::Prod => "https://api.microbiomedata.org",
            ApiEnv::Dev => "https://api-dev.microbiomedata.org",
            ApiEnv::Backup => "https://api-backup.microbiomedata.org",
        }
    }
}

impl fmt::Display for ApiEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiEnv::Prod => write!(f, "prod"),
            ApiEnv::Dev => write!(f, "dev"),
            ApiEnv::Backup => write!(f, "backup"),
        }
    }
}

impl FromStr for ApiEnv {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" => Ok(ApiEnv::Prod),
            "dev" => Ok(ApiEnv::Dev),
            "backup" => Ok(ApiEnv::Backup),
            _ => Err(NmdcError::InvalidEnvironment(value.to_string())),
        }
    }
}

/// On-disk shape of `nmdc.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub id_batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub env: ApiEnv,
    pub base_url: Option<String>,
    pub max_pages: usize,
    pub id_batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_env(ApiEnv::Prod)
    }
}

impl ClientConfig {
    pub fn for_env(env: ApiEnv) -> Self {
        Self {
            env,
            base_url: None,
            max_pages: DEFAULT_MAX_PAGES,
            id_batch_size: DEFAULT_ID_BATCH_SIZE,
        }
    }

    /// Base URL without a trailing slash; an explicit override wins over `env`.
    pub fn base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.env.base_url())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_id_batch_size(mut self, id_batch_size: usize) -> Self {
        self.id_batch_size = id_batch_size;
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve configuration from an explicit path, `./nmdc.json`, or the user
    /// config directory, in that order. Only an explicit path is required to exist.
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, NmdcError> {
        let candidate = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_locations().into_iter().find(|p| p.exists()),
        };

        let Some(config_path) = candidate else {
            return Ok(ClientConfig::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| NmdcError::ConfigRead(config_path.clone()))?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|err| NmdcError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %config_path.display(), "loaded client config");

        Self::resolve_config(file)
    }

    pub fn resolve_config(file: ConfigFile) -> Result<ClientConfig, NmdcError> {
        let env = file
            .env
            .as_deref()
            .map(str::parse::<ApiEnv>)
            .transpose()?
            .unwrap_or_default();

        let max_pages = file.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let id_batch_size = file.id_batch_size.unwrap_or(DEFAULT_ID_BATCH_SIZE);
        if max_pages == 0 || id_batch_size == 0 {
            return Err(NmdcError::ConfigParse(
                "max_pages and id_batch_size must be positive".to_string(),
            ));
        }

        Ok(ClientConfig {
            env,
            base_url: file.base_url.filter(|url| !url.trim().is_empty()),
            max_pages,
            id_batch_size,
        })
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from("nmdc.json")];
        if let Some(dirs) = BaseDirs::new() {
            locations.push(
                dirs.config_dir()
                    .join("nmdc-client")
                    .join("config.json"),
            );
        }
        locations
    }
}
