use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;

pub const DEFAULT_API_BASE: &str = "https://zenodo.org/api";
const DEFAULT_SESSION_DELAY_SECS: u64 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub atlas_folder: Option<String>,
    #[serde(default)]
    pub session_delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AtlasConfig {
    pub api_base: String,
    pub access_token: String,
    pub atlas_folder: Utf8PathBuf,
    /// Courtesy delay between successive sessions of a batch run.
    pub session_delay: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<AtlasConfig, AtlasError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("reef-am.json"),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(AtlasError::ConfigRead(config_path));
            }
            return Err(AtlasError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AtlasError::ConfigRead(config_path.clone()))?;
        let config =
            serde_json::from_str(&content).map_err(|err| AtlasError::ConfigParse(err.to_string()))?;

        Self::resolve_file(config)
    }

    pub fn resolve_file(config: ConfigFile) -> Result<AtlasConfig, AtlasError> {
        let access_token = config
            .access_token
            .filter(|token| !token.trim().is_empty())
            .or_else(|| std::env::var("ATLAS_ACCESS_TOKEN").ok())
            .filter(|token| !token.trim().is_empty())
            .ok_or(AtlasError::MissingAccessToken)?;

        let atlas_folder = match config.atlas_folder {
            Some(folder) => Utf8PathBuf::from(folder),
            None => default_atlas_folder()?,
        };

        Ok(AtlasConfig {
            api_base: config
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            access_token,
            atlas_folder,
            session_delay: Duration::from_secs(
                config
                    .session_delay_secs
                    .unwrap_or(DEFAULT_SESSION_DELAY_SECS),
            ),
        })
    }
}

fn default_atlas_folder() -> Result<Utf8PathBuf, AtlasError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".local")
                    .join("share")
                    .join("reef-atlas-manager"),
            )
            .ok()
        })
        .ok_or_else(|| AtlasError::Filesystem("unable to resolve atlas directory".to_string()))
}
