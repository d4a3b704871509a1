//! Layered configuration
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variable: `IMAGINARIUM_API_KEY`
//! 2. Project-local: `.imaginarium/config.toml`
//! 3. Global: `~/.imaginarium/config.toml`

use imaginarium_core::{ImaginariumError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::persist::{SaveConfig, SaveFormat};

const API_KEY_ENV: &str = "IMAGINARIUM_API_KEY";
const LOCAL_CONFIG_PATH: &str = ".imaginarium/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiSection {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SaveSection {
    #[serde(default)]
    as_assets: Option<bool>,
    #[serde(default)]
    as_images: Option<bool>,
    #[serde(default)]
    format: Option<SaveFormat>,
    #[serde(default)]
    directory: Option<PathBuf>,
    #[serde(default)]
    store_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    api: ApiSection,
    #[serde(default)]
    save: SaveSection,
}

/// Resolved configuration with all layers applied
#[derive(Debug, Clone)]
pub struct ImaginariumConfig {
    /// API credential; may be empty, which submission rejects
    pub api_key: String,
    /// Backend base URL override, if any
    pub api_url: Option<String>,
    pub save: SaveConfig,
}

impl ImaginariumConfig {
    /// Load config with layered precedence: global < project < env var
    pub fn load() -> Result<Self> {
        let mut file = ConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                merge_into(&mut file, Self::load_file(&global_path)?);
            }
        }

        let local_path = PathBuf::from(LOCAL_CONFIG_PATH);
        if local_path.exists() {
            merge_into(&mut file, Self::load_file(&local_path)?);
        }

        let mut config = Self::resolve(file);
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.api_key = key;
        }
        Ok(config)
    }

    /// Load config from a specific file only (for testing)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = Self::load_file(path)?;
        let mut config = Self::resolve(file);
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.api_key = key;
        }
        Ok(config)
    }

    fn resolve(file: ConfigFile) -> Self {
        let defaults = SaveConfig::default();
        Self {
            api_key: file.api.key.unwrap_or_default(),
            api_url: file.api.url,
            save: SaveConfig {
                save_as_assets: file.save.as_assets.unwrap_or(defaults.save_as_assets),
                save_as_images: file.save.as_images.unwrap_or(defaults.save_as_images),
                format: file.save.format.unwrap_or(defaults.format),
                directory: file.save.directory.unwrap_or(defaults.directory),
                store_root: file.save.store_root.unwrap_or(defaults.store_root),
            },
        }
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".imaginarium").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<ConfigFile> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            ImaginariumError::ConfigError(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })
    }
}

fn merge_into(base: &mut ConfigFile, overlay: ConfigFile) {
    if overlay.api.key.is_some() {
        base.api.key = overlay.api.key;
    }
    if overlay.api.url.is_some() {
        base.api.url = overlay.api.url;
    }
    if overlay.save.as_assets.is_some() {
        base.save.as_assets = overlay.save.as_assets;
    }
    if overlay.save.as_images.is_some() {
        base.save.as_images = overlay.save.as_images;
    }
    if overlay.save.format.is_some() {
        base.save.format = overlay.save.format;
    }
    if overlay.save.directory.is_some() {
        base.save.directory = overlay.save.directory;
    }
    if overlay.save.store_root.is_some() {
        base.save.store_root = overlay.save.store_root;
    }
}
