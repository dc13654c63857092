use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "config.toml";
const APP_NAME: &str = "livepreview";

pub const DEFAULT_VIEW_STATE_CAPACITY: usize = 500;

/// Where rendered artifacts live and how many content versions to retain
/// for buffer-backed sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,

    /// 0 means keep only the current version. With N > 0 the buffer cache
    /// retains the N most recent content versions per document.
    #[serde(default)]
    pub keep_versions: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            keep_versions: 0,
        }
    }
}

fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join(APP_NAME)
}

/// External tool registered as a renderer: source content is piped to the
/// tool's stdin, its stdout is wrapped into an HTML page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    pub name: String,
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub content_types: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreviewerConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default = "default_view_state_capacity")]
    pub view_state_capacity: usize,

    /// When set, viewport state survives restarts via this JSON file.
    #[serde(default)]
    pub view_state_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ExternalToolConfig>,
}

fn default_view_state_capacity() -> usize {
    DEFAULT_VIEW_STATE_CAPACITY
}

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(CONFIG_FILENAME))
}

impl PreviewerConfig {
    /// Load from an explicit path, or from the user config directory when
    /// none is given. A missing or unparseable file logs and falls back to
    /// defaults rather than refusing to start.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match preferred_config_path() {
                Some(p) => p,
                None => {
                    info!("Could not determine config directory, using defaults");
                    return Self::default();
                }
            },
        };
        if !path.exists() {
            debug!("Config file {path:?} not found, using defaults");
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<Self>(&content) {
                Ok(config) => {
                    debug!("Loaded config from {path:?}");
                    config
                }
                Err(e) => {
                    error!("Failed to parse config file {path:?}: {e}");
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read config file {path:?}: {e}");
                Self::default()
            }
        }
    }
}
