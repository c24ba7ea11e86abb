//! Runtime configuration
//!
//! Read from TOML. Every section and field is optional:
//!
//! ```toml
//! [vm]
//! max_value_stack = 4096
//! max_call_stack = 256
//! trace = false
//!
//! [loader]
//! empty_sections = "reject"   # or "allow"
//!
//! [log]
//! level = "debug"
//! ```
//!
//! [`RuntimeConfig::load`] looks for `roobyvm/config.toml` under the
//! platform config directory when no explicit path is given.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::bytecode::{EmptySectionPolicy, LoadOptions, VmConfig};

/// Config file name under `<config dir>/roobyvm/`
pub const CONFIG_FILE: &str = "config.toml";

/// Errors reading configuration
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: Option<PathBuf>, source: toml::de::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            Self::Parse {
                path: Some(path),
                source,
            } => write!(f, "Invalid config in {}: {}", path.display(), source),
            Self::Parse { path: None, source } => write!(f, "Invalid config: {}", source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

/// Loader section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub empty_sections: EmptySectionPolicy,
}

impl LoaderConfig {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            empty_sections: self.empty_sections,
        }
    }
}

/// Log section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter level: error, warn, info, debug or trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub vm: VmConfig,
    pub loader: LoaderConfig,
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Parse configuration from TOML content
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Load configuration from a TOML file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Default location: `<config dir>/roobyvm/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("roobyvm").join(CONFIG_FILE))
    }

    /// Load from `explicit` if given, else from the default location if it
    /// exists, else use defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load_from_path(&path),
            _ => Ok(Self::default()),
        }
    }
}
