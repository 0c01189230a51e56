//! Configuration file handling
//!
//! Adapters and launch presets live in a TOML file under the platform
//! config directory. Everything has a sensible default so the file is
//! optional.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::adapter::AdapterKind;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Named launch presets
    #[serde(default)]
    pub presets: HashMap<String, Preset>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,

    /// Adapter kind for specialized argument handling
    #[serde(default)]
    pub kind: AdapterKind,
}

/// A stored launch or attach configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Preset {
    /// Program to launch
    pub program: Option<PathBuf>,

    /// Arguments to pass to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Process id to attach to (attach action)
    pub pid: Option<u32>,

    /// Adapter name, resolved against the adapters table
    pub adapter: Option<String>,

    /// "launch" or "attach"
    pub action: Option<String>,

    /// Thread the adapter pauses when attaching
    pub stop_thread: Option<i64>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "lldb-dap".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for the DAP initialize request
    #[serde(default = "default_initialize")]
    pub initialize_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initialize_secs: default_initialize(),
        }
    }
}

fn default_initialize() -> u64 {
    10
}

impl Config {
    /// Load configuration from the given file, or the default location
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => config_path(),
        };

        if let Some(path) = path {
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    })?;
                return toml::from_str(&content)
                    .map_err(|e| Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| {
            let kind = match name {
                "lldb-dap" | "lldb-vscode" => AdapterKind::LldbDap,
                "debugpy" | "debugpy-adapter" => AdapterKind::Debugpy,
                _ => AdapterKind::Generic,
            };
            AdapterConfig {
                path,
                args: Vec::new(),
                kind,
            }
        })
    }
}
