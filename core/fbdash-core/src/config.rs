//! Dashboard configuration and the brokerage path handle.
//!
//! Settings come from `~/.fbdash/config.toml`; a missing file yields defaults.
//! The brokerage root is special: `FASTBUILD_BROKERAGE_PATH` overrides the file
//! whenever it is set, because the build tools themselves read that variable.
//!
//! Components never read the environment directly. They receive a shared
//! [`Brokerage`] handle at construction and observe changes through
//! [`Brokerage::reload`].

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{FarmError, Result};

pub const BROKERAGE_ENV_VAR: &str = "FASTBUILD_BROKERAGE_PATH";

const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 5;
const DEFAULT_STATUS_TICK_MS: u64 = 500;
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 15 * 60;

/// How a stale binary is replaced by its canonical network copy.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Delete the target, then copy. A crash between the two leaves no target.
    DeleteThenCopy,
    /// Copy into a temp file beside the target, then rename over it.
    AtomicRename,
}

impl Default for ReplaceStrategy {
    fn default() -> Self {
        Self::DeleteThenCopy
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DashboardConfig {
    #[serde(default)]
    pub brokerage_path: Option<String>,
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    #[serde(default = "default_status_tick_ms")]
    pub status_tick_ms: u64,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default)]
    pub replace_strategy: ReplaceStrategy,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            brokerage_path: None,
            discovery_interval_secs: default_discovery_interval_secs(),
            status_tick_ms: default_status_tick_ms(),
            update_interval_secs: default_update_interval_secs(),
            replace_strategy: ReplaceStrategy::default(),
        }
    }
}

fn default_discovery_interval_secs() -> u64 {
    DEFAULT_DISCOVERY_INTERVAL_SECS
}

fn default_status_tick_ms() -> u64 {
    DEFAULT_STATUS_TICK_MS
}

fn default_update_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

/// Loads the dashboard configuration, returning defaults if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<DashboardConfig> {
    if !path.exists() {
        return Ok(DashboardConfig::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| FarmError::io(format!("reading {}", path.display()), err))?;
    toml::from_str::<DashboardConfig>(&content).map_err(|err| FarmError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Picks the brokerage root from an environment value and the config file.
///
/// A set variable wins even when empty (empty means "discovery disabled").
pub fn resolve_brokerage_path(
    env_value: Option<OsString>,
    config: &DashboardConfig,
) -> Option<PathBuf> {
    let raw = match env_value {
        Some(value) => value,
        None => OsString::from(config.brokerage_path.clone().unwrap_or_default()),
    };

    if raw.is_empty() {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

/// The settings validator rule for a user-entered brokerage path.
pub fn validate_brokerage_path(path: &Path) -> std::result::Result<(), String> {
    if path.is_dir() {
        Ok(())
    } else {
        Err("Brokerage path doesn't exist".to_string())
    }
}

/// Shared, reloadable brokerage root.
///
/// Readers take a cloned snapshot per operation; a reload between two reads is
/// allowed and never treated as an error.
#[derive(Debug, Default)]
pub struct Brokerage {
    path: RwLock<Option<PathBuf>>,
}

impl Brokerage {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: RwLock::new(path.filter(|p| !p.as_os_str().is_empty())),
        }
    }

    /// Builds the handle from the process environment and the config file.
    pub fn from_env(config: &DashboardConfig) -> Self {
        Self::new(resolve_brokerage_path(
            std::env::var_os(BROKERAGE_ENV_VAR),
            config,
        ))
    }

    /// Current brokerage root, or `None` when discovery is disabled.
    pub fn path(&self) -> Option<PathBuf> {
        match self.path.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the root. Returns true when the value changed.
    pub fn set(&self, path: Option<PathBuf>) -> bool {
        let path = path.filter(|p| !p.as_os_str().is_empty());
        let mut guard = match self.path.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == path {
            return false;
        }
        tracing::info!(
            old = ?guard.as_ref().map(|p| p.display().to_string()),
            new = ?path.as_ref().map(|p| p.display().to_string()),
            "Brokerage path changed"
        );
        *guard = path;
        true
    }

    /// Re-reads the environment and `config`. Returns true when the root changed.
    pub fn reload(&self, config: &DashboardConfig) -> bool {
        self.set(resolve_brokerage_path(
            std::env::var_os(BROKERAGE_ENV_VAR),
            config,
        ))
    }
}
