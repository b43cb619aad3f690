//! Configuration for daxfs-core
//!
//! Handles the settings needed to open or format an image: where the backing
//! file lives, how large the mapped region is, and the default per-branch
//! delta-log capacity new forks reserve.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Image / storage-window configuration
    pub image: ImageConfig,

    /// Branch defaults applied on fork unless overridden by the caller
    pub branch: BranchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Image / storage-window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Path to the backing file mapped as the storage window
    pub path: PathBuf,

    /// Total size of the mapped region, in bytes, used when formatting a
    /// fresh image. Ignored when opening an existing one.
    pub total_size: u64,

    /// Maximum number of branch-table entries
    pub branch_table_entries: u32,

    /// Optional read-only base image to embed at format time
    pub base_image_path: Option<PathBuf>,
}

/// Per-branch defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Delta-log capacity reserved for a newly forked branch, in bytes
    pub default_delta_log_capacity: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "daxfs_core=debug"
    pub filter: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics collection
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: ImageConfig::default(),
            branch: BranchConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./daxfs.img"),
            total_size: 256 * 1024 * 1024,
            branch_table_entries: 256,
            base_image_path: None,
        }
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            default_delta_log_capacity: 8 * 1024 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let config_str = std::fs::read_to_string(path)?;
    toml::from_str(&config_str).map_err(|e| Error::config(e.to_string()))
}

/// Load configuration from a file, falling back to defaults on any error
pub fn load_config_or_default(path: Option<&std::path::Path>) -> Config {
    match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                tracing::info!("loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("failed to load config from {}: {}. using defaults", path.display(), e);
                Config::default()
            }
        },
        None => {
            tracing::info!("no config file specified, using defaults");
            Config::default()
        }
    }
}
