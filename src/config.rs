//! TOML configuration.
//!
//! The default file lives in the OS config directory:
//! - Windows: %APPDATA%\shelf-scan\config.toml
//! - macOS: ~/Library/Application Support/shelf-scan/config.toml
//! - Linux: ~/.config/shelf-scan/config.toml
//!
//! A different file can be passed on the command line with `--config`.
//!
//! ```toml
//! [database]
//! path = "/home/me/.local/share/shelf-scan/catalog.db"
//!
//! [scan]
//! workers = 8
//! write_sidecars = true
//!
//! [[libraries]]
//! name = "Books"
//! paths = ["/media/books"]
//! organize_file_structure = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub libraries: Vec<LibraryConfig>,
}

/// Catalog database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .map(|d| d.join("shelf-scan").join("catalog.db"))
            .unwrap_or_else(|| PathBuf::from("shelf_scan.db"));
        Self { path }
    }
}

/// Scan job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Files processed concurrently (0 = available parallelism)
    pub workers: usize,

    /// Write sidecar files reflecting the cataloged record
    pub write_sidecars: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            write_sidecars: true,
        }
    }
}

impl ScanConfig {
    /// Worker count with `0` resolved to the machine's parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// One library definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryConfig {
    pub name: String,
    pub paths: Vec<PathBuf>,
    /// Move root-level files into per-book directories after scanning
    pub organize_file_structure: bool,
}

// ============================================================================
// Config File Operations
// ============================================================================

/// `<OS config dir>/shelf-scan`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("shelf-scan"))
}

/// Default config file location.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load the config file at [`config_path`], or defaults when there is no
/// config directory.
pub fn load() -> Config {
    match config_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::warn!(target: "shelf_scan::config", "No config directory on this platform, using defaults");
            Config::default()
        }
    }
}

/// Load the config file at `path`.
///
/// A missing, unreadable or malformed file yields [`Config::default`]; the
/// problem is logged and never returned.
pub fn load_from(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(target: "shelf_scan::config", path = %path.display(), "No config file, using defaults");
            return Config::default();
        }
        Err(e) => {
            tracing::error!(target: "shelf_scan::config", path = %path.display(), error = %e, "Config unreadable, using defaults");
            return Config::default();
        }
    };

    match toml::from_str::<Config>(&contents) {
        Ok(config) => {
            tracing::info!(
                target: "shelf_scan::config",
                path = %path.display(),
                libraries = config.libraries.len(),
                "Loaded config"
            );
            config
        }
        Err(e) => {
            tracing::error!(target: "shelf_scan::config", path = %path.display(), error = %e, "Config invalid, using defaults");
            Config::default()
        }
    }
}

/// Write `config` to `path` through a temp file, creating the parent
/// directory as needed.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    let staged = path.with_extension("toml.tmp");
    std::fs::write(&staged, contents).map_err(|e| ConfigError::Write(staged.clone(), e))?;
    std::fs::rename(&staged, path)
        .map_err(|e| ConfigError::Rename(staged, path.to_path_buf(), e))?;

    tracing::info!(target: "shelf_scan::config", path = %path.display(), "Saved config");
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot create {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("cannot encode config: {0}")]
    Serialize(toml::ser::Error),

    #[error("cannot write {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("cannot move {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        crate::error::Error::config(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
