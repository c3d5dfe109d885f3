//! Configuration module for s7-logger
//!
//! This module handles:
//! - Logger configuration (connection, collection, journal, export, variables)
//! - Application state persistence (last connection, last config and export paths)
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.s7logger.s7-logger/`
//! - **macOS**: `~/Library/Application Support/dev.s7logger.s7-logger/`
//! - **Windows**: `%APPDATA%\dev.s7logger.s7-logger\`
//!
//! # Files
//!
//! - `app_state.json` - Last used connection parameters and paths
//! - `logs/` - Rolling log files written by the console
//! - Logger configs (`.toml` or `.json`) - Saved wherever the user chooses
//!
//! # Example
//!
//! ```ignore
//! use s7_logger::config::{AppState, LoggerConfig};
//!
//! let config = LoggerConfig::load("plant.toml")?;
//!
//! let mut state = AppState::load_or_default();
//! state.update_last_connection(&config.connection);
//! state.save()?;
//! ```

use crate::error::{LoggerError, Result};
use crate::export::ExportLayout;
use crate::journal::Journal;
use crate::types::{ConnectionParams, PlotKind, VariableDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.s7logger.s7-logger";

/// App state filename
pub const APP_STATE_FILE: &str = "app_state.json";

/// Default polling interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default per-read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

/// Consecutive failures before a variable is reported unreachable
pub const DEFAULT_UNREACHABLE_THRESHOLD: u32 = 3;

/// Extra journal append attempts after a failed write
pub const DEFAULT_WRITE_RETRIES: u32 = 2;

/// Capacity of the engine event channel
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        LoggerError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            LoggerError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the app state file
pub fn app_state_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(APP_STATE_FILE))
}

// ==================== Logger Config ====================

/// Complete logger configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// PLC connection parameters
    pub connection: ConnectionParams,
    /// Polling settings
    pub collection: CollectionConfig,
    /// Crash-recovery journal settings
    pub journal: JournalConfig,
    /// Spreadsheet export settings
    pub export: ExportConfig,
    /// Variables registered at startup
    pub variables: Vec<VariableDescriptor>,
}

impl LoggerConfig {
    /// Load a config file, choosing TOML or JSON by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoggerError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                LoggerError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?,
            _ => toml::from_str(&content).map_err(|e| {
                LoggerError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LoggerError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| LoggerError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            LoggerError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.collection.interval_ms == 0 {
            return Err(LoggerError::Config(
                "collection.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.collection.read_timeout_ms == 0 {
            return Err(LoggerError::Config(
                "collection.read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.collection.event_buffer_size == 0 {
            return Err(LoggerError::Config(
                "collection.event_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Collection Config ====================

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Default interval between tick starts, in milliseconds
    pub interval_ms: u64,
    /// Chart style
    pub plot_kind: PlotKind,
    /// Reads slower than this count as failed, in milliseconds
    pub read_timeout_ms: u64,
    /// Consecutive failures before a variable is reported unreachable
    pub unreachable_threshold: u32,
    /// Capacity of the engine event channel
    pub event_buffer_size: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            plot_kind: PlotKind::Line,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            unreachable_threshold: DEFAULT_UNREACHABLE_THRESHOLD,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl CollectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl std::fmt::Display for CollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "every {} ms, {} plot, read timeout {} ms",
            self.interval_ms,
            self.plot_kind.display_name(),
            self.read_timeout_ms
        )
    }
}

// ==================== Journal Config ====================

/// Crash-recovery journal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Journal file; defaults to the system temp directory
    pub path: Option<PathBuf>,
    /// Load the journal into the buffer when the engine starts
    pub replay_on_start: bool,
    /// Extra append attempts after a failed write
    pub write_retries: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: None,
            replay_on_start: true,
            write_retries: DEFAULT_WRITE_RETRIES,
        }
    }
}

impl JournalConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Journal::default_path)
    }
}

// ==================== Export Config ====================

/// Spreadsheet export configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Table shape
    pub layout: ExportLayout,
}

// ==================== App State ====================

/// Persistent application state
///
/// Remembers what the operator used last so the console can offer it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    /// Version for future migration support
    #[serde(default = "default_app_state_version")]
    pub version: u32,

    /// Last used connection parameters (for quick connect)
    #[serde(default)]
    pub last_connection: Option<ConnectionParams>,

    /// Last loaded logger config
    #[serde(default)]
    pub last_config_path: Option<PathBuf>,

    /// Last export destination
    #[serde(default)]
    pub last_export_path: Option<PathBuf>,
}

fn default_app_state_version() -> u32 {
    1
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: 1,
            last_connection: None,
            last_config_path: None,
            last_export_path: None,
        }
    }
}

impl AppState {
    /// Load app state from the default location
    pub fn load() -> Result<Self> {
        let path = app_state_path().ok_or_else(|| {
            LoggerError::Config("Could not determine app state path".to_string())
        })?;
        Self::load_from(path)
    }

    /// Load app state from `path`; a missing file yields defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| LoggerError::Config(format!("Failed to read app state: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| LoggerError::Config(format!("Failed to parse app state: {}", e)))
    }

    /// Load app state, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save app state to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(APP_STATE_FILE))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| LoggerError::Config(format!("Failed to serialize app state: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| LoggerError::Config(format!("Failed to write app state: {}", e)))
    }

    /// Update last used connection info
    pub fn update_last_connection(&mut self, params: &ConnectionParams) {
        self.last_connection = Some(params.clone());
    }

    /// Connection parameters to offer by default
    pub fn connection_or_default(&self) -> ConnectionParams {
        self.last_connection.clone().unwrap_or_default()
    }
}

// ==================== Utilities ====================

/// Helper to format bytes as human-readable size
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

// ==================== Tests ====================
