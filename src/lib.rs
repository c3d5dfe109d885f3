//! # S7 Logger: PLC acquisition and logging engine
//!
//! Polls scalar variables in the data blocks of a Siemens S7 PLC at a fixed
//! interval, keeps the full time series in memory for charting, journals
//! every sample to disk so a crash loses nothing, and exports the session to
//! CSV.
//!
//! ## Architecture
//!
//! - **Backend**: The session state machine and the polling thread
//! - **Journal**: Append-only JSON Lines file, replayed on restart
//! - **Buffer**: Per-variable ordered history plus the latest snapshot
//! - **Export / Plot**: Tabular export and chart series built from the buffer
//! - **Communication**: Crossbeam channels between the polling thread and the front end
//!
//! ## Configuration
//!
//! Application state (last connection, last export path) is stored in the
//! platform-appropriate data directory under `dev.s7logger.s7-logger`, next
//! to the default journal file and the log directory:
//!
//! - **Linux**: `~/.local/share/dev.s7logger.s7-logger/`
//! - **macOS**: `~/Library/Application Support/dev.s7logger.s7-logger/`
//! - **Windows**: `%APPDATA%\dev.s7logger.s7-logger\`
//!
//! ## Example
//!
//! ```ignore
//! use s7_logger::{LoggerBackend, LoggerConfig, PlotKind, SimulatedPlc};
//! use std::time::Duration;
//!
//! let config = LoggerConfig::default();
//! let (backend, engine) = LoggerBackend::new(config, Box::new(SimulatedPlc::new()))?;
//! let worker = backend.spawn()?;
//!
//! engine.connect("192.168.0.1", 0, 1)?;
//! engine.add_variable("DB1.0:INT".parse()?)?;
//! engine.start(Duration::from_millis(500), PlotKind::Line)?;
//!
//! std::thread::sleep(Duration::from_secs(5));
//! engine.stop()?;
//! engine.export("session.csv")?;
//!
//! engine.shutdown()?;
//! worker.join().ok();
//! ```

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod export;
pub mod journal;
pub mod plot;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use backend::{
    ClearOutcome, EngineEvent, EngineHandle, LoggerBackend, PlcReader, SimulatedPlc,
};
pub use config::{AppState, LoggerConfig};
pub use error::{LoggerError, Result};
pub use export::{ExportLayout, Exporter};
pub use types::{DataType, PlotKind, Sample, SessionState, Value, VariableDescriptor};
