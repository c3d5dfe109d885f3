//! Acquisition backend
//!
//! PLC polling runs on its own thread so the operator console (or any other
//! front end) stays responsive. User operations are applied synchronously
//! through the [`EngineHandle`], which returns their result directly; the
//! polling thread is only woken through a crossbeam channel when the session
//! state changes.
//!
//! # Architecture
//!
//! - [`EngineHandle`] - Front-end handle: session operations, queries, events
//! - [`LoggerBackend`] - Owns the polling thread side of the channels
//! - [`EngineEvent`] - Notifications sent from the engine to the front end
//! - [`EngineCommand`] - Control messages for the polling thread
//!
//! # Components
//!
//! - [`Scheduler`] - Session state machine and tick algorithm
//! - [`PollingWorker`] - The timer loop that drives ticks
//! - [`PlcReader`] - Seam over the S7 client
//! - [`SimulatedPlc`] - In-process PLC for tests and demos
//!
//! # Example
//!
//! ```ignore
//! use s7_logger::backend::{LoggerBackend, SimulatedPlc};
//! use s7_logger::config::LoggerConfig;
//!
//! let (backend, engine) = LoggerBackend::new(LoggerConfig::default(), Box::new(SimulatedPlc::new()))?;
//! let worker = backend.spawn()?;
//!
//! engine.connect("192.168.0.1", 0, 1)?;
//! engine.add_variable("DB1.0:INT".parse()?)?;
//! engine.start(Duration::from_secs(1), PlotKind::Line)?;
//!
//! for event in engine.drain_events() {
//!     if let EngineEvent::Tick(snapshot) = event {
//!         // redraw
//!     }
//! }
//! ```

pub mod plc_trait;
pub mod scheduler;
pub mod simulated;
pub mod worker;

pub use plc_trait::{PlcReader, ReadStats};
pub use scheduler::{ClearOutcome, ReplaySummary, Scheduler, SessionInfo, TickReport};
pub use simulated::{SimulatedPattern, SimulatedPlc};
pub use worker::PollingWorker;

use crate::config::LoggerConfig;
use crate::error::Result;
use crate::export::{ExportLayout, ExportSummary, Exporter};
use crate::plot::{chart_series, ChartSeries};
use crate::types::{
    CollectionStats, ConnectionParams, LatestSnapshot, PlotKind, Sample, SessionState,
    VariableDescriptor,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Control message for the polling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Session state changed; re-evaluate whether to tick
    Wake,
    /// Leave the polling loop
    Shutdown,
}

/// Notification sent from the engine to the front end
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Session state changed
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A tick committed; carries the latest value of every registered variable
    Tick(Arc<LatestSnapshot>),
    /// One variable could not be read this tick
    ReadFailed {
        variable: VariableDescriptor,
        error: String,
    },
    /// A variable failed `failures` ticks in a row
    VariableUnreachable {
        variable: VariableDescriptor,
        failures: u32,
    },
    /// A previously unreachable variable was read again
    VariableRecovered(VariableDescriptor),
    /// A sample could not be journaled
    JournalFailure(String),
    /// Buffer and journal were cleared
    Cleared { samples: usize },
    /// Samples were restored from the journal at startup
    Replayed { records: usize, variables: usize },
    /// The polling thread exited
    Shutdown,
}

/// Front-end handle to the engine
///
/// Every session operation returns its outcome directly. Events are
/// delivered on a bounded queue; when the front end falls behind, new events
/// are dropped and counted in [`CollectionStats::dropped_events`].
pub struct EngineHandle {
    scheduler: Arc<Scheduler>,
    exporter: Exporter,
    /// Receiver for engine events
    pub receiver: Receiver<EngineEvent>,
    /// Sender for polling thread control
    pub command_sender: Sender<EngineCommand>,
}

impl EngineHandle {
    /// Nudge the polling thread; a full queue already holds a pending wake
    fn wake(&self) {
        let _ = self.command_sender.try_send(EngineCommand::Wake);
    }

    fn then_wake<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.wake();
        }
        result
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Receive all pending events
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Connect to the PLC at `ip` with the given rack and slot
    pub fn connect(&self, ip: impl Into<String>, rack: u16, slot: u16) -> Result<()> {
        self.connect_with(ConnectionParams::new(ip, rack, slot))
    }

    pub fn connect_with(&self, params: ConnectionParams) -> Result<()> {
        self.then_wake(self.scheduler.connect(params))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.then_wake(self.scheduler.disconnect())
    }

    pub fn add_variable(&self, variable: VariableDescriptor) -> Result<()> {
        self.scheduler.add_variable(variable)
    }

    pub fn remove_variable(&self, variable: &VariableDescriptor) -> Result<()> {
        self.scheduler.remove_variable(variable)
    }

    /// Start (or restart) collection at `interval`
    pub fn start(&self, interval: Duration, plot_kind: PlotKind) -> Result<()> {
        self.then_wake(self.scheduler.start(interval, plot_kind))
    }

    /// Pause collection
    pub fn stop(&self) -> Result<()> {
        self.then_wake(self.scheduler.stop())
    }

    /// Continue a paused session with its previous interval
    pub fn resume(&self) -> Result<()> {
        self.then_wake(self.scheduler.resume())
    }

    /// Clear collected data; `confirmed` is the operator's answer to the prompt
    pub fn clear(&self, confirmed: bool) -> Result<ClearOutcome> {
        self.scheduler.clear(confirmed)
    }

    /// Run one tick on the caller's thread
    pub fn tick_now(&self) -> Result<TickReport> {
        self.scheduler.tick()
    }

    /// Export the buffer with the configured layout
    pub fn export(&self, path: impl AsRef<Path>) -> Result<ExportSummary> {
        self.export_with(self.exporter.layout(), path)
    }

    pub fn export_with(&self, layout: ExportLayout, path: impl AsRef<Path>) -> Result<ExportSummary> {
        let exporter = Exporter::new(layout);
        self.scheduler
            .with_buffer(|buffer, order| exporter.export_to_file(buffer, order, path))?
    }

    pub fn state(&self) -> Result<SessionState> {
        self.scheduler.state()
    }

    pub fn session(&self) -> Result<SessionInfo> {
        self.scheduler.session()
    }

    pub fn variables(&self) -> Result<Vec<VariableDescriptor>> {
        self.scheduler.variables()
    }

    pub fn history(&self, variable: &VariableDescriptor) -> Result<Vec<Sample>> {
        self.scheduler.history(variable)
    }

    pub fn latest(&self) -> Result<Arc<LatestSnapshot>> {
        self.scheduler.latest()
    }

    /// Chart series for every registered variable, in registration order
    pub fn chart_series(&self) -> Result<Vec<ChartSeries>> {
        let kind = self.scheduler.plot_kind()?;
        self.scheduler
            .with_buffer(|buffer, order| chart_series(buffer, order, kind))
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        self.scheduler.stats()
    }

    /// Pause and disconnect if needed, then stop the polling thread
    pub fn shutdown(&self) -> Result<()> {
        let state = self.scheduler.state()?;
        if state == SessionState::Running {
            self.scheduler.stop()?;
        }
        if state.is_connected() {
            self.scheduler.disconnect()?;
        }
        let _ = self.command_sender.send(EngineCommand::Shutdown);
        Ok(())
    }
}

/// The polling side of the engine, run on its own thread
pub struct LoggerBackend {
    scheduler: Arc<Scheduler>,
    /// Receiver for commands from the handle
    command_receiver: Receiver<EngineCommand>,
    /// Running flag
    running: Arc<AtomicBool>,
}

impl LoggerBackend {
    /// Create the engine, replaying the journal if configured
    pub fn new(config: LoggerConfig, reader: Box<dyn PlcReader>) -> Result<(Self, EngineHandle)> {
        let (cmd_tx, cmd_rx) = bounded(256);
        let (event_tx, event_rx) = bounded(config.collection.event_buffer_size.max(1));

        let scheduler = Arc::new(Scheduler::new(&config, reader, event_tx)?);

        let backend = Self {
            scheduler: Arc::clone(&scheduler),
            command_receiver: cmd_rx,
            running: Arc::new(AtomicBool::new(true)),
        };

        let handle = EngineHandle {
            scheduler,
            exporter: Exporter::new(config.export.layout),
            receiver: event_rx,
            command_sender: cmd_tx,
        };

        Ok((backend, handle))
    }

    /// Run the polling loop on the current thread
    pub fn run(self) {
        let mut worker = PollingWorker::new(self.scheduler, self.command_receiver, self.running);
        worker.run();
    }

    /// Run the polling loop on a named thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("s7-poller".to_string())
            .spawn(move || self.run())
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
