//! Polling scheduler: the session state machine and the per-tick algorithm
//!
//! The scheduler owns the one logging session of a run. Every user operation
//! and every timer tick goes through it, so transition legality is enforced
//! in one place.
//!
//! # States
//!
//! ```text
//!            connect              start
//!   Idle ───────────► Connected ─────────► Running ◄─┐
//!    ▲                   ▲                  │ stop    │ resume/start
//!    │ connect failed    │ connect          ▼         │
//!    └───────────────────┴──────────────── Paused ────┘
//!
//!   any connected state ── disconnect ──► Stopped ── connect ──► Connected
//! ```
//!
//! # Tick
//!
//! 1. Snapshot the registry and take one timestamp for the whole tick.
//! 2. Read every variable in registration order. A failure or a read slower
//!    than the read timeout only affects that variable.
//! 3. Append each sample to the journal, retrying on I/O errors.
//! 4. Commit the batch to the buffer and publish a new [`LatestSnapshot`].
//!
//! # Locking
//!
//! Locks are always taken in this order: tick gate, reader, core, buffer,
//! latest snapshot. The tick gate is held for a whole tick and by Stop, Clear,
//! Connect and Disconnect, so those never interleave with reads. The buffer
//! lock is never held across a reader call.

use crate::backend::plc_trait::{PlcReader, ReadStats};
use crate::backend::EngineEvent;
use crate::buffer::SampleBuffer;
use crate::config::LoggerConfig;
use crate::error::{LoggerError, Result};
use crate::journal::Journal;
use crate::registry::VariableRegistry;
use crate::types::{
    CollectionStats, ConnectionParams, LatestSnapshot, PlotKind, Sample, SessionClock,
    SessionState, Timestamp, Value, VariableDescriptor,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Tunables the scheduler reads from [`LoggerConfig`]
#[derive(Debug, Clone, Copy)]
struct Limits {
    read_timeout: Duration,
    unreachable_threshold: u32,
    write_retries: u32,
}

/// Result of a Clear request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The operator declined the confirmation; nothing changed
    Cancelled,
    /// Buffer and journal were wiped
    Cleared {
        /// Samples removed from the buffer
        samples: usize,
    },
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// Tick number, starting at 1 after each Clear; 0 when the tick was skipped
    pub tick: u64,
    /// Timestamp shared by every sample of the tick
    pub timestamp: Option<Timestamp>,
    /// Samples committed this tick, in registration order
    pub samples: Vec<Sample>,
    /// Variables whose read failed, with the reason
    pub failures: Vec<(VariableDescriptor, String)>,
    /// Variables that crossed the unreachable threshold this tick
    pub unreachable: Vec<VariableDescriptor>,
    /// Variables that read successfully after being unreachable
    pub recovered: Vec<VariableDescriptor>,
    /// First journal failure of the tick; the samples stay in the buffer
    pub journal_error: Option<LoggerError>,
    /// Wall time spent on the tick
    pub duration: Duration,
}

impl TickReport {
    /// True when the session was not Running and nothing was read
    pub fn skipped(&self) -> bool {
        self.tick == 0
    }

    pub fn value_of(&self, variable: &VariableDescriptor) -> Option<Value> {
        self.samples
            .iter()
            .find(|s| s.variable == *variable)
            .map(|s| s.value)
    }
}

/// What a journal replay restored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub records: usize,
    pub variables_restored: usize,
}

/// Read-only view of the session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub state: SessionState,
    pub interval: Duration,
    pub plot_kind: PlotKind,
    pub connection: Option<ConnectionParams>,
    pub started_at: Option<DateTime<Utc>>,
    pub variables: Vec<VariableDescriptor>,
    pub journal_path: PathBuf,
}

/// Session data guarded by the core lock
struct Core {
    state: SessionState,
    interval: Duration,
    plot_kind: PlotKind,
    connection: Option<ConnectionParams>,
    started_at: Option<DateTime<Utc>>,
    registry: VariableRegistry,
    journal: Journal,
    clock: SessionClock,
    /// Consecutive failures per variable in the current streak
    failures: HashMap<VariableDescriptor, u32>,
    /// Variables already reported unreachable in the current streak
    unreachable: HashSet<VariableDescriptor>,
    stats: CollectionStats,
    read_stats: ReadStats,
    /// Ticks since the last Clear
    tick_count: u64,
}

impl Core {
    fn transition(&mut self, to: SessionState) -> Option<EngineEvent> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        tracing::info!("Session state {} -> {}", from, to);
        Some(EngineEvent::StateChanged { from, to })
    }

    fn append_with_retry(&mut self, sample: &Sample, retries: u32) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.journal.append(sample) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Journal append for {} failed (attempt {}/{}): {}",
                        sample.variable,
                        attempt,
                        retries + 1,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The acquisition engine's state machine and tick logic
///
/// All methods take `&self`; the scheduler is shared between the control
/// thread and the polling worker behind an `Arc`.
pub struct Scheduler {
    limits: Limits,
    tick_gate: Mutex<()>,
    reader: Mutex<Box<dyn PlcReader>>,
    core: Mutex<Core>,
    buffer: RwLock<SampleBuffer>,
    latest: RwLock<Arc<LatestSnapshot>>,
    events: Sender<EngineEvent>,
    dropped_events: AtomicU64,
}

fn poisoned(what: &str) -> LoggerError {
    LoggerError::Internal(format!("{} lock poisoned", what))
}

impl Scheduler {
    /// Create the scheduler, opening the journal and restoring its contents
    /// when `journal.replay_on_start` is set
    pub fn new(
        config: &LoggerConfig,
        reader: Box<dyn PlcReader>,
        events: Sender<EngineEvent>,
    ) -> Result<Self> {
        let journal = Journal::open(config.journal.resolved_path())?;

        let mut registry = VariableRegistry::new();
        for var in &config.variables {
            if let Err(e) = registry.add(*var) {
                tracing::warn!("Ignoring configured variable: {}", e);
            }
        }

        let core = Core {
            state: SessionState::Idle,
            interval: config.collection.interval(),
            plot_kind: config.collection.plot_kind,
            connection: None,
            started_at: None,
            registry,
            journal,
            clock: SessionClock::new(),
            failures: HashMap::new(),
            unreachable: HashSet::new(),
            stats: CollectionStats::default(),
            read_stats: ReadStats::default(),
            tick_count: 0,
        };

        let scheduler = Self {
            limits: Limits {
                read_timeout: config.collection.read_timeout(),
                unreachable_threshold: config.collection.unreachable_threshold.max(1),
                write_retries: config.journal.write_retries,
            },
            tick_gate: Mutex::new(()),
            reader: Mutex::new(reader),
            core: Mutex::new(core),
            buffer: RwLock::new(SampleBuffer::new()),
            latest: RwLock::new(Arc::new(LatestSnapshot::default())),
            events,
            dropped_events: AtomicU64::new(0),
        };

        if config.journal.replay_on_start {
            scheduler.restore_from_journal()?;
        }

        Ok(scheduler)
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.tick_gate.lock().map_err(|_| poisoned("tick gate"))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Box<dyn PlcReader>>> {
        self.reader.lock().map_err(|_| poisoned("reader"))
    }

    fn core(&self) -> Result<MutexGuard<'_, Core>> {
        self.core.lock().map_err(|_| poisoned("session"))
    }

    fn buffer_read(&self) -> Result<RwLockReadGuard<'_, SampleBuffer>> {
        self.buffer.read().map_err(|_| poisoned("buffer"))
    }

    fn buffer_write(&self) -> Result<RwLockWriteGuard<'_, SampleBuffer>> {
        self.buffer.write().map_err(|_| poisoned("buffer"))
    }

    /// Try to send an event, counting it as dropped if the queue is full
    pub(crate) fn emit(&self, event: EngineEvent) {
        if self.events.try_send(event).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn emit_all(&self, events: impl IntoIterator<Item = EngineEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn publish_latest(&self, buffer: &SampleBuffer, variables: &[VariableDescriptor], tick: u64) -> Result<Arc<LatestSnapshot>> {
        let snapshot = Arc::new(LatestSnapshot {
            tick,
            entries: variables
                .iter()
                .map(|v| (*v, buffer.latest(v).copied()))
                .collect(),
        });
        *self.latest.write().map_err(|_| poisoned("snapshot"))? = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    /// Load every journaled sample into the buffer and re-register its variables
    fn restore_from_journal(&self) -> Result<ReplaySummary> {
        let mut core = self.core()?;
        let mut samples = Vec::new();
        for record in core.journal.replay_all()? {
            match record.and_then(|r| r.to_sample()) {
                Ok(sample) => samples.push(sample),
                Err(e) => tracing::warn!("Skipping journal record: {}", e),
            }
        }
        if samples.is_empty() {
            return Ok(ReplaySummary::default());
        }

        let mut seen = Vec::new();
        for sample in &samples {
            if !seen.contains(&sample.variable) {
                seen.push(sample.variable);
            }
        }
        let variables_restored = core.registry.restore_from(&seen);

        // New samples must sort after everything already on disk
        if let Some(last) = samples.iter().map(|s| s.timestamp.elapsed).max() {
            core.clock = SessionClock::continuing_from(last + Duration::from_millis(1));
        }
        core.stats.journal_records = samples.len() as u64;

        let summary = ReplaySummary {
            records: samples.len(),
            variables_restored,
        };
        let mut buffer = self.buffer_write()?;
        buffer.record_batch(samples);
        self.publish_latest(&buffer, core.registry.list(), 0)?;
        drop(buffer);
        drop(core);

        tracing::info!(
            "Restored {} samples from journal ({} variables re-registered)",
            summary.records,
            summary.variables_restored
        );
        self.emit(EngineEvent::Replayed {
            records: summary.records,
            variables: summary.variables_restored,
        });
        Ok(summary)
    }

    /// Connect to the PLC; allowed from every state except Running
    pub fn connect(&self, params: ConnectionParams) -> Result<()> {
        let _gate = self.gate()?;
        let state = self.core()?.state;
        if state == SessionState::Running {
            return Err(LoggerError::InvalidState {
                operation: "connect",
                state,
            });
        }

        let result = {
            let mut reader = self.reader()?;
            if reader.is_connected() {
                reader.disconnect();
            }
            reader.connect(&params).and_then(|_| {
                if reader.is_connected() {
                    Ok(())
                } else {
                    Err(LoggerError::Connection(format!("{} did not accept the session", params)))
                }
            })
        };

        let mut core = self.core()?;
        match result {
            Ok(()) => {
                tracing::info!("Connected to PLC at {}", params);
                core.connection = Some(params);
                core.registry.thaw();
                let event = core.transition(SessionState::Connected);
                drop(core);
                self.emit_all(event);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to connect to {}: {}", params, e);
                core.connection = None;
                let event = core.transition(SessionState::Idle);
                drop(core);
                self.emit_all(event);
                Err(match e {
                    LoggerError::Connection(_) => e,
                    other => LoggerError::Connection(other.to_string()),
                })
            }
        }
    }

    /// Release the PLC connection
    pub fn disconnect(&self) -> Result<()> {
        let _gate = self.gate()?;
        let state = self.core()?.state;
        if !state.is_connected() {
            return Err(LoggerError::InvalidState {
                operation: "disconnect",
                state,
            });
        }

        self.reader()?.disconnect();

        let mut core = self.core()?;
        core.registry.thaw();
        core.connection = None;
        let event = core.transition(SessionState::Stopped);
        drop(core);
        self.emit_all(event);
        Ok(())
    }

    pub fn add_variable(&self, variable: VariableDescriptor) -> Result<()> {
        self.core()?.registry.add(variable)?;
        tracing::info!("Registered {}", variable);
        Ok(())
    }

    pub fn remove_variable(&self, variable: &VariableDescriptor) -> Result<()> {
        let mut core = self.core()?;
        core.registry.remove(variable)?;
        core.failures.remove(variable);
        core.unreachable.remove(variable);
        tracing::info!("Unregistered {}", variable);
        Ok(())
    }

    /// Begin polling every `interval`; accepted from Connected and Paused
    pub fn start(&self, interval: Duration, plot_kind: PlotKind) -> Result<()> {
        let mut core = self.core()?;
        match core.state {
            SessionState::Connected | SessionState::Paused => {}
            state => {
                return Err(LoggerError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }
        if core.registry.is_empty() {
            return Err(LoggerError::InvalidStartParameters(
                "StartWithNoVariables: no variables registered".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(LoggerError::InvalidStartParameters(
                "polling interval must be greater than zero".to_string(),
            ));
        }

        core.interval = interval;
        core.plot_kind = plot_kind;
        core.registry.freeze();
        if core.started_at.is_none() {
            core.started_at = Some(Utc::now());
        }
        tracing::info!(
            "Polling {} variables every {:?} ({} plot)",
            core.registry.len(),
            interval,
            plot_kind.display_name()
        );
        let event = core.transition(SessionState::Running);
        drop(core);
        self.emit_all(event);
        Ok(())
    }

    /// Pause polling; no reader call happens after this returns
    pub fn stop(&self) -> Result<()> {
        let _gate = self.gate()?;
        let mut core = self.core()?;
        if core.state != SessionState::Running {
            return Err(LoggerError::InvalidState {
                operation: "stop",
                state: core.state,
            });
        }
        core.registry.thaw();
        let event = core.transition(SessionState::Paused);
        drop(core);
        self.emit_all(event);
        Ok(())
    }

    /// Continue polling from Paused with the current interval
    pub fn resume(&self) -> Result<()> {
        let mut core = self.core()?;
        if core.state != SessionState::Paused {
            return Err(LoggerError::InvalidState {
                operation: "resume",
                state: core.state,
            });
        }
        if core.registry.is_empty() {
            return Err(LoggerError::InvalidStartParameters(
                "StartWithNoVariables: no variables registered".to_string(),
            ));
        }
        core.registry.freeze();
        let event = core.transition(SessionState::Running);
        drop(core);
        self.emit_all(event);
        Ok(())
    }

    /// Wipe the buffer and the journal
    ///
    /// An unconfirmed request changes nothing. Polling state is kept: a
    /// Running session continues into the empty containers.
    ///
    /// The journal is purged first. When that fails the journal is still on
    /// disk, so the buffer is left as it was and the error is returned.
    pub fn clear(&self, confirmed: bool) -> Result<ClearOutcome> {
        if !confirmed {
            tracing::info!("Clear cancelled by operator");
            return Ok(ClearOutcome::Cancelled);
        }

        let _gate = self.gate()?;
        let mut core = self.core()?;
        if !core.state.can_clear() {
            return Err(LoggerError::InvalidState {
                operation: "clear",
                state: core.state,
            });
        }

        core.journal.purge()?;

        let mut buffer = self.buffer_write()?;
        let samples = buffer.total_samples();
        buffer.clear();
        self.publish_latest(&buffer, core.registry.list(), 0)?;
        drop(buffer);

        core.clock = SessionClock::new();
        core.tick_count = 0;
        core.failures.clear();
        core.unreachable.clear();
        core.stats.journal_records = 0;
        drop(core);

        tracing::info!("Cleared {} samples", samples);
        self.emit(EngineEvent::Cleared { samples });
        Ok(ClearOutcome::Cleared { samples })
    }

    /// Run one polling tick
    ///
    /// Returns a skipped report when the session is not Running. Read and
    /// journal failures are reported, never returned as `Err`.
    pub fn tick(&self) -> Result<TickReport> {
        let _gate = self.gate()?;
        let started = Instant::now();

        let (variables, timestamp) = {
            let core = self.core()?;
            if core.state != SessionState::Running {
                return Ok(TickReport::default());
            }
            (core.registry.list().to_vec(), core.clock.now())
        };

        let mut outcomes = Vec::with_capacity(variables.len());
        {
            let mut reader = self.reader()?;
            for var in &variables {
                let read_started = Instant::now();
                let result = reader.read_value(var);
                let elapsed = read_started.elapsed();
                let result = match result {
                    Ok(_) if elapsed > self.limits.read_timeout => Err(LoggerError::Timeout(
                        format!(
                            "{} took {} ms (limit {} ms)",
                            var,
                            elapsed.as_millis(),
                            self.limits.read_timeout.as_millis()
                        ),
                    )),
                    other => other,
                };
                outcomes.push((*var, result, elapsed));
            }
        }

        let mut report = TickReport {
            timestamp: Some(timestamp),
            ..TickReport::default()
        };
        let mut events = Vec::new();
        {
            let mut core = self.core()?;
            core.tick_count += 1;
            report.tick = core.tick_count;

            for (var, result, elapsed) in outcomes {
                match result {
                    Ok(value) => {
                        core.read_stats
                            .record_success(elapsed, var.data_type.size_bytes());
                        core.stats.successful_reads += 1;
                        core.failures.remove(&var);
                        if core.unreachable.remove(&var) {
                            tracing::info!("{} reachable again", var);
                            report.recovered.push(var);
                            events.push(EngineEvent::VariableRecovered(var));
                        }

                        let sample = Sample::new(var, timestamp, value);
                        match core.append_with_retry(&sample, self.limits.write_retries) {
                            Ok(()) => core.stats.journal_records += 1,
                            Err(e) => {
                                tracing::error!("Journal append for {} failed: {}", var, e);
                                core.stats.journal_failures += 1;
                                events.push(EngineEvent::JournalFailure(e.to_string()));
                                if report.journal_error.is_none() {
                                    report.journal_error = Some(e);
                                }
                            }
                        }
                        report.samples.push(sample);
                    }
                    Err(e) => {
                        core.read_stats.record_failure();
                        core.stats.failed_reads += 1;
                        let streak = {
                            let count = core.failures.entry(var).or_insert(0);
                            *count += 1;
                            *count
                        };
                        tracing::warn!("Read of {} failed ({} in a row): {}", var, streak, e);
                        events.push(EngineEvent::ReadFailed {
                            variable: var,
                            error: e.to_string(),
                        });

                        if streak >= self.limits.unreachable_threshold
                            && core.unreachable.insert(var)
                        {
                            let err = LoggerError::VariableUnreachable {
                                variable: var,
                                failures: streak,
                            };
                            tracing::error!("{}", err);
                            report.unreachable.push(var);
                            events.push(EngineEvent::VariableUnreachable {
                                variable: var,
                                failures: streak,
                            });
                        }
                        report.failures.push((var, e.to_string()));
                    }
                }
            }
        }

        let snapshot = {
            let mut buffer = self.buffer_write()?;
            buffer.record_batch(report.samples.iter().copied());
            self.publish_latest(&buffer, &variables, report.tick)?
        };

        report.duration = started.elapsed();
        {
            let mut core = self.core()?;
            core.stats.record_tick(report.duration);
        }
        tracing::trace!(
            "Tick {} read {}/{} variables in {:?}",
            report.tick,
            report.samples.len(),
            variables.len(),
            report.duration
        );

        events.push(EngineEvent::Tick(snapshot));
        self.emit_all(events);
        Ok(report)
    }

    pub fn state(&self) -> Result<SessionState> {
        Ok(self.core()?.state)
    }

    pub fn interval(&self) -> Result<Duration> {
        Ok(self.core()?.interval)
    }

    pub fn plot_kind(&self) -> Result<PlotKind> {
        Ok(self.core()?.plot_kind)
    }

    /// Registered variables in registration order
    pub fn variables(&self) -> Result<Vec<VariableDescriptor>> {
        Ok(self.core()?.registry.list().to_vec())
    }

    pub fn session(&self) -> Result<SessionInfo> {
        let core = self.core()?;
        Ok(SessionInfo {
            state: core.state,
            interval: core.interval,
            plot_kind: core.plot_kind,
            connection: core.connection.clone(),
            started_at: core.started_at,
            variables: core.registry.list().to_vec(),
            journal_path: core.journal.path().to_path_buf(),
        })
    }

    /// Ordered history of one variable
    pub fn history(&self, variable: &VariableDescriptor) -> Result<Vec<Sample>> {
        Ok(self.buffer_read()?.history(variable).to_vec())
    }

    /// Snapshot published by the last tick
    pub fn latest(&self) -> Result<Arc<LatestSnapshot>> {
        self.latest
            .read()
            .map(|s| Arc::clone(&s))
            .map_err(|_| poisoned("snapshot"))
    }

    /// Run `f` against the buffer together with the registration order
    pub fn with_buffer<R>(
        &self,
        f: impl FnOnce(&SampleBuffer, &[VariableDescriptor]) -> R,
    ) -> Result<R> {
        let order = self.variables()?;
        let buffer = self.buffer_read()?;
        Ok(f(&buffer, &order))
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        let core = self.core()?;
        let mut stats = core.stats.clone();
        stats.dropped_events = self.dropped_events.load(Ordering::Relaxed);
        stats.avg_read_time_us = core.read_stats.avg_read_time_us();
        stats.min_latency_us = core.read_stats.recent_min_us();
        stats.max_latency_us = core.read_stats.recent_max_us();
        stats.jitter_us = core.read_stats.jitter_us();
        Ok(stats)
    }

    pub fn journal_path(&self) -> Result<PathBuf> {
        Ok(self.core()?.journal.path().to_path_buf())
    }
}
