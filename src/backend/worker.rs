//! Polling worker thread
//!
//! The worker is the timer that drives [`Scheduler::tick`]. It owns no
//! session state of its own: every decision about what to read and whether
//! reading is allowed is made by the scheduler, so ticks can also be driven
//! by hand in tests.
//!
//! # Cadence
//!
//! Ticks are scheduled start-to-start: the next tick is due `interval` after
//! the previous one *started*. A tick that overruns its interval is followed
//! immediately by the next one; missed ticks are not replayed in a burst.
//!
//! While the session is not Running the worker blocks on its command channel
//! and uses no CPU. [`EngineCommand::Wake`] makes it re-read the session
//! state, [`EngineCommand::Shutdown`] ends the loop.

use crate::backend::scheduler::Scheduler;
use crate::backend::{EngineCommand, EngineEvent};
use crate::types::SessionState;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The worker that runs the polling loop
pub struct PollingWorker {
    scheduler: Arc<Scheduler>,
    /// Command receiver from the engine handle
    command_rx: Receiver<EngineCommand>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// When the next tick is due; `None` ticks immediately
    next_tick: Option<Instant>,
}

impl PollingWorker {
    pub fn new(
        scheduler: Arc<Scheduler>,
        command_rx: Receiver<EngineCommand>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            scheduler,
            command_rx,
            running,
            next_tick: None,
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("Polling worker started");

        while self.running.load(Ordering::SeqCst) {
            let state = match self.scheduler.state() {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!("Polling worker cannot read session state: {}", e);
                    break;
                }
            };

            if state == SessionState::Running {
                if self.next_tick.map_or(true, |due| Instant::now() >= due) {
                    self.run_tick();
                }
                let deadline = self.next_tick.unwrap_or_else(Instant::now);
                match self.command_rx.recv_deadline(deadline) {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        self.running.store(false, Ordering::SeqCst);
                    }
                }
            } else {
                // Resume ticks immediately rather than waiting out a stale deadline
                self.next_tick = None;
                match self.command_rx.recv() {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => self.running.store(false, Ordering::SeqCst),
                }
            }
        }

        self.scheduler.emit(EngineEvent::Shutdown);
        tracing::info!("Polling worker stopped");
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Wake => {}
            EngineCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn run_tick(&mut self) {
        let started = Instant::now();

        match self.scheduler.tick() {
            Ok(report) => {
                if let Some(e) = &report.journal_error {
                    tracing::warn!("Tick {} not fully journaled: {}", report.tick, e);
                }
            }
            Err(e) => tracing::error!("Tick failed: {}", e),
        }

        match self.scheduler.interval() {
            Ok(interval) => self.next_tick = Some(started + interval),
            Err(e) => {
                tracing::error!("Polling worker cannot read interval: {}", e);
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedPlc;
    use crate::config::LoggerConfig;
    use crate::types::{ConnectionParams, DataType, PlotKind, VariableDescriptor};
    use crossbeam_channel::bounded;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_worker(
        dir: &TempDir,
    ) -> (PollingWorker, Arc<Scheduler>, crossbeam_channel::Sender<EngineCommand>) {
        let mut config = LoggerConfig::default();
        config.journal.path = Some(dir.path().join("journal.jsonl"));
        let (event_tx, _event_rx) = bounded(16);
        let scheduler =
            Arc::new(Scheduler::new(&config, Box::new(SimulatedPlc::new()), event_tx).unwrap());
        let (cmd_tx, cmd_rx) = bounded(16);
        let running = Arc::new(AtomicBool::new(true));
        let worker = PollingWorker::new(Arc::clone(&scheduler), cmd_rx, running);
        (worker, scheduler, cmd_tx)
    }

    #[test]
    fn test_shutdown_command() {
        let dir = TempDir::new().unwrap();
        let (mut worker, _, cmd_tx) = create_test_worker(&dir);

        cmd_tx.send(EngineCommand::Shutdown).unwrap();
        worker.run();

        assert!(!worker.running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_handle_stops_worker() {
        let dir = TempDir::new().unwrap();
        let (mut worker, _, cmd_tx) = create_test_worker(&dir);
        drop(cmd_tx);
        worker.run();
        assert!(!worker.running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_tick_schedules_from_tick_start() {
        let dir = TempDir::new().unwrap();
        let (mut worker, scheduler, _cmd_tx) = create_test_worker(&dir);
        scheduler.connect(ConnectionParams::default()).unwrap();
        scheduler
            .add_variable(VariableDescriptor::new(1, 0, DataType::Int))
            .unwrap();
        scheduler
            .start(Duration::from_millis(200), PlotKind::Line)
            .unwrap();

        let before = Instant::now();
        worker.run_tick();
        let due = worker.next_tick.unwrap();
        assert!(due >= before + Duration::from_millis(200));
        assert!(due <= Instant::now() + Duration::from_millis(200));
        assert_eq!(scheduler.stats().unwrap().ticks, 1);
    }
}
