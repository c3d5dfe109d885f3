//! Simulated controller and engine construction helpers

use s7_logger::backend::{EngineEvent, EngineHandle, LoggerBackend, SimulatedPattern, SimulatedPlc};
use s7_logger::config::LoggerConfig;
use s7_logger::types::{Value, VariableDescriptor};
use std::time::{Duration, Instant};

/// Create a simulated PLC with a deterministic counter on every variable
pub fn create_test_plc() -> SimulatedPlc {
    SimulatedPlc::new().with_default_pattern(SimulatedPattern::Counter {
        step: 1.0,
        min: 0.0,
        max: 1000.0,
    })
}

/// Build an engine around a clone of `plc`; the caller keeps `plc` for control
pub fn create_engine(
    config: LoggerConfig,
    plc: &SimulatedPlc,
) -> (LoggerBackend, EngineHandle) {
    LoggerBackend::new(config, Box::new(plc.clone())).unwrap()
}

/// Script INT values for one variable
pub fn script_ints(plc: &SimulatedPlc, variable: VariableDescriptor, values: &[i16]) {
    plc.script_values(variable, values.iter().map(|v| Value::Int(*v)));
}

/// Wait until `predicate` holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// Wait for the next event matching `filter`
pub fn wait_for_event(
    engine: &EngineHandle,
    timeout: Duration,
    mut filter: impl FnMut(&EngineEvent) -> bool,
) -> Option<EngineEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let event = engine.recv_timeout(remaining)?;
        if filter(&event) {
            return Some(event);
        }
    }
}
