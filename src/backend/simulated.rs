//! Simulated S7 controller
//!
//! An in-process [`PlcReader`] for running the logger without hardware. Values
//! come from per-variable patterns, scripted sequences or raw data-block
//! memory, and failures, latency and refused connections can be injected.
//!
//! # Data Patterns
//!
//! - [`SimulatedPattern::Constant`] - Fixed value
//! - [`SimulatedPattern::Sine`] - Sinusoidal wave with configurable frequency/amplitude
//! - [`SimulatedPattern::Counter`] - Incrementing counter with wrap-around
//! - [`SimulatedPattern::Random`] - Pseudo-random values within a range
//! - [`SimulatedPattern::Sawtooth`] - Linear ramp that resets periodically
//! - [`SimulatedPattern::Square`] - Square wave alternating between two values
//!
//! # Shared Control
//!
//! `SimulatedPlc` is a cheap handle; clones share the same controller. Keep a
//! clone after boxing one into the engine to script values or inject faults:
//!
//! ```ignore
//! let plc = SimulatedPlc::new();
//! let control = plc.clone();
//! let (backend, handle) = LoggerBackend::new(config, Box::new(plc))?;
//!
//! control.script_values(var, [Value::Int(10), Value::Int(12)]);
//! control.fail_reads(other_var, Some(3));
//! ```

use crate::backend::plc_trait::PlcReader;
use crate::error::{LoggerError, Result};
use crate::types::{ConnectionParams, DataType, Value, VariableDescriptor};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Pattern for generating simulated values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulatedPattern {
    Constant(f64),
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter advancing by `step` on every read
    Counter { step: f64, min: f64, max: f64 },
    Random { min: f64, max: f64 },
    Sawtooth { period: f64, amplitude: f64 },
    Square { period: f64, amplitude: f64 },
}

impl Default for SimulatedPattern {
    fn default() -> Self {
        SimulatedPattern::Sine {
            frequency: 0.2,
            amplitude: 100.0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct PatternState {
    pattern: SimulatedPattern,
    counter_value: f64,
}

impl PatternState {
    fn new(pattern: SimulatedPattern) -> Self {
        let counter_value = match pattern {
            SimulatedPattern::Counter { min, step, .. } => min - step,
            _ => 0.0,
        };
        Self {
            pattern,
            counter_value,
        }
    }

    fn generate(&mut self, elapsed_secs: f64, phase: f64) -> f64 {
        match self.pattern {
            SimulatedPattern::Constant(v) => v,
            SimulatedPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => {
                offset
                    + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs + phase).sin()
            }
            SimulatedPattern::Counter { step, min, max } => {
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                self.counter_value
            }
            SimulatedPattern::Random { min, max } => min + rand_simple() * (max - min),
            SimulatedPattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs % period;
                amplitude * (t / period)
            }
            SimulatedPattern::Square { period, amplitude } => {
                if elapsed_secs % period < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
        }
    }
}

/// Xorshift generator; quality is irrelevant for test signals
fn rand_simple() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static SEED: Cell<u64> = const { Cell::new(0x5EED_1234) };
    }
    SEED.with(|seed| {
        let mut s = seed.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        seed.set(s);
        (s as f64) / (u64::MAX as f64)
    })
}

#[derive(Debug)]
struct SimulatedState {
    connected: bool,
    params: Option<ConnectionParams>,
    refuse_connections: bool,
    start_time: Instant,
    read_delay: Duration,
    default_pattern: SimulatedPattern,
    patterns: HashMap<VariableDescriptor, PatternState>,
    scripted: HashMap<VariableDescriptor, VecDeque<Value>>,
    /// Remaining failures per variable; `None` fails until cleared
    failures: HashMap<VariableDescriptor, Option<u32>>,
    /// Raw data block contents
    blocks: HashMap<u16, Vec<u8>>,
    reads: u64,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            connected: false,
            params: None,
            refuse_connections: false,
            start_time: Instant::now(),
            read_delay: Duration::ZERO,
            default_pattern: SimulatedPattern::default(),
            patterns: HashMap::new(),
            scripted: HashMap::new(),
            failures: HashMap::new(),
            blocks: HashMap::new(),
            reads: 0,
        }
    }
}

impl SimulatedState {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(LoggerError::Connection("Simulated PLC not connected".to_string()))
        }
    }

    /// Consume one injected failure for `variable`, if any
    fn take_failure(&mut self, variable: &VariableDescriptor) -> bool {
        match self.failures.get_mut(variable) {
            None => false,
            Some(None) => true,
            Some(Some(0)) => {
                self.failures.remove(variable);
                false
            }
            Some(Some(n)) => {
                *n -= 1;
                if *n == 0 {
                    self.failures.remove(variable);
                }
                true
            }
        }
    }

    fn read_block(&self, block: u16, offset: u32, size: usize) -> Option<Vec<u8>> {
        let data = self.blocks.get(&block)?;
        let start = offset as usize;
        data.get(start..start + size).map(<[u8]>::to_vec)
    }

    fn generate(&mut self, variable: &VariableDescriptor) -> Value {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        // Spread unconfigured variables apart so they are distinguishable on a chart
        let phase = ((variable.block as u32 * 31 + variable.offset) % 360) as f64
            * std::f64::consts::PI
            / 180.0;

        let default_pattern = self.default_pattern;
        let state = self
            .patterns
            .entry(*variable)
            .or_insert_with(|| PatternState::new(default_pattern));
        let raw = state.generate(elapsed, phase);

        match variable.data_type {
            DataType::Bool => Value::Bool(raw > 0.0),
            other => Value::from_f64(other, raw),
        }
    }
}

/// Simulated PLC reader
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlc {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimulatedState>> {
        self.state
            .lock()
            .map_err(|_| LoggerError::Internal("simulated PLC state poisoned".to_string()))
    }

    /// Run `f` against the state, ignoring a poisoned lock
    fn with_state(&self, f: impl FnOnce(&mut SimulatedState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    /// Set the pattern used for variables without their own configuration
    pub fn with_default_pattern(self, pattern: SimulatedPattern) -> Self {
        self.with_state(|s| s.default_pattern = pattern);
        self
    }

    /// Set the simulated latency of every read
    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.set_read_delay(delay);
        self
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.with_state(|s| s.read_delay = delay);
    }

    /// Configure the pattern for one variable
    pub fn set_pattern(&self, variable: VariableDescriptor, pattern: SimulatedPattern) {
        self.with_state(|s| {
            s.patterns.insert(variable, PatternState::new(pattern));
        });
    }

    /// Queue exact values returned by the next reads of `variable`
    pub fn script_values(&self, variable: VariableDescriptor, values: impl IntoIterator<Item = Value>) {
        self.with_state(|s| s.scripted.entry(variable).or_default().extend(values));
    }

    /// Make the next `count` reads of `variable` fail, or all of them for `None`
    pub fn fail_reads(&self, variable: VariableDescriptor, count: Option<u32>) {
        self.with_state(|s| {
            s.failures.insert(variable, count);
        });
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| s.failures.clear());
    }

    /// Make subsequent connect attempts fail as if the CPU were unreachable
    pub fn refuse_connections(&self, refuse: bool) {
        self.with_state(|s| s.refuse_connections = refuse);
    }

    /// Write raw bytes into a data block, growing it as needed
    pub fn write_block(&self, block: u16, offset: u32, data: &[u8]) {
        self.with_state(|s| {
            let mem = s.blocks.entry(block).or_default();
            let end = offset as usize + data.len();
            if mem.len() < end {
                mem.resize(end, 0);
            }
            mem[offset as usize..end].copy_from_slice(data);
        });
    }

    /// Write a typed value into its data block
    pub fn write_value(&self, variable: &VariableDescriptor, value: Value) {
        self.write_block(variable.block, variable.offset, &value.to_be_bytes());
    }

    /// Number of read attempts served so far
    pub fn read_count(&self) -> u64 {
        self.lock().map(|s| s.reads).unwrap_or(0)
    }

    /// Parameters of the current connection
    pub fn connected_to(&self) -> Option<ConnectionParams> {
        self.lock().ok().and_then(|s| s.params.clone())
    }

    /// Sleep for the configured delay without holding the state lock
    fn simulate_latency(&self) -> Result<()> {
        let delay = self.lock()?.read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

impl PlcReader for SimulatedPlc {
    fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        let mut state = self.lock()?;
        if state.refuse_connections {
            return Err(LoggerError::Connection(format!(
                "No response from {}",
                params
            )));
        }
        state.connected = true;
        state.params = Some(params.clone());
        state.start_time = Instant::now();
        tracing::info!("Simulated PLC connected at {}", params);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.with_state(|s| {
            if s.connected {
                tracing::info!("Simulated PLC disconnected");
            }
            s.connected = false;
            s.params = None;
        });
    }

    fn is_connected(&self) -> bool {
        self.lock().map(|s| s.connected).unwrap_or(false)
    }

    fn read_area(&mut self, block: u16, offset: u32, size: usize) -> Result<Vec<u8>> {
        self.simulate_latency()?;
        let mut state = self.lock()?;
        state.ensure_connected()?;
        state.reads += 1;
        state.read_block(block, offset, size).ok_or_else(|| {
            LoggerError::Connection(format!(
                "Address DB{}.{} (+{}) out of range",
                block, offset, size
            ))
        })
    }

    fn read_value(&mut self, variable: &VariableDescriptor) -> Result<Value> {
        self.simulate_latency()?;
        let mut state = self.lock()?;
        state.ensure_connected()?;
        state.reads += 1;

        if state.take_failure(variable) {
            return Err(LoggerError::Read {
                variable: *variable,
                message: "simulated read failure".to_string(),
            });
        }

        if let Some(value) = state.scripted.get_mut(variable).and_then(VecDeque::pop_front) {
            return Ok(value);
        }

        let size = variable.data_type.size_bytes();
        if !state.patterns.contains_key(variable) {
            if let Some(value) = state
                .read_block(variable.block, variable.offset, size)
                .and_then(|bytes| variable.data_type.decode(&bytes))
            {
                return Ok(value);
            }
        }

        Ok(state.generate(variable))
    }
}
