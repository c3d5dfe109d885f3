//! PlcReader trait for a unified PLC transport interface
//!
//! The engine only needs "read N bytes from data block B at offset O". The
//! trait keeps that primitive separate from decoding so every transport
//! shares the single big-endian decode path in [`DataType::decode`].

use crate::error::{LoggerError, Result};
use crate::types::{ConnectionParams, Value, VariableDescriptor};
use std::collections::VecDeque;
use std::time::Duration;

/// Size of the rolling window for recent read times
const RECENT_WINDOW_SIZE: usize = 100;

/// Latency and success statistics for PLC reads
#[derive(Debug, Clone)]
pub struct ReadStats {
    /// Total number of successful reads
    pub successful_reads: u64,
    /// Total number of failed reads, timeouts included
    pub failed_reads: u64,
    /// Total read time in microseconds
    pub total_read_time_us: u64,
    /// Last read time in microseconds
    pub last_read_time_us: u64,
    /// Total bytes decoded
    pub total_bytes_read: u64,
    /// Minimum read time observed (microseconds)
    pub min_read_time_us: u64,
    /// Maximum read time observed (microseconds)
    pub max_read_time_us: u64,
    /// Rolling window of recent read times for jitter calculation
    pub recent_read_times: VecDeque<u64>,
}

impl Default for ReadStats {
    fn default() -> Self {
        Self {
            successful_reads: 0,
            failed_reads: 0,
            total_read_time_us: 0,
            last_read_time_us: 0,
            total_bytes_read: 0,
            min_read_time_us: u64::MAX,
            max_read_time_us: 0,
            recent_read_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl ReadStats {
    /// Average successful read time in microseconds
    pub fn avg_read_time_us(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.successful_reads as f64
        }
    }

    pub fn record_success(&mut self, elapsed: Duration, bytes: usize) {
        // At least 1us so rates never divide by zero
        let time_us = (elapsed.as_micros() as u64).max(1);
        self.successful_reads += 1;
        self.total_read_time_us += time_us;
        self.last_read_time_us = time_us;
        self.total_bytes_read += bytes as u64;
        self.min_read_time_us = self.min_read_time_us.min(time_us);
        self.max_read_time_us = self.max_read_time_us.max(time_us);

        self.recent_read_times.push_back(time_us);
        if self.recent_read_times.len() > RECENT_WINDOW_SIZE {
            self.recent_read_times.pop_front();
        }
    }

    pub fn record_failure(&mut self) {
        self.failed_reads += 1;
    }

    /// Max minus min over the recent window, in microseconds
    pub fn jitter_us(&self) -> u64 {
        self.recent_max_us().saturating_sub(self.recent_min_us())
    }

    pub fn recent_min_us(&self) -> u64 {
        self.recent_read_times.iter().min().copied().unwrap_or(0)
    }

    pub fn recent_max_us(&self) -> u64 {
        self.recent_read_times.iter().max().copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Connection to an S7 controller
///
/// Implementations must be `Send`: the reader is owned by the engine and
/// driven from the polling thread.
///
/// # Example
///
/// ```ignore
/// fn read_all(plc: &mut dyn PlcReader, vars: &[VariableDescriptor]) -> Vec<Result<Value>> {
///     vars.iter().map(|v| plc.read_value(v)).collect()
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait PlcReader: Send {
    /// Open a session with the CPU at `params`
    fn connect(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Close the session; a no-op when not connected
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Read `size` raw bytes from data block `block` starting at `offset`
    fn read_area(&mut self, block: u16, offset: u32, size: usize) -> Result<Vec<u8>>;

    /// Read and decode one variable
    fn read_value(&mut self, variable: &VariableDescriptor) -> Result<Value> {
        let size = variable.data_type.size_bytes();
        let bytes = self
            .read_area(variable.block, variable.offset, size)
            .map_err(|e| match e {
                LoggerError::Read { .. } | LoggerError::Timeout(_) => e,
                other => LoggerError::Read {
                    variable: *variable,
                    message: other.to_string(),
                },
            })?;

        variable
            .data_type
            .decode(&bytes)
            .ok_or_else(|| LoggerError::Read {
                variable: *variable,
                message: format!("expected {} bytes, got {}", size, bytes.len()),
            })
    }
}
