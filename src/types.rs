//! Core data types for s7-logger
//!
//! This module contains the fundamental data structures used throughout
//! the engine for describing PLC variables, decoded values and samples.
//!
//! # Main Types
//!
//! - [`DataType`] - Closed set of S7 scalar types (BOOL, INT, DINT, REAL)
//! - [`Value`] - A decoded scalar, tagged with its type
//! - [`VariableDescriptor`] - Data block, byte offset and type of a polled variable
//! - [`Timestamp`] - Monotonic session time paired with UTC wall-clock time
//! - [`Sample`] - One successful read of one variable during one tick
//! - [`SessionState`] - Polling state machine states
//!
//! # Byte Order
//!
//! S7 controllers store multi-byte values big-endian, so every decode path
//! in [`DataType::decode`] reads network byte order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Scalar type of a PLC variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    /// Single bit, stored in one byte
    Bool,
    /// 16-bit signed integer
    Int,
    /// 32-bit signed integer
    Dint,
    /// 32-bit IEEE-754 float
    #[default]
    Real,
}

impl DataType {
    /// All supported types, in display order
    pub fn all() -> &'static [DataType] {
        &[DataType::Bool, DataType::Int, DataType::Dint, DataType::Real]
    }

    /// Returns the number of bytes read from the data block for this type
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Int => 2,
            DataType::Dint | DataType::Real => 4,
        }
    }

    /// Decode raw big-endian bytes into a typed value
    ///
    /// Returns `None` if fewer than [`size_bytes`](Self::size_bytes) bytes are given.
    pub fn decode(&self, bytes: &[u8]) -> Option<Value> {
        if bytes.len() < self.size_bytes() {
            return None;
        }

        Some(match self {
            DataType::Bool => Value::Bool(bytes[0] != 0),
            DataType::Int => Value::Int(i16::from_be_bytes([bytes[0], bytes[1]])),
            DataType::Dint => {
                Value::Dint(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            DataType::Real => {
                Value::Real(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        })
    }

    /// Name as shown to the operator and used in labels
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int => "INT",
            DataType::Dint => "DINT",
            DataType::Real => "REAL",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOL" => Ok(DataType::Bool),
            "INT" => Ok(DataType::Int),
            "DINT" => Ok(DataType::Dint),
            "REAL" => Ok(DataType::Real),
            other => Err(format!("Unsupported data type: {}", other)),
        }
    }
}

/// A decoded PLC value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum Value {
    Bool(bool),
    Int(i16),
    Dint(i32),
    Real(#[serde(with = "real_repr")] f32),
}

/// JSON has no NaN or infinity, so non-finite REALs are stored as the
/// strings `"NaN"`, `"inf"` and `"-inf"`
mod real_repr {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f32(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    struct RealVisitor;

    impl<'de> Visitor<'de> for RealVisitor {
        type Value = f32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f32, E> {
            match v {
                "NaN" => Ok(f32::NAN),
                "inf" => Ok(f32::INFINITY),
                "-inf" => Ok(f32::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        deserializer.deserialize_any(RealVisitor)
    }
}

impl Value {
    /// The type tag of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Dint(_) => DataType::Dint,
            Value::Real(_) => DataType::Real,
        }
    }

    /// Numeric projection for plotting (BOOL maps to 0 or 1)
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(v) => *v as f64,
            Value::Dint(v) => *v as f64,
            Value::Real(v) => *v as f64,
        }
    }

    /// Encode back to the big-endian bytes a PLC would hold
    pub fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bool(b) => vec![u8::from(*b)],
            Value::Int(v) => v.to_be_bytes().to_vec(),
            Value::Dint(v) => v.to_be_bytes().to_vec(),
            Value::Real(v) => v.to_be_bytes().to_vec(),
        }
    }

    /// Build a value of the given type from a plain number, saturating integers
    pub fn from_f64(data_type: DataType, value: f64) -> Self {
        match data_type {
            DataType::Bool => Value::Bool(value != 0.0),
            DataType::Int => Value::Int(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16),
            DataType::Dint => {
                Value::Dint(value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32)
            }
            DataType::Real => Value::Real(value as f32),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Dint(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
        }
    }
}

/// Address and type of a variable to poll
///
/// Identity is the full `(block, offset, data_type)` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Data block number (the `1` in `DB1`)
    pub block: u16,
    /// Byte offset inside the data block
    pub offset: u32,
    /// Scalar type stored at the offset
    pub data_type: DataType,
}

impl VariableDescriptor {
    pub fn new(block: u16, offset: u32, data_type: DataType) -> Self {
        Self {
            block,
            offset,
            data_type,
        }
    }

    /// Stable key used in journal records and export rows, e.g. `DB1_0_INT`
    pub fn label(&self) -> String {
        format!("DB{}_{}_{}", self.block, self.offset, self.data_type)
    }

    /// Short address used in chart legends, e.g. `DB1.0`
    pub fn address(&self) -> String {
        format!("DB{}.{}", self.block, self.offset)
    }

    /// Parse a label produced by [`label`](Self::label)
    pub fn from_label(label: &str) -> Option<Self> {
        let mut parts = label.trim().split('_');
        let block = parts.next()?.strip_prefix("DB")?.parse().ok()?;
        let offset = parts.next()?.parse().ok()?;
        let data_type = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(block, offset, data_type))
    }
}

impl std::fmt::Display for VariableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address(), self.data_type)
    }
}

impl FromStr for VariableDescriptor {
    type Err = String;

    /// Accepts either a label (`DB1_0_INT`) or `DB1.0:INT`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(desc) = Self::from_label(s) {
            return Ok(desc);
        }
        let (addr, ty) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid variable address: {}", s))?;
        let (block, offset) = addr
            .trim()
            .strip_prefix("DB")
            .and_then(|rest| rest.split_once('.'))
            .ok_or_else(|| format!("Invalid variable address: {}", s))?;
        let block = block
            .parse()
            .map_err(|_| format!("Invalid data block number: {}", block))?;
        let offset = offset
            .parse()
            .map_err(|_| format!("Invalid byte offset: {}", offset))?;
        Ok(Self::new(block, offset, ty.parse()?))
    }
}

/// A point in session time
///
/// `elapsed` is read from a monotonic clock and defines ordering; `wall`
/// is the UTC time the sample was taken, used for display and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Monotonic time since the session clock origin
    pub elapsed: Duration,
    /// Wall-clock time
    pub wall: DateTime<Utc>,
}

impl Timestamp {
    pub fn new(elapsed: Duration, wall: DateTime<Utc>) -> Self {
        Self { elapsed, wall }
    }

    /// Session time in seconds, for plotting
    pub fn as_secs_f64(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elapsed
            .cmp(&other.elapsed)
            .then_with(|| self.wall.cmp(&other.wall))
    }
}

/// Monotonic clock for one logging session
///
/// A clock can continue from a base offset so that samples taken after a
/// restart sort after everything replayed from the journal.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
    base: Duration,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock {
    pub fn new() -> Self {
        Self::continuing_from(Duration::ZERO)
    }

    /// A clock whose first reading is at least `base`
    pub fn continuing_from(base: Duration) -> Self {
        Self {
            origin: Instant::now(),
            base,
        }
    }

    /// Current reading, truncated to the microsecond resolution of the journal
    pub fn now(&self) -> Timestamp {
        let elapsed = self.base + self.origin.elapsed();
        Timestamp::new(Duration::from_micros(elapsed.as_micros() as u64), Utc::now())
    }
}

/// One successful read of one variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub variable: VariableDescriptor,
    pub timestamp: Timestamp,
    pub value: Value,
}

impl Sample {
    pub fn new(variable: VariableDescriptor, timestamp: Timestamp, value: Value) -> Self {
        Self {
            variable,
            timestamp,
            value,
        }
    }

    /// `[seconds, value]` pair for chart sinks
    pub fn as_plot_point(&self) -> [f64; 2] {
        [self.timestamp.as_secs_f64(), self.value.as_f64()]
    }
}

/// Visual style for the live chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlotKind {
    /// Connected line (default)
    #[default]
    Line,
    /// Individual points
    Scatter,
}

impl PlotKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            PlotKind::Line => "Line",
            PlotKind::Scatter => "Scatter",
        }
    }
}

impl FromStr for PlotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(PlotKind::Line),
            "scatter" => Ok(PlotKind::Scatter),
            other => Err(format!("Unknown plot kind: {}", other)),
        }
    }
}

/// State of the polling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No PLC connection yet
    #[default]
    Idle,
    /// Connected, not polling
    Connected,
    /// Polling on the configured interval
    Running,
    /// Polling suspended, data retained
    Paused,
    /// Connection released
    Stopped,
}

impl SessionState {
    /// Whether Clear is legal in this state
    pub fn can_clear(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Running | SessionState::Paused
        )
    }

    /// Whether a reader connection is held
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Running | SessionState::Paused
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connected => "Connected",
            SessionState::Running => "Running",
            SessionState::Paused => "Paused",
            SessionState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// PLC connection parameters, passed through to the reader untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// IP address of the CPU
    pub ip: String,
    /// Rack number
    pub rack: u16,
    /// Slot number
    pub slot: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            ip: "192.168.0.1".to_string(),
            rack: 0,
            slot: 1,
        }
    }
}

impl ConnectionParams {
    pub fn new(ip: impl Into<String>, rack: u16, slot: u16) -> Self {
        Self {
            ip: ip.into(),
            rack,
            slot,
        }
    }
}

impl std::fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (rack {}, slot {})", self.ip, self.rack, self.slot)
    }
}

/// Latest value per registered variable, published once per tick
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot {
    /// Number of completed ticks when the snapshot was taken
    pub tick: u64,
    /// One entry per registered variable, in registration order
    pub entries: Vec<(VariableDescriptor, Option<Sample>)>,
}

impl LatestSnapshot {
    pub fn get(&self, variable: &VariableDescriptor) -> Option<&Sample> {
        self.entries
            .iter()
            .find(|(v, _)| v == variable)
            .and_then(|(_, s)| s.as_ref())
    }
}

/// Incremental statistics tracker
/// This allows O(1) updates for mean, min, and max without iterating all data
#[derive(Debug, Clone, Copy)]
pub struct IncrementalStats {
    /// Current count of values
    pub count: u64,
    /// Running sum for average calculation
    pub sum: f64,
    /// Current minimum value
    pub min: f64,
    /// Current maximum value
    pub max: f64,
}

impl Default for IncrementalStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    #[inline]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Get statistics as (min, max, avg) tuple
    #[inline]
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        if self.count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (self.min, self.max, self.average())
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Statistics about the data collection
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    /// Number of completed ticks
    pub ticks: u64,
    /// Number of successful reads
    pub successful_reads: u64,
    /// Number of failed reads (including timeouts)
    pub failed_reads: u64,
    /// Journal records written since the last Clear
    pub journal_records: u64,
    /// Journal appends that failed after all retries
    pub journal_failures: u64,
    /// Number of events dropped due to queue backpressure
    pub dropped_events: u64,
    /// Average successful read time in microseconds
    pub avg_read_time_us: f64,
    /// Minimum read latency over the recent window (microseconds)
    pub min_latency_us: u64,
    /// Maximum read latency over the recent window (microseconds)
    pub max_latency_us: u64,
    /// Read latency jitter over the recent window (microseconds)
    pub jitter_us: u64,
    /// Average tick duration in microseconds
    pub avg_tick_time_us: f64,
    /// Duration of the last tick in microseconds
    pub last_tick_time_us: u64,
}

impl CollectionStats {
    /// Calculate the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_reads + self.failed_reads;
        if total == 0 {
            100.0
        } else {
            (self.successful_reads as f64 / total as f64) * 100.0
        }
    }

    /// Fold one tick duration into the running average
    pub fn record_tick(&mut self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.ticks += 1;
        self.last_tick_time_us = us;
        self.avg_tick_time_us += (us as f64 - self.avg_tick_time_us) / self.ticks as f64;
    }
}
