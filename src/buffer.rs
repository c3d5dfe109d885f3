//! In-memory sample history
//!
//! The buffer keeps, per variable, every sample in timestamp order plus the
//! running min/max/average. It is the presentation side of the engine: the
//! chart feed and the exporter read from here, never from the PLC.

use crate::types::{IncrementalStats, Sample, VariableDescriptor};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct VariableHistory {
    samples: Vec<Sample>,
    stats: IncrementalStats,
}

impl VariableHistory {
    fn push(&mut self, sample: Sample) {
        self.stats.push(sample.value.as_f64());

        // Ticks arrive in order; this only moves a sample when replayed data
        // from an older clock interleaves with live data.
        let out_of_order = self
            .samples
            .last()
            .is_some_and(|last| last.timestamp > sample.timestamp);
        if out_of_order {
            let idx = self
                .samples
                .partition_point(|s| s.timestamp <= sample.timestamp);
            self.samples.insert(idx, sample);
        } else {
            self.samples.push(sample);
        }
    }
}

/// Per-variable ordered history of samples
#[derive(Debug, Default)]
pub struct SampleBuffer {
    histories: HashMap<VariableDescriptor, VariableHistory>,
    /// Variables in first-seen order
    order: Vec<VariableDescriptor>,
    total: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample
    pub fn record(&mut self, sample: Sample) {
        if !self.histories.contains_key(&sample.variable) {
            self.order.push(sample.variable);
        }
        self.histories
            .entry(sample.variable)
            .or_default()
            .push(sample);
        self.total += 1;
    }

    /// Record all samples of one tick
    pub fn record_batch(&mut self, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            self.record(sample);
        }
    }

    /// Most recent sample for a variable
    pub fn latest(&self, variable: &VariableDescriptor) -> Option<&Sample> {
        self.histories
            .get(variable)
            .and_then(|h| h.samples.last())
    }

    /// All samples for a variable, oldest first
    pub fn history(&self, variable: &VariableDescriptor) -> &[Sample] {
        self.histories
            .get(variable)
            .map(|h| h.samples.as_slice())
            .unwrap_or(&[])
    }

    /// Running statistics for a variable
    pub fn stats(&self, variable: &VariableDescriptor) -> Option<IncrementalStats> {
        self.histories.get(variable).map(|h| h.stats)
    }

    /// Variables that have at least one sample, in first-seen order
    pub fn variables(&self) -> &[VariableDescriptor] {
        &self.order
    }

    pub fn total_samples(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn clear(&mut self) {
        self.histories.clear();
        self.order.clear();
        self.total = 0;
    }

    /// Iterate over every sample, variable by variable
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.order.iter().flat_map(move |v| self.history(v).iter())
    }
}
