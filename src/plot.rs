//! Chart feed
//!
//! Builds one ordered `[seconds, value]` series per registered variable for
//! whatever draws the live chart. Legends follow the operator's convention of
//! showing the address with the most recent value, e.g. `DB1.0 (15)`.

use crate::buffer::SampleBuffer;
use crate::types::{PlotKind, VariableDescriptor};

/// One variable's line (or point cloud) on the chart
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub variable: VariableDescriptor,
    /// Legend text: address plus the latest value
    pub label: String,
    pub kind: PlotKind,
    /// `[seconds, value]` pairs, oldest first
    pub points: Vec<[f64; 2]>,
}

impl ChartSeries {
    pub fn statistics(&self) -> PlotStatistics {
        let values: Vec<f64> = self.points.iter().map(|p| p[1]).collect();
        PlotStatistics::from_values(&values)
    }

    /// Time span covered by the series, in seconds
    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?[0], self.points.last()?[0]))
    }
}

/// Legend label for a variable: `DB<block>.<offset> (<last value>)`
pub fn legend_label(buffer: &SampleBuffer, variable: &VariableDescriptor) -> String {
    match buffer.latest(variable) {
        Some(sample) => format!("{} ({})", variable.address(), sample.value),
        None => format!("{} (-)", variable.address()),
    }
}

/// Build the chart series for every variable in `order`
pub fn chart_series(
    buffer: &SampleBuffer,
    order: &[VariableDescriptor],
    kind: PlotKind,
) -> Vec<ChartSeries> {
    order
        .iter()
        .map(|var| ChartSeries {
            variable: *var,
            label: legend_label(buffer, var),
            kind,
            points: buffer
                .history(var)
                .iter()
                .map(|s| s.as_plot_point())
                .collect(),
        })
        .collect()
}

/// Statistics for a series
///
/// Min/max, mean, standard deviation and RMS, shown next to the chart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Root mean square
    pub rms: f64,
    pub count: usize,
}

impl PlotStatistics {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let count = values.len();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / count as f64;

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let rms = (values.iter().map(|v| v * v).sum::<f64>() / count as f64).sqrt();

        Self {
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
            rms,
            count,
        }
    }

    pub fn peak_to_peak(&self) -> f64 {
        self.max - self.min
    }

    pub fn is_valid(&self) -> bool {
        self.count > 0
    }
}
