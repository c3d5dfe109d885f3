//! Spreadsheet export
//!
//! Turns the sample history into a rectangular [`Table`] and hands it to a
//! [`TableSink`]. Two layouts are supported:
//!
//! - [`ExportLayout::Long`] - header `variable,timestamp,value`, one row per
//!   sample, sorted by timestamp and then by registration order
//! - [`ExportLayout::Wide`] - header `timestamp,<label>...`, one row per
//!   distinct timestamp, blank cells where a variable has no sample
//!
//! Timestamps are written as RFC 3339 UTC wall-clock time with microsecond
//! precision; rows are ordered by session time, so a wall-clock step during
//! a session shows up in the timestamp column but never reorders rows.
//! Exporting with no samples fails with [`LoggerError::EmptyDataset`] before
//! any file is created.
//!
//! [`Exporter::export_to_file`] picks the sink from the file extension: a
//! `.xlsx` path gets a single-sheet workbook ([`XlsxSink`]), anything else
//! gets CSV ([`CsvSink`]).

use crate::buffer::SampleBuffer;
use crate::error::{LoggerError, Result, ResultExt};
use crate::journal::Journal;
use crate::types::{Sample, Timestamp, Value, VariableDescriptor};
use chrono::SecondsFormat;
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Shape of the exported table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportLayout {
    /// One row per sample
    #[default]
    Long,
    /// One row per timestamp, one column per variable
    Wide,
}

impl std::str::FromStr for ExportLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(ExportLayout::Long),
            "wide" => Ok(ExportLayout::Wide),
            other => Err(format!("Unknown export layout: {}", other)),
        }
    }
}

/// A rectangular table of strings with a header row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of the named column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.header.iter().position(|h| h == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }
}

/// Destination for an exported table
pub trait TableSink {
    fn write_table(&mut self, table: &Table) -> Result<()>;
}

/// Writes a table as CSV, header first
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Create (or truncate) a CSV file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create export directory {:?}", parent)
                })?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create export file {:?}", path))?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| LoggerError::Export(e.error().to_string()))
    }
}

impl<W: Write> TableSink for CsvSink<W> {
    fn write_table(&mut self, table: &Table) -> Result<()> {
        self.writer.write_record(&table.header)?;
        for row in &table.rows {
            self.writer.write_record(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Name of the single worksheet in an xlsx export
pub const XLSX_SHEET_NAME: &str = "Data";

/// Writes a table as a one-sheet xlsx workbook
///
/// Cells that parse as numbers are stored as numbers so the sheet can be
/// charted directly; everything else is stored as text.
pub struct XlsxSink {
    path: PathBuf,
}

impl XlsxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TableSink for XlsxSink {
    fn write_table(&mut self, table: &Table) -> Result<()> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(XLSX_SHEET_NAME)?;

        for (col, name) in table.header.iter().enumerate() {
            sheet.write_string(0, xlsx_column(col)?, name.as_str())?;
        }
        for (idx, row) in table.rows.iter().enumerate() {
            let r = u32::try_from(idx + 1)
                .map_err(|_| LoggerError::Export("Too many rows for a worksheet".to_string()))?;
            for (col, cell) in row.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                let c = xlsx_column(col)?;
                match cell.parse::<f64>() {
                    Ok(number) if number.is_finite() => {
                        sheet.write_number(r, c, number)?;
                    }
                    _ => {
                        sheet.write_string(r, c, cell.as_str())?;
                    }
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create export directory {:?}", parent)
                })?;
            }
        }
        workbook.save(&self.path)?;
        Ok(())
    }
}

fn xlsx_column(col: usize) -> Result<u16> {
    u16::try_from(col)
        .map_err(|_| LoggerError::Export("Too many columns for a worksheet".to_string()))
}

fn is_xlsx(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"))
}

/// What an export wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub layout: ExportLayout,
    pub rows: usize,
}

fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp.wall.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Builds export tables from a sample buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct Exporter {
    layout: ExportLayout,
}

impl Exporter {
    pub fn new(layout: ExportLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> ExportLayout {
        self.layout
    }

    /// Column order: registered variables first, then any variable that only
    /// has history (e.g. removed while paused)
    fn column_order(buffer: &SampleBuffer, order: &[VariableDescriptor]) -> Vec<VariableDescriptor> {
        let mut columns: Vec<VariableDescriptor> = order.to_vec();
        for var in buffer.variables() {
            if !columns.contains(var) {
                columns.push(*var);
            }
        }
        columns
    }

    /// Build the table for `buffer`, ordering variables as in `order`
    pub fn build_table(&self, buffer: &SampleBuffer, order: &[VariableDescriptor]) -> Result<Table> {
        if buffer.is_empty() {
            return Err(LoggerError::EmptyDataset);
        }
        let columns = Self::column_order(buffer, order);
        Ok(match self.layout {
            ExportLayout::Long => Self::long_table(buffer, &columns),
            ExportLayout::Wide => Self::wide_table(buffer, &columns),
        })
    }

    fn long_table(buffer: &SampleBuffer, columns: &[VariableDescriptor]) -> Table {
        let mut samples: Vec<(usize, &Sample)> = columns
            .iter()
            .enumerate()
            .flat_map(|(idx, var)| buffer.history(var).iter().map(move |s| (idx, s)))
            .collect();
        samples.sort_by(|(ia, a), (ib, b)| a.timestamp.cmp(&b.timestamp).then(ia.cmp(ib)));

        Table {
            header: vec![
                "variable".to_string(),
                "timestamp".to_string(),
                "value".to_string(),
            ],
            rows: samples
                .into_iter()
                .map(|(_, s)| {
                    vec![
                        s.variable.label(),
                        format_timestamp(&s.timestamp),
                        s.value.to_string(),
                    ]
                })
                .collect(),
        }
    }

    fn wide_table(buffer: &SampleBuffer, columns: &[VariableDescriptor]) -> Table {
        let mut by_time: BTreeMap<Timestamp, Vec<Option<Value>>> = BTreeMap::new();
        for (idx, var) in columns.iter().enumerate() {
            for sample in buffer.history(var) {
                by_time
                    .entry(sample.timestamp)
                    .or_insert_with(|| vec![None; columns.len()])[idx] = Some(sample.value);
            }
        }

        let mut header = Vec::with_capacity(columns.len() + 1);
        header.push("timestamp".to_string());
        header.extend(columns.iter().map(VariableDescriptor::label));

        Table {
            header,
            rows: by_time
                .into_iter()
                .map(|(ts, values)| {
                    std::iter::once(format_timestamp(&ts))
                        .chain(
                            values
                                .into_iter()
                                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
                        )
                        .collect()
                })
                .collect(),
        }
    }

    /// Build the table and write it to `sink`; returns the number of data rows
    pub fn export(
        &self,
        buffer: &SampleBuffer,
        order: &[VariableDescriptor],
        sink: &mut dyn TableSink,
    ) -> Result<usize> {
        let table = self.build_table(buffer, order)?;
        sink.write_table(&table)?;
        Ok(table.len())
    }

    /// Export to a CSV or xlsx file, chosen by extension; no file is created
    /// when there is nothing to export
    pub fn export_to_file(
        &self,
        buffer: &SampleBuffer,
        order: &[VariableDescriptor],
        path: impl AsRef<Path>,
    ) -> Result<ExportSummary> {
        let path = path.as_ref();
        let table = self.build_table(buffer, order)?;
        let written = if is_xlsx(path) {
            XlsxSink::new(path).write_table(&table)
        } else {
            CsvSink::create(path)?.write_table(&table)
        };
        written.with_context(|| format!("Failed to write export {:?}", path))?;

        tracing::info!(
            "Exported {} rows ({:?} layout) to {:?}",
            table.len(),
            self.layout,
            path
        );
        Ok(ExportSummary {
            path: path.to_path_buf(),
            layout: self.layout,
            rows: table.len(),
        })
    }
}

/// Export straight from a journal file, without a running engine
///
/// Variables appear in the order they were first journaled.
pub fn export_from_journal(
    journal_path: impl Into<PathBuf>,
    layout: ExportLayout,
    path: impl AsRef<Path>,
) -> Result<ExportSummary> {
    let journal = Journal::open(journal_path)?;
    let mut buffer = SampleBuffer::new();
    for record in journal.replay_all()? {
        match record.and_then(|r| r.to_sample()) {
            Ok(sample) => buffer.record(sample),
            Err(e) => tracing::warn!("Skipping journal record: {}", e),
        }
    }
    let order = buffer.variables().to_vec();
    Exporter::new(layout).export_to_file(&buffer, &order, path)
}
