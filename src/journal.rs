//! Crash-safe sample journal
//!
//! Every sample the scheduler takes is appended here before it becomes
//! visible to the chart or the exporter, so a crash never loses data that
//! was already shown. The file is JSON Lines, one record per line, so it can
//! be inspected (or repaired) with a text editor after an abnormal exit.
//!
//! # Durability
//!
//! [`Journal::append`] writes a full line and calls `sync_data` before
//! returning. A record acknowledged by `append` survives a process crash.
//!
//! An append is all-or-nothing: when the write or the sync fails, the file is
//! truncated back to its length before the attempt, so a retry never
//! duplicates or splices a record. A torn final line left by a crash is cut
//! off before the first append after reopening.
//!
//! # Purge protocol
//!
//! Clearing must never resurrect partial data, so [`Journal::purge`]:
//!
//! 1. writes and syncs a purge-intent marker next to the journal,
//! 2. deletes the journal file,
//! 3. removes the marker.
//!
//! [`Journal::open`] finishes any purge whose marker is still present
//! before the journal is replayed. If only step 3 fails, the purge still
//! counts as done, but appends are refused until the marker is gone so a
//! later open cannot delete records written after the purge.
//!
//! # Example
//!
//! ```ignore
//! let mut journal = Journal::open("/tmp/plc_logger_journal.jsonl")?;
//! journal.append(&sample)?;
//!
//! for record in journal.replay_all()? {
//!     let sample = record?.to_sample()?;
//! }
//!
//! journal.purge()?;
//! ```

use crate::error::{LoggerError, Result, ResultExt};
use crate::types::{Sample, Timestamp, Value, VariableDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used when no journal path is configured
pub const DEFAULT_JOURNAL_FILE: &str = "plc_logger_journal.jsonl";

/// Suffix of the purge-intent marker
const PURGE_MARKER_SUFFIX: &str = "purge";

/// On-disk form of one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Variable label, e.g. `DB1_0_INT`
    pub variable: String,
    /// Session time in microseconds
    pub elapsed_us: u64,
    /// Wall-clock time of the read
    pub wall: DateTime<Utc>,
    /// Decoded value with its type tag
    pub value: Value,
}

impl JournalRecord {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            variable: sample.variable.label(),
            elapsed_us: sample.timestamp.elapsed.as_micros() as u64,
            wall: sample.timestamp.wall,
            value: sample.value,
        }
    }

    /// Rebuild the sample, validating the label and the value's type
    pub fn to_sample(&self) -> Result<Sample> {
        let variable = VariableDescriptor::from_label(&self.variable).ok_or_else(|| {
            LoggerError::Serialization(format!("Invalid variable label '{}'", self.variable))
        })?;
        if variable.data_type != self.value.data_type() {
            return Err(LoggerError::Serialization(format!(
                "Value type {} does not match variable {}",
                self.value.data_type(),
                self.variable
            )));
        }
        Ok(Sample::new(
            variable,
            Timestamp::new(Duration::from_micros(self.elapsed_us), self.wall),
            self.value,
        ))
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }
}

/// Append-only durable store of samples
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    /// Lazily opened append handle
    file: Option<File>,
    /// Records appended through this handle since open or the last purge
    appended: u64,
    /// Length to truncate back to before the next append, after a failed
    /// rollback
    rollback_to: Option<u64>,
    /// A purge deleted the journal but could not remove its marker
    marker_pending: bool,
}

impl Journal {
    /// Open the journal at `path`, finishing an interrupted purge first
    ///
    /// The file itself is only created by the first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
            }
        }

        let journal = Self {
            path,
            file: None,
            appended: 0,
            rollback_to: None,
            marker_pending: false,
        };
        journal.recover_interrupted_purge()?;
        Ok(journal)
    }

    /// Default location in the system temp directory
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_JOURNAL_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a journal artifact exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn marker_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".");
        name.push(PURGE_MARKER_SUFFIX);
        PathBuf::from(name)
    }

    fn recover_interrupted_purge(&self) -> Result<()> {
        let marker = self.marker_path();
        if !marker.exists() {
            return Ok(());
        }
        tracing::warn!(
            "Found purge marker {:?}; completing interrupted clear before replay",
            marker
        );
        remove_if_exists(&self.path).context("Failed to finish interrupted journal purge")?;
        remove_if_exists(&marker).context("Failed to remove purge marker")?;
        Ok(())
    }

    /// Append one sample and flush it to stable storage
    pub fn append(&mut self, sample: &Sample) -> Result<()> {
        let record = JournalRecord::from_sample(sample);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let path = self.path.clone();
        let file = self.append_handle()?;
        let start = file
            .metadata()
            .with_context(|| format!("Failed to stat journal {:?}", path))?
            .len();
        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.sync_data());

        if let Err(e) = written {
            if let Err(rollback) = file.set_len(start).and_then(|_| file.sync_data()) {
                tracing::warn!(
                    "Failed to roll back journal {:?} to {} bytes: {}",
                    path,
                    start,
                    rollback
                );
                self.rollback_to = Some(start);
            }
            // Reopen on the next attempt; the handle may be in a bad state
            self.file = None;
            return Err(LoggerError::Io(e)
                .with_context(format!("Failed to append to journal {:?}", path)));
        }

        self.appended += 1;
        Ok(())
    }

    fn append_handle(&mut self) -> Result<&mut File> {
        if self.marker_pending {
            let marker = self.marker_path();
            remove_if_exists(&marker)
                .with_context(|| format!("Purge marker {:?} still present", marker))?;
            self.marker_pending = false;
        }

        if self.file.is_none() {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open journal {:?}", self.path))?;

            if let Some(len) = self.rollback_to {
                file.set_len(len)
                    .and_then(|_| file.sync_data())
                    .with_context(|| format!("Failed to roll back journal {:?}", self.path))?;
                self.rollback_to = None;
            }
            if let Some(removed) = truncate_torn_tail(&mut file)
                .with_context(|| format!("Failed to repair journal {:?}", self.path))?
            {
                tracing::warn!(
                    "Dropped {} bytes of a partial record at the end of {:?}",
                    removed,
                    self.path
                );
            }
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| LoggerError::Internal("journal handle missing".to_string()))
    }

    /// Replay every record in write order
    ///
    /// The returned iterator reads lazily and can be created again at any
    /// time to restart from the beginning. A missing file replays as empty.
    pub fn replay_all(&self) -> Result<JournalReplay> {
        JournalReplay::open(&self.path)
    }

    /// Delete the journal artifact entirely
    ///
    /// Fails only when the journal itself could not be deleted; the data is
    /// then still on disk.
    pub fn purge(&mut self) -> Result<()> {
        // Close our handle so the file can be removed on every platform
        self.file = None;

        let marker = self.marker_path();
        {
            let mut m = File::create(&marker)
                .with_context(|| format!("Failed to write purge marker {:?}", marker))?;
            m.write_all(self.path.to_string_lossy().as_bytes())
                .and_then(|_| m.sync_all())
                .context("Failed to sync purge marker")?;
        }

        remove_if_exists(&self.path)
            .with_context(|| format!("Failed to delete journal {:?}", self.path))?;
        self.rollback_to = None;
        self.appended = 0;

        if let Err(e) = remove_if_exists(&marker) {
            tracing::warn!("Journal purged but marker {:?} remains: {}", marker, e);
            self.marker_pending = true;
        }

        tracing::info!("Journal {:?} purged", self.path);
        Ok(())
    }

    /// Records appended through this handle since open or the last purge
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Count valid records on disk
    pub fn record_count(&self) -> Result<usize> {
        Ok(self.replay_all()?.filter(|r| r.is_ok()).count())
    }

    /// The last valid record on disk, if any
    pub fn last_record(&self) -> Result<Option<JournalRecord>> {
        Ok(self.replay_all()?.filter_map(|r| r.ok()).last())
    }
}

/// Cut a partial final line back to the last newline
///
/// Returns the number of bytes removed, or `None` when the file already ends
/// on a record boundary.
fn truncate_torn_tail(file: &mut File) -> std::io::Result<Option<u64>> {
    const CHUNK: u64 = 4096;

    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(None);
    }

    let mut end = len;
    let mut keep = 0;
    let mut chunk = vec![0u8; CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let buf = &mut chunk[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(buf)?;
        if let Some(pos) = buf.iter().rposition(|b| *b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    file.set_len(keep)?;
    file.sync_data()?;
    Ok(Some(len - keep))
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Lazy reader over journal records
///
/// Lines that fail to parse are skipped with a warning; a torn final line
/// is the expected result of a crash during `append`.
pub struct JournalReplay {
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
    skipped: usize,
}

impl JournalReplay {
    fn open(path: &Path) -> Result<Self> {
        let lines = match File::open(path) {
            Ok(f) => Some(BufReader::new(f).lines()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(LoggerError::Io(e)
                    .with_context(format!("Failed to open journal {:?} for replay", path)))
            }
        };
        Ok(Self {
            lines,
            line_no: 0,
            skipped: 0,
        })
    }

    /// Number of unreadable lines skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for JournalReplay {
    type Item = Result<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    // A read error repeats on every call; end the replay here
                    self.lines = None;
                    return Some(Err(LoggerError::Io(e)));
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(record) => return Some(Ok(record)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("Skipping unreadable journal line {}: {}", self.line_no, e);
                }
            }
        }
    }
}
