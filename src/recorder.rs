//! Append-only CSV channel logger.
//!
//! Rows arrive on the acquisition thread at tracker rate; session
//! control (begin/pause/stop) may come from the main context. The file
//! is owned exclusively by the recorder, and an `is_writing` spin guard
//! keeps `stop` from closing it mid-row.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channels::{ChannelMap, ChannelSchema};
use crate::error::{GazeError, GazeResult};

/// Leading column: pipeline tick at the moment the row is written.
const REC_TIME_COLUMN: &str = "S0100_RecTime";

struct Session {
    /// Channel name to (first column index, component count)
    columns: HashMap<String, (usize, usize)>,
    width: usize,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    /// Rows held back for delayed write
    buffered: Vec<String>,
}

/// CSV channel recorder with one file per session.
///
/// The header schema is fixed when the session begins; unknown keys at
/// record time are skipped per row rather than failing the row.
pub struct DataRecorder {
    output_dir: PathBuf,
    /// Buffer rows in memory and write them all at `stop`. Useful when
    /// several streams record at once and per-row flushing would
    /// bottleneck; the tradeoff is data loss on a crash.
    delay_write: bool,
    session: Mutex<Option<Session>>,
    recording: AtomicBool,
    writing: AtomicBool,
}

impl DataRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            delay_write: false,
            session: Mutex::new(None),
            recording: AtomicBool::new(false),
            writing: AtomicBool::new(false),
        }
    }

    pub fn with_delay_write(output_dir: impl Into<PathBuf>, delay_write: bool) -> Self {
        let mut recorder = Self::new(output_dir);
        recorder.delay_write = delay_write;
        recorder
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Path of the current session file, if a session is initialized.
    pub fn session_path(&self) -> Option<PathBuf> {
        self.session.lock().as_ref().map(|s| s.path.clone())
    }

    /// Set up a new session file: stops any previous session, derives
    /// the header from `schema`, creates `{tag}_{seq:03}_{mmssmmm}.csv`
    /// in the output directory and writes the header row. Recording
    /// starts immediately when `immediate_start` is set; otherwise call
    /// [`DataRecorder::resume`].
    pub fn begin_session(
        &self,
        schema: &ChannelSchema,
        immediate_start: bool,
        tag: &str,
    ) -> GazeResult<()> {
        self.stop();

        let (header, columns, width) = build_header(schema)?;

        fs::create_dir_all(&self.output_dir)?;
        let sequence = self.count_sessions(tag)?;
        let path = self.output_dir.join(session_file_name(tag, sequence));

        let header_line = header.join(",");
        let mut session = Session {
            columns,
            width,
            path: path.clone(),
            writer: None,
            buffered: Vec::new(),
        };
        if self.delay_write {
            session.buffered.push(header_line);
        } else {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "{header_line}")?;
            writer.flush()?;
            session.writer = Some(writer);
        }

        info!(path = %path.display(), columns = width, "recording session initialized");
        *self.session.lock() = Some(session);
        self.recording.store(immediate_start, Ordering::Release);
        Ok(())
    }

    /// Pause without closing the session file.
    pub fn pause(&self) {
        self.recording.store(false, Ordering::Release);
    }

    /// Start (or resume) recording into the current session.
    pub fn resume(&self) -> GazeResult<()> {
        if self.session.lock().is_none() {
            return Err(GazeError::SessionNotInitialized);
        }
        self.recording.store(true, Ordering::Release);
        Ok(())
    }

    /// Record one row. Returns `false` when recording is not active;
    /// unknown channel keys are skipped without failing the row.
    pub fn record_row(&self, values: &ChannelMap, tick: f64) -> bool {
        if !self.recording.load(Ordering::Acquire) {
            return false;
        }
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };

        let mut row = vec![String::new(); session.width];
        row[0] = format_value(tick);
        for (key, components) in values {
            let Some(&(start, len)) = session.columns.get(key) else {
                debug!(channel = %key, "no matching header column; skipped");
                continue;
            };
            for (offset, value) in components.iter().take(len).enumerate() {
                row[start + offset] = format_value(*value);
            }
        }
        let line = row.join(",");

        if self.delay_write {
            session.buffered.push(line);
            return true;
        }

        let Some(writer) = session.writer.as_mut() else {
            return false;
        };
        // guard against the file being disposed mid-write from another
        // context; `stop` spin-waits on this flag
        self.writing.store(true, Ordering::Release);
        let written = writeln!(writer, "{line}").and_then(|_| writer.flush());
        self.writing.store(false, Ordering::Release);
        if let Err(error) = written {
            warn!(%error, "failed to write recording row");
            return false;
        }
        true
    }

    /// Stop recording and close the session file. Buffered rows from
    /// delayed-write mode are written out here.
    pub fn stop(&self) {
        self.recording.store(false, Ordering::Release);
        while self.writing.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }

        let Some(mut session) = self.session.lock().take() else {
            return;
        };
        if self.delay_write && !session.buffered.is_empty() {
            if let Err(error) = write_buffered(&session.path, &session.buffered) {
                warn!(%error, path = %session.path.display(), "failed to flush delayed rows");
            }
        }
        if let Some(mut writer) = session.writer.take() {
            if let Err(error) = writer.flush() {
                warn!(%error, "failed to flush recording file on stop");
            }
        }
        info!(path = %session.path.display(), "recording session closed");
    }

    fn count_sessions(&self, tag: &str) -> GazeResult<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.output_dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(tag) && name.ends_with(".csv") {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Drop for DataRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Column-name scheme: single-value fields are tagged `S<len>`,
/// multi-value fields `V<len>`, and every column carries its zero-padded
/// component index plus the original field name, e.g. `V0301_HMDPos`.
fn build_header(
    schema: &ChannelSchema,
) -> GazeResult<(Vec<String>, HashMap<String, (usize, usize)>, usize)> {
    let mut header = vec![REC_TIME_COLUMN.to_owned()];
    let mut columns = HashMap::new();
    let mut next_column = 1;

    for (name, len) in schema.fields() {
        if *len == 0 {
            return Err(GazeError::Schema(format!("channel {name} has zero width")));
        }
        if columns.contains_key(name) {
            return Err(GazeError::Schema(format!("duplicate channel key {name}")));
        }
        let kind = if *len == 1 { 'S' } else { 'V' };
        for index in 0..*len {
            header.push(format!("{kind}{len:02}{index:02}_{name}"));
        }
        columns.insert(name.clone(), (next_column, *len));
        next_column += len;
    }
    Ok((header, columns, next_column))
}

/// `{tag}_{seq:03}_{minute:02}{second:02}{millisecond:03}.csv`
fn session_file_name(tag: &str, sequence: usize) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let minute = (now.as_secs() / 60) % 60;
    let second = now.as_secs() % 60;
    let millisecond = now.subsec_millis();
    format!("{tag}_{sequence:03}_{minute:02}{second:02}{millisecond:03}.csv")
}

fn format_value(value: f64) -> String {
    format!("{value}")
}

fn write_buffered(path: &Path, rows: &[String]) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        writeln!(writer, "{row}")?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_column_scheme() {
        let mut schema = ChannelSchema::new();
        schema.push("EyeFrames", 1);
        schema.push("HMDPos", 3);
        let (header, columns, width) = build_header(&schema).expect("valid schema");

        assert_eq!(
            header,
            vec![
                "S0100_RecTime",
                "S0100_EyeFrames",
                "V0300_HMDPos",
                "V0301_HMDPos",
                "V0302_HMDPos",
            ]
        );
        assert_eq!(width, 5);
        assert_eq!(columns["EyeFrames"], (1, 1));
        assert_eq!(columns["HMDPos"], (2, 3));
    }

    #[test]
    fn duplicate_keys_rejected_at_setup() {
        let mut schema = ChannelSchema::new();
        schema.push("HMDPos", 3);
        schema.push("HMDPos", 3);
        assert!(matches!(
            build_header(&schema),
            Err(GazeError::Schema(_))
        ));
    }

    #[test]
    fn session_file_name_shape() {
        let name = session_file_name("p01", 7);
        assert!(name.starts_with("p01_007_"));
        assert!(name.ends_with(".csv"));
        // tag, sequence and a 7-digit time suffix
        assert_eq!(name.len(), "p01_007_".len() + 7 + ".csv".len());
    }
}
