// Pose table writer
//
// One CSV row per sample with a detected body. Rows are queued from the
// capture thread and written (and flushed) by the worker, so a crash loses at
// most the rows still in the ring.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ErrorReporter, RecordError, Result};
use crate::queue::{QueueSink, StreamStats, WorkerQueue};
use crate::skeleton::{Joint, JointId};

const ROW_END: &str = "\r\n";

/// Column names, without the row terminator
pub fn header() -> String {
    let mut line = String::from("Timestamp");
    for joint in JointId::ALL {
        let name = joint.name();
        for axis in ["X", "Y", "Z", "RX", "RY", "RZ", "RW"] {
            line.push(',');
            line.push_str(name);
            line.push_str(axis);
        }
    }
    line
}

/// One data row, without the row terminator. Joint slots missing from
/// `joints` are written as empty fields so every row has the header's width.
pub fn format_row(timestamp: u64, joints: &[Joint]) -> String {
    let mut line = timestamp.to_string();
    for joint in JointId::ALL {
        match joints.get(joint.index()) {
            Some(j) => {
                let p = j.position;
                let r = j.rotation;
                // Writing into a String cannot fail
                let _ = write!(line, ",{},{},{},{},{},{},{}", p.x, p.y, p.z, r.x, r.y, r.z, r.w);
            }
            None => line.push_str(",,,,,,,"),
        }
    }
    line
}

/// A copied joint set waiting to be written
pub struct PoseRow {
    pub timestamp: u64,
    pub joints: Vec<Joint>,
}

struct CsvSink<W: Write> {
    path: PathBuf,
    out: BufWriter<W>,
}

impl<W: Write> CsvSink<W> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.out
            .write_all(line.as_bytes())
            .and_then(|_| self.out.write_all(ROW_END.as_bytes()))
            .and_then(|_| self.out.flush())
            .map_err(|e| RecordError::io(&self.path, e))
    }
}

impl<W: Write + Send + 'static> QueueSink<PoseRow> for CsvSink<W> {
    fn process(&mut self, row: PoseRow) -> Result<()> {
        let line = format_row(row.timestamp, &row.joints);
        self.write_line(&line)
            .map_err(|e| RecordError::aborted("Skeleton", e.to_string()))
    }

    fn finish(&mut self, _aborted: bool) -> Result<()> {
        // Rows are flushed as they are written; this only catches a failed last flush
        self.out.flush().map_err(|e| RecordError::io(&self.path, e))
    }
}

/// Appends pose rows to `<stem>.csv` on its own worker thread
pub struct PoseTableWriter {
    path: PathBuf,
    queue: WorkerQueue<PoseRow>,
}

impl PoseTableWriter {
    /// Create the file, write the header, and start the worker
    pub fn open(path: &Path, capacity: usize, errors: ErrorReporter) -> Result<Self> {
        let file = File::create(path).map_err(|e| RecordError::io(path, e))?;
        Self::start(path, file, capacity, errors)
    }

    fn start<W: Write + Send + 'static>(path: &Path, out: W, capacity: usize, errors: ErrorReporter) -> Result<Self> {
        let mut sink = CsvSink {
            path: path.to_path_buf(),
            out: BufWriter::new(out),
        };
        sink.write_line(&header())?;

        let queue = WorkerQueue::spawn("Skeleton", capacity, sink, errors)?;
        log::info!("[Skeleton] writing poses to {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            queue,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a row for `joints`. Samples with no detected body are skipped.
    pub fn submit(&self, timestamp: u64, joints: &[Joint]) -> Result<()> {
        if joints.is_empty() {
            return Ok(());
        }
        self.queue.push(PoseRow {
            timestamp,
            joints: joints.to_vec(),
        })
    }

    /// Write out everything queued and close the file
    pub fn close(self) -> StreamStats {
        let stats = self.queue.close();
        log::info!(
            "[Skeleton] closed {}: {} rows written, {} dropped",
            self.path.display(),
            stats.processed,
            stats.dropped
        );
        stats
    }
}
