//! JSON Lines output sink.
//!
//! The sink is opened once per run and only ever appended to: one
//! serialized record per line, newline-terminated. With compression
//! enabled the stream is gzipped on the way down and the file gets a
//! `.gz` suffix; the gzip trailer is written when the sink is dropped.
//!
//! Only the ordered writer appends. The internal lock exists so stats
//! can be read from other tasks, not to serialize writers.

use crate::Result;
use chronicle_core::EnrichedRecord;
use flate2::write::GzEncoder;
use flate2::Compression;
use metrics::counter;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Configuration for the output sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Output file path. A `.gz` suffix is added when compression is on
    /// and the path doesn't already end in one.
    pub path: PathBuf,

    /// Gzip the output stream.
    /// Default: false
    pub compress: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("output.jsonl"),
            compress: false,
        }
    }
}

enum SinkWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            SinkWriter::Plain(w) => w.write(buf),
            SinkWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            SinkWriter::Plain(w) => w.flush(),
            SinkWriter::Gzip(w) => w.flush(),
        }
    }
}

/// Append-only JSON Lines sink.
pub struct JsonlSink {
    writer: Mutex<SinkWriter>,
    path: PathBuf,
    records_written: AtomicUsize,
    bytes_written: AtomicUsize,
}

impl JsonlSink {
    /// Open the sink, creating parent directories as needed.
    pub fn create(config: SinkConfig) -> Result<Self> {
        let path = if config.compress && config.path.extension().is_none_or(|ext| ext != "gz") {
            let mut os = config.path.into_os_string();
            os.push(".gz");
            PathBuf::from(os)
        } else {
            config.path
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&path)?;
        let buffered = BufWriter::with_capacity(1024 * 1024, file); // 1MB buffer
        let writer = if config.compress {
            SinkWriter::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            SinkWriter::Plain(buffered)
        };

        info!(
            "Output sink opened: path={}, compress={}",
            path.display(),
            config.compress
        );

        Ok(Self {
            writer: Mutex::new(writer),
            path,
            records_written: AtomicUsize::new(0),
            bytes_written: AtomicUsize::new(0),
        })
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &EnrichedRecord) -> Result<()> {
        let line = record.to_json_line()?;

        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        drop(writer);

        let written = line.len() + 1;
        self.records_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(written, Ordering::Relaxed);
        counter!("write_bytes_total").increment(written as u64);

        Ok(())
    }

    /// Flush buffered output to disk.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    /// The path actually written to (includes any added `.gz` suffix).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get statistics about the sink.
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        // Flush any buffered tail; the gzip encoder writes its trailer
        // when the inner writer drops right after.
        if let Err(e) = self.flush() {
            warn!("Error flushing output sink on drop: {}", e);
        }
    }
}

/// Statistics about the output sink.
#[derive(Debug, Clone)]
pub struct SinkStats {
    /// Records appended.
    pub records_written: usize,

    /// Uncompressed bytes appended, newlines included.
    pub bytes_written: usize,
}
