//! Resumable, append-only result destinations.
//!
//! A sink knows how many leading records it already holds (its resume point), accepts
//! further records strictly in index order, and is finalized once all inputs have been
//! processed. Re-running against the same destination therefore never duplicates or
//! reorders records.

use super::error::EngineError;
use crate::core::models::record::ResultRecord;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Both {final_path:?} and {partial_path:?} exist; remove one of them")]
    Ambiguous {
        final_path: PathBuf,
        partial_path: PathBuf,
    },

    #[error("Corrupt record on line {line} of {path:?}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Record on line {line} of {path:?} has index {found}, expected {expected}")]
    Gap {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Record with index {found} appended, expected {expected}")]
    OutOfOrder { expected: usize, found: usize },

    #[error("Destination is already finalized")]
    Finalized,

    #[error("Failed to serialize record {index}: {message}")]
    Serialize { index: usize, message: String },
}

/// An ordered result destination that can pick up where a previous run stopped.
pub trait ResultSink {
    /// Number of leading input items whose records are already stored.
    fn resume_point(&self) -> usize;

    /// True once the destination holds a finished run.
    fn is_complete(&self) -> bool;

    /// Appends records, which must continue the stored sequence without gaps.
    fn append(&mut self, records: &[ResultRecord]) -> Result<(), SinkError>;

    /// Marks the destination as finished. Only called after every input was processed.
    fn finalize(&mut self) -> Result<(), SinkError>;

    /// Consumes the already-completed leading items of `inputs` and returns the rest.
    ///
    /// # Errors
    ///
    /// Fails if reading a skipped item fails, or if the input ends before the resume point.
    fn remaining_inputs<I, T, E>(&self, inputs: I) -> Result<I::IntoIter, EngineError>
    where
        Self: Sized,
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<EngineError>,
    {
        let resume_point = self.resume_point();
        let mut inputs = inputs.into_iter();
        for available in 0..resume_point {
            match inputs.next() {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(EngineError::ResumeMismatch {
                        resume_point,
                        available,
                    });
                }
            }
        }
        Ok(inputs)
    }
}

fn check_next(expected: usize, records: &[ResultRecord]) -> Result<(), SinkError> {
    for (offset, record) in records.iter().enumerate() {
        if record.index() != expected + offset {
            return Err(SinkError::OutOfOrder {
                expected: expected + offset,
                found: record.index(),
            });
        }
    }
    Ok(())
}

/// A JSON-lines file destination.
///
/// Records are written to `<name>.partial`, flushed after every append, and the file is
/// atomically renamed to `<name>` on [`finalize`](ResultSink::finalize).
#[derive(Debug)]
pub struct JsonLinesSink {
    final_path: PathBuf,
    partial_path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: usize,
    complete: bool,
}

impl JsonLinesSink {
    /// Opens `path`, resuming from a previous partial run if there is one.
    ///
    /// A torn last line of the partial file (no trailing newline) is truncated away.
    ///
    /// # Errors
    ///
    /// Fails if both the final and the partial file exist, if either holds a corrupt
    /// record or an index gap, or on any I/O error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let final_path = path.as_ref().to_path_buf();
        let partial_path = partial_path_for(&final_path)?;

        match (final_path.exists(), partial_path.exists()) {
            (true, true) => Err(SinkError::Ambiguous {
                final_path,
                partial_path,
            }),
            (true, false) => {
                let scan = scan(&final_path)?;
                if scan.torn_at.is_some() {
                    return Err(SinkError::Corrupt {
                        path: final_path,
                        line: scan.records + 1,
                        message: "final line is incomplete".to_string(),
                    });
                }
                info!(
                    "Output {:?} is complete with {} records",
                    final_path, scan.records
                );
                Ok(Self {
                    final_path,
                    partial_path,
                    writer: None,
                    written: scan.records,
                    complete: true,
                })
            }
            (false, true) => {
                let scan = scan(&partial_path)?;
                let io_error = |source| SinkError::Io {
                    path: partial_path.clone(),
                    source,
                };
                if let Some(valid_len) = scan.torn_at {
                    warn!(
                        "Truncating incomplete last line of {:?} after {} records",
                        partial_path, scan.records
                    );
                    OpenOptions::new()
                        .write(true)
                        .open(&partial_path)
                        .and_then(|f| f.set_len(valid_len))
                        .map_err(io_error)?;
                }
                let file = OpenOptions::new()
                    .append(true)
                    .open(&partial_path)
                    .map_err(io_error)?;
                info!(
                    "Resuming {:?} after {} records",
                    partial_path, scan.records
                );
                Ok(Self {
                    final_path,
                    partial_path,
                    writer: Some(BufWriter::new(file)),
                    written: scan.records,
                    complete: false,
                })
            }
            (false, false) => {
                if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let file = File::create(&partial_path).map_err(|source| SinkError::Io {
                    path: partial_path.clone(),
                    source,
                })?;
                debug!("Created {:?}", partial_path);
                Ok(Self {
                    final_path,
                    partial_path,
                    writer: Some(BufWriter::new(file)),
                    written: 0,
                    complete: false,
                })
            }
        }
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    fn io_error(&self, source: io::Error) -> SinkError {
        SinkError::Io {
            path: self.partial_path.clone(),
            source,
        }
    }
}

impl ResultSink for JsonLinesSink {
    fn resume_point(&self) -> usize {
        self.written
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn append(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        check_next(self.written, records)?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::Finalized);
        };
        let mut line = Vec::new();
        for record in records {
            line.clear();
            serde_json::to_writer(&mut line, record).map_err(|e| SinkError::Serialize {
                index: record.index(),
                message: e.to_string(),
            })?;
            line.push(b'\n');
            if let Err(e) = writer.write_all(&line) {
                return Err(self.io_error(e));
            }
        }
        if let Err(e) = writer.flush() {
            return Err(self.io_error(e));
        }
        self.written += records.len();
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        if self.complete {
            return Ok(());
        }
        let Some(mut writer) = self.writer.take() else {
            return Err(SinkError::Finalized);
        };
        writer
            .flush()
            .and_then(|()| writer.get_ref().sync_all())
            .map_err(|e| self.io_error(e))?;
        drop(writer);
        fs::rename(&self.partial_path, &self.final_path).map_err(|e| self.io_error(e))?;
        self.complete = true;
        info!(
            "Finalized {:?} with {} records",
            self.final_path, self.written
        );
        Ok(())
    }
}

fn partial_path_for(path: &Path) -> Result<PathBuf, SinkError> {
    let Some(name) = path.file_name() else {
        return Err(SinkError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "output path has no file name"),
        });
    };
    let mut partial: OsString = name.to_os_string();
    partial.push(PARTIAL_SUFFIX);
    Ok(path.with_file_name(partial))
}

#[derive(Debug, Default)]
struct Scan {
    records: usize,
    failed: usize,
    /// Byte length of the valid prefix when the last line has no trailing newline.
    torn_at: Option<u64>,
}

fn scan(path: &Path) -> Result<Scan, SinkError> {
    let io_error = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut result = Scan::default();
    let mut offset = 0u64;
    let mut line_no = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).map_err(io_error)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        if buf.last() != Some(&b'\n') {
            result.torn_at = Some(offset);
            break;
        }
        offset += n as u64;
        let text = String::from_utf8_lossy(&buf);
        if text.trim().is_empty() {
            continue;
        }
        let record: ResultRecord =
            serde_json::from_str(&text).map_err(|e| SinkError::Corrupt {
                path: path.to_path_buf(),
                line: line_no,
                message: e.to_string(),
            })?;
        if record.index() != result.records {
            return Err(SinkError::Gap {
                path: path.to_path_buf(),
                line: line_no,
                expected: result.records,
                found: record.index(),
            });
        }
        if record.is_failed() {
            result.failed += 1;
        }
        result.records += 1;
    }
    Ok(result)
}

/// What a destination currently holds, as reported without modifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputState {
    Absent,
    Partial {
        records: usize,
        failed: usize,
        /// The last line is incomplete and will be recomputed.
        torn: bool,
    },
    Complete {
        records: usize,
        failed: usize,
    },
}

/// Reports the state of a JSON-lines destination.
pub fn inspect<P: AsRef<Path>>(path: P) -> Result<OutputState, SinkError> {
    let final_path = path.as_ref().to_path_buf();
    let partial_path = partial_path_for(&final_path)?;
    match (final_path.exists(), partial_path.exists()) {
        (true, true) => Err(SinkError::Ambiguous {
            final_path,
            partial_path,
        }),
        (true, false) => {
            let scan = scan(&final_path)?;
            Ok(OutputState::Complete {
                records: scan.records,
                failed: scan.failed,
            })
        }
        (false, true) => {
            let scan = scan(&partial_path)?;
            Ok(OutputState::Partial {
                records: scan.records,
                failed: scan.failed,
                torn: scan.torn_at.is_some(),
            })
        }
        (false, false) => Ok(OutputState::Absent),
    }
}

/// An in-memory destination, mainly for library callers and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<ResultRecord>,
    finalized: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that already holds `records`, as if a previous run stopped after them.
    pub fn with_records(records: Vec<ResultRecord>) -> Result<Self, SinkError> {
        check_next(0, &records)?;
        Ok(Self {
            records,
            finalized: false,
        })
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ResultRecord> {
        self.records
    }
}

impl ResultSink for MemorySink {
    fn resume_point(&self) -> usize {
        self.records.len()
    }

    fn is_complete(&self) -> bool {
        self.finalized
    }

    fn append(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        if self.finalized {
            return Err(SinkError::Finalized);
        }
        check_next(self.records.len(), records)?;
        self.records.extend_from_slice(records);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.finalized = true;
        Ok(())
    }
}
