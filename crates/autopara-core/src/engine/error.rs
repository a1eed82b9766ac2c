use thiserror::Error;

use super::config::ConfigError;
use super::rundir::RunDirError;
use super::sink::SinkError;
use crate::core::calculators::CalculatorError;
use crate::core::io::jsonl::ReadError;
use std::io;
use std::time::Duration;

/// Run-level errors. Any of these aborts the run and leaves the destination unfinalized.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run directory error: {0}")]
    RunDirectory(#[from] RunDirError),

    #[error("Output error: {0}")]
    Sink(#[from] SinkError),

    #[error("Failed to read input: {0}")]
    Input(#[from] ReadError),

    #[error("Failed to construct calculator '{backend}': {source}")]
    CalculatorConstruction {
        backend: String,
        #[source]
        source: CalculatorError,
    },

    #[error("Failed to spawn worker {worker}: {source}")]
    WorkerSpawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    #[error("Worker {worker} crashed while processing chunk starting at {chunk_start}: {reason}")]
    WorkerCrashed {
        worker: usize,
        chunk_start: usize,
        reason: String,
    },

    #[error("Worker {worker} aborted chunk starting at {chunk_start}: {message}")]
    WorkerFailed {
        worker: usize,
        chunk_start: usize,
        message: String,
    },

    #[error("No chunk completed within {waited:?}")]
    ChunkTimeout { waited: Duration },

    #[error("Workers build calculators with factory '{worker}' but the run uses '{expected}'")]
    FactoryMismatch { expected: String, worker: String },

    #[error("Worker pool stopped unexpectedly")]
    PoolDisconnected,

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error(
        "Destination already holds {resume_point} records but the input has only {available} items"
    )]
    ResumeMismatch { resume_point: usize, available: usize },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<std::convert::Infallible> for EngineError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}
