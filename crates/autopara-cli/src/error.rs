use autopara::engine::error::EngineError;
use autopara::engine::sink::SinkError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse file '{path}': {source}", path = path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The destination is unusable as it stands (both a final and a `.partial` file, or
    /// a corrupt record) and needs operator attention.
    #[error("Cannot use output '{path}': {source}", path = path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
