use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Cannot open file: {0}")]
    SourceNotFound(String),

    /// A waveform or vital file could not be created or opened
    #[error("Output file {}: {source}", path.display())]
    OutputFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid channel pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Filename template references unknown tag: {0}")]
    UnresolvedTag(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    pub(crate) fn output_file(path: &Path, source: io::Error) -> Self {
        ConvertError::OutputFile {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
