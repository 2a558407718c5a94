//! File ingestion for fiber-optic sensing exports

pub mod sources;

use arrow::error::ArrowError;
use thiserror::Error;

use fos_core::CoreError;

// Re-exports
pub use sources::read_tsv;

/// Errors that can occur while reading export files
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("TSV parsing error: {0}")]
    Csv(String),

    #[error("Format error at line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("{0}")]
    Core(#[from] CoreError),
}

impl From<csv::Error> for DataError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(io_err) => {
                DataError::Io(std::io::Error::new(io_err.kind(), error.to_string()))
            }
            _ => DataError::Csv(error.to_string()),
        }
    }
}
