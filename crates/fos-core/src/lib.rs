//! Core data model and time-alignment engine for distributed fiber-optic
//! strain measurements.
//!
//! This crate provides the fundamental abstractions for one measurement
//! channel of a sensing instrument: the time-indexed channel table, the
//! gage/segment label index, the header metadata, and the synchronization
//! engine that resamples the measurement onto a foreign clock (or a foreign
//! signal onto the measurement clock).

pub mod align;
pub mod frame;
pub mod labels;
pub mod metadata;
pub mod record;

use thiserror::Error;

// Re-exports
pub use align::{SignalInput, TimeTarget};
pub use frame::{ChannelFrame, Tick, TIME_COLUMN};
pub use labels::LabelIndex;
pub use metadata::MetadataTable;
pub use record::SensorRecord;

/// Errors that can occur in core data operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown gage or segment label: '{label}'")]
    LabelNotFound { label: String },

    #[error("Malformed time input: {0}")]
    MalformedTimeInput(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Incompatible signal input: {0}")]
    IncompatibleSignalInput(String),

    #[error("Missing metadata key: '{key}'")]
    MissingMetadata { key: String },

    #[error("Invalid metadata value for '{key}': '{value}'")]
    InvalidMetadata { key: String, value: String },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}
