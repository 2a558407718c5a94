//! Gage and segment label index

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Maps gage labels to channel positions and segment labels to inclusive
/// channel ranges.
///
/// Positions exclude the time column: position `i` refers to the i-th
/// measurement channel and pairs with the i-th sensor coordinate. The
/// index is built once by the file reader from the annotation row and is
/// read-only afterwards; insertion order is the file's column order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelIndex {
    gages: IndexMap<String, usize>,
    segments: IndexMap<String, (usize, usize)>,
}

impl LabelIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gage label at the given channel position.
    ///
    /// Returns `false` when the label is already taken (labels must be
    /// unique within their category).
    pub fn insert_gage(&mut self, label: impl Into<String>, position: usize) -> bool {
        self.gages.insert(label.into(), position).is_none()
    }

    /// Register a segment label over an inclusive channel range.
    ///
    /// Returns `false` when the label is already taken.
    pub fn insert_segment(&mut self, label: impl Into<String>, start: usize, end: usize) -> bool {
        self.segments.insert(label.into(), (start, end)).is_none()
    }

    /// Channel position of a gage label
    pub fn gage(&self, label: &str) -> Result<usize, CoreError> {
        self.gages
            .get(label)
            .copied()
            .ok_or_else(|| CoreError::LabelNotFound {
                label: label.to_string(),
            })
    }

    /// Inclusive channel range of a segment label
    pub fn segment(&self, label: &str) -> Result<(usize, usize), CoreError> {
        self.segments
            .get(label)
            .copied()
            .ok_or_else(|| CoreError::LabelNotFound {
                label: label.to_string(),
            })
    }

    /// Whether a gage label is registered
    pub fn has_gage(&self, label: &str) -> bool {
        self.gages.contains_key(label)
    }

    /// Whether a segment label is registered
    pub fn has_segment(&self, label: &str) -> bool {
        self.segments.contains_key(label)
    }

    /// Gage labels in file column order
    pub fn gage_labels(&self) -> impl Iterator<Item = &str> {
        self.gages.keys().map(String::as_str)
    }

    /// Segment labels in file column order
    pub fn segment_labels(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    /// Whether the index holds no labels at all
    pub fn is_empty(&self) -> bool {
        self.gages.is_empty() && self.segments.is_empty()
    }

    /// Largest channel position referenced by any label
    pub(crate) fn max_position(&self) -> Option<usize> {
        let gage_max = self.gages.values().copied().max();
        let segment_max = self.segments.values().map(|&(_, end)| end).max();
        gage_max.max(segment_max)
    }
}
