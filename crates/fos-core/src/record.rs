//! The owning measurement result: channel table, coordinates, labels and
//! metadata, plus the query and alignment surface

use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;

use crate::align::{self, SignalInput, TimeTarget};
use crate::frame::{from_tick, ChannelFrame, Tick};
use crate::labels::LabelIndex;
use crate::metadata::MetadataTable;
use crate::CoreError;

/// Measurement result from one sensor channel.
///
/// Owns the time-indexed channel table, the per-channel coordinates along
/// the fiber, the optional gage/segment label index and the header
/// metadata. A record parsed from an export without an annotation row
/// simply carries no labels; every label lookup then fails with
/// [`CoreError::LabelNotFound`].
///
/// `align` mutates the record (timeline, channel data and rate are
/// replaced); queries and `interpolate_signal` are pure reads. Sharing a
/// record across threads therefore requires external exclusion around
/// `align`, which `&mut self` already enforces for a single owner.
#[derive(Debug, Clone)]
pub struct SensorRecord {
    frame: ChannelFrame,
    x: Vec<f64>,
    labels: Option<LabelIndex>,
    metadata: MetadataTable,
}

impl SensorRecord {
    /// Create a record without gage/segment labels
    pub fn new(frame: ChannelFrame, x: Vec<f64>, metadata: MetadataTable) -> Result<Self, CoreError> {
        Self::build(frame, x, None, metadata)
    }

    /// Create a record with a gage/segment label index
    pub fn with_labels(
        frame: ChannelFrame,
        x: Vec<f64>,
        labels: LabelIndex,
        metadata: MetadataTable,
    ) -> Result<Self, CoreError> {
        Self::build(frame, x, Some(labels), metadata)
    }

    fn build(
        frame: ChannelFrame,
        x: Vec<f64>,
        labels: Option<LabelIndex>,
        metadata: MetadataTable,
    ) -> Result<Self, CoreError> {
        if x.len() != frame.channel_count() {
            return Err(CoreError::ShapeMismatch(format!(
                "{} coordinates for {} channels",
                x.len(),
                frame.channel_count()
            )));
        }
        if let Some(index) = &labels {
            if let Some(max) = index.max_position() {
                if max >= frame.channel_count() {
                    return Err(CoreError::ShapeMismatch(format!(
                        "label position {} outside {} channels",
                        max,
                        frame.channel_count()
                    )));
                }
            }
        }
        Ok(Self {
            frame,
            x,
            labels,
            metadata,
        })
    }

    /// Measurement positions along the sensor in metres, one per channel
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Channel number from the header block
    pub fn channel(&self) -> u32 {
        self.metadata.channel()
    }

    /// Sample rate; see [`MetadataTable::rate`] for the post-alignment
    /// semantics
    pub fn rate(&self) -> f64 {
        self.metadata.rate()
    }

    /// Physical spacing between adjacent measurement points in millimetres
    pub fn gage_pitch(&self) -> f64 {
        self.metadata.gage_pitch()
    }

    /// Header metadata
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// The measurement table
    pub fn frame(&self) -> &ChannelFrame {
        &self.frame
    }

    /// Timestamps in row order
    pub fn time(&self) -> Vec<NaiveDateTime> {
        self.frame.ticks().iter().map(|&t| from_tick(t)).collect()
    }

    /// Timestamp ticks in row order (microseconds since the epoch)
    pub fn ticks(&self) -> &[Tick] {
        self.frame.ticks()
    }

    /// Gage labels in file column order
    pub fn gages(&self) -> Vec<&str> {
        self.labels
            .as_ref()
            .map(|index| index.gage_labels().collect())
            .unwrap_or_default()
    }

    /// Segment labels in file column order
    pub fn segments(&self) -> Vec<&str> {
        self.labels
            .as_ref()
            .map(|index| index.segment_labels().collect())
            .unwrap_or_default()
    }

    /// Data column for the given gage label, optionally prefixed with the
    /// time column
    pub fn gage(&self, label: &str, with_time: bool) -> Result<RecordBatch, CoreError> {
        let position = self.label_index(label)?.gage(label)?;
        self.project(position, position, with_time)
    }

    /// Data columns for the given segment label, optionally prefixed with
    /// the time column
    pub fn segment(&self, label: &str, with_time: bool) -> Result<RecordBatch, CoreError> {
        let (start, end) = self.label_index(label)?.segment(label)?;
        self.project(start, end, with_time)
    }

    /// Resample the record onto the target timeline.
    ///
    /// The aligned table is computed on a staging copy; the record's own
    /// timeline, channel data and rate are replaced only once the whole
    /// computation has succeeded. Returns the aligned table.
    ///
    /// With `clip`, both series are restricted to their overlapping
    /// instant range first; without it, target timestamps outside the
    /// recorded span stay null in the result.
    pub fn align(&mut self, target: TimeTarget, clip: bool) -> Result<RecordBatch, CoreError> {
        let staged = align::align_frame(&self.frame, &target, clip)?;
        self.metadata.set_rate(staged.rate);
        self.frame = staged.frame;
        Ok(self.frame.batch().clone())
    }

    /// Resample an external signal onto the record's own timeline.
    ///
    /// Read-only with respect to the record: the returned table carries
    /// the signal's value at every instant the sensor recorded, and the
    /// record's own data and rate are untouched.
    pub fn interpolate_signal(&self, input: SignalInput) -> Result<RecordBatch, CoreError> {
        align::resample_signal(&self.frame, &input)
    }

    fn label_index(&self, label: &str) -> Result<&LabelIndex, CoreError> {
        self.labels.as_ref().ok_or_else(|| CoreError::LabelNotFound {
            label: label.to_string(),
        })
    }

    /// Project an inclusive channel range, optionally with the time column.
    /// Channel positions exclude the time column, hence the offset by one.
    fn project(&self, start: usize, end: usize, with_time: bool) -> Result<RecordBatch, CoreError> {
        let mut indices: Vec<usize> = Vec::with_capacity(end - start + 2);
        if with_time {
            indices.push(0);
        }
        indices.extend(start + 1..=end + 1);
        Ok(self.frame.batch().project(&indices)?)
    }
}
