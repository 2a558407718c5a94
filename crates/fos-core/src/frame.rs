//! Time-indexed channel table backed by an arrow record batch

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};

use crate::CoreError;

/// Canonical name of the timestamp column
pub const TIME_COLUMN: &str = "time";

/// Timestamp tick: microseconds since the Unix epoch, timezone-naive.
///
/// All merging, clipping and membership filtering is done on ticks, so
/// "same timestamp" is plain integer equality rather than floating-point
/// comparison.
pub type Tick = i64;

/// Convert a naive timestamp to its tick value
pub fn to_tick(time: NaiveDateTime) -> Tick {
    time.and_utc().timestamp_micros()
}

/// Convert a tick value back to a naive timestamp
pub fn from_tick(tick: Tick) -> NaiveDateTime {
    DateTime::from_timestamp_micros(tick)
        .map(|t| t.naive_utc())
        .unwrap_or(NaiveDateTime::MIN)
}

/// Ordered, time-indexed table of numeric channels.
///
/// Column 0 is the timestamp column (see [`TIME_COLUMN`]); every following
/// column is one measurement channel as a nullable `Float64` array. Nulls
/// encode samples that could not be interpolated (no bracketing neighbor).
/// Channel identity is positional: header names may repeat across gage and
/// segment boundaries, so channels are addressed by position throughout.
#[derive(Debug, Clone)]
pub struct ChannelFrame {
    batch: RecordBatch,
}

impl ChannelFrame {
    /// Wrap an existing record batch, validating the frame invariants
    pub fn try_new(batch: RecordBatch) -> Result<Self, CoreError> {
        let schema = batch.schema();
        let first = schema
            .fields()
            .first()
            .ok_or_else(|| CoreError::ShapeMismatch("frame has no columns".to_string()))?;
        if first.name() != TIME_COLUMN
            || first.data_type() != &DataType::Timestamp(TimeUnit::Microsecond, None)
        {
            return Err(CoreError::ShapeMismatch(format!(
                "column 0 must be a microsecond timestamp column named '{}', got '{}' ({})",
                TIME_COLUMN,
                first.name(),
                first.data_type()
            )));
        }
        for field in schema.fields().iter().skip(1) {
            if field.data_type() != &DataType::Float64 {
                return Err(CoreError::ShapeMismatch(format!(
                    "channel column '{}' must be Float64, got {}",
                    field.name(),
                    field.data_type()
                )));
            }
        }

        let times = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .ok_or_else(|| {
                CoreError::ShapeMismatch("time column is not a microsecond timestamp array".to_string())
            })?;
        if times.null_count() > 0 {
            return Err(CoreError::MalformedTimeInput(
                "time column contains null entries".to_string(),
            ));
        }
        // Duplicate timestamps are a data-quality error, not something to
        // silently merge over.
        let ticks = times.values();
        for i in 1..ticks.len() {
            if ticks[i] <= ticks[i - 1] {
                return Err(CoreError::MalformedTimeInput(format!(
                    "timestamps must be strictly increasing (row {} repeats or regresses)",
                    i
                )));
            }
        }

        Ok(Self { batch })
    }

    /// Build a frame from raw ticks and per-channel sample columns
    pub fn from_columns(
        ticks: Vec<Tick>,
        names: &[String],
        channels: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, CoreError> {
        if names.len() != channels.len() {
            return Err(CoreError::ShapeMismatch(format!(
                "{} channel names for {} channel columns",
                names.len(),
                channels.len()
            )));
        }
        let rows = ticks.len();
        let mut fields = vec![Field::new(
            TIME_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        )];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(TimestampMicrosecondArray::from(ticks))];
        for (name, values) in names.iter().zip(channels) {
            if values.len() != rows {
                return Err(CoreError::ShapeMismatch(format!(
                    "channel '{}' has {} samples for {} timestamps",
                    name,
                    values.len(),
                    rows
                )));
            }
            fields.push(Field::new(name, DataType::Float64, true));
            columns.push(Arc::new(Float64Array::from(values)));
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Self::try_new(batch)
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of measurement channels (time column excluded)
    pub fn channel_count(&self) -> usize {
        self.batch.num_columns().saturating_sub(1)
    }

    /// Timestamp ticks in row order
    pub fn ticks(&self) -> &[Tick] {
        match self
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
        {
            Some(array) => &array.values()[..],
            None => &[],
        }
    }

    /// Channel column at the given position (time column excluded)
    pub fn channel(&self, position: usize) -> Option<&Float64Array> {
        self.batch
            .columns()
            .get(position + 1)
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
    }

    /// Samples of one channel, with nulls as `None`
    pub fn channel_values(&self, position: usize) -> Vec<Option<f64>> {
        match self.channel(position) {
            Some(array) => (0..array.len())
                .map(|i| if array.is_null(i) { None } else { Some(array.value(i)) })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Channel column names in positional order (time column excluded)
    pub fn channel_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .skip(1)
            .map(|f| f.name().clone())
            .collect()
    }

    /// The underlying record batch
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ticks: Vec<Tick>, values: Vec<Option<f64>>) -> Result<ChannelFrame, CoreError> {
        ChannelFrame::from_columns(ticks, &["0".to_string()], vec![values])
    }

    #[test]
    fn test_from_columns_roundtrip() {
        let f = frame(vec![0, 1_000_000, 2_000_000], vec![Some(1.0), None, Some(3.0)]).unwrap();
        assert_eq!(f.row_count(), 3);
        assert_eq!(f.channel_count(), 1);
        assert_eq!(f.ticks(), &[0, 1_000_000, 2_000_000]);
        assert_eq!(f.channel_values(0), vec![Some(1.0), None, Some(3.0)]);
    }

    #[test]
    fn test_duplicate_timestamps_rejected() {
        let err = frame(vec![0, 1_000_000, 1_000_000], vec![Some(1.0); 3]).unwrap_err();
        assert!(matches!(err, CoreError::MalformedTimeInput(_)));
    }

    #[test]
    fn test_regressing_timestamps_rejected() {
        let err = frame(vec![0, 2_000_000, 1_000_000], vec![Some(1.0); 3]).unwrap_err();
        assert!(matches!(err, CoreError::MalformedTimeInput(_)));
    }

    #[test]
    fn test_sample_count_mismatch_rejected() {
        let err = frame(vec![0, 1_000_000], vec![Some(1.0)]).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch(_)));
    }

    #[test]
    fn test_tick_conversion_keeps_microseconds() {
        let time = chrono::NaiveDate::from_ymd_opt(2023, 9, 6)
            .unwrap()
            .and_hms_micro_opt(12, 51, 28, 888_946)
            .unwrap();
        assert_eq!(from_tick(to_tick(time)), time);
    }
}
