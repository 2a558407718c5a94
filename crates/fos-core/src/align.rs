//! Time-series synchronization engine
//!
//! Aligning two irregularly related time axes works in three steps: form
//! the outer union of both tick sequences, fill every gap by time-weighted
//! linear interpolation between its timestamp-adjacent known neighbors,
//! then keep exactly the rows whose tick appears in the requested filter
//! set. Membership is exact `i64` equality on microsecond ticks, so a
//! timestamp survives the filter only if it is the same instant that was
//! requested.

use std::cmp::Ordering;

use ahash::AHashSet;
use arrow::array::{Array, Float64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::frame::{from_tick, to_tick, ChannelFrame, Tick};
use crate::CoreError;

/// Target timeline for resampling a record's own data.
///
/// A target is either a plain timestamp sequence or a single-column table;
/// relative values carry their meaning in the variant instead of a side
/// flag, so contradictory combinations cannot be expressed.
#[derive(Debug, Clone)]
pub enum TimeTarget {
    /// Absolute timestamps
    Instants(Vec<NaiveDateTime>),
    /// Elapsed seconds since the sensor's first sample
    RelativeSeconds(Vec<f64>),
    /// Single-column table: a microsecond timestamp column is taken as
    /// absolute instants, a `Float64` column as relative seconds
    Frame(RecordBatch),
}

impl TimeTarget {
    /// Resolve the target to ticks, converting relative values against the
    /// sensor's first tick `t0`
    pub(crate) fn resolve(&self, t0: Tick) -> Result<Vec<Tick>, CoreError> {
        let ticks = match self {
            TimeTarget::Instants(times) => times.iter().map(|&t| to_tick(t)).collect(),
            TimeTarget::RelativeSeconds(secs) => relative_ticks(secs, t0),
            TimeTarget::Frame(batch) => frame_ticks(batch, t0)?,
        };
        ensure_strictly_increasing(&ticks)?;
        Ok(ticks)
    }
}

/// External signal to resample onto the sensor timeline
#[derive(Debug, Clone)]
pub enum SignalInput {
    /// Table with named timestamp and payload columns
    Frame {
        data: RecordBatch,
        time: String,
        signal: String,
    },
    /// Paired timestamp / value arrays of equal length
    Arrays {
        time: Vec<NaiveDateTime>,
        values: Vec<f64>,
    },
    /// Paired arrays with timestamps as elapsed seconds since the sensor's
    /// first sample
    RelativeArrays { time_s: Vec<f64>, values: Vec<f64> },
}

impl SignalInput {
    /// Resolve to (ticks, samples, payload column name)
    fn resolve(&self, t0: Tick) -> Result<(Vec<Tick>, Vec<Option<f64>>, String), CoreError> {
        let (ticks, values, name) = match self {
            SignalInput::Frame { data, time, signal } => {
                let ticks = named_timestamp_column(data, time, t0)?;
                let values = named_float_column(data, signal)?;
                (ticks, values, signal.clone())
            }
            SignalInput::Arrays { time, values } => {
                if time.len() != values.len() {
                    return Err(CoreError::IncompatibleSignalInput(format!(
                        "{} timestamps for {} signal values",
                        time.len(),
                        values.len()
                    )));
                }
                let ticks = time.iter().map(|&t| to_tick(t)).collect();
                (ticks, values.iter().copied().map(Some).collect(), "signal".to_string())
            }
            SignalInput::RelativeArrays { time_s, values } => {
                if time_s.len() != values.len() {
                    return Err(CoreError::IncompatibleSignalInput(format!(
                        "{} timestamps for {} signal values",
                        time_s.len(),
                        values.len()
                    )));
                }
                let ticks = relative_ticks(time_s, t0);
                (ticks, values.iter().copied().map(Some).collect(), "signal".to_string())
            }
        };
        ensure_strictly_increasing(&ticks)?;
        Ok((ticks, values, name))
    }
}

/// Staged outcome of a self-alignment. The caller swaps it into the owning
/// record only after the whole computation has succeeded, so a failed
/// alignment leaves the prior state untouched.
pub(crate) struct AlignmentResult {
    pub(crate) frame: ChannelFrame,
    pub(crate) rate: f64,
}

/// Resample a frame onto the target timeline.
///
/// With `clip`, both series are first restricted to their overlapping
/// instant range. Target ticks outside the sensor's recorded span have no
/// bracketing neighbor and interpolate to null; callers avoid that by
/// clipping.
pub(crate) fn align_frame(
    frame: &ChannelFrame,
    target: &TimeTarget,
    clip: bool,
) -> Result<AlignmentResult, CoreError> {
    let mut sensor_ticks = frame.ticks().to_vec();
    let first = *sensor_ticks
        .first()
        .ok_or_else(|| CoreError::MalformedTimeInput("sensor timeline is empty".to_string()))?;

    let mut target_ticks = target.resolve(first)?;
    if target_ticks.len() < 2 {
        return Err(CoreError::MalformedTimeInput(format!(
            "alignment target needs at least 2 timestamps, got {}",
            target_ticks.len()
        )));
    }

    let mut columns: Vec<Vec<Option<f64>>> = (0..frame.channel_count())
        .map(|c| frame.channel_values(c))
        .collect();

    if clip {
        let (low, up) = clip_bounds(&sensor_ticks, &target_ticks);
        debug!(clip_low = low, clip_up = up, "clipping to overlapping range");
        let keep_rows: Vec<usize> = sensor_ticks
            .iter()
            .enumerate()
            .filter(|(_, t)| (low..=up).contains(*t))
            .map(|(i, _)| i)
            .collect();
        if keep_rows.len() != sensor_ticks.len() {
            sensor_ticks = keep_rows.iter().map(|&i| sensor_ticks[i]).collect();
            for column in &mut columns {
                *column = keep_rows.iter().map(|&i| column[i]).collect();
            }
        }
        target_ticks.retain(|t| (low..=up).contains(t));
        if target_ticks.len() < 2 {
            return Err(CoreError::MalformedTimeInput(
                "fewer than 2 target timestamps remain after clipping".to_string(),
            ));
        }
    }

    let (out_ticks, out_columns) = resample(&sensor_ticks, &columns, &target_ticks, &target_ticks);

    // The effective spacing of the resampled timeline, in seconds
    let rate = (out_ticks[1] - out_ticks[0]) as f64 / 1e6;

    let names = frame.channel_names();
    let staged = ChannelFrame::from_columns(out_ticks, &names, out_columns)?;
    debug!(rows = staged.row_count(), rate, "aligned frame staged");
    Ok(AlignmentResult { frame: staged, rate })
}

/// Resample an external signal onto the sensor timeline.
///
/// Same union + interpolate procedure as [`align_frame`], except the
/// membership filter keeps the sensor's own ticks: the output is the
/// signal's value at every instant the sensor recorded.
pub(crate) fn resample_signal(
    frame: &ChannelFrame,
    input: &SignalInput,
) -> Result<RecordBatch, CoreError> {
    let sensor_ticks = frame.ticks();
    let first = *sensor_ticks
        .first()
        .ok_or_else(|| CoreError::MalformedTimeInput("sensor timeline is empty".to_string()))?;

    let (signal_ticks, signal_values, name) = input.resolve(first)?;
    debug!(
        signal = %name,
        samples = signal_ticks.len(),
        "resampling external signal onto sensor timeline"
    );

    let columns = vec![signal_values];
    let (out_ticks, mut out_columns) = resample(&signal_ticks, &columns, sensor_ticks, sensor_ticks);
    let values = out_columns.pop().unwrap_or_default();

    let staged = ChannelFrame::from_columns(out_ticks, &[name], vec![values])?;
    Ok(staged.batch().clone())
}

/// Outer union + interpolate + membership filter over one set of columns.
///
/// `columns` are sampled at `source_ticks`; `extra_ticks` contribute
/// timeline rows without values. Rows whose tick is absent from `keep`
/// are dropped from the output. All tick slices must be strictly
/// increasing.
fn resample(
    source_ticks: &[Tick],
    columns: &[Vec<Option<f64>>],
    extra_ticks: &[Tick],
    keep: &[Tick],
) -> (Vec<Tick>, Vec<Vec<Option<f64>>>) {
    let union = merge_union(source_ticks, extra_ticks);
    let keep_set: AHashSet<Tick> = keep.iter().copied().collect();

    // Spread each column over the union timeline, then fill the gaps
    let mut spread_columns = Vec::with_capacity(columns.len());
    for column in columns {
        let mut spread = vec![None; union.len()];
        let mut src = 0;
        for (i, &t) in union.iter().enumerate() {
            if src < source_ticks.len() && source_ticks[src] == t {
                spread[i] = column[src];
                src += 1;
            }
        }
        interpolate_gaps(&union, &mut spread);
        spread_columns.push(spread);
    }

    let mut out_ticks = Vec::with_capacity(keep.len());
    let mut out_columns: Vec<Vec<Option<f64>>> =
        vec![Vec::with_capacity(keep.len()); spread_columns.len()];
    for (i, &t) in union.iter().enumerate() {
        if keep_set.contains(&t) {
            out_ticks.push(t);
            for (c, column) in spread_columns.iter().enumerate() {
                out_columns[c].push(column[i]);
            }
        }
    }
    (out_ticks, out_columns)
}

/// Merge two strictly increasing tick sequences into their sorted union
fn merge_union(a: &[Tick], b: &[Tick]) -> Vec<Tick> {
    let mut union = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                union.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                union.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                union.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    union.extend_from_slice(&a[i..]);
    union.extend_from_slice(&b[j..]);
    union
}

/// Fill interior gaps with time-weighted linear interpolation.
///
/// Leading and trailing gaps have no bracketing neighbor on one side and
/// stay empty.
fn interpolate_gaps(ticks: &[Tick], values: &mut [Option<f64>]) {
    let mut prev: Option<usize> = None;
    let mut i = 0;
    while i < values.len() {
        if values[i].is_some() {
            prev = Some(i);
            i += 1;
            continue;
        }
        // Extend the gap to the next known sample
        let mut next = i + 1;
        while next < values.len() && values[next].is_none() {
            next += 1;
        }
        if let Some(p) = prev {
            if next < values.len() {
                if let (Some(v0), Some(v1)) = (values[p], values[next]) {
                    let t0 = ticks[p] as f64;
                    let t1 = ticks[next] as f64;
                    for k in i..next {
                        let w = (ticks[k] as f64 - t0) / (t1 - t0);
                        values[k] = Some(v0 + (v1 - v0) * w);
                    }
                }
            }
        }
        i = next;
    }
}

/// Bounds of the overlapping instant range of two non-empty tick series
fn clip_bounds(a: &[Tick], b: &[Tick]) -> (Tick, Tick) {
    let low = a.first().copied().unwrap_or(Tick::MIN).max(b.first().copied().unwrap_or(Tick::MIN));
    let up = a.last().copied().unwrap_or(Tick::MAX).min(b.last().copied().unwrap_or(Tick::MAX));
    (low, up)
}

/// Convert elapsed seconds to absolute ticks by calendar-correct duration
/// arithmetic from the sensor's first timestamp
fn relative_ticks(secs: &[f64], t0: Tick) -> Vec<Tick> {
    let start = from_tick(t0);
    secs.iter()
        .map(|&s| to_tick(start + Duration::microseconds((s * 1e6).round() as i64)))
        .collect()
}

fn ensure_strictly_increasing(ticks: &[Tick]) -> Result<(), CoreError> {
    for i in 1..ticks.len() {
        if ticks[i] <= ticks[i - 1] {
            return Err(CoreError::MalformedTimeInput(format!(
                "timestamps must be strictly increasing (entry {} repeats or regresses)",
                i
            )));
        }
    }
    Ok(())
}

fn frame_ticks(batch: &RecordBatch, t0: Tick) -> Result<Vec<Tick>, CoreError> {
    if batch.num_columns() != 1 {
        return Err(CoreError::MalformedTimeInput(format!(
            "target table must have exactly one column, got {}",
            batch.num_columns()
        )));
    }
    let column = batch.column(0);
    match column.data_type() {
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            let array = column
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| {
                    CoreError::MalformedTimeInput("target column is not a timestamp array".to_string())
                })?;
            if array.null_count() > 0 {
                return Err(CoreError::MalformedTimeInput(
                    "target column contains null timestamps".to_string(),
                ));
            }
            Ok(array.values().to_vec())
        }
        DataType::Float64 => {
            let array = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| {
                    CoreError::MalformedTimeInput("target column is not a float array".to_string())
                })?;
            if array.null_count() > 0 {
                return Err(CoreError::MalformedTimeInput(
                    "target column contains null timestamps".to_string(),
                ));
            }
            let secs: Vec<f64> = array.values().to_vec();
            Ok(relative_ticks(&secs, t0))
        }
        other => Err(CoreError::MalformedTimeInput(format!(
            "unsupported target column type {other}"
        ))),
    }
}

fn named_timestamp_column(batch: &RecordBatch, name: &str, t0: Tick) -> Result<Vec<Tick>, CoreError> {
    let column = batch.column_by_name(name).ok_or_else(|| {
        CoreError::IncompatibleSignalInput(format!("no timestamp column named '{name}'"))
    })?;
    match column.data_type() {
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            let array = column
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| {
                    CoreError::IncompatibleSignalInput(format!(
                        "column '{name}' is not a timestamp array"
                    ))
                })?;
            if array.null_count() > 0 {
                return Err(CoreError::MalformedTimeInput(format!(
                    "column '{name}' contains null timestamps"
                )));
            }
            Ok(array.values().to_vec())
        }
        DataType::Float64 => {
            let array = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| {
                    CoreError::IncompatibleSignalInput(format!("column '{name}' is not a float array"))
                })?;
            if array.null_count() > 0 {
                return Err(CoreError::MalformedTimeInput(format!(
                    "column '{name}' contains null timestamps"
                )));
            }
            let secs: Vec<f64> = array.values().to_vec();
            Ok(relative_ticks(&secs, t0))
        }
        other => Err(CoreError::IncompatibleSignalInput(format!(
            "column '{name}' has unsupported type {other}"
        ))),
    }
}

fn named_float_column(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>, CoreError> {
    let column = batch.column_by_name(name).ok_or_else(|| {
        CoreError::IncompatibleSignalInput(format!("no signal column named '{name}'"))
    })?;
    let array = column
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| {
            CoreError::IncompatibleSignalInput(format!(
                "signal column '{name}' must be Float64, got {}",
                column.data_type()
            ))
        })?;
    Ok((0..array.len())
        .map(|i| if array.is_null(i) { None } else { Some(array.value(i)) })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_union_interleaves_and_dedups() {
        let union = merge_union(&[0, 10, 20, 30], &[5, 10, 35]);
        assert_eq!(union, vec![0, 5, 10, 20, 30, 35]);
    }

    #[test]
    fn test_interpolation_is_time_weighted() {
        let ticks = [0, 100, 400];
        let mut values = [Some(0.0), None, Some(4.0)];
        interpolate_gaps(&ticks, &mut values);
        // 100 is a quarter of the way from 0 to 400
        assert_eq!(values[1], Some(1.0));
    }

    #[test]
    fn test_extremes_stay_missing() {
        let ticks = [0, 100, 200, 300];
        let mut values = [None, Some(1.0), Some(2.0), None];
        interpolate_gaps(&ticks, &mut values);
        assert_eq!(values, [None, Some(1.0), Some(2.0), None]);
    }

    #[test]
    fn test_resample_keeps_exactly_the_filter_set() {
        let source = [0, 1_000_000, 2_000_000];
        let columns = vec![vec![Some(0.0), Some(1.0), Some(2.0)]];
        let target = [500_000, 1_500_000];
        let (ticks, values) = resample(&source, &columns, &target, &target);
        assert_eq!(ticks, target);
        assert_eq!(values[0], vec![Some(0.5), Some(1.5)]);
    }

    #[test]
    fn test_clip_bounds_overlap() {
        let (low, up) = clip_bounds(&[0, 10, 20], &[5, 25]);
        assert_eq!((low, up), (5, 20));
    }

    #[test]
    fn test_relative_ticks_round_to_microseconds() {
        let ticks = relative_ticks(&[0.0, 0.4, 1.0], 1_000_000);
        assert_eq!(ticks, vec![1_000_000, 1_400_000, 2_000_000]);
    }

    #[test]
    fn test_frame_target_with_timestamp_column() {
        use arrow::array::ArrayRef;
        use std::sync::Arc;

        let column = TimestampMicrosecondArray::from(vec![0_i64, 500_000]);
        let batch =
            RecordBatch::try_from_iter(vec![("time", Arc::new(column) as ArrayRef)]).unwrap();
        let ticks = TimeTarget::Frame(batch).resolve(7).unwrap();
        assert_eq!(ticks, vec![0, 500_000]);
    }

    #[test]
    fn test_unordered_target_rejected() {
        let target = TimeTarget::RelativeSeconds(vec![0.0, 2.0, 1.0]);
        assert!(matches!(
            target.resolve(0),
            Err(CoreError::MalformedTimeInput(_))
        ));
    }

    #[test]
    fn test_signal_length_mismatch_rejected() {
        let input = SignalInput::RelativeArrays {
            time_s: vec![0.0, 1.0],
            values: vec![1.0],
        };
        assert!(matches!(
            input.resolve(0),
            Err(CoreError::IncompatibleSignalInput(_))
        ));
    }
}
