//! Time alignment and external-signal interpolation against the
//! verification exports

use arrow::array::{Array, Float64Array};
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDate, NaiveDateTime};

use fos_core::{SignalInput, TimeTarget};
use fos_data::read_tsv;

fn fixture(name: &str) -> String {
    format!("{}/tests/data/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 9, 6)
        .unwrap()
        .and_hms_micro_opt(12, 51, 0, 0)
        .unwrap()
}

/// The load-cell clock: 0.4 s spacing from the sensor's first sample
fn load_times() -> Vec<NaiveDateTime> {
    (0..6)
        .map(|k| start_time() + Duration::milliseconds(k * 400))
        .collect()
}

fn column_values(batch: &RecordBatch, index: usize) -> Vec<Option<f64>> {
    let array = batch
        .column(index)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    (0..array.len())
        .map(|i| if array.is_null(i) { None } else { Some(array.value(i)) })
        .collect()
}

fn assert_close(actual: &[Option<f64>], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        let a = a.expect("unexpected missing value");
        assert!((a - e).abs() < 1e-6, "{a} != {e}");
    }
}

#[test]
fn align_to_load_clock() {
    let mut record = read_tsv(fixture("verification_full.tsv")).unwrap();
    let aligned = record.align(TimeTarget::Instants(load_times()), false).unwrap();

    // Row 3 sits a third of the way between the 0.9 s and 1.8 s samples
    let row3: Vec<Option<f64>> = (1..6).map(|c| column_values(&aligned, c)[3]).collect();
    assert_close(&row3, &[-0.9, 0.8, 4.1, 4.0, 7.4333333]);
    assert_eq!(record.rate(), 0.4);
    assert_eq!(record.frame().row_count(), 6);
}

#[test]
fn align_with_relative_seconds() {
    let mut record = read_tsv(fixture("verification_full.tsv")).unwrap();
    let aligned = record
        .align(
            TimeTarget::RelativeSeconds(vec![0.0, 0.4, 0.8, 1.2, 1.6, 2.0]),
            false,
        )
        .unwrap();

    let row3: Vec<Option<f64>> = (1..6).map(|c| column_values(&aligned, c)[3]).collect();
    assert_close(&row3, &[-0.9, 0.8, 4.1, 4.0, 7.4333333]);
    assert_eq!(record.rate(), 0.4);
}

#[test]
fn align_with_single_column_table() {
    let mut by_instants = read_tsv(fixture("verification_full.tsv")).unwrap();
    by_instants
        .align(TimeTarget::Instants(load_times()), false)
        .unwrap();

    // The same target packed as a one-column batch of relative seconds
    let column: Float64Array = vec![0.0, 0.4, 0.8, 1.2, 1.6, 2.0].into();
    let batch = RecordBatch::try_from_iter(vec![(
        "time [s]",
        std::sync::Arc::new(column) as arrow::array::ArrayRef,
    )])
    .unwrap();
    let mut by_table = read_tsv(fixture("verification_full.tsv")).unwrap();
    by_table.align(TimeTarget::Frame(batch), false).unwrap();

    assert_eq!(by_instants.ticks(), by_table.ticks());
    for c in 0..by_instants.frame().channel_count() {
        assert_eq!(
            by_instants.frame().channel_values(c),
            by_table.frame().channel_values(c)
        );
    }
}

#[test]
fn round_trip_keeps_values() {
    let mut record = read_tsv(fixture("verification_full.tsv")).unwrap();
    let before: Vec<Vec<Option<f64>>> = (0..record.frame().channel_count())
        .map(|c| record.frame().channel_values(c))
        .collect();

    record
        .align(TimeTarget::Instants(record.time()), false)
        .unwrap();

    for (c, column) in before.iter().enumerate() {
        assert_eq!(&record.frame().channel_values(c), column);
    }
    // The record's own spacing is 0.9 s
    assert_eq!(record.rate(), 0.9);
}

#[test]
fn clip_restricts_to_the_overlap() {
    // A target that starts before and ends after the recorded span
    let target: Vec<NaiveDateTime> = (0..40)
        .map(|k| start_time() + Duration::milliseconds(k * 400 - 2000))
        .collect();

    let mut unclipped = read_tsv(fixture("verification_full.tsv")).unwrap();
    unclipped
        .align(TimeTarget::Instants(target.clone()), false)
        .unwrap();
    let mut clipped = read_tsv(fixture("verification_full.tsv")).unwrap();
    clipped.align(TimeTarget::Instants(target), true).unwrap();

    assert!(clipped.frame().row_count() <= unclipped.frame().row_count());
    // Out-of-span rows interpolate to missing without clipping...
    assert!(unclipped
        .frame()
        .channel_values(0)
        .iter()
        .any(Option::is_none));
    // ...and are gone entirely with it
    for c in 0..clipped.frame().channel_count() {
        assert!(clipped.frame().channel_values(c).iter().all(Option::is_some));
    }
}

#[test]
fn interpolate_signal_onto_sensor_clock() {
    let record = read_tsv(fixture("verification_full.tsv")).unwrap();
    let ticks_before = record.ticks().to_vec();
    let rate_before = record.rate();

    // Load cell sampled every 0.2 s; the signal is linear in time, so the
    // resampled values are known exactly
    let time: Vec<NaiveDateTime> = (0..11)
        .map(|k| start_time() + Duration::milliseconds(k * 200))
        .collect();
    let values: Vec<f64> = (0..11).map(|k| 1.0 + 0.4 * k as f64).collect();

    let signal = record
        .interpolate_signal(SignalInput::Arrays { time, values })
        .unwrap();

    assert_eq!(signal.num_rows(), record.frame().row_count());
    let resampled = column_values(&signal, 1);
    // Sensor rows at 0.0, 0.9 and 1.8 s fall inside the signal's span
    assert!((resampled[0].unwrap() - 1.0).abs() < 1e-9);
    assert!((resampled[1].unwrap() - 2.8).abs() < 1e-9);
    assert!((resampled[2].unwrap() - 4.6).abs() < 1e-9);
    // Rows after the signal ends cannot be interpolated
    assert!(resampled[3..].iter().all(Option::is_none));

    // The record itself is untouched
    assert_eq!(record.ticks(), &ticks_before[..]);
    assert_eq!(record.rate(), rate_before);
}

#[test]
fn interpolate_signal_from_a_table() {
    let record = read_tsv(fixture("verification_full.tsv")).unwrap();

    let time: Float64Array = vec![0.0, 0.5, 1.0, 1.5, 2.0].into();
    let load: Float64Array = vec![0.0, 5.0, 10.0, 15.0, 20.0].into();
    let batch = RecordBatch::try_from_iter(vec![
        (
            "time [s]",
            std::sync::Arc::new(time) as arrow::array::ArrayRef,
        ),
        (
            "load [kN]",
            std::sync::Arc::new(load) as arrow::array::ArrayRef,
        ),
    ])
    .unwrap();

    let signal = record
        .interpolate_signal(SignalInput::Frame {
            data: batch,
            time: "time [s]".to_string(),
            signal: "load [kN]".to_string(),
        })
        .unwrap();

    assert_eq!(signal.schema().field(1).name(), "load [kN]");
    let resampled = column_values(&signal, 1);
    // The signal is 10 kN per second
    assert!((resampled[1].unwrap() - 9.0).abs() < 1e-9);
    assert!((resampled[2].unwrap() - 18.0).abs() < 1e-9);
}

#[test]
fn degenerate_targets_are_rejected_before_mutation() {
    let mut record = read_tsv(fixture("verification_full.tsv")).unwrap();
    let ticks_before = record.ticks().to_vec();

    let err = record
        .align(TimeTarget::Instants(vec![start_time()]), false)
        .unwrap_err();
    assert!(matches!(err, fos_core::CoreError::MalformedTimeInput(_)));

    let err = record
        .align(TimeTarget::RelativeSeconds(vec![0.0, 0.8, 0.4]), false)
        .unwrap_err();
    assert!(matches!(err, fos_core::CoreError::MalformedTimeInput(_)));

    assert_eq!(record.ticks(), &ticks_before[..]);
}
