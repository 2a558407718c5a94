//! Reader for tab-separated sensor exports
//!
//! An export file starts with a header block of `Key: Value` lines closed
//! by a dash separator, followed by the tab-separated section: an optional
//! gage/segment annotation row, the x-coordinate row, then one row per
//! measurement. Every tab row carries three leading cells (timestamp plus
//! two auxiliary lanes) before the per-channel cells.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use indexmap::IndexMap;
use tracing::{debug, info};

use fos_core::frame::to_tick;
use fos_core::{ChannelFrame, LabelIndex, MetadataTable, SensorRecord};

use crate::DataError;

/// Marker cell opening the gage/segment annotation row
const GAGE_ROW_MARKER: &str = "Gage/Segment";
/// Marker cell opening the x-coordinate row
const X_ROW_MARKER: &str = "x-Coordinate (m)";
/// Leading cells before the per-channel columns (timestamp + two auxiliary lanes)
const LEADING_CELLS: usize = 3;
/// Timestamp format used by the instrument software
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Read a sensor export file into a [`SensorRecord`].
///
/// Whether the record carries gage/segment labels is decided by the file:
/// exports saved with key data include the annotation row, full-sensor
/// exports do not.
pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<SensorRecord, DataError> {
    let path = path.as_ref();
    info!(path = %path.display(), "reading sensor export");

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let (entries, mut line_no) = read_header_block(&mut reader)?;
    let metadata = MetadataTable::from_entries(entries)?;

    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader);

    let mut record = csv::StringRecord::new();
    if !csv_reader.read_record(&mut record)? {
        return Err(DataError::Format {
            line: line_no + 1,
            message: "missing x-coordinate row".to_string(),
        });
    }
    line_no += 1;

    // Annotation row first when present, x-coordinate row in either case
    let annotation = if record.get(0) == Some(GAGE_ROW_MARKER) {
        let cells = parse_annotation_cells(&record);
        if !csv_reader.read_record(&mut record)? {
            return Err(DataError::Format {
                line: line_no + 1,
                message: "missing x-coordinate row".to_string(),
            });
        }
        line_no += 1;
        Some(cells)
    } else {
        None
    };

    if record.get(0) != Some(X_ROW_MARKER) {
        return Err(DataError::Format {
            line: line_no,
            message: format!(
                "expected '{}' row, got '{}'",
                X_ROW_MARKER,
                record.get(0).unwrap_or("")
            ),
        });
    }
    let x = parse_x_row(&record, line_no)?;
    let width = x.len();

    let labels = match &annotation {
        Some(cells) => {
            if cells.len() != width {
                return Err(DataError::Format {
                    line: line_no - 1,
                    message: format!(
                        "annotation row has {} cells for {} channels",
                        cells.len(),
                        width
                    ),
                });
            }
            Some(build_label_index(cells, line_no - 1)?)
        }
        None => None,
    };

    // Data rows
    let mut ticks = Vec::new();
    let mut channels: Vec<Vec<Option<f64>>> = vec![Vec::new(); width];
    while csv_reader.read_record(&mut record)? {
        line_no += 1;
        if record.len() != width + LEADING_CELLS {
            return Err(DataError::Format {
                line: line_no,
                message: format!(
                    "expected {} cells, got {}",
                    width + LEADING_CELLS,
                    record.len()
                ),
            });
        }
        let raw_time = record.get(0).unwrap_or("");
        let time = NaiveDateTime::parse_from_str(raw_time, TIME_FORMAT).map_err(|e| {
            DataError::Format {
                line: line_no,
                message: format!("bad timestamp '{raw_time}': {e}"),
            }
        })?;
        ticks.push(to_tick(time));
        for (i, cell) in record.iter().skip(LEADING_CELLS).enumerate() {
            let cell = cell.trim();
            let value = if cell.is_empty() {
                None
            } else {
                Some(cell.parse::<f64>().map_err(|_| DataError::Format {
                    line: line_no,
                    message: format!("bad value '{cell}' in channel {i}"),
                })?)
            };
            channels[i].push(value);
        }
    }

    let names: Vec<String> = match annotation {
        Some(cells) => cells,
        None => (0..width).map(|i| i.to_string()).collect(),
    };

    let frame = ChannelFrame::from_columns(ticks, &names, channels)?;
    info!(
        rows = frame.row_count(),
        channels = width,
        labeled = labels.is_some(),
        "sensor export loaded"
    );

    let result = match labels {
        Some(index) => SensorRecord::with_labels(frame, x, index, metadata)?,
        None => SensorRecord::new(frame, x, metadata)?,
    };
    Ok(result)
}

/// Read `Key: Value` lines up to the dash separator
fn read_header_block<R: BufRead>(
    reader: &mut R,
) -> Result<(IndexMap<String, String>, usize), DataError> {
    let mut entries = IndexMap::new();
    let mut line_no = 0;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(DataError::Format {
                line: line_no,
                message: "missing header separator".to_string(),
            });
        }
        line_no += 1;
        let trimmed = line.trim_end();
        if trimmed.starts_with("---") {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        // Values may themselves contain colons (dates, times), so split at
        // the first one only
        let (key, value) = trimmed.split_once(':').ok_or_else(|| DataError::Format {
            line: line_no,
            message: format!("expected 'Key: Value', got '{trimmed}'"),
        })?;
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    debug!(entries = entries.len(), "header block parsed");
    Ok((entries, line_no))
}

fn parse_annotation_cells(record: &csv::StringRecord) -> Vec<String> {
    record
        .iter()
        .skip(LEADING_CELLS)
        .map(|cell| cell.trim().to_string())
        .collect()
}

/// Build the label index from the annotation cells.
///
/// A plain cell is a gage label for its channel; cells of the form
/// `name[k]` are segment members, and a consecutive run of them forms the
/// inclusive channel range of segment `name`. Empty cells are unlabeled
/// channels.
fn build_label_index(cells: &[String], line: usize) -> Result<LabelIndex, DataError> {
    let mut index = LabelIndex::new();
    let mut open: Option<(String, usize)> = None;

    for (i, cell) in cells.iter().enumerate() {
        let member = segment_member(cell);

        if let Some((name, start)) = &open {
            if member.as_deref() != Some(name.as_str()) {
                if !index.insert_segment(name.clone(), *start, i - 1) {
                    return Err(DataError::Format {
                        line,
                        message: format!("duplicate segment label '{name}'"),
                    });
                }
                open = None;
            }
        }

        match member {
            Some(name) => {
                if open.is_none() {
                    if index.has_segment(&name) {
                        return Err(DataError::Format {
                            line,
                            message: format!("segment '{name}' members are not contiguous"),
                        });
                    }
                    open = Some((name, i));
                }
            }
            None if !cell.is_empty() => {
                if !index.insert_gage(cell.clone(), i) {
                    return Err(DataError::Format {
                        line,
                        message: format!("duplicate gage label '{cell}'"),
                    });
                }
            }
            None => {}
        }
    }

    if let Some((name, start)) = open {
        if !index.insert_segment(name.clone(), start, cells.len() - 1) {
            return Err(DataError::Format {
                line,
                message: format!("duplicate segment label '{name}'"),
            });
        }
    }
    Ok(index)
}

/// Segment membership of one annotation cell: `name[k]` yields `name`
fn segment_member(cell: &str) -> Option<String> {
    let (name, rest) = cell.split_once('[')?;
    let digits = rest.strip_suffix(']')?;
    if name.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(name.to_string())
}

fn parse_x_row(record: &csv::StringRecord, line: usize) -> Result<Vec<f64>, DataError> {
    record
        .iter()
        .skip(LEADING_CELLS)
        .map(|cell| {
            cell.trim().parse::<f64>().map_err(|_| DataError::Format {
                line,
                message: format!("bad x-coordinate '{cell}'"),
            })
        })
        .collect()
}
