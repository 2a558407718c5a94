//! Experiment metadata parsed from the export header block

use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Header key carrying the channel number
pub const KEY_CHANNEL: &str = "Channel";
/// Header key carrying the textual sample rate, e.g. `1.04167 Hz`
pub const KEY_RATE: &str = "Measurement Rate per Channel";
/// Header key carrying the gage pitch in millimetres
pub const KEY_GAGE_PITCH: &str = "Gage Pitch (mm)";

/// Key/value store from the export header block, plus the typed fields
/// derived from it at construction.
///
/// `channel` and `gage_pitch` are fixed for the lifetime of the table;
/// `rate` is the one field the alignment engine overwrites whenever the
/// effective sample spacing of the timeline changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataTable {
    entries: IndexMap<String, String>,
    channel: u32,
    rate: f64,
    gage_pitch: f64,
}

impl MetadataTable {
    /// Derive the typed fields from raw header entries
    pub fn from_entries(entries: IndexMap<String, String>) -> Result<Self, CoreError> {
        let channel = parse_entry(&entries, KEY_CHANNEL)?;
        let rate_text = lookup(&entries, KEY_RATE)?;
        let rate = rate_text
            .trim()
            .trim_end_matches("Hz")
            .trim()
            .parse::<f64>()
            .map_err(|_| CoreError::InvalidMetadata {
                key: KEY_RATE.to_string(),
                value: rate_text.to_string(),
            })?;
        let gage_pitch = parse_entry(&entries, KEY_GAGE_PITCH)?;
        Ok(Self {
            entries,
            channel,
            rate,
            gage_pitch,
        })
    }

    /// Raw header value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// All header entries in file order
    pub fn entries(&self) -> &IndexMap<String, String> {
        &self.entries
    }

    /// Channel number
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Sample rate in Hz as constructed from the header.
    ///
    /// After an alignment this holds the elapsed seconds between the first
    /// two rows of the aligned table.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Physical spacing between adjacent measurement points in millimetres
    pub fn gage_pitch(&self) -> f64 {
        self.gage_pitch
    }

    pub(crate) fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }
}

fn lookup<'a>(entries: &'a IndexMap<String, String>, key: &str) -> Result<&'a str, CoreError> {
    entries
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| CoreError::MissingMetadata {
            key: key.to_string(),
        })
}

fn parse_entry<T: FromStr>(entries: &IndexMap<String, String>, key: &str) -> Result<T, CoreError> {
    let raw = lookup(entries, key)?;
    raw.trim().parse().map_err(|_| CoreError::InvalidMetadata {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
