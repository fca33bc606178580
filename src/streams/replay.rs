//! CSV tick replay
//!
//! Expected columns: `timestamp,price[,volume]`, timestamps in exchange-local
//! time (`%Y-%m-%d %H:%M:%S` with optional fractional seconds, or ISO `T`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::trading_core::Tick;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    price: f64,
    #[serde(default)]
    volume: Option<f64>,
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Read ticks from any CSV reader, in file order
pub fn read_ticks<R: Read>(reader: R, symbol: &str) -> Result<Vec<Tick>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut ticks = Vec::new();

    for (i, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", i + 1))?;
        let ts = parse_timestamp(&row.timestamp)
            .with_context(|| format!("Failed to parse timestamp: {}", row.timestamp))?;
        ticks.push(Tick::new(symbol, row.price, row.volume.unwrap_or(0.0), ts));
    }

    Ok(ticks)
}

/// Load a tick file
pub fn load_ticks(path: &Path, symbol: &str) -> Result<Vec<Tick>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let ticks = read_ticks(BufReader::new(file), symbol)?;
    tracing::debug!("Loaded {} ticks from {:?}", ticks.len(), path);
    Ok(ticks)
}
