//! Trade journal
//!
//! One row per closed trade, appended to a per-day CSV file named
//! `DDMMYY.csv` under the reports directory. The header is written only
//! when the file is new; every row is flushed immediately.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::trading_core::{ClosedTrade, ExitReason};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("journal has no open session")]
    NoSession,
}

/// One journal row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Instrument")]
    pub instrument: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "Entry Price")]
    pub entry_price: f64,
    #[serde(rename = "Exit Price")]
    pub exit_price: f64,
    #[serde(rename = "PnL")]
    pub pnl: f64,
    #[serde(rename = "Cumulative PnL")]
    pub cumulative_pnl: f64,
    #[serde(rename = "Exit Reason")]
    pub exit_reason: ExitReason,
}

impl TradeRecord {
    pub fn from_closed(trade: &ClosedTrade, instrument: &str) -> Self {
        Self {
            date: trade.exit_time.format("%Y-%m-%d").to_string(),
            time: trade.exit_time.format("%H:%M:%S").to_string(),
            instrument: instrument.to_string(),
            quantity: trade.quantity,
            entry_price: round2(trade.entry_price),
            exit_price: round2(trade.exit_price),
            pnl: round2(trade.pnl),
            cumulative_pnl: round2(trade.cumulative_pnl),
            exit_reason: trade.reason,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Sink for closed trades
pub trait TradeJournal: Send {
    /// Switch to the file for `date`
    fn begin_session(&mut self, date: NaiveDate) -> Result<(), JournalError>;

    fn record(&mut self, record: &TradeRecord) -> Result<(), JournalError>;
}

/// In-memory journal
impl TradeJournal for Vec<TradeRecord> {
    fn begin_session(&mut self, _date: NaiveDate) -> Result<(), JournalError> {
        Ok(())
    }

    fn record(&mut self, record: &TradeRecord) -> Result<(), JournalError> {
        self.push(record.clone());
        Ok(())
    }
}

/// Per-day CSV journal
pub struct CsvJournal {
    dir: PathBuf,
    current: Option<(PathBuf, csv::Writer<File>)>,
}

impl CsvJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: None,
        }
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", date.format("%d%m%y")))
    }

    /// File currently being written
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(p, _)| p.as_path())
    }
}

impl TradeJournal for CsvJournal {
    fn begin_session(&mut self, date: NaiveDate) -> Result<(), JournalError> {
        let path = self.file_for(date);
        if self.current_path() == Some(path.as_path()) {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| JournalError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let is_new = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| JournalError::Io {
                path: path.clone(),
                source,
            })?;

        let writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        info!("Trade journal: {}", path.display());
        self.current = Some((path, writer));
        Ok(())
    }

    fn record(&mut self, record: &TradeRecord) -> Result<(), JournalError> {
        let (path, writer) = self.current.as_mut().ok_or(JournalError::NoSession)?;
        writer.serialize(record)?;
        writer.flush().map_err(|source| JournalError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(pnl: f64, cumulative: f64) -> ClosedTrade {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap().and_hms_opt(10, 30, 0).unwrap();
        ClosedTrade {
            entry_price: 150.0,
            exit_price: 150.0 + pnl,
            quantity: 75,
            pnl,
            cumulative_pnl: cumulative,
            reason: ExitReason::Stoploss,
            entry_time: ts,
            exit_time: ts,
        }
    }

    #[test]
    fn test_record_from_closed_trade() {
        let rec = TradeRecord::from_closed(&trade(-15.0, -15.0), "NIFTY20JAN2625400CE");
        assert_eq!(rec.date, "2026-01-20");
        assert_eq!(rec.time, "10:30:00");
        assert_eq!(rec.exit_price, 135.0);
        assert_eq!(rec.exit_reason, ExitReason::Stoploss);
    }

    #[test]
    fn test_csv_journal_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();

        let mut journal = CsvJournal::new(dir.path());
        journal.begin_session(date).unwrap();
        journal.record(&TradeRecord::from_closed(&trade(-15.0, -15.0), "X")).unwrap();
        drop(journal);

        // reopening the same day appends without a second header
        let mut journal = CsvJournal::new(dir.path());
        journal.begin_session(date).unwrap();
        journal.record(&TradeRecord::from_closed(&trade(30.0, 15.0), "X")).unwrap();

        let path = dir.path().join("200126.csv");
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Date,Time,Instrument,Quantity,Entry Price,Exit Price,PnL,Cumulative PnL,Exit Reason"));
        assert!(lines[1].ends_with("STOPLOSS"));

        let rows: Vec<TradeRecord> = csv::Reader::from_path(&path)
            .unwrap()
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[1].cumulative_pnl, 15.0);
    }

    #[test]
    fn test_record_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = CsvJournal::new(dir.path());
        let err = journal.record(&TradeRecord::from_closed(&trade(1.0, 1.0), "X")).unwrap_err();
        assert!(matches!(err, JournalError::NoSession));
    }

    #[test]
    fn test_new_day_switches_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = CsvJournal::new(dir.path());
        journal.begin_session(NaiveDate::from_ymd_opt(2026, 1, 20).unwrap()).unwrap();
        journal.begin_session(NaiveDate::from_ymd_opt(2026, 1, 21).unwrap()).unwrap();
        assert_eq!(journal.current_path(), Some(dir.path().join("210126.csv").as_path()));
    }
}
