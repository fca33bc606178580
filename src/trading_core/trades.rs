//! Tick types for trading core

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Last-traded-price sample from the market data feed.
///
/// `ts` is exchange-local wall-clock time; all bucketing, market-window and
/// cutoff checks are done against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    /// Traded quantity attributed to this tick (0 when the feed has none)
    pub volume: f64,
    pub ts: NaiveDateTime,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64, ts: NaiveDateTime) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            ts,
        }
    }
}
