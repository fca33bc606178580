//! Reference price levels: prior-session high/low/close and running VWAP

use serde::{Deserialize, Serialize};

use super::bars::Bar;

/// Prior-session levels supplied by the feed bootstrap or the command line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrevSessionLevels {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Holds reference levels used by the entry signal.
///
/// VWAP is the typical-price VWAP over every closed bar the tracker has been
/// given; it is `None` until a bar with non-zero volume has closed.
#[derive(Debug, Clone, Default)]
pub struct LevelTracker {
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    prev_close: Option<f64>,
    vwap: Option<f64>,
    cum_pv: f64,
    cum_volume: f64,
    bars_seen: usize,
}

impl LevelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed prior-session levels (last call wins)
    pub fn set_prev_session(&mut self, levels: PrevSessionLevels) {
        self.prev_high = Some(levels.high);
        self.prev_low = Some(levels.low);
        self.prev_close = Some(levels.close);
    }

    pub fn has_prev_session(&self) -> bool {
        self.prev_high.is_some()
    }

    /// Fold a newly closed bar into the VWAP accumulator
    pub fn update_vwap(&mut self, bar: &Bar) {
        self.bars_seen += 1;
        if bar.volume <= 0.0 {
            return;
        }
        self.cum_pv += bar.typical_price() * bar.volume;
        self.cum_volume += bar.volume;
        self.vwap = Some(self.cum_pv / self.cum_volume);
    }

    /// Clear the VWAP accumulator. Prior-session levels are kept.
    pub fn reset_vwap(&mut self) {
        self.cum_pv = 0.0;
        self.cum_volume = 0.0;
        self.bars_seen = 0;
        self.vwap = None;
    }

    pub fn vwap(&self) -> Option<f64> {
        self.vwap
    }

    pub fn prev_high(&self) -> Option<f64> {
        self.prev_high
    }

    pub fn prev_low(&self) -> Option<f64> {
        self.prev_low
    }

    pub fn prev_close(&self) -> Option<f64> {
        self.prev_close
    }

    /// Number of closed bars folded in since construction or the last reset
    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    #[cfg(test)]
    pub(crate) fn set_vwap_for_test(&mut self, vwap: f64) {
        self.vwap = Some(vwap);
    }
}
