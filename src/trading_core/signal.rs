//! Entry decision on closed bars
//!
//! A long entry is accepted when the closed bar finishes above ANY of VWAP,
//! the prior-session low or the prior-session close. Unset levels never
//! trigger.

use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::levels::LevelTracker;

/// Which comparison accepted the entry (first match in evaluation order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryTrigger {
    AboveVwap,
    AbovePrevLow,
    AbovePrevClose,
}

impl std::fmt::Display for EntryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryTrigger::AboveVwap => write!(f, "close>VWAP"),
            EntryTrigger::AbovePrevLow => write!(f, "close>PDL"),
            EntryTrigger::AbovePrevClose => write!(f, "close>PDC"),
        }
    }
}

pub struct EntrySignal;

impl EntrySignal {
    /// Caller guarantees no position is open.
    pub fn evaluate(bar: &Bar, levels: &LevelTracker) -> bool {
        Self::trigger(bar, levels).is_some()
    }

    pub fn trigger(bar: &Bar, levels: &LevelTracker) -> Option<EntryTrigger> {
        let above = |level: Option<f64>| level.is_some_and(|l| bar.close > l);

        if above(levels.vwap()) {
            Some(EntryTrigger::AboveVwap)
        } else if above(levels.prev_low()) {
            Some(EntryTrigger::AbovePrevLow)
        } else if above(levels.prev_close()) {
            Some(EntryTrigger::AbovePrevClose)
        } else {
            None
        }
    }
}
