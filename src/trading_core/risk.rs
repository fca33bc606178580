//! Entry gating: market window and daily loss floor
//!
//! Only new entries are gated. An open position keeps being managed after
//! the floor is breached or the window closes.

use chrono::{NaiveDateTime, NaiveTime};

/// Reason a new entry was refused
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryBlock {
    OutsideMarketHours { now: NaiveTime },
    DailyLossFloor { realized_pnl: f64, floor: f64 },
}

impl std::fmt::Display for EntryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryBlock::OutsideMarketHours { now } => {
                write!(f, "outside market hours ({})", now.format("%H:%M:%S"))
            }
            EntryBlock::DailyLossFloor { realized_pnl, floor } => {
                write!(f, "daily loss floor hit ({:.2} <= {:.2})", realized_pnl, floor)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RiskGuard {
    window_start: NaiveTime,
    window_end: NaiveTime,
    daily_loss_floor: f64,
}

impl RiskGuard {
    /// Window is inclusive at both ends
    pub fn new(window_start: NaiveTime, window_end: NaiveTime, daily_loss_floor: f64) -> Self {
        Self {
            window_start,
            window_end,
            daily_loss_floor,
        }
    }

    pub fn daily_loss_floor(&self) -> f64 {
        self.daily_loss_floor
    }

    pub fn is_market_time(&self, now: NaiveDateTime) -> bool {
        let t = now.time();
        t >= self.window_start && t <= self.window_end
    }

    pub fn check_entry(&self, now: NaiveDateTime, realized_pnl: f64) -> Result<(), EntryBlock> {
        if !self.is_market_time(now) {
            return Err(EntryBlock::OutsideMarketHours { now: now.time() });
        }
        if realized_pnl <= self.daily_loss_floor {
            return Err(EntryBlock::DailyLossFloor {
                realized_pnl,
                floor: self.daily_loss_floor,
            });
        }
        Ok(())
    }

    pub fn allows_entry(&self, now: NaiveDateTime, realized_pnl: f64) -> bool {
        self.check_entry(now, realized_pnl).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn guard() -> RiskGuard {
        RiskGuard::new(
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 10, 0).unwrap(),
            -2000.0,
        )
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 20)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_market_window_inclusive() {
        let g = guard();

        assert!(!g.allows_entry(at(9, 14, 59), 0.0));
        assert!(g.allows_entry(at(9, 15, 0), 0.0));
        assert!(g.allows_entry(at(12, 0, 0), 0.0));
        assert!(g.allows_entry(at(15, 10, 0), 0.0));
        assert!(!g.allows_entry(at(15, 10, 1), 0.0));
    }

    #[test]
    fn test_daily_loss_floor() {
        let g = guard();

        assert!(g.allows_entry(at(10, 0, 0), -1999.5));
        assert!(!g.allows_entry(at(10, 0, 0), -2000.0));
        assert_eq!(
            g.check_entry(at(10, 0, 0), -2050.0),
            Err(EntryBlock::DailyLossFloor { realized_pnl: -2050.0, floor: -2000.0 })
        );
    }

    #[test]
    fn test_window_checked_before_floor() {
        let g = guard();
        assert!(matches!(
            g.check_entry(at(8, 0, 0), -5000.0),
            Err(EntryBlock::OutsideMarketHours { .. })
        ));
    }
}
