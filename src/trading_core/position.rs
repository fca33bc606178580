//! Single-position state machine
//!
//! FLAT -> OPEN on an accepted entry, OPEN -> FLAT on stop-loss breach, the
//! daily cutoff, or an operator shutdown. While OPEN the stop is only ever
//! raised:
//! - initial stop = entry - fixed risk
//! - once the move reaches risk * reward multiple, stop goes to breakeven
//! - from then on stop trails at price - (risk * reward multiple)

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    /// Forced square-off at the daily cutoff
    Eod,
    /// Price traded at or through the stop
    Stoploss,
    /// Operator-initiated flatten on process shutdown
    Shutdown,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Eod => write!(f, "EOD"),
            ExitReason::Stoploss => write!(f, "STOPLOSS"),
            ExitReason::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Why the stop moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopAdjustment {
    Breakeven,
    Trail,
}

/// Stop-management parameters
#[derive(Debug, Clone, Copy)]
pub struct PositionConfig {
    /// Initial stop distance below entry, in price points
    pub fixed_risk_points: f64,
    /// Move required before trailing, as a multiple of the fixed risk
    pub reward_multiple: f64,
    /// Exchange-local time at or after which open positions are squared off
    pub eod_cutoff: NaiveTime,
}

impl PositionConfig {
    /// Distance price must move before the stop is managed, and the trailing gap
    pub fn rr_distance(&self) -> f64 {
        self.fixed_risk_points * self.reward_multiple
    }
}

/// Live position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub quantity: u32,
    pub entry_time: NaiveDateTime,
}

/// Completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u32,
    /// exit - entry, in price points
    pub pnl: f64,
    /// Realized session PnL including this trade
    pub cumulative_pnl: f64,
    pub reason: ExitReason,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
}

/// State changes produced by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Opened {
        entry_price: f64,
        stop_loss: f64,
        quantity: u32,
    },
    StopMoved {
        from: f64,
        to: f64,
        adjustment: StopAdjustment,
    },
    Closed(ClosedTrade),
}

/// Owns at most one open long position plus realized session PnL
#[derive(Debug)]
pub struct PositionManager {
    config: PositionConfig,
    position: Option<OpenPosition>,
    realized_pnl: f64,
}

impl PositionManager {
    pub fn new(config: PositionConfig) -> Self {
        Self {
            config,
            position: None,
            realized_pnl: 0.0,
        }
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.position.is_some()
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Open a long at `price`. Returns `None` when already in a position.
    pub fn try_open(&mut self, price: f64, quantity: u32, now: NaiveDateTime) -> Option<PositionEvent> {
        if self.position.is_some() {
            return None;
        }

        let stop_loss = price - self.config.fixed_risk_points;
        self.position = Some(OpenPosition {
            entry_price: price,
            stop_loss,
            quantity,
            entry_time: now,
        });

        info!("BUY {} @ {:.2} | SL={:.2}", quantity, price, stop_loss);

        Some(PositionEvent::Opened {
            entry_price: price,
            stop_loss,
            quantity,
        })
    }

    /// Per-tick management of the open position.
    ///
    /// Order: cutoff exit, then stop adjustment, then stop breach. A cutoff
    /// exit ends processing for the tick.
    pub fn manage(&mut self, price: f64, now: NaiveDateTime) -> Vec<PositionEvent> {
        let mut events = Vec::new();
        let Some(pos) = self.position.as_mut() else {
            return events;
        };

        if now.time() >= self.config.eod_cutoff {
            if let Some(trade) = self.close(price, now, ExitReason::Eod) {
                events.push(PositionEvent::Closed(trade));
            }
            return events;
        }

        let rr_distance = self.config.rr_distance();
        let price_move = price - pos.entry_price;

        if price_move >= rr_distance {
            if pos.stop_loss < pos.entry_price {
                let from = pos.stop_loss;
                pos.stop_loss = pos.entry_price;
                info!("RR {:.1}:1 reached | SL moved to BE @ {:.2}", self.config.reward_multiple, pos.stop_loss);
                events.push(PositionEvent::StopMoved {
                    from,
                    to: pos.stop_loss,
                    adjustment: StopAdjustment::Breakeven,
                });
            }

            let dynamic_stop = price - rr_distance;
            if dynamic_stop > pos.stop_loss {
                let from = pos.stop_loss;
                pos.stop_loss = dynamic_stop;
                info!("Trailing SL updated {:.2} -> {:.2}", from, dynamic_stop);
                events.push(PositionEvent::StopMoved {
                    from,
                    to: dynamic_stop,
                    adjustment: StopAdjustment::Trail,
                });
            }
        }

        if price <= pos.stop_loss {
            if let Some(trade) = self.close(price, now, ExitReason::Stoploss) {
                events.push(PositionEvent::Closed(trade));
            }
        }

        events
    }

    /// Flatten at `price` regardless of stops (operator shutdown)
    pub fn force_close(&mut self, price: f64, now: NaiveDateTime) -> Option<ClosedTrade> {
        self.close(price, now, ExitReason::Shutdown)
    }

    fn close(&mut self, price: f64, now: NaiveDateTime, reason: ExitReason) -> Option<ClosedTrade> {
        let pos = self.position.take()?;
        let pnl = price - pos.entry_price;
        self.realized_pnl += pnl;

        match reason {
            ExitReason::Stoploss => warn!(
                "SL HIT @ {:.2} | SL={:.2} | PnL={:.2} | DailyPnL={:.2}",
                price, pos.stop_loss, pnl, self.realized_pnl
            ),
            _ => info!(
                "{} EXIT @ {:.2} | PnL={:.2} | DailyPnL={:.2}",
                reason, price, pnl, self.realized_pnl
            ),
        }

        Some(ClosedTrade {
            entry_price: pos.entry_price,
            exit_price: price,
            quantity: pos.quantity,
            pnl,
            cumulative_pnl: self.realized_pnl,
            reason,
            entry_time: pos.entry_time,
            exit_time: now,
        })
    }

    /// Reset realized PnL at a session boundary. Any open position is kept.
    pub fn reset_daily(&mut self) {
        self.realized_pnl = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn manager() -> PositionManager {
        PositionManager::new(PositionConfig {
            fixed_risk_points: 15.0,
            reward_multiple: 2.0,
            eod_cutoff: NaiveTime::from_hms_opt(15, 10, 0).unwrap(),
        })
    }

    fn closed(events: &[PositionEvent]) -> Option<&ClosedTrade> {
        events.iter().find_map(|e| match e {
            PositionEvent::Closed(t) => Some(t),
            _ => None,
        })
    }

    #[test]
    fn test_open_sets_initial_stop() {
        let mut pm = manager();
        let event = pm.try_open(150.0, 75, at(10, 0)).unwrap();

        assert_eq!(
            event,
            PositionEvent::Opened { entry_price: 150.0, stop_loss: 135.0, quantity: 75 }
        );
        assert_eq!(pm.position().unwrap().stop_loss, 135.0);
    }

    #[test]
    fn test_second_open_rejected() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));
        assert!(pm.try_open(160.0, 1, at(10, 5)).is_none());
        assert_eq!(pm.position().unwrap().entry_price, 150.0);
    }

    #[test]
    fn test_no_trailing_before_threshold() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        let events = pm.manage(179.99, at(10, 1));
        assert!(events.is_empty());
        assert_eq!(pm.position().unwrap().stop_loss, 135.0);
    }

    #[test]
    fn test_breakeven_then_trail_then_stop() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        let events = pm.manage(180.0, at(10, 1));
        assert_eq!(
            events,
            vec![PositionEvent::StopMoved { from: 135.0, to: 150.0, adjustment: StopAdjustment::Breakeven }]
        );

        let events = pm.manage(200.0, at(10, 2));
        assert_eq!(
            events,
            vec![PositionEvent::StopMoved { from: 150.0, to: 170.0, adjustment: StopAdjustment::Trail }]
        );

        // pullback does not lower the stop
        assert!(pm.manage(190.0, at(10, 3)).is_empty());
        assert_eq!(pm.position().unwrap().stop_loss, 170.0);

        let events = pm.manage(170.0, at(10, 4));
        let trade = closed(&events).unwrap();
        assert_eq!(trade.reason, ExitReason::Stoploss);
        assert_eq!(trade.pnl, 20.0);
        assert_eq!(pm.realized_pnl(), 20.0);
        assert!(!pm.is_open());
    }

    #[test]
    fn test_gap_up_breakeven_and_trail_same_tick() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        let events = pm.manage(210.0, at(10, 1));
        assert_eq!(events.len(), 2);
        assert_eq!(pm.position().unwrap().stop_loss, 180.0);
    }

    #[test]
    fn test_initial_stop_hit() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        let events = pm.manage(134.0, at(10, 1));
        let trade = closed(&events).unwrap();
        assert_eq!(trade.reason, ExitReason::Stoploss);
        assert_eq!(trade.pnl, -16.0);
        assert_eq!(trade.cumulative_pnl, -16.0);
    }

    #[test]
    fn test_eod_exit_takes_priority() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        // below the stop at the cutoff: exits as EOD only, once
        let events = pm.manage(120.0, at(15, 10));
        assert_eq!(events.len(), 1);
        let trade = closed(&events).unwrap();
        assert_eq!(trade.reason, ExitReason::Eod);
        assert_eq!(trade.pnl, -30.0);
    }

    #[test]
    fn test_eod_exit_profit() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        let trade = closed(&pm.manage(160.0, at(15, 10))).cloned().unwrap();
        assert_eq!(trade.reason, ExitReason::Eod);
        assert_eq!(trade.pnl, 10.0);
        assert!(pm.position().is_none());
    }

    #[test]
    fn test_realized_pnl_sums_trades() {
        let mut pm = manager();

        pm.try_open(150.0, 1, at(10, 0));
        pm.manage(134.0, at(10, 1));
        pm.try_open(140.0, 1, at(10, 5));
        pm.manage(160.0, at(15, 10));

        assert_eq!(pm.realized_pnl(), -16.0 + 20.0);

        pm.reset_daily();
        assert_eq!(pm.realized_pnl(), 0.0);
    }

    #[test]
    fn test_manage_when_flat_is_noop() {
        let mut pm = manager();
        assert!(pm.manage(100.0, at(15, 30)).is_empty());
    }

    #[test]
    fn test_force_close() {
        let mut pm = manager();
        pm.try_open(150.0, 1, at(10, 0));

        let trade = pm.force_close(155.0, at(11, 0)).unwrap();
        assert_eq!(trade.reason, ExitReason::Shutdown);
        assert_eq!(pm.realized_pnl(), 5.0);
        assert!(pm.force_close(155.0, at(11, 0)).is_none());
    }
}
