//! Core Trading Logic
//!
//! Broker-agnostic per-tick engine used by both:
//! - Live trading (WebSocket feed + broker orders)
//! - Replay (CSV ticks through the same code path)
//!
//! Every tick is folded into the current bar. When a bar closes, VWAP is
//! updated and a new entry is considered. The open position is managed on
//! every tick regardless of bar state.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::execution::config::{ConfigError, StrategyConfig};
use crate::execution::order::OrderIntent;

use super::bars::{Bar, BarAggregator, BarUpdate};
use super::levels::{LevelTracker, PrevSessionLevels};
use super::position::{ClosedTrade, OpenPosition, PositionEvent, PositionManager, StopAdjustment};
use super::risk::{EntryBlock, RiskGuard};
use super::signal::{EntrySignal, EntryTrigger};
use super::trades::Tick;

/// Entry permissions read from the control source for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryControl {
    pub enabled: bool,
    pub lots: u32,
}

impl EntryControl {
    pub fn disabled() -> Self {
        Self { enabled: false, lots: 1 }
    }
}

/// Trade action produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum TradeAction {
    /// Position opened at the closed bar's close
    Enter {
        intent: OrderIntent,
        entry_price: f64,
        stop_loss: f64,
        trigger: EntryTrigger,
    },
    /// Stop raised
    UpdateStop {
        from: f64,
        to: f64,
        adjustment: StopAdjustment,
    },
    /// Position closed
    Exit { intent: OrderIntent, trade: ClosedTrade },
}

/// Read-only view of engine state for status logging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub last_price: Option<f64>,
    pub last_tick: Option<NaiveDateTime>,
    pub position: Option<OpenPosition>,
    pub realized_pnl: f64,
    pub vwap: Option<f64>,
    pub closed_bars: usize,
    pub trades: u32,
}

impl std::fmt::Display for EngineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_opt = |v: Option<f64>| v.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".to_string());
        match &self.position {
            Some(pos) => write!(
                f,
                "LTP={} | LONG {} @ {:.2} SL={:.2} | VWAP={} | DailyPnL={:.2} | Trades={}",
                fmt_opt(self.last_price),
                pos.quantity,
                pos.entry_price,
                pos.stop_loss,
                fmt_opt(self.vwap),
                self.realized_pnl,
                self.trades
            ),
            None => write!(
                f,
                "LTP={} | FLAT | VWAP={} | DailyPnL={:.2} | Trades={}",
                fmt_opt(self.last_price),
                fmt_opt(self.vwap),
                self.realized_pnl,
                self.trades
            ),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakevens: u32,
    pub realized_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

impl TradingSummary {
    fn record(&mut self, trade: &ClosedTrade) {
        self.total_trades += 1;
        self.realized_pnl += trade.pnl;

        if trade.pnl > 0.0 {
            self.wins += 1;
            self.largest_win = self.largest_win.max(trade.pnl);
        } else if trade.pnl < 0.0 {
            self.losses += 1;
            self.largest_loss = self.largest_loss.min(trade.pnl);
        } else {
            self.breakevens += 1;
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64 * 100.0
        }
    }
}

/// Per-tick strategy engine. Owns all mutable trading state; must be driven
/// from a single task.
pub struct StrategyEngine {
    config: StrategyConfig,
    symbol: String,
    bars: BarAggregator,
    levels: LevelTracker,
    positions: PositionManager,
    risk: RiskGuard,
    summary: TradingSummary,
    last_price: Option<f64>,
    last_tick: Option<NaiveDateTime>,
    session_date: Option<NaiveDate>,
    last_block: Option<String>,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig, symbol: impl Into<String>) -> Result<Self, ConfigError> {
        config.validate()?;
        let positions = PositionManager::new(config.position_config()?);
        let risk = config.risk_guard()?;

        Ok(Self {
            bars: BarAggregator::new(config.bar_interval_minutes),
            levels: LevelTracker::new(),
            positions,
            risk,
            summary: TradingSummary::default(),
            last_price: None,
            last_tick: None,
            session_date: None,
            last_block: None,
            symbol: symbol.into(),
            config,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn levels(&self) -> &LevelTracker {
        &self.levels
    }

    pub fn bars(&self) -> &BarAggregator {
        &self.bars
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.positions.position()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.positions.realized_pnl()
    }

    pub fn summary(&self) -> &TradingSummary {
        &self.summary
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        self.session_date
    }

    /// Seed prior-session high/low/close
    pub fn set_prev_session(&mut self, levels: PrevSessionLevels) {
        self.levels.set_prev_session(levels);
        info!(
            "Prev Day Levels Set | High={:.2} | Low={:.2} | Close={:.2}",
            levels.high, levels.low, levels.close
        );
    }

    /// Start a new trading session: realized PnL goes back to zero and, when
    /// configured, the VWAP accumulator is cleared. An open position is kept.
    pub fn begin_session(&mut self, date: NaiveDate) {
        if self.session_date == Some(date) {
            return;
        }
        self.positions.reset_daily();
        if self.config.vwap_session_reset {
            self.levels.reset_vwap();
        }
        self.session_date = Some(date);
        self.last_block = None;
        info!("Session started: {}", date);
    }

    /// Process one tick
    pub fn on_tick(&mut self, tick: &Tick, control: &EntryControl) -> Vec<TradeAction> {
        let mut actions = Vec::new();

        if !tick.price.is_finite() || tick.price <= 0.0 {
            debug!("Dropping tick with invalid price {}", tick.price);
            return actions;
        }

        let price = tick.price;
        let now = tick.ts;
        self.last_price = Some(price);
        self.last_tick = Some(now);

        let volume = if tick.volume.is_finite() && tick.volume > 0.0 { tick.volume } else { 0.0 };

        if self.bars.update(price, now, volume) == BarUpdate::NewBar {
            if let Some(bar) = self.bars.last_closed().cloned() {
                self.levels.update_vwap(&bar);
                info!(
                    "{}m Close={:.2} | VWAP={:?} | PDL={:?} | PDC={:?}",
                    self.config.bar_interval_minutes,
                    bar.close,
                    self.levels.vwap(),
                    self.levels.prev_low(),
                    self.levels.prev_close()
                );

                if let Some(action) = self.evaluate_entry(&bar, now, control) {
                    actions.push(action);
                }
            }
        }

        if self.positions.is_open() {
            for event in self.positions.manage(price, now) {
                if let Some(action) = self.to_action(event) {
                    actions.push(action);
                }
            }
        }

        actions
    }

    fn evaluate_entry(&mut self, bar: &Bar, now: NaiveDateTime, control: &EntryControl) -> Option<TradeAction> {
        if self.positions.is_open() {
            return None;
        }

        if !control.enabled {
            self.note_block("strategy disabled".to_string());
            return None;
        }

        if let Err(block) = self.risk.check_entry(now, self.positions.realized_pnl()) {
            if matches!(block, EntryBlock::DailyLossFloor { .. }) {
                self.note_block(block.to_string());
            } else {
                debug!("Entry skipped: {}", block);
            }
            return None;
        }
        self.last_block = None;

        let trigger = EntrySignal::trigger(bar, &self.levels)?;
        let quantity = self.config.quantity_for_lots(control.lots);

        match self.positions.try_open(bar.close, quantity, now)? {
            PositionEvent::Opened { entry_price, stop_loss, quantity } => {
                info!("Entry trigger: {}", trigger);
                Some(TradeAction::Enter {
                    intent: OrderIntent::open_long(
                        &self.config.strategy_name,
                        &self.symbol,
                        &self.config.exchange,
                        &self.config.product,
                        quantity,
                    ),
                    entry_price,
                    stop_loss,
                    trigger,
                })
            }
            _ => None,
        }
    }

    /// Log a block reason once per change
    fn note_block(&mut self, reason: String) {
        if self.last_block.as_deref() != Some(reason.as_str()) {
            warn!("New entries paused: {}", reason);
            self.last_block = Some(reason);
        }
    }

    fn to_action(&mut self, event: PositionEvent) -> Option<TradeAction> {
        match event {
            PositionEvent::StopMoved { from, to, adjustment } => {
                Some(TradeAction::UpdateStop { from, to, adjustment })
            }
            PositionEvent::Closed(trade) => Some(self.exit_action(trade)),
            PositionEvent::Opened { .. } => None,
        }
    }

    fn exit_action(&mut self, trade: ClosedTrade) -> TradeAction {
        self.summary.record(&trade);
        TradeAction::Exit {
            intent: OrderIntent::flatten_long(
                &self.config.strategy_name,
                &self.symbol,
                &self.config.exchange,
                &self.config.product,
                trade.quantity,
            ),
            trade,
        }
    }

    /// Flatten on shutdown at the last seen price, if configured
    pub fn shutdown(&mut self) -> Option<TradeAction> {
        let pos = self.positions.position()?.clone();

        if !self.config.flatten_on_shutdown {
            error!(
                "Shutting down with OPEN position: {} @ {:.2} SL={:.2} - manage it manually",
                pos.quantity, pos.entry_price, pos.stop_loss
            );
            return None;
        }

        let price = self.last_price.unwrap_or(pos.entry_price);
        let now = self.last_tick.unwrap_or(pos.entry_time);
        let trade = self.positions.force_close(price, now)?;
        Some(self.exit_action(trade))
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            last_price: self.last_price,
            last_tick: self.last_tick,
            position: self.positions.position().cloned(),
            realized_pnl: self.positions.realized_pnl(),
            vwap: self.levels.vwap(),
            closed_bars: self.bars.closed_bars().len(),
            trades: self.summary.total_trades,
        }
    }

    pub fn status(&self) -> String {
        self.snapshot().to_string()
    }
}
