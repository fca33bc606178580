//! Trading Core - broker-agnostic strategy logic
//!
//! This module contains the core trading strategy components:
//! - Bar aggregation from ticks
//! - Prior-session levels and running VWAP
//! - Entry signal on closed bars
//! - Position state machine with risk/reward trailing
//! - Entry risk gating
//! - Per-tick engine tying the above together

pub mod trades;
pub mod bars;
pub mod levels;
pub mod signal;
pub mod position;
pub mod risk;
pub mod trader;

// Re-export commonly used types
pub use trades::Tick;
pub use bars::{Bar, BarAggregator, BarUpdate};
pub use levels::{LevelTracker, PrevSessionLevels};
pub use signal::{EntrySignal, EntryTrigger};
pub use position::{ClosedTrade, ExitReason, OpenPosition, PositionConfig, PositionEvent, PositionManager, StopAdjustment};
pub use risk::{EntryBlock, RiskGuard};
pub use trader::{EngineSnapshot, EntryControl, StrategyEngine, TradeAction, TradingSummary};
