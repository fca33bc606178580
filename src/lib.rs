// Library crate - strategy engine, order routing and feed plumbing

pub mod trading_core;
pub mod execution;
pub mod control;
pub mod journal;
pub mod streams;
pub mod runner;

// Re-export commonly used types
pub use trading_core::{StrategyEngine, Tick, TradeAction};
pub use execution::{ExecutionMode, StrategyConfig};
