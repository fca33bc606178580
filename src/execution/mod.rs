//! Execution module: strategy configuration, order intents and broker routing
//!
//! Paper mode logs intents; live mode sends them to the OpenAlgo REST API.

pub mod config;
pub mod order;
pub mod broker;

pub use config::{ConfigError, ExecutionMode, StrategyConfig};
pub use order::{OrderAck, OrderAction, OrderIntent, OrderType};
pub use broker::{submit_with_retry, OpenAlgoBroker, OrderError, OrderSink, PaperBroker, RetryPolicy};
