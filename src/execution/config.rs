//! Configuration for the strategy and order routing

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::trading_core::position::PositionConfig;
use crate::trading_core::risk::RiskGuard;

/// Execution mode determines whether orders reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Orders are logged only
    #[default]
    Paper,
    /// Orders are sent to the broker API
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("bar interval must divide 60 minutes, got {0}")]
    BarInterval(u32),

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("invalid time {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },

    #[error("entry window start {start} must be before cutoff {cutoff}")]
    EmptyWindow { start: NaiveTime, cutoff: NaiveTime },

    #[error("lot size must be at least 1")]
    LotSize,
}

/// Strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Order routing mode
    pub mode: ExecutionMode,

    /// Strategy tag sent with every order
    pub strategy_name: String,

    /// Exchange segment of the traded instrument (e.g. "NFO")
    pub exchange: String,

    /// Broker product type (e.g. "MIS" intraday)
    pub product: String,

    /// Bar length in minutes
    pub bar_interval_minutes: u32,

    /// Initial stop distance in points
    pub fixed_risk_points: f64,

    /// Reward multiple that arms breakeven and trailing
    pub reward_multiple: f64,

    /// Entry window start (exchange time)
    pub start_hour: u32,
    pub start_minute: u32,

    /// Entry window end and forced square-off (exchange time)
    pub cutoff_hour: u32,
    pub cutoff_minute: u32,

    /// New entries stop once realized session PnL is at or below this
    pub daily_loss_floor: f64,

    /// Contract lot size; order quantity = lots * lot_size
    pub lot_size: u32,

    /// Exchange timezone used to turn feed arrival time into wall-clock time
    pub timezone: Tz,

    /// Reset the VWAP accumulator when a new session begins
    pub vwap_session_reset: bool,

    /// Square off an open position when the process shuts down
    pub flatten_on_shutdown: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            strategy_name: "NIFTY_VWAP_OPTIONS".to_string(),
            exchange: "NFO".to_string(),
            product: "MIS".to_string(),
            bar_interval_minutes: 5,
            fixed_risk_points: 15.0,
            reward_multiple: 2.0,
            start_hour: 9,
            start_minute: 15,
            cutoff_hour: 15,
            cutoff_minute: 10,
            daily_loss_floor: -2000.0,
            lot_size: 75,
            timezone: chrono_tz::Asia::Kolkata,
            vwap_session_reset: false,
            flatten_on_shutdown: true,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bar_interval_minutes == 0 || 60 % self.bar_interval_minutes != 0 {
            return Err(ConfigError::BarInterval(self.bar_interval_minutes));
        }
        if self.fixed_risk_points <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "fixed_risk_points",
                value: self.fixed_risk_points,
            });
        }
        if self.reward_multiple <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "reward_multiple",
                value: self.reward_multiple,
            });
        }
        if self.lot_size == 0 {
            return Err(ConfigError::LotSize);
        }

        let start = self.entry_start()?;
        let cutoff = self.cutoff()?;
        if start >= cutoff {
            return Err(ConfigError::EmptyWindow { start, cutoff });
        }
        Ok(())
    }

    pub fn entry_start(&self) -> Result<NaiveTime, ConfigError> {
        hm(self.start_hour, self.start_minute)
    }

    pub fn cutoff(&self) -> Result<NaiveTime, ConfigError> {
        hm(self.cutoff_hour, self.cutoff_minute)
    }

    pub fn position_config(&self) -> Result<PositionConfig, ConfigError> {
        Ok(PositionConfig {
            fixed_risk_points: self.fixed_risk_points,
            reward_multiple: self.reward_multiple,
            eod_cutoff: self.cutoff()?,
        })
    }

    pub fn risk_guard(&self) -> Result<RiskGuard, ConfigError> {
        Ok(RiskGuard::new(self.entry_start()?, self.cutoff()?, self.daily_loss_floor))
    }

    /// Order quantity for a lot count
    pub fn quantity_for_lots(&self, lots: u32) -> u32 {
        lots.saturating_mul(self.lot_size)
    }
}

fn hm(hour: u32, minute: u32) -> Result<NaiveTime, ConfigError> {
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or(ConfigError::InvalidTime { hour, minute })
}
