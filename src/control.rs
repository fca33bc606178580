//! External control state (enable flag, lots, option side)
//!
//! The control record is written by an operator tool and polled by the
//! engine. A source that cannot be read is treated as "disabled": new entries
//! pause, position management continues.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::trading_core::{EngineSnapshot, EntryControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    #[default]
    Call,
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "CALL"),
            OptionType::Put => write!(f, "PUT"),
        }
    }
}

/// Control record as stored by the operator tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    pub enabled: bool,
    #[serde(default)]
    pub option_type: OptionType,
    pub lots: u32,
    #[serde(default)]
    pub daily_loss: f64,
    #[serde(default)]
    pub symbol: String,
    /// Informational; written either with or without a UTC offset
    #[serde(default, deserialize_with = "deserialize_last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

/// Accepts RFC 3339 (offset kept as local wall time) or a naive ISO timestamp.
/// Anything else reads as `None` rather than rejecting the record.
fn deserialize_last_updated<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.naive_local()));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok())
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            enabled: false,
            option_type: OptionType::Call,
            lots: 1,
            daily_loss: 0.0,
            symbol: String::new(),
            last_updated: None,
        }
    }
}

impl ControlState {
    pub fn entry_control(&self) -> EntryControl {
        EntryControl {
            enabled: self.enabled && self.lots > 0,
            lots: self.lots.max(1),
        }
    }

    /// Same settings with entries switched off
    pub fn disabled(&self) -> Self {
        Self {
            enabled: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid control state: {0}")]
    Invalid(String),
}

/// Readable control source
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn read(&self) -> Result<ControlState, StateError>;
}

/// JSON control file
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a state record (creating parent directories)
    pub async fn write(&self, state: &ControlState) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let body = serde_json::to_vec_pretty(state).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, body).await.map_err(io_err)
    }

    /// Create a disabled record when none exists
    pub async fn ensure_exists(&self, symbol: &str) -> Result<(), StateError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        info!("Creating control file {}", self.path.display());
        self.write(&ControlState {
            symbol: symbol.to_string(),
            last_updated: Some(Local::now().naive_local()),
            ..Default::default()
        })
        .await
    }
}

#[async_trait]
impl StateSource for JsonStateFile {
    async fn read(&self) -> Result<ControlState, StateError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        let state: ControlState = serde_json::from_slice(&bytes).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if state.lots == 0 {
            return Err(StateError::Invalid("lots must be a positive integer".to_string()));
        }
        Ok(state)
    }
}

/// Periodically re-reads the control source and publishes it to the engine.
///
/// Also logs the engine status from the snapshot channel; it never touches
/// engine state directly.
pub struct ControlPoller<S: StateSource> {
    source: S,
    interval: Duration,
    status_every: u32,
}

impl<S: StateSource> ControlPoller<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source,
            interval,
            status_every: 15,
        }
    }

    /// One poll: returns the state to publish
    pub async fn poll_once(&self, last: &ControlState) -> ControlState {
        match self.source.read().await {
            Ok(state) => {
                if state.enabled != last.enabled || state.lots != last.lots {
                    info!(
                        "Control updated: enabled={} lots={} option={} symbol={}",
                        state.enabled, state.lots, state.option_type, state.symbol
                    );
                }
                state
            }
            Err(e) => {
                if last.enabled {
                    warn!("Control source unavailable, pausing new entries: {}", e);
                } else {
                    debug!("Control source unavailable: {}", e);
                }
                last.disabled()
            }
        }
    }

    pub async fn run(
        self,
        tx: watch::Sender<ControlState>,
        snapshots: watch::Receiver<EngineSnapshot>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut polls: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let last = tx.borrow().clone();
                    let next = self.poll_once(&last).await;
                    if next != last {
                        tx.send_replace(next);
                    }

                    polls = polls.wrapping_add(1);
                    if polls % self.status_every == 0 {
                        info!("STATUS | {}", *snapshots.borrow());
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Control poller shutting down");
                    break;
                }
            }
        }
    }
}
