//! Live tick source using the OpenAlgo WebSocket.
//!
//! Session flow: connect, authenticate, wait for the auth acknowledgement
//! (bounded), subscribe, then forward ticks. Any session error reconnects
//! after a fixed delay with no retry limit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, trace, warn};

use crate::trading_core::{PrevSessionLevels, Tick};

/// Default OpenAlgo WebSocket endpoint
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8765";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("timed out waiting for the feed")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("stream ended")]
    StreamEnded,

    #[error("unparseable message: {0}")]
    Parse(String),
}

/// Event forwarded to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    PrevSession(PrevSessionLevels),
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub api_key: String,
    pub symbol: String,
    pub exchange: String,
    /// OpenAlgo subscription mode (1 = LTP, 2 = quote, 3 = depth)
    pub mode: u8,
    pub connect_timeout: Duration,
    /// Max wait for the auth acknowledgement before subscribing
    pub ready_timeout: Duration,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    /// Feed `volume` is session-cumulative
    pub cumulative_volume: bool,
    pub timezone: Tz,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            symbol: symbol.into(),
            exchange: exchange.into(),
            mode: 2,
            connect_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            cumulative_volume: true,
            timezone: chrono_tz::Asia::Kolkata,
        }
    }
}

/// Converts cumulative session volume into per-tick increments
#[derive(Debug, Clone, Default)]
pub struct VolumeTracker {
    last: Option<f64>,
}

impl VolumeTracker {
    pub fn delta(&mut self, cumulative: f64) -> f64 {
        let delta = match self.last {
            None => 0.0,
            // counter restarted
            Some(prev) if cumulative < prev => cumulative,
            Some(prev) => cumulative - prev,
        };
        self.last = Some(cumulative);
        delta
    }
}

/// Fields of interest from one `market_data` message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketData {
    pub symbol: Option<String>,
    pub ltp: Option<f64>,
    pub volume: Option<f64>,
    pub prev_session: Option<PrevSessionLevels>,
}

/// Numbers may arrive as JSON numbers or numeric strings
fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a `market_data` message. Other message types return `None`.
pub fn parse_market_data(text: &str) -> Result<Option<MarketData>, FeedError> {
    let value: Value = serde_json::from_str(text).map_err(|e| FeedError::Parse(e.to_string()))?;

    if value.get("type").and_then(Value::as_str) != Some("market_data") {
        return Ok(None);
    }

    let data = value.get("data").unwrap_or(&value);
    let prev_session = data.get("ohlc").and_then(|ohlc| {
        Some(PrevSessionLevels {
            high: number(ohlc.get("prev_high"))?,
            low: number(ohlc.get("prev_low"))?,
            close: number(ohlc.get("prev_close"))?,
        })
    });

    Ok(Some(MarketData {
        symbol: value.get("symbol").and_then(Value::as_str).map(str::to_string),
        ltp: number(data.get("ltp")),
        volume: number(data.get("volume")),
        prev_session,
    }))
}

/// Turns raw feed messages into engine events.
///
/// Prior-session levels are emitted once per process; messages without a
/// price or tagged with another symbol produce no tick.
#[derive(Debug, Clone)]
pub struct FeedDecoder {
    symbol: String,
    timezone: Tz,
    cumulative_volume: bool,
    volume: VolumeTracker,
    prev_sent: bool,
}

impl FeedDecoder {
    pub fn new(symbol: impl Into<String>, timezone: Tz, cumulative_volume: bool) -> Self {
        Self {
            symbol: symbol.into(),
            timezone,
            cumulative_volume,
            volume: VolumeTracker::default(),
            prev_sent: false,
        }
    }

    pub fn decode(&mut self, text: &str, received: DateTime<Utc>) -> Vec<FeedEvent> {
        let mut events = Vec::new();

        let data = match parse_market_data(text) {
            Ok(Some(data)) => data,
            Ok(None) => {
                trace!("Ignoring non market-data message: {}", text);
                return events;
            }
            Err(e) => {
                debug!("Dropping malformed message: {}", e);
                return events;
            }
        };

        if let Some(symbol) = data.symbol.as_deref() {
            if !symbol.eq_ignore_ascii_case(&self.symbol) {
                trace!("Ignoring data for {}", symbol);
                return events;
            }
        }

        if !self.prev_sent {
            if let Some(levels) = data.prev_session {
                events.push(FeedEvent::PrevSession(levels));
                self.prev_sent = true;
            }
        }

        let Some(price) = data.ltp else {
            return events;
        };

        let volume = match data.volume {
            Some(v) if self.cumulative_volume => self.volume.delta(v),
            Some(v) => v,
            None => 0.0,
        };

        let ts = received.with_timezone(&self.timezone).naive_local();
        events.push(FeedEvent::Tick(Tick::new(self.symbol.clone(), price, volume, ts)));
        events
    }
}

/// Run the feed until shutdown, reconnecting after every failed session
pub async fn run_feed(
    config: FeedConfig,
    tx: mpsc::Sender<FeedEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), FeedError> {
    let mut decoder = FeedDecoder::new(&config.symbol, config.timezone, config.cumulative_volume);

    loop {
        if shutdown.try_recv().is_ok() {
            info!("Feed: shutdown signal received");
            return Ok(());
        }

        match run_session(&config, &mut decoder, &tx, &mut shutdown).await {
            Ok(()) => {
                info!("Feed: clean shutdown");
                return Ok(());
            }
            Err(e) => {
                warn!("WebSocket error, retrying in {:?}: {}", config.reconnect_delay, e);
                tokio::select! {
                    _ = tokio::time::sleep(config.reconnect_delay) => {}
                    _ = shutdown.recv() => {
                        info!("Feed: shutdown during reconnect");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn auth_status(text: &str) -> Option<Result<(), FeedError>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type").and_then(Value::as_str);
    if kind != Some("auth") && value.get("action").and_then(Value::as_str) != Some("authenticate") {
        return None;
    }
    match value.get("status").and_then(Value::as_str) {
        Some("success") => Some(Ok(())),
        _ => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("rejected")
                .to_string();
            Some(Err(FeedError::Auth(message)))
        }
    }
}

async fn run_session(
    config: &FeedConfig,
    decoder: &mut FeedDecoder,
    tx: &mpsc::Sender<FeedEvent>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), FeedError> {
    info!("Connecting to WebSocket at {}", config.url);

    let (ws_stream, _) = match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(FeedError::Connection(e.to_string())),
        Err(_) => return Err(FeedError::Timeout),
    };

    let (mut write, mut read) = ws_stream.split();

    let auth = serde_json::json!({
        "action": "authenticate",
        "api_key": config.api_key,
    });
    write
        .send(Message::Text(auth.to_string()))
        .await
        .map_err(|e| FeedError::WebSocket(e.to_string()))?;

    // No subscribe until the server has acknowledged authentication
    let ready = async {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(status) = auth_status(&text) {
                        return status;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(FeedError::StreamEnded),
                Some(Err(e)) => return Err(FeedError::WebSocket(e.to_string())),
                _ => {}
            }
        }
    };

    tokio::select! {
        result = tokio::time::timeout(config.ready_timeout, ready) => {
            result.map_err(|_| FeedError::Timeout)??;
        }
        _ = shutdown.recv() => return Ok(()),
    }
    info!("WebSocket authenticated & ready");

    let subscribe = serde_json::json!({
        "action": "subscribe",
        "symbols": [{ "symbol": config.symbol, "exchange": config.exchange }],
        "mode": config.mode,
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .map_err(|e| FeedError::WebSocket(e.to_string()))?;
    info!("Subscribed to {}:{}", config.exchange, config.symbol);

    let mut ping_timer = interval(config.ping_interval);
    ping_timer.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for event in decoder.decode(&text, Utc::now()) {
                            if tx.send(event).await.is_err() {
                                // engine is gone
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| FeedError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(FeedError::StreamEnded),
                    Some(Err(e)) => return Err(FeedError::WebSocket(e.to_string())),
                    _ => {}
                }
            }
            _ = ping_timer.tick() => {
                write.send(Message::Ping(Vec::new())).await
                    .map_err(|e| FeedError::WebSocket(e.to_string()))?;
            }
            _ = shutdown.recv() => {
                info!("Feed session: shutdown signal received");
                return Ok(());
            }
        }
    }
}
