//! Order routing
//!
//! `OrderSink` is the seam between the engine and a broker. Intents are
//! submitted through `submit_with_retry`, which retries transient failures
//! with exponential backoff and raises an alert once attempts or the
//! per-intent time budget run out.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::order::{OrderAck, OrderIntent};

/// Default OpenAlgo host
pub const DEFAULT_OPENALGO_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// Request never reached the broker or timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker answered with a 5xx
    #[error("broker server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Broker refused the order
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Broker answered with something we could not parse
    #[error("invalid broker response: {0}")]
    InvalidResponse(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl OrderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::Transport(_) | OrderError::Server { .. })
    }
}

/// Destination for order intents
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn place(&self, intent: &OrderIntent) -> Result<OrderAck, OrderError>;
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock limit per intent, covering every attempt and wait
    pub total_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            total_budget: Duration::from_secs(12),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Submit an intent, retrying retryable failures under `policy`
pub async fn submit_with_retry(
    sink: &dyn OrderSink,
    intent: &OrderIntent,
    policy: &RetryPolicy,
) -> Result<OrderAck, OrderError> {
    let max_attempts = policy.max_attempts.max(1);
    let deadline = Instant::now() + policy.total_budget;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let Ok(result) = tokio::time::timeout_at(deadline, sink.place(intent)).await else {
            error!(
                "ALERT: order {} NOT placed within {:?} (attempt {}) | {}",
                intent.id, policy.total_budget, attempt, intent
            );
            return Err(OrderError::RetriesExhausted {
                attempts: attempt,
                last: format!("no broker answer within {:?}", policy.total_budget),
            });
        };

        let delay = policy.delay(attempt);
        match result {
            Ok(ack) => {
                if attempt > 1 {
                    info!("Order {} placed after {} attempts", intent.id, attempt);
                }
                return Ok(ack);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts && Instant::now() + delay < deadline => {
                warn!(
                    "Order {} failed (attempt {}/{}): {} - retrying in {:?}",
                    intent.id, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                error!("ALERT: order {} NOT placed after {} attempts: {} | {}", intent.id, attempt, e, intent);
                return Err(OrderError::RetriesExhausted {
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                error!("ALERT: order {} failed: {} | {}", intent.id, e, intent);
                return Err(e);
            }
        }
    }
}

/// Paper broker: logs intents and fills them immediately
#[derive(Debug, Default)]
pub struct PaperBroker {
    placed: Mutex<Vec<OrderIntent>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intents placed so far
    pub fn placed(&self) -> Vec<OrderIntent> {
        self.placed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OrderSink for PaperBroker {
    async fn place(&self, intent: &OrderIntent) -> Result<OrderAck, OrderError> {
        info!("PAPER {}", intent);
        if let Ok(mut placed) = self.placed.lock() {
            placed.push(intent.clone());
        }
        Ok(OrderAck {
            intent_id: intent.id,
            broker_order_id: None,
        })
    }
}

/// OpenAlgo `placesmartorder` request body
#[derive(Debug, Serialize)]
struct SmartOrderRequest<'a> {
    apikey: &'a str,
    strategy: &'a str,
    exchange: &'a str,
    symbol: &'a str,
    action: String,
    product: &'a str,
    pricetype: String,
    quantity: String,
    position_size: String,
}

#[derive(Debug, Deserialize)]
struct SmartOrderResponse {
    status: String,
    #[serde(default)]
    orderid: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// OpenAlgo REST broker.
///
/// Uses `placesmartorder`, which drives the broker position to
/// `position_size`; resubmitting the same intent cannot double the exposure.
pub struct OpenAlgoBroker {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAlgoBroker {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, OrderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn request<'a>(&'a self, intent: &'a OrderIntent) -> SmartOrderRequest<'a> {
        SmartOrderRequest {
            apikey: &self.api_key,
            strategy: &intent.strategy_name,
            exchange: &intent.exchange,
            symbol: &intent.symbol,
            action: intent.action.to_string(),
            product: &intent.product,
            pricetype: intent.order_type.to_string(),
            quantity: intent.quantity.to_string(),
            position_size: intent.target_position_size.to_string(),
        }
    }
}

#[async_trait]
impl OrderSink for OpenAlgoBroker {
    async fn place(&self, intent: &OrderIntent) -> Result<OrderAck, OrderError> {
        let url = format!("{}/api/v1/placesmartorder", self.base_url);
        debug!("POST {} {}", url, intent);

        let response = self
            .client
            .post(&url)
            .json(&self.request(intent))
            .send()
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() {
            return Err(OrderError::Server {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(OrderError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let parsed: SmartOrderResponse =
            serde_json::from_str(&body).map_err(|e| OrderError::InvalidResponse(format!("{}: {}", e, body)))?;

        if parsed.status != "success" {
            return Err(OrderError::Rejected(parsed.message.unwrap_or(parsed.status)));
        }

        info!("LIVE {} -> order id {:?}", intent, parsed.orderid);
        Ok(OrderAck {
            intent_id: intent.id,
            broker_order_id: parsed.orderid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        failures: u32,
        error: OrderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OrderSink for FlakySink {
        async fn place(&self, intent: &OrderIntent) -> Result<OrderAck, OrderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(OrderAck { intent_id: intent.id, broker_order_id: Some(format!("OID{}", n)) })
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            total_budget: Duration::from_secs(5),
        }
    }

    struct StalledSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl OrderSink for StalledSink {
        async fn place(&self, _intent: &OrderIntent) -> Result<OrderAck, OrderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(OrderError::Transport("timed out".into()))
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent::flatten_long("NIFTY_VWAP_OPTIONS", "NIFTY20JAN2625400CE", "NFO", "MIS", 75)
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let sink = FlakySink {
            failures: 2,
            error: OrderError::Transport("connection refused".into()),
            calls: AtomicU32::new(0),
        };

        let ack = submit_with_retry(&sink, &intent(), &fast_policy(3)).await.unwrap();
        assert_eq!(ack.broker_order_id.as_deref(), Some("OID2"));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_reported() {
        let sink = FlakySink {
            failures: 10,
            error: OrderError::Server { status: 503, body: String::new() },
            calls: AtomicU32::new(0),
        };

        let err = submit_with_retry(&sink, &intent(), &fast_policy(3)).await.unwrap_err();
        assert!(matches!(err, OrderError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stalled_broker_bounded_by_budget() {
        let sink = StalledSink { calls: AtomicU32::new(0) };
        let policy = RetryPolicy {
            total_budget: Duration::from_millis(100),
            ..RetryPolicy::default()
        };

        let started = std::time::Instant::now();
        let err = submit_with_retry(&sink, &intent(), &policy).await.unwrap_err();
        assert!(matches!(err, OrderError::RetriesExhausted { attempts: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_when_backoff_exceeds_budget() {
        let sink = FlakySink {
            failures: 10,
            error: OrderError::Transport("connection refused".into()),
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            total_budget: Duration::from_millis(200),
        };

        let started = std::time::Instant::now();
        let err = submit_with_retry(&sink, &intent(), &policy).await.unwrap_err();
        assert!(matches!(err, OrderError::RetriesExhausted { attempts: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let sink = FlakySink {
            failures: 10,
            error: OrderError::Rejected("insufficient margin".into()),
            calls: AtomicU32::new(0),
        };

        let err = submit_with_retry(&sink, &intent(), &fast_policy(5)).await.unwrap_err();
        assert_eq!(err, OrderError::Rejected("insufficient margin".into()));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paper_broker_records() {
        let broker = PaperBroker::new();
        let intent = intent();
        let ack = broker.place(&intent).await.unwrap();

        assert_eq!(ack.intent_id, intent.id);
        assert!(ack.broker_order_id.is_none());
        assert_eq!(broker.placed(), vec![intent]);
    }

    #[test]
    fn test_smart_order_body() {
        let broker = OpenAlgoBroker::new("http://127.0.0.1:5000/", "key").unwrap();
        let intent = intent();
        let body = serde_json::to_value(broker.request(&intent)).unwrap();

        assert_eq!(body["apikey"], "key");
        assert_eq!(body["action"], "SELL");
        assert_eq!(body["pricetype"], "MARKET");
        assert_eq!(body["quantity"], "75");
        assert_eq!(body["position_size"], "0");
        assert_eq!(broker.base_url, "http://127.0.0.1:5000");
    }
}
