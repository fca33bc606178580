//! Order intents emitted by the engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "BUY"),
            OrderAction::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// A request to bring the broker position to `target_position_size`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Local tag for correlating logs and broker acks
    pub id: Uuid,
    pub strategy_name: String,
    pub symbol: String,
    pub exchange: String,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub product: String,
    pub quantity: u32,
    pub target_position_size: u32,
}

impl OrderIntent {
    /// Market buy that opens `quantity`
    pub fn open_long(strategy_name: &str, symbol: &str, exchange: &str, product: &str, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            action: OrderAction::Buy,
            order_type: OrderType::Market,
            product: product.to_string(),
            quantity,
            target_position_size: quantity,
        }
    }

    /// Market sell that flattens `quantity`
    pub fn flatten_long(strategy_name: &str, symbol: &str, exchange: &str, product: &str, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            action: OrderAction::Sell,
            order_type: OrderType::Market,
            product: product.to_string(),
            quantity,
            target_position_size: 0,
        }
    }
}

impl std::fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}:{} {} (target={})",
            self.action, self.quantity, self.order_type, self.exchange, self.symbol, self.product,
            self.target_position_size
        )
    }
}

/// Broker acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub intent_id: Uuid,
    /// Broker order id; `None` for paper fills
    pub broker_order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_flatten_targets() {
        let buy = OrderIntent::open_long("S", "NIFTY20JAN2625400CE", "NFO", "MIS", 75);
        assert_eq!(buy.action, OrderAction::Buy);
        assert_eq!(buy.target_position_size, 75);

        let sell = OrderIntent::flatten_long("S", "NIFTY20JAN2625400CE", "NFO", "MIS", 75);
        assert_eq!(sell.action, OrderAction::Sell);
        assert_eq!(sell.quantity, 75);
        assert_eq!(sell.target_position_size, 0);
        assert_ne!(buy.id, sell.id);
    }

    #[test]
    fn test_serialized_action_is_uppercase() {
        let buy = OrderIntent::open_long("S", "X", "NFO", "MIS", 1);
        let json = serde_json::to_value(&buy).unwrap();
        assert_eq!(json["action"], "BUY");
        assert_eq!(json["order_type"], "MARKET");
    }
}
