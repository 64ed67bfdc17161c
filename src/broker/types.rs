//! Order and account types shared across the execution layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    /// Limit that fills immediately (possibly partially) or cancels;
    /// never rests on the book
    ImmediateOrCancel,
}

/// Immutable description of an order to be submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub qty: i64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    /// `{engine-identity}-{uuid}`; only orders carrying our identity are
    /// ever treated as owned
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    pub fn market(identity: &str, symbol: &str, qty: i64, side: OrderSide) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::Market,
            limit_price: None,
            client_id: make_client_order_id(identity),
            created_at: Utc::now(),
        }
    }

    pub fn limit(identity: &str, symbol: &str, qty: i64, side: OrderSide, limit: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::Limit,
            limit_price: Some(limit),
            client_id: make_client_order_id(identity),
            created_at: Utc::now(),
        }
    }

    pub fn ioc(identity: &str, symbol: &str, qty: i64, side: OrderSide, limit: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::ImmediateOrCancel,
            limit_price: Some(limit),
            client_id: make_client_order_id(identity),
            created_at: Utc::now(),
        }
    }
}

/// Build an identity-tagged client order id
pub fn make_client_order_id(identity: &str) -> String {
    format!("{}-{}", identity, uuid::Uuid::new_v4())
}

/// Does this client order id belong to the given engine identity?
pub fn is_owned_client_id(identity: &str, client_id: &str) -> bool {
    client_id
        .strip_prefix(identity)
        .map(|rest| rest.starts_with('-'))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    Unknown,
}

impl OrderStatus {
    /// Terminal states never change again on the broker side
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }
}

/// Point-in-time view of an order at the broker
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_qty: i64,
    pub avg_fill_price: Option<f64>,
}

/// The broker's authoritative view of a held position
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: i64,
    pub avg_entry_price: f64,
}

#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
}

/// Expected terminal outcome of an order attempt.
///
/// These are ordinary results of trading, not faults; `BotError` is
/// reserved for genuinely exceptional conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderOutcome {
    Filled { qty: i64, avg_price: f64 },
    /// Terminal with a partial fill (canceled or expired remainder)
    PartiallyFilled { qty: i64, avg_price: f64 },
    Rejected,
    Canceled,
    Expired,
    /// Never reached a terminal state within the polling budget
    TimedOut { filled_qty: i64, avg_price: Option<f64> },
}

impl OrderOutcome {
    pub fn filled_qty(&self) -> i64 {
        match *self {
            OrderOutcome::Filled { qty, .. } | OrderOutcome::PartiallyFilled { qty, .. } => qty,
            OrderOutcome::TimedOut { filled_qty, .. } => filled_qty,
            _ => 0,
        }
    }

    pub fn avg_price(&self) -> Option<f64> {
        match *self {
            OrderOutcome::Filled { avg_price, .. }
            | OrderOutcome::PartiallyFilled { avg_price, .. } => Some(avg_price),
            OrderOutcome::TimedOut { avg_price, .. } => avg_price,
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderOutcome::Filled { .. } => "filled",
            OrderOutcome::PartiallyFilled { .. } => "partially_filled",
            OrderOutcome::Rejected => "rejected",
            OrderOutcome::Canceled => "canceled",
            OrderOutcome::Expired => "expired",
            OrderOutcome::TimedOut { .. } => "timed_out",
        }
    }
}
