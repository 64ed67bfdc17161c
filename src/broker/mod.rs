//! Broker execution interface
//!
//! Every order is asynchronous: submit never implies a fill, and the engine
//! polls to a terminal state or timeout. The trait also carries the data
//! endpoints the engine needs (latest trade for sizing/chasing, recent
//! closes for indicator warm-start).

pub mod alpaca;
pub mod paper;
pub mod types;

pub use types::{
    is_owned_client_id, make_client_order_id, AccountSnapshot, BrokerPosition, OrderIntent,
    OrderOutcome, OrderSide, OrderSnapshot, OrderStatus, OrderType,
};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit an order; returns the broker-assigned order id
    async fn submit_order(&self, intent: &OrderIntent) -> Result<String>;

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Authoritative list of open positions
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn get_account(&self) -> Result<AccountSnapshot>;

    /// Latest trade price for a symbol
    async fn latest_trade(&self, symbol: &str) -> Result<f64>;

    /// Most recent minute-bar closes, oldest first; used to warm-start the
    /// indicator window
    async fn recent_closes(&self, symbol: &str, count: usize) -> Result<Vec<f64>>;
}

pub type DynBroker = Arc<dyn Broker>;
