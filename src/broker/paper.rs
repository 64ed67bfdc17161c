//! Deterministic in-memory broker
//!
//! Test double for the execution engine: scripted fill behavior, instant
//! "network", and an inspectable order log. Fills settle against the last
//! price set with `set_price`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::types::{
    AccountSnapshot, BrokerPosition, OrderIntent, OrderSide, OrderSnapshot, OrderStatus, OrderType,
};
use super::Broker;
use crate::errors::BotError;

/// How the paper broker fills orders submitted while this mode is active
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Fill fully at the current price on submit
    Immediate,
    /// Rest forever (IOC orders cancel immediately with zero fill)
    Never,
    /// Fill `qty` shares then stall (IOC: terminal cancel after the partial)
    Partial { qty: i64 },
    /// Fill fully after the order has been polled `polls` times
    AfterPolls { polls: u32 },
}

/// Per-submit overrides, consumed FIFO; default is normal acceptance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitBehavior {
    Normal,
    /// Broker accepts the request then immediately rejects the order
    Reject,
    /// The submit call itself fails (network fault)
    Error,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    intent: OrderIntent,
    status: OrderStatus,
    filled_qty: i64,
    avg_price: Option<f64>,
    polls_remaining: u32,
    mode: FillMode,
}

#[derive(Default)]
struct Inner {
    prices: HashMap<String, f64>,
    /// symbol -> (qty, avg entry)
    positions: HashMap<String, (i64, f64)>,
    orders: HashMap<String, PaperOrder>,
    submit_script: VecDeque<SubmitBehavior>,
    submitted: Vec<OrderIntent>,
    fill_mode: FillMode,
    cash: f64,
    next_id: u64,
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Immediate
    }
}

pub struct PaperBroker {
    inner: Mutex<Inner>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cash: 100_000.0,
                ..Default::default()
            }),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.inner.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.inner.lock().fill_mode = mode;
    }

    /// Queue a behavior for the next submit call(s)
    pub fn push_submit_behavior(&self, behavior: SubmitBehavior) {
        self.inner.lock().submit_script.push_back(behavior);
    }

    pub fn set_position(&self, symbol: &str, qty: i64, avg_entry: f64) {
        let mut inner = self.inner.lock();
        if qty == 0 {
            inner.positions.remove(symbol);
        } else {
            inner.positions.insert(symbol.to_string(), (qty, avg_entry));
        }
    }

    pub fn position_qty(&self, symbol: &str) -> i64 {
        self.inner.lock().positions.get(symbol).map(|p| p.0).unwrap_or(0)
    }

    /// Every intent that reached the broker, in submission order
    pub fn submitted_orders(&self) -> Vec<OrderIntent> {
        self.inner.lock().submitted.clone()
    }

    fn settle_fill(inner: &mut Inner, order_id: &str, qty: i64, price: f64) {
        let order = match inner.orders.get_mut(order_id) {
            Some(o) => o,
            None => return,
        };
        order.filled_qty += qty;
        order.avg_price = Some(price);
        order.status = if order.filled_qty >= order.intent.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        let symbol = order.intent.symbol.clone();
        let side = order.intent.side;
        let entry = inner.positions.entry(symbol).or_insert((0, price));
        match side {
            OrderSide::Buy => {
                entry.0 += qty;
                entry.1 = price;
            }
            OrderSide::Sell => {
                entry.0 -= qty;
            }
        }
        if entry.0 <= 0 {
            let symbol = order.intent.symbol.clone();
            inner.positions.remove(&symbol);
        }
    }

    fn fill_price(inner: &Inner, intent: &OrderIntent) -> f64 {
        let market = inner
            .prices
            .get(&intent.symbol)
            .copied()
            .unwrap_or_else(|| intent.limit_price.unwrap_or(0.0));
        match intent.limit_price {
            // A marketable limit fills at the better of limit and market
            Some(limit) => match intent.side {
                OrderSide::Buy => market.min(limit),
                OrderSide::Sell => market.max(limit),
            },
            None => market,
        }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit_order(&self, intent: &OrderIntent) -> Result<String> {
        let mut inner = self.inner.lock();
        let behavior = inner
            .submit_script
            .pop_front()
            .unwrap_or(SubmitBehavior::Normal);
        if behavior == SubmitBehavior::Error {
            return Err(anyhow!(BotError::Broker("paper submit fault".to_string())));
        }

        inner.next_id += 1;
        let order_id = format!("paper-{}", inner.next_id);
        inner.submitted.push(intent.clone());

        let mode = inner.fill_mode;
        let polls = match mode {
            FillMode::AfterPolls { polls } => polls,
            _ => 0,
        };
        inner.orders.insert(
            order_id.clone(),
            PaperOrder {
                intent: intent.clone(),
                status: OrderStatus::Accepted,
                filled_qty: 0,
                avg_price: None,
                polls_remaining: polls,
                mode,
            },
        );

        if behavior == SubmitBehavior::Reject {
            if let Some(o) = inner.orders.get_mut(&order_id) {
                o.status = OrderStatus::Rejected;
            }
            return Ok(order_id);
        }

        let price = Self::fill_price(&inner, intent);
        match mode {
            FillMode::Immediate => {
                let qty = intent.qty;
                Self::settle_fill(&mut inner, &order_id, qty, price);
            }
            FillMode::Partial { qty } => {
                let fill = qty.min(intent.qty);
                if fill > 0 {
                    Self::settle_fill(&mut inner, &order_id, fill, price);
                }
                // An IOC remainder cancels instead of resting
                if intent.order_type == OrderType::ImmediateOrCancel {
                    if let Some(o) = inner.orders.get_mut(&order_id) {
                        if o.status != OrderStatus::Filled {
                            o.status = OrderStatus::Canceled;
                        }
                    }
                }
            }
            FillMode::Never => {
                if intent.order_type == OrderType::ImmediateOrCancel {
                    if let Some(o) = inner.orders.get_mut(&order_id) {
                        o.status = OrderStatus::Canceled;
                    }
                }
            }
            FillMode::AfterPolls { .. } => {}
        }

        Ok(order_id)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot> {
        let mut inner = self.inner.lock();

        let fill_now = {
            let order = inner
                .orders
                .get_mut(order_id)
                .ok_or_else(|| anyhow!(BotError::Broker(format!("unknown order {}", order_id))))?;
            if let FillMode::AfterPolls { .. } = order.mode {
                if !order.status.is_terminal() {
                    if order.polls_remaining > 0 {
                        order.polls_remaining -= 1;
                        false
                    } else {
                        true
                    }
                } else {
                    false
                }
            } else {
                false
            }
        };

        if fill_now {
            let (intent, remaining) = {
                let order = inner.orders.get(order_id).expect("checked above");
                (order.intent.clone(), order.intent.qty - order.filled_qty)
            };
            let price = Self::fill_price(&inner, &intent);
            Self::settle_fill(&mut inner, order_id, remaining, price);
        }

        let order = inner.orders.get(order_id).expect("checked above");
        Ok(OrderSnapshot {
            order_id: order_id.to_string(),
            status: order.status,
            filled_qty: order.filled_qty,
            avg_fill_price: order.avg_price,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(order) = inner.orders.get_mut(order_id) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        let inner = self.inner.lock();
        Ok(inner
            .positions
            .iter()
            .map(|(symbol, &(qty, avg))| BrokerPosition {
                symbol: symbol.clone(),
                qty,
                avg_entry_price: avg,
            })
            .collect())
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        let inner = self.inner.lock();
        Ok(AccountSnapshot {
            equity: inner.cash,
            cash: inner.cash,
            buying_power: inner.cash,
        })
    }

    async fn latest_trade(&self, symbol: &str) -> Result<f64> {
        let inner = self.inner.lock();
        inner
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!(BotError::MarketData(format!("no price for {}", symbol))))
    }

    async fn recent_closes(&self, symbol: &str, count: usize) -> Result<Vec<f64>> {
        let price = self.latest_trade(symbol).await?;
        Ok(vec![price; count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::OrderIntent;

    #[tokio::test]
    async fn immediate_fill_updates_positions() {
        let broker = PaperBroker::new();
        broker.set_price("TQQQ", 60.0);
        let intent = OrderIntent::market("rotor", "TQQQ", 10, OrderSide::Buy);
        let id = broker.submit_order(&intent).await.unwrap();
        let snap = broker.get_order(&id).await.unwrap();
        assert_eq!(snap.status, OrderStatus::Filled);
        assert_eq!(snap.filled_qty, 10);
        assert_eq!(broker.position_qty("TQQQ"), 10);
    }

    #[tokio::test]
    async fn ioc_with_never_mode_cancels_instantly() {
        let broker = PaperBroker::new();
        broker.set_price("TQQQ", 60.0);
        broker.set_fill_mode(FillMode::Never);
        let intent = OrderIntent::ioc("rotor", "TQQQ", 10, OrderSide::Buy, 60.0);
        let id = broker.submit_order(&intent).await.unwrap();
        let snap = broker.get_order(&id).await.unwrap();
        assert_eq!(snap.status, OrderStatus::Canceled);
        assert_eq!(snap.filled_qty, 0);
    }

    #[tokio::test]
    async fn after_polls_fills_on_schedule() {
        let broker = PaperBroker::new();
        broker.set_price("SQQQ", 20.0);
        broker.set_fill_mode(FillMode::AfterPolls { polls: 2 });
        let intent = OrderIntent::market("rotor", "SQQQ", 5, OrderSide::Buy);
        let id = broker.submit_order(&intent).await.unwrap();
        assert_eq!(
            broker.get_order(&id).await.unwrap().status,
            OrderStatus::Accepted
        );
        assert_eq!(
            broker.get_order(&id).await.unwrap().status,
            OrderStatus::Accepted
        );
        assert_eq!(
            broker.get_order(&id).await.unwrap().status,
            OrderStatus::Filled
        );
    }
}
