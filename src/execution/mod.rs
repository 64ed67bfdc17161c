//! Order execution engine
//!
//! Turns a rotation decision into broker orders and confirmed fills. The
//! cardinal rule is no dual exposure: a rotation liquidates the old
//! position to confirmed flatness before a single share of the new one is
//! bought, and a residual opposite holding at the broker aborts the entry
//! outright.
//!
//! Failure handling is asymmetric. A failed entry while flat leaves capital
//! in cash, so the engine rolls back to the pre-rotation state and waits
//! for the next signal. A failed exit leaves real market exposure, so the
//! position stays owned in state with its stop tracking intact.

mod orders;

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use crate::arguments;
use crate::broker::{DynBroker, OrderIntent, OrderOutcome, OrderSide, OrderSnapshot, OrderStatus};
use crate::config::{ExecutionSettings, ExecutionStyle};
use crate::db;
use crate::errors::BotError;
use crate::logger::{self, LogTag};
use crate::regime::{Direction, Signal};
use crate::state::{save_state_now, TradingState};

use orders::outcome_from;

/// Re-evaluates the regime at a live benchmark price. Used by the chaser
/// decision after a marketable limit times out: the signal that triggered
/// the rotation may have reversed while the order rested.
pub type Reclassify<'a> = &'a (dyn Fn(f64) -> Signal + Sync);

#[derive(Debug, Clone, PartialEq)]
pub enum ExitResult {
    /// Position fully closed and confirmed
    Flat { sold_qty: i64 },
    /// Exit did not complete; the remaining shares stay owned in state
    StillHolding { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered { qty: i64, avg_price: f64 },
    /// No shares were bought; capital is untouched
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// Already holding the target direction
    NoChange,
    Entered { qty: i64, avg_price: f64 },
    /// The exit leg did not reach flatness; entry was never attempted
    ExitBlocked { reason: String },
    EntryAborted { reason: String },
}

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Bull => Direction::Bear,
        Direction::Bear => Direction::Bull,
    }
}

fn favors(direction: Direction, signal: Signal) -> bool {
    matches!(
        (direction, signal),
        (Direction::Bull, Signal::Bull) | (Direction::Bear, Signal::Bear)
    )
}

fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}

/// Accumulated fills across the legs of one execution
#[derive(Debug, Default, Clone, Copy)]
struct FillTotals {
    qty: i64,
    cost: f64,
}

impl FillTotals {
    fn add(&mut self, qty: i64, price: f64) {
        self.qty += qty;
        self.cost += qty as f64 * price;
    }

    fn avg(&self) -> f64 {
        if self.qty > 0 {
            self.cost / self.qty as f64
        } else {
            0.0
        }
    }
}

/// Summary of one styled execution attempt
#[derive(Debug, Clone)]
struct ExecReport {
    filled_qty: i64,
    avg_price: f64,
    label: &'static str,
    chase_aborted: bool,
}

impl ExecReport {
    fn unfilled(label: &'static str) -> Self {
        Self {
            filled_qty: 0,
            avg_price: 0.0,
            label,
            chase_aborted: false,
        }
    }

    fn from_totals(totals: FillTotals, label: &'static str) -> Self {
        Self {
            filled_qty: totals.qty,
            avg_price: totals.avg(),
            label,
            chase_aborted: false,
        }
    }

    fn failure_reason(&self) -> String {
        if self.chase_aborted {
            "signal reversed during fill window".to_string()
        } else {
            format!("order {}", self.label)
        }
    }
}

pub struct ExecutionEngine {
    broker: DynBroker,
    identity: String,
    settings: ExecutionSettings,
}

impl ExecutionEngine {
    pub fn new(broker: DynBroker, identity: &str, settings: ExecutionSettings) -> Self {
        Self {
            broker,
            identity: identity.to_string(),
            settings,
        }
    }

    /// Rotate to the target direction: exit whatever is held, then enter.
    /// The entry leg never runs unless the exit leg confirmed flatness.
    pub async fn rotate_to(
        &self,
        target: Direction,
        state: &mut TradingState,
        reclassify: Reclassify<'_>,
    ) -> Result<RotationOutcome> {
        if state.holding_direction() == Some(target) {
            return Ok(RotationOutcome::NoChange);
        }

        if !state.is_flat() {
            match self.liquidate(state, Some(reclassify), "rotation").await? {
                ExitResult::Flat { .. } => {}
                ExitResult::StillHolding { reason } => {
                    return Ok(RotationOutcome::ExitBlocked { reason })
                }
            }
        }

        match self.enter(target, state, reclassify).await? {
            EntryResult::Entered { qty, avg_price } => {
                Ok(RotationOutcome::Entered { qty, avg_price })
            }
            EntryResult::Aborted { reason } => Ok(RotationOutcome::EntryAborted { reason }),
        }
    }

    /// Close the current position.
    ///
    /// With a reclassifier, a timed-out limit re-checks the signal before
    /// chasing and aborts if it has swung back in favor of the holding.
    /// Without one (stop fired, market close, shutdown) the exit is forced:
    /// a market order, no chaser second-guessing.
    pub async fn liquidate(
        &self,
        state: &mut TradingState,
        reclassify: Option<Reclassify<'_>>,
        reason: &str,
    ) -> Result<ExitResult> {
        if state.is_flat() {
            return Ok(ExitResult::Flat { sold_qty: 0 });
        }
        let symbol = state.symbol.clone().unwrap_or_default();
        let qty = state.shares;
        let direction = state.holding_direction();

        logger::info(
            LogTag::Execution,
            &format!("liquidating {} x{} ({})", symbol, qty, reason),
        );

        let always = |_: f64| true;
        let v_check;
        let (chase_fn, forced): (&(dyn Fn(f64) -> bool + Sync), bool) =
            if let (Some(classify), Some(held)) = (reclassify, direction) {
                v_check = move |px: f64| !favors(held, classify(px));
                (&v_check, false)
            } else {
                (&always, true)
            };

        let report = self
            .execute_with_style(state, &symbol, OrderSide::Sell, qty, chase_fn, forced)
            .await?;

        if state.is_flat() {
            logger::info(
                LogTag::Execution,
                &format!(
                    "exit complete: sold {} x{} @ {:.2}, cash {:.2}",
                    symbol, report.filled_qty, report.avg_price, state.cash
                ),
            );
            Ok(ExitResult::Flat {
                sold_qty: report.filled_qty,
            })
        } else {
            let reason = report.failure_reason();
            logger::warning(
                LogTag::Execution,
                &format!(
                    "exit incomplete for {} ({}); {} shares stay owned",
                    symbol, reason, state.shares
                ),
            );
            Ok(ExitResult::StillHolding { reason })
        }
    }

    /// Open a whole-share position in the target direction with the full
    /// capital pool. The caller must already be flat; a residual opposite
    /// holding at the broker aborts before any order is placed.
    pub async fn enter(
        &self,
        target: Direction,
        state: &mut TradingState,
        reclassify: Reclassify<'_>,
    ) -> Result<EntryResult> {
        if !state.is_flat() {
            return Ok(EntryResult::Aborted {
                reason: "previous position not fully closed".to_string(),
            });
        }

        let symbol = state.symbol_for(target).to_string();
        let quote = self.broker.latest_trade(&symbol).await?;
        let pool = state.cash + state.leftover;
        let qty = (pool / quote).floor() as i64;
        if qty < 1 {
            return Err(anyhow!(BotError::InsufficientFunds(format!(
                "pool ${:.2} cannot buy one {} share at ${:.2}",
                pool, symbol, quote
            ))));
        }

        // Authoritative dual-exposure guard: local state can lag the broker
        let opposite_symbol = state.symbol_for(opposite(target)).to_string();
        let positions = self.broker.list_positions().await?;
        if positions
            .iter()
            .any(|p| p.symbol == opposite_symbol && p.qty != 0)
        {
            logger::error(
                LogTag::Execution,
                &format!(
                    "broker still holds {}; refusing {} entry to avoid dual exposure",
                    opposite_symbol, symbol
                ),
            );
            return Ok(EntryResult::Aborted {
                reason: format!("residual {} position at broker", opposite_symbol),
            });
        }

        logger::info(
            LogTag::Execution,
            &format!("entering {} x{} (~${:.2} @ {:.2})", symbol, qty, pool, quote),
        );

        let should_chase = move |px: f64| favors(target, reclassify(px));
        let report = self
            .execute_with_style(state, &symbol, OrderSide::Buy, qty, &should_chase, false)
            .await?;

        if report.filled_qty > 0 {
            logger::info(
                LogTag::Execution,
                &format!(
                    "entry fill: {} x{} @ {:.2}, leftover {:.2}",
                    symbol, report.filled_qty, report.avg_price, state.leftover
                ),
            );
            Ok(EntryResult::Entered {
                qty: report.filled_qty,
                avg_price: report.avg_price,
            })
        } else {
            // Zero-fill terminal: nothing was mutated, capital is intact
            logger::warning(
                LogTag::Execution,
                &format!("entry aborted for {}: {}", symbol, report.failure_reason()),
            );
            Ok(EntryResult::Aborted {
                reason: report.failure_reason(),
            })
        }
    }

    async fn execute_with_style(
        &self,
        state: &mut TradingState,
        symbol: &str,
        side: OrderSide,
        qty: i64,
        should_chase: &(dyn Fn(f64) -> bool + Sync),
        forced: bool,
    ) -> Result<ExecReport> {
        let style = if forced {
            ExecutionStyle::Market
        } else {
            self.settings.style
        };
        match style {
            ExecutionStyle::Market => self.run_market(state, symbol, side, qty).await,
            ExecutionStyle::MarketableLimit => {
                self.run_marketable_limit(state, symbol, side, qty, should_chase)
                    .await
            }
            ExecutionStyle::MachineGun => self.run_machine_gun(state, symbol, side, qty).await,
        }
    }

    async fn run_market(
        &self,
        state: &mut TradingState,
        symbol: &str,
        side: OrderSide,
        qty: i64,
    ) -> Result<ExecReport> {
        let intent = OrderIntent::market(&self.identity, symbol, qty, side);
        let order_id = match self.submit(&intent).await {
            Some(id) => id,
            None => return Ok(ExecReport::unfilled("submit_failed")),
        };

        let snap = self.poll_to_terminal(&order_id, self.order_timeout()).await;
        let snap = if snap.status.is_terminal() {
            snap
        } else {
            self.cancel_and_resolve(&order_id, snap).await
        };
        let outcome = outcome_from(&snap, qty);
        self.journal_outcome(&intent.client_id, &outcome);

        let mut totals = FillTotals::default();
        let filled = outcome.filled_qty();
        if filled > 0 {
            let price = self.resolve_fill_price(&outcome, symbol).await;
            self.apply_fill(state, side, symbol, filled, price).await;
            totals.add(filled, price);
        }
        Ok(ExecReport::from_totals(totals, outcome.label()))
    }

    async fn run_marketable_limit(
        &self,
        state: &mut TradingState,
        symbol: &str,
        side: OrderSide,
        qty: i64,
        should_chase: &(dyn Fn(f64) -> bool + Sync),
    ) -> Result<ExecReport> {
        let quote = self.broker.latest_trade(symbol).await?;
        let slip = self.settings.max_slippage_pct;
        let limit = round_cents(match side {
            OrderSide::Buy => quote * (1.0 + slip),
            OrderSide::Sell => quote * (1.0 - slip),
        });

        let intent = OrderIntent::limit(&self.identity, symbol, qty, side, limit);
        let order_id = match self.submit(&intent).await {
            Some(id) => id,
            None => return Ok(ExecReport::unfilled("submit_failed")),
        };

        let snap = self.poll_to_terminal(&order_id, self.fill_timeout()).await;
        let snap = if snap.status.is_terminal() {
            snap
        } else {
            self.cancel_and_resolve(&order_id, snap).await
        };
        let first = outcome_from(&snap, qty);
        self.journal_outcome(&intent.client_id, &first);

        let mut totals = FillTotals::default();
        let filled = first.filled_qty();
        if filled > 0 {
            let price = self.resolve_fill_price(&first, symbol).await;
            self.apply_fill(state, side, symbol, filled, price).await;
            totals.add(filled, price);
        }

        let remaining = qty - filled;
        if remaining <= 0 || matches!(first, OrderOutcome::Filled { .. }) {
            return Ok(ExecReport::from_totals(totals, first.label()));
        }

        // Chaser decision: the limit rested past its window; re-check the
        // signal at the live benchmark price before paying up
        let chase = match self.broker.latest_trade(&state.benchmark_symbol).await {
            Ok(px) => should_chase(px),
            Err(e) => {
                logger::warning(
                    LogTag::Execution,
                    &format!("chaser re-check failed ({}); defaulting for {:?}", e, side),
                );
                // Without a price, still complete risk-reducing exits
                side == OrderSide::Sell
            }
        };
        if !chase {
            logger::info(
                LogTag::Execution,
                &format!(
                    "chaser aborted for {}: signal no longer supports the order",
                    symbol
                ),
            );
            return Ok(ExecReport {
                filled_qty: totals.qty,
                avg_price: totals.avg(),
                label: "chase_aborted",
                chase_aborted: true,
            });
        }

        let chaser = OrderIntent::market(&self.identity, symbol, remaining, side);
        let order_id = match self.submit(&chaser).await {
            Some(id) => id,
            None => return Ok(ExecReport::from_totals(totals, "submit_failed")),
        };
        let snap = self.poll_to_terminal(&order_id, self.order_timeout()).await;
        let snap = if snap.status.is_terminal() {
            snap
        } else {
            self.cancel_and_resolve(&order_id, snap).await
        };
        let second = outcome_from(&snap, remaining);
        self.journal_outcome(&chaser.client_id, &second);

        let chased = second.filled_qty();
        if chased > 0 {
            let price = self.resolve_fill_price(&second, symbol).await;
            self.apply_fill(state, side, symbol, chased, price).await;
            totals.add(chased, price);
        }

        let label = if totals.qty >= qty {
            "filled"
        } else {
            second.label()
        };
        Ok(ExecReport::from_totals(totals, label))
    }

    /// Tight IOC ladder: each attempt reprices one step more aggressively,
    /// bounded by the total deviation cap, with no delay between rungs
    async fn run_machine_gun(
        &self,
        state: &mut TradingState,
        symbol: &str,
        side: OrderSide,
        qty: i64,
    ) -> Result<ExecReport> {
        let quote = self.broker.latest_trade(symbol).await?;
        let mut totals = FillTotals::default();
        let mut remaining = qty;

        for attempt in 1..=self.settings.ioc_max_retries {
            let offset = (self.settings.ioc_step_pct * attempt as f64)
                .min(self.settings.ioc_max_deviation_pct);
            let limit = round_cents(match side {
                OrderSide::Buy => quote * (1.0 + offset),
                OrderSide::Sell => quote * (1.0 - offset),
            });

            let intent = OrderIntent::ioc(&self.identity, symbol, remaining, side, limit);
            let order_id = match self.submit(&intent).await {
                Some(id) => id,
                None => break,
            };
            let snap = self.poll_to_terminal(&order_id, self.fill_timeout()).await;
            let snap = if snap.status.is_terminal() {
                snap
            } else {
                self.cancel_and_resolve(&order_id, snap).await
            };
            let outcome = outcome_from(&snap, remaining);
            self.journal_outcome(&intent.client_id, &outcome);

            let filled = outcome.filled_qty();
            if filled > 0 {
                let price = self.resolve_fill_price(&outcome, symbol).await;
                self.apply_fill(state, side, symbol, filled, price).await;
                totals.add(filled, price);
                remaining -= filled;
            }
            if remaining == 0 {
                break;
            }
            if outcome == OrderOutcome::Rejected {
                // A rejected rung will reject again at a worse price
                break;
            }
        }

        let label = if remaining == 0 {
            "filled"
        } else if totals.qty > 0 {
            "partially_filled"
        } else {
            "unfilled"
        };
        Ok(ExecReport::from_totals(totals, label))
    }

    /// Journal and submit; a failed submit is logged and absorbed (no order
    /// exists, so there is nothing to poll or roll back)
    async fn submit(&self, intent: &OrderIntent) -> Option<String> {
        if let Err(e) = db::record_submission(intent) {
            logger::warning(LogTag::Journal, &format!("journal write failed: {}", e));
        }
        match self.broker.submit_order(intent).await {
            Ok(order_id) => {
                if arguments::is_debug_execution_enabled() {
                    logger::debug(
                        LogTag::Execution,
                        &format!(
                            "submitted {} {} x{} as {} ({})",
                            intent.side.as_str(),
                            intent.symbol,
                            intent.qty,
                            order_id,
                            intent.client_id
                        ),
                    );
                }
                Some(order_id)
            }
            Err(e) => {
                logger::warning(
                    LogTag::Execution,
                    &format!("submit failed for {}: {}", intent.client_id, e),
                );
                None
            }
        }
    }

    /// Poll an order until it reaches a terminal state or the timeout
    /// elapses. Transient poll errors are absorbed; the order's fate is
    /// settled by `cancel_and_resolve` if time runs out.
    async fn poll_to_terminal(&self, order_id: &str, timeout: Duration) -> OrderSnapshot {
        let deadline = Instant::now() + timeout;
        let mut last = OrderSnapshot {
            order_id: order_id.to_string(),
            status: OrderStatus::Unknown,
            filled_qty: 0,
            avg_fill_price: None,
        };
        loop {
            match self.broker.get_order(order_id).await {
                Ok(snap) => {
                    if snap.status.is_terminal() {
                        return snap;
                    }
                    last = snap;
                }
                Err(e) => {
                    if arguments::is_debug_execution_enabled() {
                        logger::debug(
                            LogTag::Execution,
                            &format!("poll error for {}: {}", order_id, e),
                        );
                    }
                }
            }
            if Instant::now() >= deadline {
                return last;
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Cancel a lingering order and settle what actually happened; a fill
    /// can race the cancel, so the final snapshot decides
    async fn cancel_and_resolve(&self, order_id: &str, last: OrderSnapshot) -> OrderSnapshot {
        if let Err(e) = self.broker.cancel_order(order_id).await {
            logger::warning(
                LogTag::Execution,
                &format!("cancel failed for {}: {}", order_id, e),
            );
        }
        let mut last = last;
        for _ in 0..3 {
            match self.broker.get_order(order_id).await {
                Ok(snap) if snap.status.is_terminal() => return snap,
                Ok(snap) => last = snap,
                Err(_) => {}
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
        last
    }

    async fn resolve_fill_price(&self, outcome: &OrderOutcome, symbol: &str) -> f64 {
        match outcome.avg_price() {
            Some(p) if p > 0.0 => p,
            _ => match self.broker.latest_trade(symbol).await {
                Ok(p) => p,
                Err(e) => {
                    logger::warning(
                        LogTag::Execution,
                        &format!("no fill price for {} ({}); booking at zero", symbol, e),
                    );
                    0.0
                }
            },
        }
    }

    /// Book a fill into state and persist. Partial fills go through here per
    /// leg so a crash mid-execution never forgets confirmed shares.
    async fn apply_fill(
        &self,
        state: &mut TradingState,
        side: OrderSide,
        symbol: &str,
        qty: i64,
        price: f64,
    ) {
        match side {
            OrderSide::Buy => state.apply_entry_fill(symbol, qty, price),
            OrderSide::Sell => {
                state.apply_exit_fill(qty, price);
            }
        }
        if let Err(e) = save_state_now(state).await {
            logger::warning(LogTag::State, &format!("state save failed: {}", e));
        }
    }

    fn journal_outcome(&self, client_id: &str, outcome: &OrderOutcome) {
        if let Err(e) = db::record_outcome(client_id, outcome) {
            logger::warning(LogTag::Journal, &format!("journal update failed: {}", e));
        }
    }

    fn fill_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.fill_timeout_secs)
    }

    fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.order_timeout_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::{FillMode, PaperBroker, SubmitBehavior};
    use crate::broker::OrderType;
    use crate::config::InstrumentSettings;
    use std::sync::Arc;

    fn fast_settings(style: ExecutionStyle) -> ExecutionSettings {
        ExecutionSettings {
            style,
            fill_timeout_secs: 0,
            order_timeout_secs: 0,
            poll_interval_ms: 1,
            ..Default::default()
        }
    }

    fn engine_with(broker: &Arc<PaperBroker>, style: ExecutionStyle) -> ExecutionEngine {
        ExecutionEngine::new(broker.clone(), "rotor", fast_settings(style))
    }

    fn fresh_state() -> TradingState {
        TradingState::new(10_000.0, &InstrumentSettings::default())
    }

    #[tokio::test]
    async fn market_entry_fills_whole_shares() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();

        let result = engine
            .enter(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap();

        assert_eq!(
            result,
            EntryResult::Entered {
                qty: 166,
                avg_price: 60.0
            }
        );
        assert!(state.holding_bull());
        assert_eq!(state.shares, 166);
        assert_eq!(state.cash, 0.0);
        assert!((state.leftover - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejected_entry_leaves_state_untouched() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.push_submit_behavior(SubmitBehavior::Reject);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();

        let result = engine
            .enter(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap();

        assert!(matches!(result, EntryResult::Aborted { .. }));
        assert!(state.is_flat());
        assert_eq!(state.cash, 10_000.0);
        assert_eq!(state.leftover, 0.0);
    }

    #[tokio::test]
    async fn unaffordable_entry_is_fatal() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();
        state.cash = 10.0;

        let err = engine
            .enter(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BotError>(),
            Some(BotError::InsufficientFunds(_))
        ));
        assert!(state.is_flat());
    }

    #[tokio::test]
    async fn residual_opposite_holding_aborts_entry() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.set_position("SQQQ", 5, 20.0);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();

        let result = engine
            .enter(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap();

        assert!(matches!(result, EntryResult::Aborted { .. }));
        assert!(broker.submitted_orders().is_empty());
        assert!(state.is_flat());
    }

    #[tokio::test]
    async fn rotation_exits_before_entering() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("QQQ", 500.0);
        broker.set_price("TQQQ", 60.0);
        broker.set_price("SQQQ", 20.0);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 166, 60.0);
        broker.set_position("TQQQ", 166, 60.0);

        let result = engine
            .rotate_to(Direction::Bear, &mut state, &|_| Signal::Bear)
            .await
            .unwrap();

        assert!(matches!(result, RotationOutcome::Entered { .. }));
        assert!(state.holding_bear());
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].symbol, "TQQQ");
        assert_eq!(orders[1].side, OrderSide::Buy);
        assert_eq!(orders[1].symbol, "SQQQ");
    }

    #[tokio::test]
    async fn rotation_to_held_direction_is_a_no_op() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 100, 60.0);

        let result = engine
            .rotate_to(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap();

        assert_eq!(result, RotationOutcome::NoChange);
        assert!(broker.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn timed_out_exit_with_reverted_signal_aborts_chaser() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("QQQ", 500.0);
        broker.set_price("TQQQ", 60.0);
        broker.set_fill_mode(FillMode::Never);
        let engine = engine_with(&broker, ExecutionStyle::MarketableLimit);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);

        // The signal swings back to BULL while the sell limit rests
        let result = engine
            .liquidate(&mut state, Some(&|_| Signal::Bull), "rotation")
            .await
            .unwrap();

        assert!(matches!(result, ExitResult::StillHolding { .. }));
        assert!(state.holding_bull());
        assert_eq!(state.shares, 100);
        // Only the limit went out; no market chaser was submitted
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_type, OrderType::Limit);
    }

    #[tokio::test]
    async fn timed_out_exit_chases_when_signal_stays_away() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("QQQ", 500.0);
        broker.set_price("TQQQ", 60.0);
        broker.set_fill_mode(FillMode::Never);
        let engine = engine_with(&broker, ExecutionStyle::MarketableLimit);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);

        let result = engine
            .liquidate(&mut state, Some(&|_| Signal::Neutral), "neutral")
            .await
            .unwrap();

        // The chaser went out as a market order (it also rests in Never
        // mode, so the exit still reports incomplete)
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].order_type, OrderType::Limit);
        assert_eq!(orders[1].order_type, OrderType::Market);
        assert!(matches!(result, ExitResult::StillHolding { .. }));
        assert!(state.holding_bull());
    }

    #[tokio::test]
    async fn forced_liquidation_uses_market_and_skips_chaser_logic() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let engine = engine_with(&broker, ExecutionStyle::MarketableLimit);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);

        let result = engine.liquidate(&mut state, None, "stop fired").await.unwrap();

        assert_eq!(result, ExitResult::Flat { sold_qty: 100 });
        assert!(state.is_flat());
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_type, OrderType::Market);
    }

    #[tokio::test]
    async fn partial_exit_fill_is_booked_before_the_chaser_decision() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("QQQ", 500.0);
        broker.set_price("TQQQ", 60.0);
        broker.set_fill_mode(FillMode::Partial { qty: 30 });
        let engine = engine_with(&broker, ExecutionStyle::MarketableLimit);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);

        let result = engine
            .liquidate(&mut state, Some(&|_| Signal::Bull), "rotation")
            .await
            .unwrap();

        // 30 shares sold before the abort; the other 70 stay owned
        assert!(matches!(result, ExitResult::StillHolding { .. }));
        assert_eq!(state.shares, 70);
        assert!(state.cash > 0.0);
    }

    #[tokio::test]
    async fn machine_gun_ladder_steps_until_filled() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.set_fill_mode(FillMode::Partial { qty: 3 });
        let engine = engine_with(&broker, ExecutionStyle::MachineGun);
        let mut state = fresh_state();
        state.apply_entry_fill("TQQQ", 10, 60.0);
        broker.set_position("TQQQ", 10, 60.0);

        let result = engine
            .liquidate(&mut state, Some(&|_| Signal::Neutral), "neutral")
            .await
            .unwrap();

        assert_eq!(result, ExitResult::Flat { sold_qty: 10 });
        assert!(state.is_flat());

        // 3 + 3 + 3 + 1 across four IOC rungs, each one more aggressive
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 4);
        let mut prev = f64::MAX;
        for order in &orders {
            assert_eq!(order.order_type, OrderType::ImmediateOrCancel);
            let limit = order.limit_price.unwrap();
            assert!(limit <= prev);
            assert!(limit >= 60.0 * (1.0 - 0.001) - 0.01);
            prev = limit;
        }
        assert_eq!(orders[0].qty, 10);
        assert_eq!(orders[3].qty, 1);
    }

    #[tokio::test]
    async fn machine_gun_zero_fill_reports_unfilled() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.set_fill_mode(FillMode::Never);
        let engine = engine_with(&broker, ExecutionStyle::MachineGun);
        let mut state = fresh_state();

        let result = engine
            .enter(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap();

        assert!(matches!(result, EntryResult::Aborted { .. }));
        assert!(state.is_flat());
        assert_eq!(state.cash, 10_000.0);
        // Every rung went out and canceled
        assert_eq!(broker.submitted_orders().len(), 5);
    }

    #[tokio::test]
    async fn submit_fault_on_entry_rolls_back_cleanly() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.push_submit_behavior(SubmitBehavior::Error);
        let engine = engine_with(&broker, ExecutionStyle::Market);
        let mut state = fresh_state();

        let result = engine
            .enter(Direction::Bull, &mut state, &|_| Signal::Bull)
            .await
            .unwrap();

        assert!(matches!(result, EntryResult::Aborted { .. }));
        assert_eq!(state.cash, 10_000.0);
        assert!(state.is_flat());
    }
}
