//! The decision loop
//!
//! Wires the feed, classifier, debouncer, trailing-stop latch and execution
//! engine into one sequential per-tick decision. Every tick runs the same
//! pipeline regardless of feed mode: roll the day, update the indicator,
//! tick the stop, classify, then rotate or liquidate as the signal demands.
//! All position mutation flows through the execution engine so the
//! no-dual-exposure rule has a single enforcement point.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::arguments;
use crate::broker::alpaca::AlpacaClient;
use crate::broker::DynBroker;
use crate::config::{self, Config, FeedMode};
use crate::db;
use crate::errors::BotError;
use crate::execution::{ExecutionEngine, ExitResult, RotationOutcome};
use crate::feed::{StreamConfig, StreamingSupervisor};
use crate::indicator::RollingMean;
use crate::logger::{self, LogTag};
use crate::regime::{
    classify, classify_with_nudge, BandParams, Direction, NeutralDebouncer, SessionClock, Signal,
};
use crate::shutdown;
use crate::state::{load_state, save_state_debounced, save_state_now, TradingState};
use crate::stops::{EntryCheck, LatchState, TickOutcome, TrailingStop};

/// Entry point: build the broker, bootstrap the trader, run until shutdown
pub async fn run() -> Result<()> {
    db::initialize_trade_journal()?;

    let config = config::with_config(|c| c.clone());
    let broker: DynBroker = Arc::new(AlpacaClient::from_settings(
        &config.broker,
        arguments::is_paper_forced(),
    )?);

    let mut trader = Trader::bootstrap(broker, config).await?;
    trader.run_loop().await
}

/// Tracks the optional correlated instrument whose decided regime may
/// promote a NEUTRAL benchmark signal
struct CorrelatedTracker {
    symbol: String,
    indicator: RollingMean,
    nudge: Option<Direction>,
}

pub struct Trader {
    broker: DynBroker,
    engine: ExecutionEngine,
    config: Config,
    clock: SessionClock,
    band: BandParams,
    state: TradingState,
    latch: TrailingStop,
    debouncer: NeutralDebouncer,
    indicator: RollingMean,
    correlated: Option<CorrelatedTracker>,
}

impl Trader {
    /// Load or create state, reconcile it against the broker, rebuild the
    /// stop latch and warm-start the indicator windows
    pub async fn bootstrap(broker: DynBroker, config: Config) -> Result<Self> {
        let clock =
            SessionClock::from_settings(&config.session).map_err(|e| anyhow!(BotError::Config(e)))?;
        let band = BandParams {
            chop_threshold_pct: config.regime.chop_threshold_pct,
            min_chop_abs: config.regime.min_chop_abs,
        };

        let mut state = match load_state().await? {
            Some(s) => {
                logger::info(
                    LogTag::State,
                    &format!(
                        "resuming persisted state (cash {:.2}, holding {:?} x{})",
                        s.cash, s.symbol, s.shares
                    ),
                );
                s
            }
            None => {
                logger::info(
                    LogTag::State,
                    &format!("fresh state with ${:.2}", config.trading.starting_cash),
                );
                TradingState::new(config.trading.starting_cash, &config.instruments)
            }
        };
        state.validate_instruments(&config.instruments);
        let positions = broker.list_positions().await?;
        state.reconcile_with_broker(&positions);
        save_state_now(&state).await?;

        let stopped = match (
            state.stopped_out,
            state.stop_direction,
            state.washout_level,
            state.stopout_at,
        ) {
            (true, Some(direction), Some(level), Some(at)) => Some((direction, level, at)),
            _ => None,
        };
        let latch = TrailingStop::restore(
            config.stops.trail_pct,
            config.stops.cooldown_secs,
            state.holding_direction(),
            state.high_water_mark,
            state.low_water_mark,
            state.stop_value,
            stopped,
        );

        let mut indicator = RollingMean::new(config.indicator.window);
        match broker
            .recent_closes(&config.instruments.benchmark, config.indicator.window)
            .await
        {
            Ok(closes) if !closes.is_empty() => {
                indicator.seed(&closes);
                logger::info(
                    LogTag::Signal,
                    &format!(
                        "indicator warm-started from {} recent closes (avg {:.4})",
                        closes.len(),
                        indicator.average()
                    ),
                );
            }
            Ok(_) => logger::warning(LogTag::Signal, "no recent closes; indicator starts cold"),
            Err(e) => logger::warning(
                LogTag::Signal,
                &format!("warm-start fetch failed ({}); indicator starts cold", e),
            ),
        }

        let correlated = match &config.instruments.correlated {
            Some(symbol) => {
                let mut corr = RollingMean::new(config.indicator.window);
                if let Ok(closes) = broker.recent_closes(symbol, config.indicator.window).await {
                    corr.seed(&closes);
                }
                Some(CorrelatedTracker {
                    symbol: symbol.clone(),
                    indicator: corr,
                    nudge: None,
                })
            }
            None => None,
        };

        let engine = ExecutionEngine::new(
            broker.clone(),
            &config.trading.identity,
            config.execution.clone(),
        );
        let debouncer = NeutralDebouncer::new(config.regime.neutral_debounce_secs);

        Ok(Self {
            broker,
            engine,
            clock,
            band,
            state,
            latch,
            debouncer,
            indicator,
            correlated,
            config,
        })
    }

    pub async fn run_loop(&mut self) -> Result<()> {
        logger::info(
            LogTag::System,
            &format!(
                "rotating {} between {} and {} ({:?} feed)",
                self.config.instruments.benchmark,
                self.config.instruments.bull,
                self.config.instruments.bear,
                self.config.feed.mode
            ),
        );

        let result = match self.config.feed.mode {
            FeedMode::Poll => self.poll_loop().await,
            FeedMode::Stream => self.stream_loop().await,
        };

        self.shutdown_pass().await;
        result
    }

    /// Fixed-interval REST loop: fetch, decide, act, sleep
    async fn poll_loop(&mut self) -> Result<()> {
        let benchmark = self.config.instruments.benchmark.clone();
        let interval = Duration::from_secs(self.config.feed.poll_interval_secs);
        logger::info(
            LogTag::Feed,
            &format!("polling {} every {}s", benchmark, interval.as_secs()),
        );

        while !shutdown::is_shutdown_requested() {
            if let Some(symbol) = self.correlated.as_ref().map(|t| t.symbol.clone()) {
                match self.broker.latest_trade(&symbol).await {
                    Ok(price) => self.on_correlated_tick(price),
                    Err(e) => logger::debug(
                        LogTag::Feed,
                        &format!("correlated quote fetch failed: {}", e),
                    ),
                }
            }

            match self.broker.latest_trade(&benchmark).await {
                Ok(price) => {
                    if let Err(e) = self.on_benchmark_tick(price, Utc::now()).await {
                        if is_fatal(&e) {
                            return Err(e);
                        }
                        logger::warning(LogTag::System, &format!("tick handling failed: {}", e));
                    }
                }
                Err(e) => logger::warning(LogTag::Feed, &format!("quote fetch failed: {}", e)),
            }

            if !shutdown::interruptible_sleep(interval).await {
                break;
            }
        }
        Ok(())
    }

    /// Reactive loop: consume the supervised stream's tick queue
    async fn stream_loop(&mut self) -> Result<()> {
        let key_id = std::env::var(&self.config.broker.key_id_env).map_err(|_| {
            anyhow!(BotError::Config(format!(
                "missing env var {}",
                self.config.broker.key_id_env
            )))
        })?;
        let secret = std::env::var(&self.config.broker.secret_env).map_err(|_| {
            anyhow!(BotError::Config(format!(
                "missing env var {}",
                self.config.broker.secret_env
            )))
        })?;

        let mut symbols = vec![self.config.instruments.benchmark.clone()];
        if let Some(tracker) = &self.correlated {
            symbols.push(tracker.symbol.clone());
        }
        let stream_config = StreamConfig {
            url: self.config.broker.stream_url.clone(),
            key_id,
            secret,
            symbols,
        };

        let supervisor = Arc::new(StreamingSupervisor::new(
            stream_config,
            self.config.feed.clone(),
            self.clock,
        ));
        let queue = supervisor.queue();
        let handle = supervisor.spawn();

        loop {
            let tick = tokio::select! {
                t = queue.pop() => t,
                _ = shutdown::wait_for_shutdown() => break,
            };

            if tick.symbol == self.config.instruments.benchmark {
                if let Err(e) = self.on_benchmark_tick(tick.price, tick.at).await {
                    if is_fatal(&e) {
                        shutdown::request_shutdown();
                        let _ = handle.await;
                        return Err(e);
                    }
                    logger::warning(LogTag::System, &format!("tick handling failed: {}", e));
                }
            } else {
                self.on_correlated_tick(tick.price);
            }
        }

        let _ = handle.await;
        Ok(())
    }

    /// One benchmark tick through the whole pipeline
    async fn on_benchmark_tick(&mut self, price: f64, now: DateTime<Utc>) -> Result<()> {
        self.roll_day_if_needed(now).await;

        self.indicator.add(price);
        let avg = self.indicator.average();

        // A fired stop whose exit leg failed leaves unprotected exposure;
        // nothing else happens until that position is gone
        if self.state.stopped_out && !self.state.is_flat() {
            self.force_exit("trailing stop retry").await;
            if !self.state.is_flat() {
                return Ok(());
            }
        }

        let nudge = self.correlated.as_ref().and_then(|t| t.nudge);
        let signal = if self.clock.is_market_close_window(now) {
            Signal::MarketClose
        } else if !self.indicator.is_full() {
            // Warm-up: no directional conviction until the window is primed
            Signal::Neutral
        } else {
            classify_with_nudge(price, avg, &self.band, nudge)
        };
        if arguments::is_debug_signal_enabled() {
            logger::debug(
                LogTag::Signal,
                &format!("{:.4} vs avg {:.4} -> {}", price, avg, signal),
            );
        }

        match self.latch.on_tick(price, now) {
            TickOutcome::StopFired {
                direction,
                washout_level,
            } => {
                logger::warning(
                    LogTag::Stops,
                    &format!(
                        "trailing stop fired at {:.4} ({} washout {:.4})",
                        price, direction, washout_level
                    ),
                );
                self.state.record_stopout(direction, washout_level, now);
                if let Err(e) = save_state_now(&self.state).await {
                    logger::warning(LogTag::State, &format!("state save failed: {}", e));
                }
                self.debouncer.reset();
                self.force_exit("trailing stop").await;
                return Ok(());
            }
            TickOutcome::Ratcheted => {
                self.mirror_watermarks();
                if arguments::is_debug_state_enabled() {
                    logger::debug(
                        LogTag::State,
                        &format!(
                            "ratchet: hwm {:?} lwm {:?} stop {:?}",
                            self.state.high_water_mark,
                            self.state.low_water_mark,
                            self.state.stop_value
                        ),
                    );
                }
                let debounce = self.config.trading.state_save_debounce_secs;
                if let Err(e) = save_state_debounced(&self.state, debounce).await {
                    logger::warning(LogTag::State, &format!("state save failed: {}", e));
                }
            }
            TickOutcome::Idle => {}
        }

        let neutral_ready = self.debouncer.observe(signal);

        match signal {
            Signal::MarketClose => {
                if !self.state.is_flat() {
                    logger::info(LogTag::Execution, "market close window: going to cash");
                    self.force_exit("market close").await;
                }
            }
            Signal::Neutral => {
                if neutral_ready && !self.state.is_flat() {
                    logger::info(
                        LogTag::Signal,
                        &format!(
                            "NEUTRAL sustained {}s: liquidating to cash",
                            self.config.regime.neutral_debounce_secs
                        ),
                    );
                    let reclassify = self.reclassifier(avg);
                    match self
                        .engine
                        .liquidate(&mut self.state, Some(&reclassify), "sustained neutral")
                        .await?
                    {
                        ExitResult::Flat { .. } => {
                            self.latch.exit();
                            self.mirror_watermarks();
                            self.debouncer.reset();
                            if let Err(e) = save_state_now(&self.state).await {
                                logger::warning(
                                    LogTag::State,
                                    &format!("state save failed: {}", e),
                                );
                            }
                        }
                        ExitResult::StillHolding { reason } => {
                            logger::warning(
                                LogTag::Execution,
                                &format!("neutral exit incomplete: {}", reason),
                            );
                        }
                    }
                }
            }
            Signal::Bull => self.pursue(Direction::Bull, price, avg, now).await?,
            Signal::Bear => self.pursue(Direction::Bear, price, avg, now).await?,
        }

        Ok(())
    }

    /// Rotate toward the target direction, subject to the washout latch
    async fn pursue(
        &mut self,
        target: Direction,
        price: f64,
        avg: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state.holding_direction() == Some(target) {
            return Ok(());
        }

        match self.latch.check_entry(target, price, now) {
            EntryCheck::Blocked(info) => {
                logger::debug(
                    LogTag::Stops,
                    &format!(
                        "{} entry blocked: {}s cooldown left, {:.4} to recovery",
                        target, info.remaining_cooldown_secs, info.distance_to_recovery
                    ),
                );
                return Ok(());
            }
            EntryCheck::Cleared => {
                logger::info(
                    LogTag::Stops,
                    &format!("washout latch cleared for {} at {:.4}", target, price),
                );
                self.state.clear_stopout();
            }
            EntryCheck::Allowed => {}
        }

        let was_holding = !self.state.is_flat();
        let reclassify = self.reclassifier(avg);
        match self
            .engine
            .rotate_to(target, &mut self.state, &reclassify)
            .await?
        {
            RotationOutcome::Entered { qty, avg_price } => {
                self.state.clear_stopout();
                self.latch.enter(target, price);
                self.mirror_watermarks();
                if let Err(e) = save_state_now(&self.state).await {
                    logger::warning(LogTag::State, &format!("state save failed: {}", e));
                }
                logger::info(
                    LogTag::Execution,
                    &format!(
                        "rotated into {} x{} @ {:.2} (benchmark {:.4})",
                        self.state.symbol.as_deref().unwrap_or("?"),
                        qty,
                        avg_price,
                        price
                    ),
                );
            }
            RotationOutcome::NoChange => {}
            RotationOutcome::ExitBlocked { reason } => {
                logger::warning(
                    LogTag::Execution,
                    &format!("rotation to {} blocked: {}", target, reason),
                );
            }
            RotationOutcome::EntryAborted { reason } => {
                if was_holding {
                    // The exit leg completed; the latch must reflect flatness
                    self.latch.exit();
                    self.mirror_watermarks();
                    if let Err(e) = save_state_now(&self.state).await {
                        logger::warning(LogTag::State, &format!("state save failed: {}", e));
                    }
                }
                logger::warning(
                    LogTag::Execution,
                    &format!("{} entry aborted: {}", target, reason),
                );
            }
        }
        Ok(())
    }

    /// Forced liquidation (stop, market close, shutdown): market order, no
    /// chaser second-guessing. A StoppedOut latch survives the exit.
    async fn force_exit(&mut self, reason: &str) {
        match self.engine.liquidate(&mut self.state, None, reason).await {
            Ok(ExitResult::Flat { .. }) => {
                if matches!(
                    self.latch.state(),
                    LatchState::HoldingBull | LatchState::HoldingBear
                ) {
                    self.latch.exit();
                }
                self.mirror_watermarks();
                self.debouncer.reset();
                if let Err(e) = save_state_now(&self.state).await {
                    logger::warning(LogTag::State, &format!("state save failed: {}", e));
                }
            }
            Ok(ExitResult::StillHolding { reason: r }) => {
                logger::warning(
                    LogTag::Execution,
                    &format!("forced exit incomplete ({}); will retry", r),
                );
            }
            Err(e) => {
                logger::warning(LogTag::Execution, &format!("forced exit failed: {}", e));
            }
        }
    }

    fn on_correlated_tick(&mut self, price: f64) {
        if let Some(tracker) = self.correlated.as_mut() {
            tracker.indicator.add(price);
            let avg = tracker.indicator.average();
            tracker.nudge = match classify(price, avg, &self.band) {
                Signal::Bull => Some(Direction::Bull),
                Signal::Bear => Some(Direction::Bear),
                _ => None,
            };
        }
    }

    async fn roll_day_if_needed(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.state.day_start_date == Some(today) {
            return;
        }
        let mark = match self.state.symbol.clone() {
            Some(symbol) if self.state.shares > 0 => {
                self.broker.latest_trade(&symbol).await.unwrap_or(0.0)
            }
            _ => 0.0,
        };
        if self.state.roll_day_start(today, mark) {
            logger::info(
                LogTag::State,
                &format!("day start balance: ${:.2}", self.state.day_start_balance),
            );
            if let Err(e) = save_state_now(&self.state).await {
                logger::warning(LogTag::State, &format!("state save failed: {}", e));
            }
        }
    }

    /// Snapshot the classifier for the chaser decision; the average is
    /// frozen at decision time, only the price is live
    fn reclassifier(&self, avg: f64) -> impl Fn(f64) -> Signal + Sync {
        let band = self.band;
        let clock = self.clock;
        move |px: f64| {
            if clock.is_market_close_window(Utc::now()) {
                Signal::MarketClose
            } else {
                classify(px, avg, &band)
            }
        }
    }

    fn mirror_watermarks(&mut self) {
        self.state.high_water_mark = self.latch.high_water_mark();
        self.state.low_water_mark = self.latch.low_water_mark();
        self.state.stop_value = self.latch.stop_value();
    }

    /// Best-effort cleanup on the way out
    async fn shutdown_pass(&mut self) {
        if self.config.trading.liquidate_on_shutdown && !self.state.is_flat() {
            logger::info(LogTag::Shutdown, "liquidating position on shutdown");
            self.force_exit("shutdown").await;
            if !self.state.is_flat() {
                logger::warning(
                    LogTag::Shutdown,
                    &format!(
                        "{} x{} stays owned through restart",
                        self.state.symbol.as_deref().unwrap_or("?"),
                        self.state.shares
                    ),
                );
            }
        }
        if let Err(e) = save_state_now(&self.state).await {
            logger::warning(LogTag::State, &format!("final state save failed: {}", e));
        }
        if let Ok(count) = db::order_count() {
            logger::info(LogTag::Journal, &format!("{} orders journaled this run", count));
        }
    }
}

/// Errors that must stop trading rather than be retried
fn is_fatal(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<BotError>(),
        Some(BotError::InsufficientFunds(_)) | Some(BotError::CorruptState(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperBroker;
    use crate::config::ExecutionStyle;
    use chrono::TimeZone;

    fn tue(hh: u32, mm: u32) -> DateTime<Utc> {
        // 2026-03-03 is a Tuesday
        Utc.with_ymd_and_hms(2026, 3, 3, hh, mm, 0).unwrap()
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.indicator.window = 12;
        config.execution.style = ExecutionStyle::Market;
        config.execution.fill_timeout_secs = 0;
        config.execution.order_timeout_secs = 0;
        config.execution.poll_interval_ms = 1;
        config.regime.neutral_debounce_secs = 0;
        config
    }

    fn test_trader(broker: &Arc<PaperBroker>, config: Config) -> Trader {
        let clock = SessionClock::from_settings(&config.session).unwrap();
        let band = BandParams {
            chop_threshold_pct: config.regime.chop_threshold_pct,
            min_chop_abs: config.regime.min_chop_abs,
        };
        let engine = ExecutionEngine::new(
            broker.clone(),
            &config.trading.identity,
            config.execution.clone(),
        );
        Trader {
            broker: broker.clone(),
            engine,
            clock,
            band,
            state: TradingState::new(10_000.0, &config.instruments),
            latch: TrailingStop::new(config.stops.trail_pct, config.stops.cooldown_secs),
            debouncer: NeutralDebouncer::new(config.regime.neutral_debounce_secs),
            indicator: RollingMean::new(config.indicator.window),
            correlated: None,
            config,
        }
    }

    #[tokio::test]
    async fn breakout_above_band_enters_bull() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.set_price("SQQQ", 20.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);

        trader.on_benchmark_tick(100.2, tue(15, 0)).await.unwrap();

        assert!(trader.state.holding_bull());
        assert_eq!(trader.state.shares, 166);
        assert_eq!(trader.state.high_water_mark, Some(100.2));
        assert!(trader.state.stop_value.is_some());
    }

    #[tokio::test]
    async fn sustained_neutral_liquidates_to_cash() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("QQQ", 100.0);
        broker.set_price("TQQQ", 60.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);
        trader.state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);
        trader.latch.enter(Direction::Bull, 100.0);
        trader.mirror_watermarks();

        // Window is zero but the timer must still be observed twice:
        // once to start, once to confirm
        trader.on_benchmark_tick(100.0, tue(15, 0)).await.unwrap();
        assert!(trader.state.holding_bull());
        trader.on_benchmark_tick(100.0, tue(15, 1)).await.unwrap();

        assert!(trader.state.is_flat());
        assert!((trader.state.cash - 10_000.0).abs() < 1e-9);
        assert_eq!(trader.state.high_water_mark, None);
    }

    #[tokio::test]
    async fn single_neutral_tick_does_not_liquidate() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let mut config = test_config();
        config.regime.neutral_debounce_secs = 3600;
        let mut trader = test_trader(&broker, config);
        trader.indicator.seed(&[100.0; 12]);
        trader.state.apply_entry_fill("TQQQ", 100, 60.0);
        trader.latch.enter(Direction::Bull, 100.0);

        trader.on_benchmark_tick(100.0, tue(15, 0)).await.unwrap();
        trader.on_benchmark_tick(100.0, tue(15, 1)).await.unwrap();

        assert!(trader.state.holding_bull());
        assert!(broker.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn stop_fire_liquidates_and_latches() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 59.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[50.0; 12]);
        trader.state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);
        trader.latch.enter(Direction::Bull, 50.0);
        trader.mirror_watermarks();

        // Stop sits at 49.90; this tick pierces it
        trader.on_benchmark_tick(49.89, tue(15, 0)).await.unwrap();

        assert!(trader.state.is_flat());
        assert!(trader.state.stopped_out);
        assert_eq!(trader.state.washout_level, Some(50.0));
        assert!(matches!(
            trader.latch.state(),
            LatchState::StoppedOut { .. }
        ));
    }

    #[tokio::test]
    async fn latched_direction_cannot_reenter_early() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);
        trader.latch = TrailingStop::restore(
            0.002,
            300,
            None,
            None,
            None,
            None,
            Some((Direction::Bull, 101.0, tue(15, 0))),
        );
        trader.state.record_stopout(Direction::Bull, 101.0, tue(15, 0));

        // BULL signal one minute later: cooldown unfinished, no recovery
        trader.on_benchmark_tick(100.2, tue(15, 1)).await.unwrap();

        assert!(trader.state.is_flat());
        assert!(broker.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn cleared_latch_allows_reentry() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.set_price("SQQQ", 20.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);
        trader.latch = TrailingStop::restore(
            0.002,
            300,
            None,
            None,
            None,
            None,
            Some((Direction::Bull, 100.0, tue(15, 0))),
        );
        trader.state.record_stopout(Direction::Bull, 100.0, tue(15, 0));

        // Ten minutes later price has recrossed the washout level
        trader.on_benchmark_tick(100.3, tue(15, 10)).await.unwrap();

        assert!(trader.state.holding_bull());
        assert!(!trader.state.stopped_out);
    }

    #[tokio::test]
    async fn opposite_direction_passes_the_latch() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        broker.set_price("SQQQ", 20.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);
        trader.latch = TrailingStop::restore(
            0.002,
            300,
            None,
            None,
            None,
            None,
            Some((Direction::Bull, 101.0, tue(15, 0))),
        );
        trader.state.record_stopout(Direction::Bull, 101.0, tue(15, 0));

        // BEAR breakout while the bull side is latched
        trader.on_benchmark_tick(99.7, tue(15, 1)).await.unwrap();

        assert!(trader.state.holding_bear());
    }

    #[tokio::test]
    async fn market_close_window_forces_flat() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);
        trader.state.apply_entry_fill("TQQQ", 100, 60.0);
        broker.set_position("TQQQ", 100, 60.0);
        trader.latch.enter(Direction::Bull, 100.0);
        trader.mirror_watermarks();

        // 20:58 UTC: inside the 5-minute pre-close buffer
        trader.on_benchmark_tick(100.5, tue(20, 58)).await.unwrap();

        assert!(trader.state.is_flat());
        assert_eq!(trader.state.high_water_mark, None);
    }

    #[tokio::test]
    async fn bull_to_bear_flip_rotates() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("QQQ", 99.0);
        broker.set_price("TQQQ", 60.0);
        broker.set_price("SQQQ", 20.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);
        trader.state.apply_entry_fill("TQQQ", 166, 60.0);
        broker.set_position("TQQQ", 166, 60.0);
        trader.latch.enter(Direction::Bull, 100.0);
        trader.mirror_watermarks();

        // Deep BEAR breakout below the band floor (stop sits at 99.80,
        // so the latch fires first only below it; 99.82 exits via signal)
        trader.on_benchmark_tick(99.82, tue(15, 0)).await.unwrap();

        assert!(trader.state.holding_bear());
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].symbol, "TQQQ");
        assert_eq!(orders[1].symbol, "SQQQ");
    }

    #[tokio::test]
    async fn day_start_rolls_once() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_price("TQQQ", 60.0);
        let mut trader = test_trader(&broker, test_config());
        trader.indicator.seed(&[100.0; 12]);

        trader.on_benchmark_tick(100.0, tue(15, 0)).await.unwrap();
        let rolled = trader.state.day_start_date;
        assert_eq!(rolled, Some(tue(15, 0).date_naive()));
        assert_eq!(trader.state.day_start_balance, 10_000.0);

        trader.on_benchmark_tick(100.0, tue(15, 5)).await.unwrap();
        assert_eq!(trader.state.day_start_date, rolled);
    }

    #[test]
    fn fatal_errors_are_recognized() {
        let fatal = anyhow!(BotError::InsufficientFunds("x".to_string()));
        let transient = anyhow!(BotError::Broker("x".to_string()));
        assert!(is_fatal(&fatal));
        assert!(!is_fatal(&transient));
    }
}
