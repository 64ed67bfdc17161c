//! Persisted trading state
//!
//! `TradingState` is the single source of truth for capital and position
//! tracking. Every fill, rollback or stop event mutates it and persists it;
//! it survives restarts and is reconciled against the broker's positions at
//! startup (local state is always corrected toward the broker's view,
//! never the reverse).

mod persistence;

pub use persistence::{delete_state_file, load_state, save_state_debounced, save_state_now};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::BrokerPosition;
use crate::config::InstrumentSettings;
use crate::logger::{self, LogTag};
use crate::regime::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingState {
    /// Uninvested capital while flat
    pub cash: f64,
    /// Remainder that did not buy a whole share; folded back on exit
    pub leftover: f64,
    pub initialized: bool,

    /// Currently held instrument, if any
    pub symbol: Option<String>,
    pub shares: i64,

    pub starting_amount: f64,
    pub day_start_balance: f64,
    pub day_start_date: Option<NaiveDate>,

    // Instrument identity; a config change here invalidates position
    // tracking while financial totals survive
    pub benchmark_symbol: String,
    pub bull_symbol: String,
    pub bear_symbol: String,

    // Trailing-stop fields, mirrored from the latch for persistence
    pub high_water_mark: Option<f64>,
    pub low_water_mark: Option<f64>,
    pub stop_value: Option<f64>,
    pub stopped_out: bool,
    pub stop_direction: Option<Direction>,
    pub washout_level: Option<f64>,
    pub stopout_at: Option<DateTime<Utc>>,
}

impl TradingState {
    pub fn new(starting_cash: f64, instruments: &InstrumentSettings) -> Self {
        Self {
            cash: starting_cash,
            leftover: 0.0,
            initialized: true,
            symbol: None,
            shares: 0,
            starting_amount: starting_cash,
            day_start_balance: starting_cash,
            day_start_date: None,
            benchmark_symbol: instruments.benchmark.clone(),
            bull_symbol: instruments.bull.clone(),
            bear_symbol: instruments.bear.clone(),
            high_water_mark: None,
            low_water_mark: None,
            stop_value: None,
            stopped_out: false,
            stop_direction: None,
            washout_level: None,
            stopout_at: None,
        }
    }

    pub fn holding_bull(&self) -> bool {
        self.shares > 0 && self.symbol.as_deref() == Some(self.bull_symbol.as_str())
    }

    pub fn holding_bear(&self) -> bool {
        self.shares > 0 && self.symbol.as_deref() == Some(self.bear_symbol.as_str())
    }

    pub fn is_flat(&self) -> bool {
        self.shares == 0 || self.symbol.is_none()
    }

    pub fn holding_direction(&self) -> Option<Direction> {
        if self.holding_bull() {
            Some(Direction::Bull)
        } else if self.holding_bear() {
            Some(Direction::Bear)
        } else {
            None
        }
    }

    pub fn symbol_for(&self, direction: Direction) -> &str {
        match direction {
            Direction::Bull => &self.bull_symbol,
            Direction::Bear => &self.bear_symbol,
        }
    }

    /// Apply a confirmed entry fill: capital moves into the position, the
    /// unspent remainder stays in `leftover`.
    pub fn apply_entry_fill(&mut self, symbol: &str, qty: i64, avg_price: f64) {
        let cost = qty as f64 * avg_price;
        let pool = self.cash + self.leftover;
        self.symbol = Some(symbol.to_string());
        self.shares += qty;
        self.leftover = pool - cost;
        self.cash = 0.0;
    }

    /// Apply a confirmed exit fill for `qty` shares. Returns true when the
    /// position is fully closed (watermarks cleared by the caller's latch).
    pub fn apply_exit_fill(&mut self, qty: i64, avg_price: f64) -> bool {
        // Clamp before pricing so an over-reported fill cannot mint cash
        let sold = qty.min(self.shares);
        let proceeds = sold as f64 * avg_price;
        self.shares -= sold;
        self.cash += proceeds;
        if self.shares == 0 {
            self.symbol = None;
            self.cash += self.leftover;
            self.leftover = 0.0;
            self.clear_watermarks();
            true
        } else {
            false
        }
    }

    /// Clear watermark/stop tracking; latch fields (`stopped_out` etc.) are
    /// managed separately because they survive an exit.
    pub fn clear_watermarks(&mut self) {
        self.high_water_mark = None;
        self.low_water_mark = None;
        self.stop_value = None;
    }

    pub fn record_stopout(&mut self, direction: Direction, washout_level: f64, at: DateTime<Utc>) {
        self.stopped_out = true;
        self.stop_direction = Some(direction);
        self.washout_level = Some(washout_level);
        self.stopout_at = Some(at);
        self.clear_watermarks();
    }

    pub fn clear_stopout(&mut self) {
        self.stopped_out = false;
        self.stop_direction = None;
        self.washout_level = None;
        self.stopout_at = None;
    }

    /// Total capital assuming `mark` as the per-share value of any holding
    pub fn equity(&self, mark: f64) -> f64 {
        self.cash + self.leftover + self.shares as f64 * mark
    }

    /// If the configured instrument set changed, invalidate position
    /// tracking and stop fields while preserving financial totals.
    /// Returns true when an invalidation happened (indicators must
    /// re-seed).
    pub fn validate_instruments(&mut self, instruments: &InstrumentSettings) -> bool {
        let unchanged = self.benchmark_symbol == instruments.benchmark
            && self.bull_symbol == instruments.bull
            && self.bear_symbol == instruments.bear;
        if unchanged {
            return false;
        }

        logger::warning(
            LogTag::State,
            &format!(
                "instrument set changed ({}/{}/{} -> {}/{}/{}); clearing position tracking",
                self.benchmark_symbol,
                self.bull_symbol,
                self.bear_symbol,
                instruments.benchmark,
                instruments.bull,
                instruments.bear
            ),
        );

        self.cash += self.leftover;
        self.leftover = 0.0;
        self.symbol = None;
        self.shares = 0;
        self.clear_watermarks();
        self.clear_stopout();
        self.benchmark_symbol = instruments.benchmark.clone();
        self.bull_symbol = instruments.bull.clone();
        self.bear_symbol = instruments.bear.clone();
        true
    }

    /// Correct local tracking toward the broker's authoritative positions.
    /// A missing broker position clears local tracking; a smaller broker
    /// quantity shrinks local tracking to match.
    pub fn reconcile_with_broker(&mut self, broker_positions: &[BrokerPosition]) {
        let local_symbol = match self.symbol.clone() {
            Some(s) => s,
            None => return,
        };

        let broker_qty = broker_positions
            .iter()
            .find(|p| p.symbol == local_symbol)
            .map(|p| p.qty)
            .unwrap_or(0);

        if broker_qty == 0 {
            logger::warning(
                LogTag::State,
                &format!(
                    "broker reports no {} position; clearing local tracking of {} shares",
                    local_symbol, self.shares
                ),
            );
            self.symbol = None;
            self.shares = 0;
            self.cash += self.leftover;
            self.leftover = 0.0;
            self.clear_watermarks();
        } else if broker_qty < self.shares {
            logger::warning(
                LogTag::State,
                &format!(
                    "broker reports {} x{} but local tracking says x{}; shrinking to match",
                    local_symbol, broker_qty, self.shares
                ),
            );
            self.shares = broker_qty;
        }
    }

    /// Roll the day-start balance on the first observation of a new date
    pub fn roll_day_start(&mut self, today: NaiveDate, mark: f64) -> bool {
        if self.day_start_date == Some(today) {
            return false;
        }
        self.day_start_date = Some(today);
        self.day_start_balance = self.equity(mark);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentSettings;

    fn fresh() -> TradingState {
        TradingState::new(10_000.0, &InstrumentSettings::default())
    }

    #[test]
    fn entry_and_exit_round_trip_capital() {
        let mut s = fresh();
        // 166 shares of TQQQ at $60: cost 9960, leftover 40
        s.apply_entry_fill("TQQQ", 166, 60.0);
        assert!(s.holding_bull());
        assert!(!s.holding_bear());
        assert_eq!(s.cash, 0.0);
        assert!((s.leftover - 40.0).abs() < 1e-9);

        let closed = s.apply_exit_fill(166, 61.0);
        assert!(closed);
        assert!(s.is_flat());
        assert!((s.cash - (166.0 * 61.0 + 40.0)).abs() < 1e-9);
        assert_eq!(s.leftover, 0.0);
    }

    #[test]
    fn holdings_are_mutually_exclusive() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 10, 60.0);
        assert!(s.holding_bull() && !s.holding_bear());
        s.apply_exit_fill(10, 60.0);
        s.apply_entry_fill("SQQQ", 10, 20.0);
        assert!(s.holding_bear() && !s.holding_bull());
    }

    #[test]
    fn over_reported_exit_fill_is_clamped() {
        let mut s = fresh();
        // 10 shares at $60: cost 600, leftover 9400
        s.apply_entry_fill("TQQQ", 10, 60.0);
        let closed = s.apply_exit_fill(15, 61.0);
        assert!(closed);
        assert!(s.is_flat());
        // Only the 10 held shares may be priced
        assert!((s.cash - (10.0 * 61.0 + 9_400.0)).abs() < 1e-9);
    }

    #[test]
    fn watermarks_cleared_on_full_exit() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 10, 60.0);
        s.high_water_mark = Some(61.0);
        s.stop_value = Some(60.8);
        s.apply_exit_fill(10, 60.5);
        assert_eq!(s.high_water_mark, None);
        assert_eq!(s.low_water_mark, None);
        assert_eq!(s.stop_value, None);
    }

    #[test]
    fn partial_exit_keeps_position_open() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 10, 60.0);
        let closed = s.apply_exit_fill(4, 61.0);
        assert!(!closed);
        assert_eq!(s.shares, 6);
        assert_eq!(s.symbol.as_deref(), Some("TQQQ"));
        assert!((s.cash - 244.0).abs() < 1e-9);
    }

    #[test]
    fn instrument_change_invalidates_tracking_preserves_totals() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 10, 60.0);
        s.record_stopout(Direction::Bull, 61.0, Utc::now());

        let mut instruments = InstrumentSettings::default();
        instruments.bull = "UPRO".to_string();
        instruments.bear = "SPXU".to_string();
        instruments.benchmark = "SPY".to_string();

        let changed = s.validate_instruments(&instruments);
        assert!(changed);
        assert!(s.is_flat());
        assert!(!s.stopped_out);
        assert_eq!(s.starting_amount, 10_000.0);
        assert_eq!(s.bull_symbol, "UPRO");
    }

    #[test]
    fn reconcile_clears_missing_position() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 10, 60.0);
        s.reconcile_with_broker(&[]);
        assert!(s.is_flat());
        assert_eq!(s.leftover, 0.0);
    }

    #[test]
    fn reconcile_shrinks_to_broker_quantity() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 10, 60.0);
        s.reconcile_with_broker(&[BrokerPosition {
            symbol: "TQQQ".to_string(),
            qty: 7,
            avg_entry_price: 60.0,
        }]);
        assert_eq!(s.shares, 7);
        assert_eq!(s.symbol.as_deref(), Some("TQQQ"));
    }

    #[test]
    fn reconcile_never_grows_local_tracking() {
        let mut s = fresh();
        s.apply_entry_fill("TQQQ", 5, 60.0);
        s.reconcile_with_broker(&[BrokerPosition {
            symbol: "TQQQ".to_string(),
            qty: 50,
            avg_entry_price: 60.0,
        }]);
        assert_eq!(s.shares, 5);
    }

    #[test]
    fn day_start_rolls_once_per_date() {
        let mut s = fresh();
        let d = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert!(s.roll_day_start(d, 0.0));
        assert!(!s.roll_day_start(d, 0.0));
        assert_eq!(s.day_start_balance, 10_000.0);
    }
}
