//! Regime classification and neutral debouncing
//!
//! The classifier draws a hysteresis band around the rolling average; price
//! must leave the band to flip the signal, which suppresses oscillation near
//! the boundary. A pre-close clock window overrides everything with
//! MARKET_CLOSE.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::SessionSettings;

/// Market regime signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Bull,
    Bear,
    Neutral,
    MarketClose,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Signal::Bull => "BULL",
            Signal::Bear => "BEAR",
            Signal::Neutral => "NEUTRAL",
            Signal::MarketClose => "MARKET_CLOSE",
        };
        write!(f, "{}", s)
    }
}

/// Side of the market a position or latch refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bull,
    Bear,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bull => write!(f, "BULL"),
            Direction::Bear => write!(f, "BEAR"),
        }
    }
}

/// Hysteresis band parameters
#[derive(Debug, Clone, Copy)]
pub struct BandParams {
    pub chop_threshold_pct: f64,
    /// Absolute floor so the band cannot collapse on low-priced instruments
    pub min_chop_abs: f64,
}

impl BandParams {
    pub fn half_width(&self, average: f64) -> f64 {
        (average * self.chop_threshold_pct).max(self.min_chop_abs)
    }
}

/// Classify a price against the rolling average
pub fn classify(price: f64, average: f64, params: &BandParams) -> Signal {
    let hw = params.half_width(average);
    if price > average + hw {
        Signal::Bull
    } else if price < average - hw {
        Signal::Bear
    } else {
        Signal::Neutral
    }
}

/// Classify with an optional correlated-instrument nudge
///
/// The nudge may only promote a NEUTRAL outcome; a decided BULL/BEAR from
/// the benchmark is never overridden.
pub fn classify_with_nudge(
    price: f64,
    average: f64,
    params: &BandParams,
    nudge: Option<Direction>,
) -> Signal {
    match classify(price, average, params) {
        Signal::Neutral => match nudge {
            Some(Direction::Bull) => Signal::Bull,
            Some(Direction::Bear) => Signal::Bear,
            None => Signal::Neutral,
        },
        decided => decided,
    }
}

/// Session clock: regular hours plus the forced pre-close window
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    open: NaiveTime,
    close: NaiveTime,
    liquidate_buffer_min: u32,
}

impl SessionClock {
    pub fn from_settings(settings: &SessionSettings) -> Result<Self, String> {
        let open = crate::config::parse_hhmm(&settings.open_utc)
            .ok_or_else(|| format!("bad session.open_utc: {}", settings.open_utc))?;
        let close = crate::config::parse_hhmm(&settings.close_utc)
            .ok_or_else(|| format!("bad session.close_utc: {}", settings.close_utc))?;
        Ok(Self {
            open,
            close,
            liquidate_buffer_min: settings.liquidate_buffer_min,
        })
    }

    /// Inside regular hours (weekdays, open..close UTC)
    pub fn is_session_open(&self, now: DateTime<Utc>) -> bool {
        use chrono::Datelike;
        let weekday = now.weekday().num_days_from_monday();
        if weekday >= 5 {
            return false;
        }
        let t = now.time();
        t >= self.open && t < self.close
    }

    /// Inside the forced-liquidation window just before the close
    pub fn is_market_close_window(&self, now: DateTime<Utc>) -> bool {
        if !self.is_session_open(now) {
            return true;
        }
        let buffer = chrono::Duration::minutes(self.liquidate_buffer_min as i64);
        now.time() >= self.close - buffer
    }
}

/// Requires NEUTRAL to hold continuously before liquidation triggers.
///
/// Any non-NEUTRAL observation resets the timer to unstarted, so a single
/// noisy tick cannot cause a round-trip liquidation.
#[derive(Debug)]
pub struct NeutralDebouncer {
    window: Duration,
    neutral_since: Option<Instant>,
}

impl NeutralDebouncer {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            neutral_since: None,
        }
    }

    /// Observe a signal; returns true when NEUTRAL has been sustained for
    /// the full window and liquidation should proceed.
    pub fn observe(&mut self, signal: Signal) -> bool {
        self.observe_at(signal, Instant::now())
    }

    pub fn observe_at(&mut self, signal: Signal, now: Instant) -> bool {
        if signal != Signal::Neutral {
            self.neutral_since = None;
            return false;
        }
        match self.neutral_since {
            None => {
                self.neutral_since = Some(now);
                false
            }
            Some(since) => now.duration_since(since) >= self.window,
        }
    }

    pub fn reset(&mut self) {
        self.neutral_since = None;
    }

    /// Seconds of sustained NEUTRAL so far, if the timer is running
    pub fn elapsed_secs(&self) -> Option<u64> {
        self.neutral_since.map(|s| s.elapsed().as_secs())
    }
}
