//! Trailing-stop and washout-latch state machine
//!
//! The latch ticks on benchmark prices. While holding the bull proxy it
//! ratchets a high-water mark and derives a stop below it; the bear side is
//! symmetric with a low-water mark. After a stop fires, re-entry in the
//! stopped direction is blocked until BOTH the cooldown elapses AND price
//! recrosses the watermark captured at stop time. A bare stop-loss without
//! the latch re-enters immediately on noise around the stop price and
//! barcodes in and out of the position.

use chrono::{DateTime, Utc};

use crate::regime::Direction;

#[derive(Debug, Clone, PartialEq)]
pub enum LatchState {
    Flat,
    HoldingBull,
    HoldingBear,
    StoppedOut {
        direction: Direction,
        washout_level: f64,
        cooldown_until: DateTime<Utc>,
    },
}

/// Result of feeding one benchmark tick to the latch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Idle,
    /// Watermark moved and the stop tightened; worth a debounced persist
    Ratcheted,
    /// Stop triggered: the position must be liquidated now
    StopFired {
        direction: Direction,
        washout_level: f64,
    },
}

/// Why a requested entry is currently blocked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockInfo {
    pub remaining_cooldown_secs: i64,
    /// Signed distance from the live price to the recovery level
    pub distance_to_recovery: f64,
}

/// Outcome of asking the latch whether a direction may be entered
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryCheck {
    Allowed,
    /// Both clearing conditions were just met; the latch reset to Flat
    Cleared,
    Blocked(BlockInfo),
}

#[derive(Debug, Clone)]
pub struct TrailingStop {
    state: LatchState,
    high_water_mark: Option<f64>,
    low_water_mark: Option<f64>,
    stop_value: Option<f64>,
    trail_pct: f64,
    cooldown_secs: u64,
}

impl TrailingStop {
    pub fn new(trail_pct: f64, cooldown_secs: u64) -> Self {
        Self {
            state: LatchState::Flat,
            high_water_mark: None,
            low_water_mark: None,
            stop_value: None,
            trail_pct,
            cooldown_secs,
        }
    }

    pub fn state(&self) -> &LatchState {
        &self.state
    }

    pub fn high_water_mark(&self) -> Option<f64> {
        self.high_water_mark
    }

    pub fn low_water_mark(&self) -> Option<f64> {
        self.low_water_mark
    }

    pub fn stop_value(&self) -> Option<f64> {
        self.stop_value
    }

    /// Rebuild the machine from persisted fields after a restart
    pub fn restore(
        trail_pct: f64,
        cooldown_secs: u64,
        holding: Option<Direction>,
        hwm: Option<f64>,
        lwm: Option<f64>,
        stop_value: Option<f64>,
        stopped_out: Option<(Direction, f64, DateTime<Utc>)>,
    ) -> Self {
        let mut machine = Self::new(trail_pct, cooldown_secs);
        if let Some((direction, washout_level, stopout_at)) = stopped_out {
            machine.state = LatchState::StoppedOut {
                direction,
                washout_level,
                cooldown_until: stopout_at + chrono::Duration::seconds(cooldown_secs as i64),
            };
        } else if let Some(direction) = holding {
            machine.state = match direction {
                Direction::Bull => LatchState::HoldingBull,
                Direction::Bear => LatchState::HoldingBear,
            };
            machine.high_water_mark = hwm;
            machine.low_water_mark = lwm;
            machine.stop_value = stop_value;
        }
        machine
    }

    /// Record a confirmed entry at the given benchmark price
    pub fn enter(&mut self, direction: Direction, entry_price: f64) {
        match direction {
            Direction::Bull => {
                self.state = LatchState::HoldingBull;
                self.high_water_mark = Some(entry_price);
                self.low_water_mark = None;
                self.stop_value = Some(entry_price * (1.0 - self.trail_pct));
            }
            Direction::Bear => {
                self.state = LatchState::HoldingBear;
                self.low_water_mark = Some(entry_price);
                self.high_water_mark = None;
                self.stop_value = Some(entry_price * (1.0 + self.trail_pct));
            }
        }
    }

    /// Record an ordinary (non-stop) exit; watermarks always clear
    pub fn exit(&mut self) {
        self.state = LatchState::Flat;
        self.high_water_mark = None;
        self.low_water_mark = None;
        self.stop_value = None;
    }

    /// Feed one benchmark tick while a position may be held
    pub fn on_tick(&mut self, price: f64, now: DateTime<Utc>) -> TickOutcome {
        match self.state {
            LatchState::HoldingBull => {
                let hwm = self.high_water_mark.unwrap_or(price);
                if price <= self.stop_value.unwrap_or(f64::MIN) {
                    let washout_level = hwm;
                    self.fire(Direction::Bull, washout_level, now);
                    return TickOutcome::StopFired {
                        direction: Direction::Bull,
                        washout_level,
                    };
                }
                if price > hwm {
                    // Ratchet up; the stop never loosens
                    self.high_water_mark = Some(price);
                    let candidate = price * (1.0 - self.trail_pct);
                    if candidate > self.stop_value.unwrap_or(f64::MIN) {
                        self.stop_value = Some(candidate);
                    }
                    return TickOutcome::Ratcheted;
                }
                TickOutcome::Idle
            }
            LatchState::HoldingBear => {
                let lwm = self.low_water_mark.unwrap_or(price);
                if price >= self.stop_value.unwrap_or(f64::MAX) {
                    let washout_level = lwm;
                    self.fire(Direction::Bear, washout_level, now);
                    return TickOutcome::StopFired {
                        direction: Direction::Bear,
                        washout_level,
                    };
                }
                if price < lwm {
                    self.low_water_mark = Some(price);
                    let candidate = price * (1.0 + self.trail_pct);
                    if candidate < self.stop_value.unwrap_or(f64::MAX) {
                        self.stop_value = Some(candidate);
                    }
                    return TickOutcome::Ratcheted;
                }
                TickOutcome::Idle
            }
            _ => TickOutcome::Idle,
        }
    }

    fn fire(&mut self, direction: Direction, washout_level: f64, now: DateTime<Utc>) {
        self.state = LatchState::StoppedOut {
            direction,
            washout_level,
            cooldown_until: now + chrono::Duration::seconds(self.cooldown_secs as i64),
        };
        self.high_water_mark = None;
        self.low_water_mark = None;
        self.stop_value = None;
    }

    /// May `wanted` be entered at `price`?
    ///
    /// Clears the latch (returning `Cleared`) only when the cooldown has
    /// elapsed AND price has recovered across the washout level in the
    /// favorable direction: price >= level for a bull latch, price <= level
    /// for bear. Requests for the opposite direction pass through.
    pub fn check_entry(&mut self, wanted: Direction, price: f64, now: DateTime<Utc>) -> EntryCheck {
        let (direction, washout_level, cooldown_until) = match self.state {
            LatchState::StoppedOut {
                direction,
                washout_level,
                cooldown_until,
            } => (direction, washout_level, cooldown_until),
            _ => return EntryCheck::Allowed,
        };

        if wanted != direction {
            return EntryCheck::Allowed;
        }

        let cooldown_done = now >= cooldown_until;
        let recovered = match direction {
            Direction::Bull => price >= washout_level,
            Direction::Bear => price <= washout_level,
        };

        if cooldown_done && recovered {
            self.state = LatchState::Flat;
            return EntryCheck::Cleared;
        }

        let remaining = (cooldown_until - now).num_seconds().max(0);
        let distance = match direction {
            Direction::Bull => washout_level - price,
            Direction::Bear => price - washout_level,
        };
        EntryCheck::Blocked(BlockInfo {
            remaining_cooldown_secs: remaining,
            distance_to_recovery: distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn bull_machine() -> TrailingStop {
        // trail 0.2%, cooldown 300s
        let mut m = TrailingStop::new(0.002, 300);
        m.enter(Direction::Bull, 50.0);
        m
    }

    #[test]
    fn scenario_b_stop_fires_below_trail() {
        let mut m = bull_machine();
        assert!((m.stop_value().unwrap() - 49.90).abs() < 1e-9);

        // $49.95 is above the stop: no trigger
        assert_eq!(m.on_tick(49.95, at(1)), TickOutcome::Idle);

        // $49.89 breaches the stop
        match m.on_tick(49.89, at(2)) {
            TickOutcome::StopFired {
                direction,
                washout_level,
            } => {
                assert_eq!(direction, Direction::Bull);
                assert!((washout_level - 50.0).abs() < 1e-9);
            }
            other => panic!("expected stop, got {:?}", other),
        }
        assert!(matches!(m.state(), LatchState::StoppedOut { .. }));
        // Watermarks clear on any exit
        assert_eq!(m.high_water_mark(), None);
        assert_eq!(m.stop_value(), None);
    }

    #[test]
    fn bull_watermark_and_stop_are_monotonic() {
        let mut m = bull_machine();
        let prices = [50.1, 50.05, 50.3, 50.2, 50.6, 50.55];
        let mut last_hwm = m.high_water_mark().unwrap();
        let mut last_stop = m.stop_value().unwrap();
        for (i, &p) in prices.iter().enumerate() {
            m.on_tick(p, at(i as i64));
            let hwm = m.high_water_mark().unwrap();
            let stop = m.stop_value().unwrap();
            assert!(hwm >= last_hwm, "hwm loosened at {}", p);
            assert!(stop >= last_stop, "stop loosened at {}", p);
            last_hwm = hwm;
            last_stop = stop;
        }
        assert!((last_hwm - 50.6).abs() < 1e-9);
    }

    #[test]
    fn bear_side_is_symmetric() {
        let mut m = TrailingStop::new(0.002, 300);
        m.enter(Direction::Bear, 50.0);
        assert!((m.stop_value().unwrap() - 50.10).abs() < 1e-9);

        // Ratchets down as price falls
        assert_eq!(m.on_tick(49.5, at(1)), TickOutcome::Ratcheted);
        assert!((m.low_water_mark().unwrap() - 49.5).abs() < 1e-9);
        let stop = m.stop_value().unwrap();
        assert!((stop - 49.5 * 1.002).abs() < 1e-9);

        // Rebound through the stop fires with the lwm as washout level
        match m.on_tick(stop + 0.01, at(2)) {
            TickOutcome::StopFired {
                direction,
                washout_level,
            } => {
                assert_eq!(direction, Direction::Bear);
                assert!((washout_level - 49.5).abs() < 1e-9);
            }
            other => panic!("expected stop, got {:?}", other),
        }
    }

    #[test]
    fn latch_blocks_until_cooldown_and_recovery() {
        let mut m = bull_machine();
        m.on_tick(49.89, at(0)); // fires, washout = 50.0, cooldown until t+300

        // Cooldown not elapsed, price recovered: still blocked
        match m.check_entry(Direction::Bull, 50.2, at(100)) {
            EntryCheck::Blocked(info) => {
                assert_eq!(info.remaining_cooldown_secs, 200);
                assert!(info.distance_to_recovery <= 0.0);
            }
            other => panic!("expected block, got {:?}", other),
        }

        // Cooldown elapsed, price below washout: still blocked
        match m.check_entry(Direction::Bull, 49.7, at(301)) {
            EntryCheck::Blocked(info) => {
                assert_eq!(info.remaining_cooldown_secs, 0);
                assert!((info.distance_to_recovery - 0.3).abs() < 1e-9);
            }
            other => panic!("expected block, got {:?}", other),
        }

        // The opposite direction was never blocked
        assert_eq!(m.check_entry(Direction::Bear, 49.7, at(150)), EntryCheck::Allowed);

        // Both conditions met: latch clears
        assert_eq!(m.check_entry(Direction::Bull, 50.0, at(301)), EntryCheck::Cleared);
        assert_eq!(*m.state(), LatchState::Flat);
        assert_eq!(m.check_entry(Direction::Bull, 50.0, at(302)), EntryCheck::Allowed);
    }

    #[test]
    fn restore_rebuilds_stopped_out_state() {
        let m = TrailingStop::restore(
            0.002,
            300,
            None,
            None,
            None,
            None,
            Some((Direction::Bull, 50.0, at(0))),
        );
        match m.state() {
            LatchState::StoppedOut {
                direction,
                washout_level,
                cooldown_until,
            } => {
                assert_eq!(*direction, Direction::Bull);
                assert!((washout_level - 50.0).abs() < 1e-9);
                assert_eq!(*cooldown_until, at(300));
            }
            other => panic!("expected stopped out, got {:?}", other),
        }
    }

    #[test]
    fn restore_rebuilds_holding_state() {
        let m = TrailingStop::restore(
            0.002,
            300,
            Some(Direction::Bull),
            Some(51.0),
            None,
            Some(50.898),
            None,
        );
        assert_eq!(*m.state(), LatchState::HoldingBull);
        assert_eq!(m.high_water_mark(), Some(51.0));
        assert_eq!(m.stop_value(), Some(50.898));
    }
}
