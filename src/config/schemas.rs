//! Configuration schema definitions
//!
//! Defaults model the original deployment: QQQ benchmark rotated between
//! TQQQ (bull 3x) and SQQQ (bear 3x) during US regular hours.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instruments: InstrumentSettings,
    pub indicator: IndicatorSettings,
    pub regime: RegimeSettings,
    pub stops: StopSettings,
    pub execution: ExecutionSettings,
    pub session: SessionSettings,
    pub feed: FeedSettings,
    pub broker: BrokerSettings,
    pub trading: TradingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Benchmark whose price drives the classifier and the trailing stop
    pub benchmark: String,
    /// Leveraged bull proxy
    pub bull: String,
    /// Leveraged bear proxy
    pub bear: String,
    /// Optional correlated instrument whose regime may nudge a NEUTRAL
    /// benchmark signal (never overrides a decided BULL/BEAR)
    pub correlated: Option<String>,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            benchmark: "QQQ".to_string(),
            bull: "TQQQ".to_string(),
            bear: "SQQQ".to_string(),
            correlated: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    /// Rolling-mean window length in ticks
    pub window: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self { window: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    /// Half-width of the hysteresis band as a fraction of the average
    pub chop_threshold_pct: f64,
    /// Absolute floor for the half-width; prevents band collapse on
    /// low-priced instruments
    pub min_chop_abs: f64,
    /// NEUTRAL must hold uninterrupted this long before liquidation
    pub neutral_debounce_secs: u64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            chop_threshold_pct: 0.0015,
            min_chop_abs: 0.02,
            neutral_debounce_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopSettings {
    /// Trailing distance from the watermark
    pub trail_pct: f64,
    /// Washout-latch cooldown after a stop fires
    pub cooldown_secs: u64,
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            trail_pct: 0.002,
            cooldown_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStyle {
    /// Plain market order, unknown slippage
    Market,
    /// Marketable limit bounded by max_slippage_pct, with chaser fallback
    MarketableLimit,
    /// Tight IOC ladder, stepped price, no polling delay
    MachineGun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub style: ExecutionStyle,
    /// Worst acceptable offset from quote for marketable limits
    pub max_slippage_pct: f64,
    /// How long a marketable limit may rest before the chaser decision
    pub fill_timeout_secs: u64,
    /// Hard ceiling for polling any order to a terminal state
    pub order_timeout_secs: u64,
    /// Delay between order status polls
    pub poll_interval_ms: u64,
    /// Machine-gun: max IOC attempts
    pub ioc_max_retries: u32,
    /// Machine-gun: price step per attempt, as a fraction of the quote
    pub ioc_step_pct: f64,
    /// Machine-gun: max total deviation from the original quote
    pub ioc_max_deviation_pct: f64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            style: ExecutionStyle::MarketableLimit,
            max_slippage_pct: 0.001,
            fill_timeout_secs: 10,
            order_timeout_secs: 60,
            poll_interval_ms: 500,
            ioc_max_retries: 5,
            ioc_step_pct: 0.0002,
            ioc_max_deviation_pct: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Regular session open, UTC "HH:MM"
    pub open_utc: String,
    /// Regular session close, UTC "HH:MM"
    pub close_utc: String,
    /// Minutes before close during which MARKET_CLOSE is forced
    pub liquidate_buffer_min: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            open_utc: "14:30".to_string(),
            close_utc: "21:00".to_string(),
            liquidate_buffer_min: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Fixed-interval REST polling: fetch, decide, act, sleep
    Poll,
    /// Websocket stream into a bounded drop-oldest queue
    Stream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub mode: FeedMode,
    /// Poll mode: seconds between iterations
    pub poll_interval_secs: u64,
    /// Stream mode: seconds without a tick before a reconnect
    pub staleness_secs: u64,
    /// Minimum spacing between reconnect attempts
    pub reconnect_cooldown_secs: u64,
    /// Bounded tick queue capacity (drop-oldest beyond this)
    pub queue_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            mode: FeedMode::Stream,
            poll_interval_secs: 1,
            staleness_secs: 10,
            reconnect_cooldown_secs: 15,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Paper endpoint by default; live requires an explicit opt-in
    pub paper: bool,
    /// Env var holding the API key id
    pub key_id_env: String,
    /// Env var holding the API secret
    pub secret_env: String,
    pub data_url: String,
    pub stream_url: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            paper: true,
            key_id_env: "APCA_API_KEY_ID".to_string(),
            secret_env: "APCA_API_SECRET_KEY".to_string(),
            data_url: "https://data.alpaca.markets".to_string(),
            stream_url: "wss://stream.data.alpaca.markets/v2/iex".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Capital pool for a freshly created state
    pub starting_cash: f64,
    /// Engine identity prefix for client order ids; lets several instances
    /// share an account without claiming each other's orders
    pub identity: String,
    /// Attempt one liquidation pass on operator interrupt
    pub liquidate_on_shutdown: bool,
    /// Minimum spacing between debounced (non-critical) state writes
    pub state_save_debounce_secs: u64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            starting_cash: 25_000.0,
            identity: "rotor".to_string(),
            liquidate_on_shutdown: true,
            state_save_debounce_secs: 5,
        }
    }
}

impl Config {
    /// Reject numerically nonsensical values before the engine starts
    pub fn validate(&self) -> Result<(), String> {
        if self.indicator.window == 0 {
            return Err("indicator.window must be at least 1".to_string());
        }
        if self.regime.chop_threshold_pct < 0.0 || self.regime.min_chop_abs < 0.0 {
            return Err("regime thresholds must be non-negative".to_string());
        }
        if self.stops.trail_pct <= 0.0 || self.stops.trail_pct >= 1.0 {
            return Err("stops.trail_pct must be in (0, 1)".to_string());
        }
        if self.execution.max_slippage_pct < 0.0 {
            return Err("execution.max_slippage_pct must be non-negative".to_string());
        }
        if self.execution.ioc_max_retries == 0 {
            return Err("execution.ioc_max_retries must be at least 1".to_string());
        }
        if self.trading.starting_cash <= 0.0 {
            return Err("trading.starting_cash must be positive".to_string());
        }
        if self.trading.identity.is_empty() || self.trading.identity.contains('-') {
            return Err("trading.identity must be non-empty and free of '-'".to_string());
        }
        if self.feed.queue_capacity == 0 {
            return Err("feed.queue_capacity must be at least 1".to_string());
        }
        parse_hhmm(&self.session.open_utc)
            .ok_or_else(|| format!("session.open_utc '{}' is not HH:MM", self.session.open_utc))?;
        parse_hhmm(&self.session.close_utc).ok_or_else(|| {
            format!("session.close_utc '{}' is not HH:MM", self.session.close_utc)
        })?;
        Ok(())
    }
}

/// Parse "HH:MM" into a NaiveTime
pub fn parse_hhmm(s: &str) -> Option<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(s, "%H:%M").ok()
}
