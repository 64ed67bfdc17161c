//! Configuration system
//!
//! TOML file loaded once at startup into a global, read through
//! `with_config`. Every field has a serde default so a partial file (or no
//! file at all) still yields a runnable configuration; `validate()` rejects
//! numerically nonsensical values before the engine starts.

mod schemas;
mod utils;

pub use schemas::{
    parse_hhmm, BrokerSettings, Config, ExecutionSettings, ExecutionStyle, FeedMode, FeedSettings,
    IndicatorSettings, InstrumentSettings, RegimeSettings, SessionSettings, StopSettings,
    TradingSettings,
};
pub use utils::{load_config, load_config_for_tests, load_config_from_path, with_config};
