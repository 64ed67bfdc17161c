pub mod arguments;
pub mod broker;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod feed;
pub mod indicator;
pub mod logger;
pub mod paths;
pub mod regime;
pub mod shutdown;
pub mod state;
pub mod stops;
pub mod trader;
