//! Market data feed
//!
//! The producer side of the reactive pipeline: a websocket task pushes
//! trade ticks into a bounded drop-oldest queue that the single decision
//! loop consumes. The supervisor owns subscription, staleness detection
//! and reconnection.

mod queue;
mod stream;
mod supervisor;

pub use queue::TickQueue;
pub use stream::{run_stream, StreamConfig};
pub use supervisor::StreamingSupervisor;

use chrono::{DateTime, Utc};

/// One trade tick from the venue
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub at: DateTime<Utc>,
}
