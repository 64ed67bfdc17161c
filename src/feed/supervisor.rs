//! Streaming supervisor
//!
//! Owns the producer lifecycle: runs stream sessions, watches for
//! staleness, and reconnects under a cooldown so a flapping venue cannot
//! cause a reconnect storm. Staleness outside session hours is expected
//! (no trades print) and does not trigger reconnects.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::stream::{run_stream, StreamConfig};
use super::TickQueue;
use crate::config::FeedSettings;
use crate::logger::{self, LogTag};
use crate::regime::SessionClock;
use crate::shutdown;

pub struct StreamingSupervisor {
    stream_config: StreamConfig,
    settings: FeedSettings,
    clock: SessionClock,
    queue: Arc<TickQueue>,
    last_tick_at: Arc<Mutex<Option<Instant>>>,
    last_connect_at: Mutex<Option<Instant>>,
}

impl StreamingSupervisor {
    pub fn new(stream_config: StreamConfig, settings: FeedSettings, clock: SessionClock) -> Self {
        let capacity = settings.queue_capacity;
        Self {
            stream_config,
            settings,
            clock,
            queue: Arc::new(TickQueue::new(capacity)),
            last_tick_at: Arc::new(Mutex::new(None)),
            last_connect_at: Mutex::new(None),
        }
    }

    /// The queue the decision loop consumes from
    pub fn queue(&self) -> Arc<TickQueue> {
        self.queue.clone()
    }

    /// Seconds since the last tick arrived, if any has
    pub fn staleness(&self) -> Option<Duration> {
        self.last_tick_at.lock().map(|t| t.elapsed())
    }

    /// Spawn the supervision loop; runs until shutdown
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        while !shutdown::is_shutdown_requested() {
            self.enforce_reconnect_cooldown().await;
            if shutdown::is_shutdown_requested() {
                break;
            }

            self.mark_session_start();
            let session = run_stream(
                &self.stream_config,
                self.queue.clone(),
                self.last_tick_at.clone(),
            );

            tokio::select! {
                result = session => match result {
                    Ok(()) => break, // clean shutdown exit
                    Err(e) => {
                        logger::warning(LogTag::Feed, &format!("stream session ended: {}", e));
                    }
                },
                _ = self.watch_staleness() => {
                    logger::warning(
                        LogTag::Feed,
                        &format!(
                            "no ticks for {}s during session hours; reconnecting",
                            self.settings.staleness_secs
                        ),
                    );
                }
            }
        }
        logger::info(LogTag::Feed, "streaming supervisor stopped");
    }

    /// Seed both clocks at connect time. A session that never delivers a
    /// single tick must still go stale `staleness_secs` after connecting,
    /// so the connect counts as the first tick.
    fn mark_session_start(&self) {
        let now = Instant::now();
        *self.last_connect_at.lock() = Some(now);
        *self.last_tick_at.lock() = Some(now);
    }

    /// Stale once `threshold` has elapsed since the last tick (or since
    /// connect, whichever is more recent). Before any session has started
    /// there is nothing to supervise.
    fn is_feed_stale(&self, threshold: Duration) -> bool {
        self.last_tick_at
            .lock()
            .map(|t| t.elapsed() >= threshold)
            .unwrap_or(false)
    }

    /// Remaining cooldown before the next connect attempt, if any
    fn reconnect_delay(&self) -> Option<Duration> {
        let cooldown = Duration::from_secs(self.settings.reconnect_cooldown_secs);
        (*self.last_connect_at.lock()).and_then(|t| cooldown.checked_sub(t.elapsed()))
    }

    /// Resolves when the feed has gone stale during session hours.
    /// Dropping this future (via select) tears down the stream session.
    async fn watch_staleness(&self) {
        let threshold = Duration::from_secs(self.settings.staleness_secs);
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !self.clock.is_session_open(chrono::Utc::now()) {
                continue;
            }
            if self.is_feed_stale(threshold) {
                return;
            }
        }
    }

    async fn enforce_reconnect_cooldown(&self) {
        if let Some(remaining) = self.reconnect_delay() {
            logger::debug(
                LogTag::Feed,
                &format!("reconnect cooldown: {:.0}s", remaining.as_secs_f64()),
            );
            shutdown::interruptible_sleep(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;

    fn supervisor() -> StreamingSupervisor {
        let stream_config = StreamConfig {
            url: "wss://example.invalid/v2/test".to_string(),
            key_id: "key".to_string(),
            secret: "secret".to_string(),
            symbols: vec!["QQQ".to_string()],
        };
        let clock = SessionClock::from_settings(&SessionSettings::default()).unwrap();
        StreamingSupervisor::new(stream_config, FeedSettings::default(), clock)
    }

    #[test]
    fn never_connected_is_not_stale() {
        let sup = supervisor();
        assert!(!sup.is_feed_stale(Duration::from_secs(0)));
    }

    #[test]
    fn silent_session_goes_stale_after_connect() {
        let sup = supervisor();
        sup.mark_session_start();
        // No ticks ever arrive; the connect itself starts the clock
        assert!(!sup.is_feed_stale(Duration::from_secs(600)));
        assert!(sup.is_feed_stale(Duration::from_secs(0)));
    }

    #[test]
    fn old_tick_is_stale_fresh_tick_is_not() {
        let sup = supervisor();
        *sup.last_tick_at.lock() = Some(Instant::now() - Duration::from_secs(30));
        assert!(sup.is_feed_stale(Duration::from_secs(10)));

        *sup.last_tick_at.lock() = Some(Instant::now());
        assert!(!sup.is_feed_stale(Duration::from_secs(10)));
    }

    #[test]
    fn reconnect_delay_enforces_cooldown() {
        let sup = supervisor();
        assert_eq!(sup.reconnect_delay(), None);

        sup.mark_session_start();
        let remaining = sup.reconnect_delay().unwrap();
        assert!(remaining <= Duration::from_secs(15));
        assert!(remaining > Duration::from_secs(10));

        *sup.last_connect_at.lock() = Some(Instant::now() - Duration::from_secs(60));
        assert_eq!(sup.reconnect_delay(), None);
    }
}
