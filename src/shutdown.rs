//! Shutdown coordination
//!
//! A single global flag raised by the operator interrupt. The decision loop
//! checks it between suspension points; the polling delay and the reactive
//! queue read both race against `wait_for_shutdown` so ctrl-c interrupts
//! them immediately. On shutdown the trader attempts one best-effort
//! liquidation pass; if that cannot complete the position stays owned in
//! persisted state so a restart resumes management.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use crate::logger::{self, LogTag};

struct ShutdownFlag {
    requested: AtomicBool,
    notify: Notify,
}

static SHUTDOWN: Lazy<ShutdownFlag> = Lazy::new(|| ShutdownFlag {
    requested: AtomicBool::new(false),
    notify: Notify::new(),
});

/// Install the ctrl-c handler; call once at startup
pub fn install_ctrlc_handler() {
    let result = ctrlc::set_handler(|| {
        request_shutdown();
    });
    if let Err(e) = result {
        logger::warning(
            LogTag::Shutdown,
            &format!("could not install ctrl-c handler: {}", e),
        );
    }
}

pub fn request_shutdown() {
    if !SHUTDOWN.requested.swap(true, Ordering::AcqRel) {
        logger::warning(LogTag::Shutdown, "shutdown requested");
    }
    SHUTDOWN.notify.notify_waiters();
}

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN.requested.load(Ordering::Acquire)
}

/// Resolves when shutdown is requested; resolves immediately if it already
/// was.
pub async fn wait_for_shutdown() {
    if is_shutdown_requested() {
        return;
    }
    let notified = SHUTDOWN.notify.notified();
    if is_shutdown_requested() {
        return;
    }
    notified.await;
}

/// Sleep that aborts early on shutdown; returns false if interrupted
pub async fn interruptible_sleep(duration: std::time::Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = wait_for_shutdown() => false,
    }
}
