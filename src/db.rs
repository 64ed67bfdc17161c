//! Trade journal
//!
//! Append-only SQLite record of every order the engine submits and its
//! terminal outcome. Used for post-session reconciliation against the
//! broker's order history (matched by the identity-tagged client id).

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::broker::{OrderIntent, OrderOutcome};
use crate::logger::{self, LogTag};
use crate::paths;

static JOURNAL: Lazy<Mutex<Option<Connection>>> = Lazy::new(|| Mutex::new(None));

/// Open (or create) the journal database
pub fn initialize_trade_journal() -> Result<()> {
    let conn = Connection::open(paths::trade_journal_db_path())
        .context("opening trade journal database")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id TEXT NOT NULL UNIQUE,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            order_type TEXT NOT NULL,
            qty INTEGER NOT NULL,
            limit_price REAL,
            outcome TEXT,
            filled_qty INTEGER NOT NULL DEFAULT 0,
            avg_fill_price REAL,
            submitted_at TEXT NOT NULL,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);",
    )
    .context("creating journal schema")?;

    *JOURNAL.lock() = Some(conn);
    logger::debug(LogTag::Journal, "trade journal ready");
    Ok(())
}

/// Record a submitted order before its outcome is known
pub fn record_submission(intent: &OrderIntent) -> Result<()> {
    let guard = JOURNAL.lock();
    let conn = match guard.as_ref() {
        Some(c) => c,
        None => return Ok(()), // journal disabled (tests)
    };
    conn.execute(
        "INSERT OR IGNORE INTO orders
            (client_id, symbol, side, order_type, qty, limit_price, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            intent.client_id,
            intent.symbol,
            intent.side.as_str(),
            format!("{:?}", intent.order_type),
            intent.qty,
            intent.limit_price,
            intent.created_at.to_rfc3339(),
        ],
    )
    .context("inserting order submission")?;
    Ok(())
}

/// Record the terminal outcome of a previously submitted order
pub fn record_outcome(client_id: &str, outcome: &OrderOutcome) -> Result<()> {
    let guard = JOURNAL.lock();
    let conn = match guard.as_ref() {
        Some(c) => c,
        None => return Ok(()),
    };
    conn.execute(
        "UPDATE orders
            SET outcome = ?1, filled_qty = ?2, avg_fill_price = ?3, resolved_at = ?4
          WHERE client_id = ?5",
        params![
            outcome.label(),
            outcome.filled_qty(),
            outcome.avg_price(),
            chrono::Utc::now().to_rfc3339(),
            client_id,
        ],
    )
    .context("updating order outcome")?;
    Ok(())
}

/// Number of orders recorded this session (summary logging)
pub fn order_count() -> Result<i64> {
    let guard = JOURNAL.lock();
    let conn = match guard.as_ref() {
        Some(c) => c,
        None => return Ok(0),
    };
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
        .context("counting journal orders")?;
    Ok(count)
}

/// Delete the journal database (used by --reset)
pub fn delete_trade_journal() -> Result<()> {
    *JOURNAL.lock() = None;
    let path = paths::trade_journal_db_path();
    if path.exists() {
        std::fs::remove_file(&path).context("deleting trade journal")?;
        logger::info(LogTag::Journal, "trade journal deleted");
    }
    Ok(())
}
