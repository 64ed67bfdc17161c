//! Order outcome mapping

use crate::broker::{OrderOutcome, OrderSnapshot, OrderStatus};

/// Map a terminal (or timed-out) snapshot to a typed outcome
pub fn outcome_from(snapshot: &OrderSnapshot, requested_qty: i64) -> OrderOutcome {
    let filled = snapshot.filled_qty;
    let avg = snapshot.avg_fill_price;
    match snapshot.status {
        OrderStatus::Filled => OrderOutcome::Filled {
            qty: if filled > 0 { filled } else { requested_qty },
            avg_price: avg.unwrap_or(0.0),
        },
        OrderStatus::Canceled | OrderStatus::Expired if filled > 0 => {
            OrderOutcome::PartiallyFilled {
                qty: filled,
                avg_price: avg.unwrap_or(0.0),
            }
        }
        OrderStatus::Canceled => OrderOutcome::Canceled,
        OrderStatus::Expired => OrderOutcome::Expired,
        OrderStatus::Rejected => OrderOutcome::Rejected,
        // Never reached terminal within the polling budget
        _ => OrderOutcome::TimedOut {
            filled_qty: filled,
            avg_price: avg,
        },
    }
}
