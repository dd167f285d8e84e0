//! Outbound-delivery boundary (spec §4.5/§4.7).
//!
//! `snac-queue` depends on `snac-federation` (it drives `inbox::process` and
//! `fetch`), so `snac-federation` cannot depend back on `snac-queue` to
//! enqueue the replies its own inbox handlers build (`Accept`, `Pong`,
//! `Follow`/`Undo(Follow)` for `Move`). This trait is the seam: the queue
//! crate implements it against the real on-disk per-user queue, and the
//! inbox pipeline only ever sees the trait object.

use serde_json::Value;

use crate::error::AppResult;

/// Schedules a locally-authored activity for delivery fan-out.
pub trait OutboundQueue: Send + Sync {
    /// Enqueue `message` to be delivered on behalf of `uid`.
    fn enqueue_message(&self, uid: &str, message: Value) -> AppResult<()>;
}

/// Drops everything handed to it; used in tests and anywhere reply delivery
/// is not wired up.
#[derive(Debug, Clone, Default)]
pub struct NullOutboundQueue;

impl OutboundQueue for NullOutboundQueue {
    fn enqueue_message(&self, _uid: &str, _message: Value) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_outbound_queue_never_fails() {
        let q = NullOutboundQueue;
        q.enqueue_message("alice", json!({"type": "Accept"})).unwrap();
    }
}
