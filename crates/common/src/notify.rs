//! Notification sink boundary.
//!
//! Spec §1 treats email/Telegram/push delivery as "external sinks that
//! consume opaque message bodies". The queue enqueues one `email`/
//! `telegram`/`ntfy` item per outbound notification; each carries a
//! [`NotifyBody`] that a concrete [`Sink`] impl turns into a real message.
//! The inbox pipeline and core engine never depend on a concrete sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Opaque payload handed to a notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyBody {
    /// Local user the notification is for.
    pub uid: String,
    /// Short machine-readable kind, e.g. `"follow"`, `"like"`, `"mention"`.
    pub kind: String,
    /// Human-readable summary, already rendered by the caller.
    pub summary: String,
}

/// A delivery sink for [`NotifyBody`] payloads.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver `body`. Errors are logged by the caller and not retried —
    /// notification delivery is best-effort.
    async fn send(&self, body: &NotifyBody) -> AppResult<()>;
}

/// A sink that only logs; used when a channel is disabled or unconfigured.
#[derive(Debug, Clone, Default)]
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    async fn send(&self, body: &NotifyBody) -> AppResult<()> {
        tracing::debug!(uid = %body.uid, kind = %body.kind, "notification sink disabled, dropping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_never_fails() {
        let sink = NullSink;
        let body = NotifyBody {
            uid: "alice".into(),
            kind: "follow".into(),
            summary: "bob followed you".into(),
        };
        sink.send(&body).await.unwrap();
    }
}
