//! Queue item kinds (spec §4.4): a tagged record written to one of the two
//! durable queue directories.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of durable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueItem {
    /// An inbound activity awaiting inbox processing.
    Input {
        message: Value,
        req: InputRequest,
        #[serde(default)]
        retries: u32,
    },
    /// A signed `POST` awaiting delivery to one inbox.
    Output {
        message: Value,
        inbox: String,
        keyid: String,
        seckey: String,
        #[serde(default)]
        retries: u32,
        /// HTTP status (or transport code) from the previous attempt, used to
        /// detect a repeated timeout for the double-penalty rule.
        #[serde(default)]
        p_status: i32,
    },
    /// A locally authored activity to be fanned out to recipients.
    Message { message: Value },
    /// Outbound email notification.
    Email { to: String, subject: String, body: String },
    /// Outbound Telegram notification.
    Telegram { chat_id: String, text: String },
    /// Outbound ntfy.sh-style push notification.
    Ntfy { topic: String, text: String },
    /// Timer event: close a poll whose `endTime` has elapsed.
    CloseQuestion { message: String },
    /// Deferred fetch of a remote object by URL.
    ObjectRequest { message: String },
    /// Refresh a cached actor document if older than an hour.
    ActorRefresh { actor: String },
    /// Re-check profile-metadata `rel="me"` links.
    VerifyLinks,
    /// Trigger a purge pass.
    Purge,
}

/// The inbound HTTP request captured alongside an `input` item, replayed
/// into signature verification when the item is dequeued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub method: String,
    pub path: String,
    pub headers: std::collections::HashMap<String, String>,
    pub uid: Option<String>,
}

impl QueueItem {
    /// Attempt count carried by retryable kinds (`input`/`output`); other
    /// kinds are single-shot and report zero.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        match self {
            Self::Input { retries, .. } | Self::Output { retries, .. } => *retries,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_item_round_trips_through_json() {
        let item = QueueItem::Output {
            message: json!({"type": "Follow"}),
            inbox: "https://remote/inbox".to_string(),
            keyid: "https://local/alice#main-key".to_string(),
            seckey: "pem".to_string(),
            retries: 2,
            p_status: 599,
        };
        let bytes = serde_json::to_vec(&item).unwrap();
        let back: QueueItem = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.retries(), 2);
    }

    #[test]
    fn purge_item_has_no_fields() {
        let item = QueueItem::Purge;
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value, json!({"type": "purge"}));
    }
}
