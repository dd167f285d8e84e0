//! Worker pool: consumes dispatched entries from the in-memory FIFO and
//! executes the side effect each queue item kind names (spec §4.4/§4.8).

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use snac_common::error::AppError;
use snac_common::notify::NotifyBody;
use snac_federation::signature::HttpSigner;
use snac_federation::{fetch, inbox, AppContext, RequestHeaders};
use snac_store::Archive;
use tokio::sync::mpsc;

use crate::dirqueue::DirQueue;
use crate::dispatcher::DispatchedEntry;
use crate::item::{InputRequest, QueueItem};
use crate::retry;

/// Run `concurrency` worker tasks draining `rx` until the channel closes.
pub async fn run_pool(ctx: AppContext, rx: mpsc::UnboundedReceiver<DispatchedEntry>, concurrency: usize) {
    let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
    let mut handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let ctx = ctx.clone();
        let rx = rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let dispatched = { rx.lock().await.recv().await };
                match dispatched {
                    Some(d) => process_one(&ctx, d).await,
                    None => break,
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn process_one(ctx: &AppContext, dispatched: DispatchedEntry) {
    let DispatchedEntry { entry, queue, uid } = dispatched;
    let path = entry.path.clone();

    match entry.item {
        QueueItem::Input { message, req, retries } => {
            process_input(ctx, &queue, &path, message, req, retries, uid).await;
        }
        QueueItem::Output { message, inbox, keyid, seckey, retries, p_status } => {
            process_output(ctx, &queue, &path, message, inbox, keyid, seckey, retries, p_status).await;
        }
        QueueItem::Message { message } => {
            if let Err(e) = fan_out_message(ctx, uid.as_deref(), &message).await {
                tracing::warn!(error = %e, "failed to fan out locally authored message");
            }
            let _ = queue.remove(&path);
        }
        QueueItem::Email { to, subject, body } => {
            notify_channel(ctx, "email", &format!("{to}: {subject}\n{body}")).await;
            let _ = queue.remove(&path);
        }
        QueueItem::Telegram { chat_id, text } => {
            notify_channel(ctx, "telegram", &format!("{chat_id}: {text}")).await;
            let _ = queue.remove(&path);
        }
        QueueItem::Ntfy { topic, text } => {
            notify_channel(ctx, "ntfy", &format!("{topic}: {text}")).await;
            let _ = queue.remove(&path);
        }
        QueueItem::CloseQuestion { message } => {
            if let Err(e) = snac_federation::activities::update_question(ctx, &message) {
                tracing::warn!(poll = %message, error = %e, "failed to close poll");
            }
            let _ = queue.remove(&path);
        }
        QueueItem::ObjectRequest { message } => {
            if let Err(e) = fetch::fetch(ctx, &message, None).await {
                tracing::warn!(url = %message, error = %e, "deferred object fetch failed");
            }
            let _ = queue.remove(&path);
        }
        QueueItem::ActorRefresh { actor } => {
            if let Err(e) = fetch::actor_fetch(ctx, &actor, None).await {
                tracing::warn!(actor = %actor, error = %e, "actor refresh failed");
            }
            let _ = queue.remove(&path);
        }
        QueueItem::VerifyLinks | QueueItem::Purge => {
            // Dispatched to the server's own verify-links/purge passes, which
            // run on a schedule rather than through this generic worker.
            let _ = queue.remove(&path);
        }
    }
}

async fn process_input(
    ctx: &AppContext,
    queue: &DirQueue,
    path: &std::path::Path,
    message: Value,
    req: InputRequest,
    retries: u32,
    queue_uid: Option<String>,
) {
    let uid = req.uid.clone().or(queue_uid);
    let headers = RequestHeaders { method: req.method.clone(), path: req.path.clone(), headers: req.headers.clone() };

    let outcome = inbox::process(ctx, uid.as_deref(), &message, &headers).await;
    match outcome {
        snac_federation::Outcome::Done | snac_federation::Outcome::Fatal => {
            let _ = queue.remove(path);
        }
        snac_federation::Outcome::Retry => {
            if retries + 1 >= ctx.config.queue_retry_max {
                archive_drop(ctx, "input", &message);
                let _ = queue.remove(path);
                return;
            }
            let item = QueueItem::Input { message, req, retries: retries + 1 };
            let earliest = Utc::now() + chrono::Duration::seconds(retry::backoff_seconds(&ctx.config, retries + 1));
            let _ = queue.requeue(path, &item, earliest);
        }
        snac_federation::Outcome::Fanout => {
            let _ = queue.remove(path);
            for recipient in inbox::locally_addressed_uids(ctx, &message) {
                let per_user = DirQueue::new(ctx.users.queue_dir(&recipient));
                let item = QueueItem::Input {
                    message: message.clone(),
                    req: InputRequest { uid: Some(recipient), ..req.clone() },
                    retries: 0,
                };
                let _ = per_user.enqueue(&item, Utc::now());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_output(
    ctx: &AppContext,
    queue: &DirQueue,
    path: &std::path::Path,
    message: Value,
    inbox_url: String,
    keyid: String,
    seckey: String,
    retries: u32,
    p_status: i32,
) {
    let timeout = Duration::from_secs(retry::timeout_seconds(&ctx.config, p_status));
    let status = deliver_once(ctx, &message, &inbox_url, &keyid, &seckey, timeout).await;

    if (200..300).contains(&status) {
        let _ = queue.remove(path);
        return;
    }

    if retry::is_fatal(status) {
        archive_drop(ctx, "output", &message);
        let _ = queue.remove(path);
        return;
    }

    let next_retries = retry::next_retries(p_status, retries);
    if next_retries >= ctx.config.queue_retry_max {
        tracing::info!(inbox = %inbox_url, "giving up on delivery after retry limit");
        let _ = queue.remove(path);
        return;
    }

    let item = QueueItem::Output { message, inbox: inbox_url, keyid, seckey, retries: next_retries, p_status: status };
    let earliest = Utc::now() + chrono::Duration::seconds(retry::backoff_seconds(&ctx.config, next_retries));
    let _ = queue.requeue(path, &item, earliest);
}

async fn deliver_once(ctx: &AppContext, message: &Value, inbox_url: &str, keyid: &str, seckey: &str, timeout: Duration) -> i32 {
    let Ok(url) = url::Url::parse(inbox_url) else { return -1 };
    let body = match serde_json::to_vec(message) {
        Ok(b) => b,
        Err(_) => return -1,
    };

    let signer = match HttpSigner::new(seckey, keyid.to_string()) {
        Ok(s) => s,
        Err(_) => return -1,
    };
    let mut additional = std::collections::HashMap::new();
    additional.insert("content-type".to_string(), "application/activity+json".to_string());
    let headers = match signer.sign_request("POST", &url, Some(body.as_slice()), &additional) {
        Ok(h) => h,
        Err(_) => return -1,
    };

    let mut req = ctx
        .http
        .post(url)
        .timeout(timeout)
        .header("content-type", "application/activity+json")
        .body(body);
    for (name, value) in headers.iter() {
        req = req.header(name, value.clone());
    }

    match req.send().await {
        Ok(resp) => i32::from(resp.status().as_u16()),
        Err(e) => {
            if e.is_timeout() {
                retry::TIMEOUT_STATUS
            } else {
                -1
            }
        }
    }
}

async fn fan_out_message(ctx: &AppContext, uid: Option<&str>, message: &Value) -> Result<(), AppError> {
    let Some(uid) = uid else {
        return Err(AppError::Internal("message item missing owning uid".into()));
    };
    let recipients = snac_federation::delivery::recipients(message, uid, ctx, true);
    let recipients = snac_federation::delivery::expand_local_followers(ctx, uid, recipients)?;
    let mut inboxes = snac_federation::delivery::resolve_inboxes(ctx, &recipients).await?;

    if snac_common::value::is_public(message) {
        let instance_wide = snac_federation::delivery::instance_wide_shared_inboxes(ctx, &inboxes)?;
        inboxes.extend(instance_wide);
    }

    let keys = ctx.users.load_keypair(uid)?;
    let keyid = format!("{}#main-key", ctx.actor_url(uid));
    let per_user_queue = DirQueue::new(ctx.users.queue_dir(uid));
    let timeout = Duration::from_secs(retry::timeout_seconds(&ctx.config, 0));

    for inbox_url in inboxes {
        // A fresh item (retries == 0) is handed straight to delivery instead
        // of round-tripping through disk; only a failed attempt gets queued.
        let status = deliver_once(ctx, message, &inbox_url, &keyid, &keys.private_pem, timeout).await;
        if (200..300).contains(&status) {
            continue;
        }

        let item = QueueItem::Output {
            message: message.clone(),
            inbox: inbox_url,
            keyid: keyid.clone(),
            seckey: keys.private_pem.clone(),
            retries: 0,
            p_status: status,
        };
        per_user_queue.enqueue(&item, Utc::now())?;
    }
    Ok(())
}

async fn notify_channel(ctx: &AppContext, kind: &str, summary: &str) {
    let body = NotifyBody { uid: String::new(), kind: kind.to_string(), summary: summary.to_string() };
    let _ = ctx.notify.send(&body).await;
}

fn archive_drop(ctx: &AppContext, tag: &str, message: &Value) {
    let archive = Archive::new(ctx.base.clone());
    if let Ok(body) = serde_json::to_vec_pretty(message) {
        let _ = archive.record(tag, &body);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn ctx() -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().unwrap();
        let base = snac_store::Basedir::new(dir.path());
        let config = snac_common::config::ServerConfig::new("example.com".to_string());
        let ctx = AppContext::new(
            base,
            config,
            Arc::new(snac_mfm::DefaultFormatter),
            Arc::new(snac_common::webfinger::HttpResolver::new("test".to_string())),
            Arc::new(snac_common::notify::NullSink),
            Arc::new(snac_common::outbound::NullOutboundQueue),
        );
        (dir, ctx)
    }

    #[tokio::test]
    async fn deliver_once_rejects_an_unparseable_inbox_url() {
        let (_dir, ctx) = ctx();
        let message = json!({"type": "Note"});
        let status = deliver_once(&ctx, &message, "not a url", "keyid", "not a key", Duration::from_millis(200)).await;
        assert_eq!(status, -1);
    }

    #[tokio::test]
    async fn deliver_once_rejects_an_invalid_signing_key() {
        let (_dir, ctx) = ctx();
        let message = json!({"type": "Note"});
        let status = deliver_once(&ctx, &message, "https://example.invalid/inbox", "keyid", "not a pem", Duration::from_millis(200)).await;
        assert_eq!(status, -1);
    }

    #[tokio::test]
    async fn fan_out_message_without_an_owning_uid_is_an_error() {
        let (_dir, ctx) = ctx();
        let message = json!({"to": ["https://b.example/actor"]});
        assert!(fan_out_message(&ctx, None, &message).await.is_err());
    }

    #[tokio::test]
    async fn fan_out_message_queues_an_output_item_when_immediate_delivery_fails() {
        let (_dir, ctx) = ctx();
        ctx.users.create("alice", "Alice", "Person").unwrap();

        // Caching the remote actor document directly (rather than over the
        // network) lets resolve_inboxes find an inbox without a live server;
        // that inbox points at a closed port, so delivery fails and the
        // fresh item falls back to being queued on disk.
        let remote_actor = "https://remote.example/actor";
        let remote_doc = json!({
            "id": remote_actor,
            "type": "Person",
            "inbox": "http://127.0.0.1:1/inbox",
        });
        ctx.objects.put(remote_actor, &remote_doc, true).unwrap();

        let message = json!({"type": "Note", "to": [remote_actor]});
        fan_out_message(&ctx, Some("alice"), &message).await.unwrap();

        let per_user_queue = DirQueue::new(ctx.users.queue_dir("alice"));
        let ready = per_user_queue.ready(Utc::now()).unwrap();
        assert_eq!(ready.len(), 1);
        match &ready[0].item {
            QueueItem::Output { inbox, retries, .. } => {
                assert_eq!(inbox, "http://127.0.0.1:1/inbox");
                assert_eq!(*retries, 0);
            }
            other => panic!("expected a queued Output item, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_message_skips_the_queue_entirely_when_delivery_succeeds_immediately() {
        let (_dir, ctx) = ctx();
        ctx.users.create("alice", "Alice", "Person").unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });

        let remote_actor = "https://remote.example/actor2";
        let remote_doc = json!({
            "id": remote_actor,
            "type": "Person",
            "inbox": format!("http://127.0.0.1:{port}/inbox"),
        });
        ctx.objects.put(remote_actor, &remote_doc, true).unwrap();

        let message = json!({"type": "Note", "to": [remote_actor]});
        fan_out_message(&ctx, Some("alice"), &message).await.unwrap();

        let per_user_queue = DirQueue::new(ctx.users.queue_dir("alice"));
        let ready = per_user_queue.ready(Utc::now()).unwrap();
        assert!(ready.is_empty(), "a successful immediate delivery should never touch disk");
    }
}
