//! Remote object fetching (spec §4.4), including actor resolution with a
//! staleness-driven refresh cycle.

use std::collections::HashMap;

use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use snac_common::error::{AppError, AppResult};
use snac_common::value::get_id;
use url::Url;

use crate::context::AppContext;
use crate::signature::HttpSigner;

/// Recursion cap on `inReplyTo` backfill for a freshly-seen thread, matching
/// the original engine's conversation-walk limit.
pub const MAX_CONVERSATION_LEVELS: u32 = 20;

/// How long a cached actor document is trusted before a fetch is required
/// again (spec §4.4: "36-hour staleness").
pub const ACTOR_STALE_AFTER_HOURS: i64 = 36;

const ACCEPT_VALUE: &str = "application/activity+json, application/ld+json";

/// Outcome of a remote fetch. `status == 0` means the request never reached
/// the peer (DNS/connect/timeout failure) rather than a protocol status.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub object: Option<Value>,
}

impl FetchResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Fetch the `ActivityPub` object at `id`. Signs the request with `as_user`'s
/// key when given. Preserves the original engine's documented Misskey quirk
/// verbatim: a signed request answered with a transport failure or any
/// 5xx is retried exactly once, unsigned, since some Misskey deployments
/// reject correctly-signed `GET`s with a 5xx yet answer the same request fine
/// when unsigned.
pub async fn fetch(ctx: &AppContext, id: &str, as_user: Option<&str>) -> AppResult<FetchResult> {
    let url = Url::parse(id).map_err(|e| AppError::Validation(format!("bad object id {id}: {e}")))?;
    let host = url.host_str().unwrap_or_default().to_string();

    if ctx.instance.is_blocked(&host) {
        return Err(AppError::Policy(format!("instance blocked: {host}")));
    }

    let first = fetch_once(ctx, &url, as_user).await;
    let was_signed = as_user.is_some();

    let needs_retry = match &first {
        Ok(r) => !r.is_success() && (r.status == 0 || (500..=599).contains(&r.status)),
        Err(_) => true,
    };

    if was_signed && needs_retry {
        return fetch_once(ctx, &url, None).await;
    }

    first
}

async fn fetch_once(ctx: &AppContext, url: &Url, as_user: Option<&str>) -> AppResult<FetchResult> {
    let mut req = ctx.http.get(url.clone()).header(ACCEPT, ACCEPT_VALUE);

    if let Some(uid) = as_user {
        let keys = ctx.users.load_keypair(uid)?;
        let key_id = format!("{}#main-key", ctx.actor_url(uid));
        let signer = HttpSigner::new(&keys.private_pem, key_id)
            .map_err(|e| AppError::Internal(format!("signer setup failed: {e}")))?;
        let headers = signer
            .sign_request("GET", url, None, &HashMap::new())
            .map_err(|e| AppError::Internal(format!("signing failed: {e}")))?;
        for (name, value) in headers.iter() {
            req = req.header(name, value.clone());
        }
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            if e.is_timeout() || e.is_connect() {
                return Ok(FetchResult { status: 0, object: None });
            }
            return Err(e.into());
        }
    };

    let status = resp.status().as_u16();
    if !(200..300).contains(&status) {
        return Ok(FetchResult { status, object: None });
    }

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("activity+json") && !content_type.contains("ld+json") {
        return Err(AppError::Validation(format!("unexpected content-type: {content_type}")));
    }

    let bytes = resp.bytes().await?;
    let object: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Validation(format!("invalid JSON from {url}: {e}")))?;

    discover_shared_inbox(ctx, &object);

    Ok(FetchResult { status, object: Some(object) })
}

fn discover_shared_inbox(ctx: &AppContext, object: &Value) {
    if ctx.config.disable_inbox_collection {
        return;
    }
    let Some(shared) = object
        .get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
    else {
        return;
    };
    if let Ok(url) = Url::parse(shared) {
        if let Some(host) = url.host_str() {
            if !ctx.instance.is_blocked(host) {
                let _ = ctx.instance.shared_inbox_add(host);
            }
        }
    }
}

/// Fetch an actor, synthesizing a local actor document in place of a network
/// round-trip when `url` belongs to this instance, otherwise serving the
/// cached copy until it goes stale.
///
/// Returns `status == 205` when the cached copy is stale: the caller is
/// expected to enqueue an `actor_refresh` item and keep serving the cache in
/// the meantime rather than block on a synchronous refetch.
pub async fn actor_fetch(ctx: &AppContext, url: &str, as_user: Option<&str>) -> AppResult<FetchResult> {
    if ctx.is_local_actor(url) {
        let uid = ctx
            .local_uid(url)
            .ok_or_else(|| AppError::NotFound(format!("not a local actor: {url}")))?;
        let actor = local_actor_document(ctx, uid)?;
        return Ok(FetchResult { status: 200, object: Some(actor) });
    }

    if ctx.objects.exists(url) {
        let cached = ctx.objects.get(url)?;
        let mtime = ctx.objects.mtime(url)?;
        let age_hours = (Utc::now() - mtime).num_hours();
        if age_hours < ACTOR_STALE_AFTER_HOURS {
            return Ok(FetchResult { status: 200, object: Some(cached) });
        }
        return Ok(FetchResult { status: 205, object: Some(cached) });
    }

    let result = fetch(ctx, url, as_user).await?;
    if let Some(obj) = &result.object {
        let id = get_id(obj).unwrap_or(url);
        ctx.objects.put(id, obj, true)?;
    }
    Ok(result)
}

fn local_actor_document(ctx: &AppContext, uid: &str) -> AppResult<Value> {
    let record = ctx.users.load(uid)?;
    let keys = ctx.users.load_keypair(uid)?;
    let actor_url = ctx.actor_url(uid);

    Ok(serde_json::json!({
        "id": actor_url,
        "type": record.actor_type,
        "preferredUsername": record.uid,
        "name": record.name,
        "summary": record.bio,
        "icon": record.avatar_url.map(|u| serde_json::json!({"type": "Image", "url": u})),
        "image": record.header_url.map(|u| serde_json::json!({"type": "Image", "url": u})),
        "inbox": format!("{actor_url}/inbox"),
        "outbox": format!("{actor_url}/outbox"),
        "followers": format!("{actor_url}/followers"),
        "following": format!("{actor_url}/following"),
        "endpoints": { "sharedInbox": format!("{}/shared-inbox", ctx.config.base_url()) },
        "publicKey": {
            "id": format!("{actor_url}#main-key"),
            "owner": actor_url,
            "publicKeyPem": keys.public_pem,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_result_success_range() {
        assert!(FetchResult { status: 200, object: None }.is_success());
        assert!(!FetchResult { status: 404, object: None }.is_success());
        assert!(!FetchResult { status: 0, object: None }.is_success());
    }
}
