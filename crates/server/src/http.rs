//! Thin Axum HTTP layer (spec §6): seven routes, each either reading local
//! state directly or handing an inbound activity to a durable queue. No
//! business logic lives here beyond request/response shaping.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use snac_common::error::{AppError, AppResult};
use snac_common::value::{get_id, is_public};
use snac_federation::activities::{self, IdTag};
use snac_federation::signature::verify_digest;
use snac_federation::AppContext;
use snac_queue::{DirQueue, InputRequest, QueueItem};
use snac_store::layout::relation;
use tower_http::trace::TraceLayer;

const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// Build the server's Axum router bound to one context.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/{uid}", get(get_actor))
        .route("/{uid}/inbox", post(post_user_inbox))
        .route("/{uid}/outbox", get(get_outbox))
        .route("/{uid}/followers", get(get_followers))
        .route("/{uid}/following", get(get_following))
        .route("/{uid}/p/{tid}", get(get_note))
        .route("/shared-inbox", post(post_shared_inbox))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn require_accepts_activity_json(headers: &HeaderMap) -> AppResult<()> {
    let Some(accept) = headers.get(ACCEPT) else { return Ok(()) };
    let accept = accept.to_str().unwrap_or_default();
    if accept.is_empty() || accept.contains("activity+json") || accept.contains("ld+json") || accept.contains("*/*") {
        Ok(())
    } else {
        Err(AppError::Validation("Accept header must include application/activity+json or application/ld+json".into()))
    }
}

async fn get_actor(State(ctx): State<AppContext>, Path(uid): Path<String>, headers: HeaderMap) -> Result<Response, AppError> {
    require_accepts_activity_json(&headers)?;
    if !ctx.users.exists(&uid) {
        return Err(AppError::NotFound(format!("no such user: {uid}")));
    }
    let record = ctx.users.load(&uid)?;
    let keys = ctx.users.load_keypair(&uid)?;
    let actor = activities::msg_actor(&ctx, &uid, &record, &keys.public_pem);
    Ok(([(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)], Json(actor)).into_response())
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_lowercase(), v.to_string())))
        .collect()
}

async fn ingest_inbox(ctx: &AppContext, uid: Option<String>, path: String, headers: HeaderMap, body: axum::body::Bytes) -> Result<StatusCode, AppError> {
    if let Some(digest_header) = headers.get("digest").and_then(|v| v.to_str().ok()) {
        if !verify_digest(&body, digest_header) {
            return Err(AppError::Validation("digest mismatch".into()));
        }
    }

    let message: Value = serde_json::from_slice(&body)?;
    let req = InputRequest { method: "POST".to_string(), path, headers: headers_to_map(&headers), uid: uid.clone() };
    let item = QueueItem::Input { message, req, retries: 0 };

    let queue = match &uid {
        Some(uid) => DirQueue::new(ctx.users.queue_dir(uid)),
        None => DirQueue::new(ctx.base.global_queue_dir()),
    };
    queue.enqueue(&item, Utc::now())?;
    Ok(StatusCode::ACCEPTED)
}

async fn post_user_inbox(
    State(ctx): State<AppContext>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, AppError> {
    if !ctx.users.exists(&uid) {
        return Err(AppError::NotFound(format!("no such user: {uid}")));
    }
    ingest_inbox(&ctx, Some(uid.clone()), format!("/{uid}/inbox"), headers, body).await
}

async fn post_shared_inbox(State(ctx): State<AppContext>, headers: HeaderMap, body: axum::body::Bytes) -> Result<StatusCode, AppError> {
    ingest_inbox(&ctx, None, "/shared-inbox".to_string(), headers, body).await
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_page_size")]
    n: usize,
}

const fn default_page_size() -> usize {
    20
}

async fn get_outbox(
    State(ctx): State<AppContext>,
    Path(uid): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Response, AppError> {
    if !ctx.users.exists(&uid) {
        return Err(AppError::NotFound(format!("no such user: {uid}")));
    }
    let actor_url = ctx.actor_url(&uid);
    let digests = ctx.users.public_timeline(&uid, page.skip, page.n)?;

    let items: Vec<Value> = digests
        .iter()
        .filter_map(|digest| ctx.objects.get_by_md5(digest).ok())
        .filter(|note| is_public(note))
        .map(|note| {
            let note_id = get_id(&note).unwrap_or_default().to_string();
            activities::msg_base(&ctx.config.base_url(), "Create", IdTag::Wrapper(&note_id), &actor_url, note)
        })
        .collect();

    let collection = json!({
        "type": "OrderedCollection",
        "id": format!("{actor_url}/outbox"),
        "totalItems": items.len(),
        "orderedItems": items,
    });
    Ok(([(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)], Json(collection)).into_response())
}

async fn relation_collection(ctx: &AppContext, uid: &str, relation: &str) -> Result<Response, AppError> {
    if !ctx.users.exists(uid) {
        return Err(AppError::NotFound(format!("no such user: {uid}")));
    }
    let count = ctx.users.relation_list(uid, relation)?.len();
    let collection = json!({
        "type": "OrderedCollection",
        "totalItems": count,
        "orderedItems": Vec::<Value>::new(),
    });
    Ok(([(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)], Json(collection)).into_response())
}

async fn get_followers(State(ctx): State<AppContext>, Path(uid): Path<String>) -> Result<Response, AppError> {
    relation_collection(&ctx, &uid, relation::FOLLOWERS).await
}

async fn get_following(State(ctx): State<AppContext>, Path(uid): Path<String>) -> Result<Response, AppError> {
    relation_collection(&ctx, &uid, relation::FOLLOWING).await
}

async fn get_note(State(ctx): State<AppContext>, Path((uid, tid)): Path<(String, String)>) -> Result<Response, AppError> {
    if !ctx.users.exists(&uid) {
        return Err(AppError::NotFound(format!("no such user: {uid}")));
    }
    let note_id = format!("{}/p/{tid}", ctx.actor_url(&uid));
    let note = ctx.objects.get(&note_id).map_err(|_| AppError::NotFound(format!("no such note: {note_id}")))?;
    if !is_public(&note) {
        return Err(AppError::NotFound(format!("no such note: {note_id}")));
    }
    Ok(([(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)], Json(note)).into_response())
}
