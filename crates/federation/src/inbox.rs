//! The inbox processing pipeline (spec §4.5): classify, verify, route, and
//! apply an incoming activity to local state.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;
use snac_common::digest::md5_hex;
use snac_common::error::AppError;
use snac_common::notify::NotifyBody;
use snac_common::value::{get_actor, get_attributed_to, get_id, get_in_reply_to, get_object_embedded, get_object_id, get_str, get_str_or_list, get_type, is_public};
use snac_store::layout::relation;
use snac_store::object::AdmireKind;

use crate::context::AppContext;
use crate::delivery::recipients;
use crate::fetch::{actor_fetch, fetch, MAX_CONVERSATION_LEVELS};
use crate::signature::HttpVerifier;

/// Outcome of processing one inbound activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Permanently rejected; do not retry.
    Fatal,
    /// Transient failure; requeue.
    Retry,
    /// Applied (or intentionally ignored) successfully.
    Done,
    /// Actor resolution was transient and there is no target user (shared
    /// inbox delivery): hand the activity to every locally-addressed user's
    /// queue instead of failing outright.
    Fanout,
}

/// Raw headers carried by the inbound HTTP request, used for deferred
/// signature verification.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

static ADD_VIEW_TYPES: &[&str] = &["Add", "View"];

/// Process `activity` addressed to `user` (`None` for the shared inbox).
pub async fn process(
    ctx: &AppContext,
    user: Option<&str>,
    activity: &Value,
    headers: &RequestHeaders,
) -> Outcome {
    // Step 1: structural validation.
    let Some(actor_id) = get_actor(activity) else {
        return Outcome::Fatal;
    };
    let Some(activity_type) = get_type(activity) else {
        return Outcome::Fatal;
    };
    if ADD_VIEW_TYPES.contains(&activity_type) {
        return Outcome::Fatal;
    }

    // Step 2: actor resolution.
    let actor_result = match actor_fetch(ctx, actor_id, None).await {
        Ok(r) => r,
        Err(AppError::Policy(_)) => return Outcome::Fatal,
        Err(_) => {
            return if user.is_none() { Outcome::Fanout } else { Outcome::Retry };
        }
    };
    let Some(actor) = actor_result.object else {
        if matches!(actor_result.status, 404 | 410) {
            return Outcome::Fatal;
        }
        return if user.is_none() { Outcome::Fanout } else { Outcome::Retry };
    };

    // Step 3: signature verification. A failure here is archived by the
    // caller (which holds the raw request body) and dropped.
    if verify_signature(ctx, &actor, headers).await.is_err() {
        return Outcome::Fatal;
    }

    let Some(uid) = user else {
        return Outcome::Done;
    };
    let Ok(local_user) = ctx.users.load(uid) else {
        return Outcome::Fatal;
    };
    let user_actor = ctx.actor_url(uid);

    if actor_id == user_actor {
        return Outcome::Done;
    }

    if let Err(_e) = apply_filters(ctx, uid, activity, &actor) {
        return Outcome::Fatal;
    }

    if !is_for_me(ctx, uid, &user_actor, activity_type, actor_id, activity) {
        return Outcome::Done;
    }

    match handle(ctx, uid, &local_user, &user_actor, activity_type, actor_id, &actor, activity).await {
        Ok(()) => Outcome::Done,
        Err(e) if e.is_retryable() => Outcome::Retry,
        Err(_) => Outcome::Fatal,
    }
}

async fn verify_signature(ctx: &AppContext, actor: &Value, headers: &RequestHeaders) -> Result<(), ()> {
    let Some(sig_header) = headers.headers.get("signature") else {
        return Err(());
    };
    let Ok(components) = HttpVerifier::parse_signature_header(sig_header) else {
        return Err(());
    };
    let key_actor_id = crate::signature::actor_id_from_key_id(&components.key_id);

    let public_key_pem = match actor.get("publicKey").and_then(|k| k.get("publicKeyPem")).and_then(Value::as_str) {
        Some(pem) => pem.to_string(),
        None => {
            let refetched = actor_fetch(ctx, key_actor_id, None).await.map_err(|_| ())?;
            refetched
                .object
                .as_ref()
                .and_then(|a| a.get("publicKey"))
                .and_then(|k| k.get("publicKeyPem"))
                .and_then(Value::as_str)
                .ok_or(())?
                .to_string()
        }
    };

    let host = headers
        .headers
        .get("host")
        .cloned()
        .unwrap_or_else(|| ctx.config.host.clone());
    let mut verify_headers = headers.headers.clone();
    verify_headers.insert("host".to_string(), host);

    match HttpVerifier::verify(&public_key_pem, &components, &headers.method, &headers.path, &verify_headers) {
        Ok(true) => Ok(()),
        _ => Err(()),
    }
}

fn apply_filters(ctx: &AppContext, uid: &str, activity: &Value, actor: &Value) -> Result<(), AppError> {
    let actor_id = get_actor(activity).unwrap_or_default();

    if ctx.config.min_account_age > 0 {
        if let Some(published) = actor.get("published").and_then(Value::as_str) {
            if let Ok(p) = chrono::DateTime::parse_from_rfc3339(published) {
                let age = (chrono::Utc::now() - p.with_timezone(&chrono::Utc)).num_seconds();
                if age >= 0 && (age as u64) < ctx.config.min_account_age {
                    return Err(AppError::Policy("account too new".into()));
                }
            }
        }
    }

    if matches!(get_type(activity), Some("Create")) {
        if let Some(note) = get_object_embedded(activity) {
            let is_dm = !is_public(note) && get_str_or_list(note, "to").len() <= 1;
            if is_dm && !ctx.users.is_following(uid, actor_id) {
                return Err(AppError::Policy("dm from unknown actor".into()));
            }
        }
    }

    Ok(())
}

/// Every local uid this activity is addressed to, used by the shared-inbox
/// fanout path (`Outcome::Fanout`) to hand one copy to each concerned user's
/// queue instead of a single target.
#[must_use]
pub fn locally_addressed_uids(ctx: &AppContext, activity: &Value) -> Vec<String> {
    let Some(activity_type) = get_type(activity) else { return Vec::new() };
    let Some(actor_id) = get_actor(activity) else { return Vec::new() };
    let Ok(uids) = ctx.users.list_uids() else { return Vec::new() };

    uids.into_iter()
        .filter(|uid| {
            let user_actor = ctx.actor_url(uid);
            is_for_me(ctx, uid, &user_actor, activity_type, actor_id, activity)
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn is_for_me(
    ctx: &AppContext,
    uid: &str,
    user_actor: &str,
    activity_type: &str,
    actor_id: &str,
    activity: &Value,
) -> bool {
    match activity_type {
        "Like" | "Announce" => {
            let object_id = get_object_id(activity).unwrap_or_default();
            object_id.starts_with(user_actor) || ctx.users.is_following(uid, actor_id)
        }
        "Undo" => ctx.users.is_following(uid, actor_id) || ctx.users.is_follower(uid, actor_id),
        "Accept" => ctx.users.is_following(uid, actor_id),
        "Follow" => get_object_id(activity) == Some(user_actor),
        "Ping" => get_str_or_list(activity, "to").iter().any(|t| t == user_actor),
        "Create" | "Update" => {
            let Some(note) = get_object_embedded(activity) else { return false };
            let r = recipients(note, uid, ctx, false);

            if is_public(note) && ctx.users.is_following(uid, actor_id) {
                return true;
            }
            if r.iter().any(|x| x == user_actor) {
                return true;
            }
            if is_public(note) && r.iter().any(|x| ctx.users.is_following(uid, x)) {
                return true;
            }
            let followers_url = format!("{user_actor}/followers");
            if r.iter().any(|x| x == &followers_url) && ctx.users.is_following(uid, actor_id) {
                return true;
            }
            if is_public(note) {
                if let Some(author) = get_attributed_to(note) {
                    if ctx.users.is_following(uid, &author) {
                        return true;
                    }
                }
                if let Some(parent) = get_in_reply_to(note) {
                    if let Ok(parent_obj) = ctx.objects.get(parent) {
                        if let Some(author) = get_attributed_to(&parent_obj) {
                            if ctx.users.is_following(uid, &author) {
                                return true;
                            }
                        }
                    }
                }
            }
            false
        }
        _ => true,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle(
    ctx: &AppContext,
    uid: &str,
    local_user: &snac_store::user::UserRecord,
    user_actor: &str,
    activity_type: &str,
    actor_id: &str,
    actor: &Value,
    activity: &Value,
) -> Result<(), AppError> {
    let _ = local_user;
    match activity_type {
        "Follow" => handle_follow(ctx, uid, user_actor, actor_id, actor, activity).await,
        "Undo" => handle_undo(ctx, uid, actor_id, activity).await,
        "Create" => handle_create(ctx, uid, actor_id, activity).await,
        "Update" => handle_update(ctx, uid, actor_id, actor, activity).await,
        "Accept" => handle_accept_follow(ctx, uid, actor_id, activity),
        "Like" | "EmojiReact" => handle_admire(ctx, uid, actor_id, activity, AdmireKind::Like),
        "Announce" => handle_admire(ctx, uid, actor_id, activity, AdmireKind::Announce),
        "Delete" => handle_delete(ctx, actor_id, activity),
        "Ping" => handle_ping(ctx, uid, actor_id, activity).await,
        "Move" => handle_move(ctx, uid, actor_id, actor, activity).await,
        _ => Ok(()),
    }
}

async fn handle_follow(
    ctx: &AppContext,
    uid: &str,
    user_actor: &str,
    actor_id: &str,
    actor: &Value,
    activity: &Value,
) -> Result<(), AppError> {
    if let Some(id) = get_id(actor) {
        ctx.objects.put(id, actor, true)?;
    }

    let already = ctx.users.is_follower(uid, actor_id);
    if !already {
        ctx.users.relation_add(uid, relation::FOLLOWERS, actor_id, get_id(activity))?;
        notify(ctx, uid, "Follow", None, actor_id, activity).await;
    }

    let accept = crate::activities::msg_accept(user_actor, activity, actor_id);
    if let Some(id) = get_id(&accept) {
        ctx.objects.put(id, &accept, false)?;
    }
    ctx.outbound.enqueue_message(uid, accept)?;
    Ok(())
}

async fn handle_undo(ctx: &AppContext, uid: &str, actor_id: &str, activity: &Value) -> Result<(), AppError> {
    let Some(inner) = get_object_embedded(activity).cloned().or_else(|| {
        get_object_id(activity).and_then(|id| ctx.objects.get(id).ok())
    }) else {
        return Ok(());
    };
    match get_type(&inner) {
        Some("Follow") => {
            ctx.users.relation_remove(uid, relation::FOLLOWERS, actor_id)?;
        }
        Some("Like") => {
            if let Some(target) = get_object_id(&inner) {
                ctx.objects.unadmire(target, actor_id, AdmireKind::Like)?;
            }
        }
        Some("Announce") => {
            if let Some(target) = get_object_id(&inner) {
                ctx.objects.unadmire(target, actor_id, AdmireKind::Announce)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Load `<basedir>/filter_reject.txt`, one regex per line, blank lines and
/// `#`-comments skipped. Absent file means no rejection patterns.
fn filter_reject_patterns(ctx: &AppContext) -> Vec<Regex> {
    let path = ctx.base.root().join("filter_reject.txt");
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| Regex::new(line).ok())
        .collect()
}

async fn handle_create(ctx: &AppContext, uid: &str, actor_id: &str, activity: &Value) -> Result<(), AppError> {
    let Some(note) = get_object_embedded(activity) else {
        return Ok(());
    };
    let Some(content) = get_str(note, "content") else {
        return create_generic(ctx, uid, note);
    };

    if filter_reject_patterns(ctx).iter().any(|re| re.is_match(content)) {
        return Err(AppError::Policy("matched filter_reject".into()));
    }

    if let Some(parent) = get_in_reply_to(note) {
        fetch_conversation(ctx, parent, 0).await?;
    }

    let Some(id) = get_id(note) else {
        return Err(AppError::Validation("note missing id".into()));
    };
    ctx.objects.put(id, note, false)?;
    if is_public(note) {
        ctx.instance.public_timeline_add(&md5_hex(id))?;
    }

    if get_str(note, "name").is_some() {
        if let Some(parent) = get_in_reply_to(note) {
            if let Ok(parent_obj) = ctx.objects.get(parent) {
                if get_type(&parent_obj) == Some("Question") {
                    crate::activities::update_question(ctx, parent)?;
                }
            }
        }
    }

    notify(ctx, uid, "Create", get_type(note), actor_id, activity).await;
    Ok(())
}

fn create_generic(ctx: &AppContext, uid: &str, object: &Value) -> Result<(), AppError> {
    let Some(id) = get_id(object) else {
        return Err(AppError::Validation("object missing id".into()));
    };
    ctx.objects.put(id, object, false)?;
    if is_public(object) {
        ctx.instance.public_timeline_add(&md5_hex(id))?;
    }
    let _ = uid;
    Ok(())
}

fn fetch_conversation<'a>(
    ctx: &'a AppContext,
    id: &'a str,
    level: u32,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AppError>> + 'a>> {
    Box::pin(async move {
        if level >= MAX_CONVERSATION_LEVELS || ctx.objects.exists(id) {
            return Ok(());
        }
        let result = fetch(ctx, id, None).await?;
        let Some(obj) = result.object else {
            return Ok(());
        };
        ctx.objects.put(id, &obj, false)?;
        if let Some(parent) = get_in_reply_to(&obj) {
            fetch_conversation(ctx, parent, level + 1).await?;
        }
        Ok(())
    })
}

async fn handle_update(ctx: &AppContext, uid: &str, actor_id: &str, actor: &Value, activity: &Value) -> Result<(), AppError> {
    let Some(object) = get_object_embedded(activity) else {
        return Ok(());
    };
    let Some(id) = get_id(object) else {
        return Ok(());
    };

    match get_type(object) {
        Some("Person" | "Service") => {
            archive_prior_revision(ctx, uid, id)?;
            ctx.objects.put(id, object, true)?;
            let _ = actor;
        }
        Some("Question") => {
            if ctx.objects.exists(id) {
                archive_prior_revision(ctx, uid, id)?;
                ctx.objects.put(id, object, true)?;
                if object.get("closed").is_some() {
                    notify(ctx, uid, "Update", Some("Question"), actor_id, activity).await;
                }
            }
        }
        Some(_) => {
            if ctx.objects.exists(id) {
                archive_prior_revision(ctx, uid, id)?;
                ctx.objects.put(id, object, true)?;
            }
        }
        None => {}
    }
    Ok(())
}

/// Preserve `id`'s current stored revision under this user's edit history
/// before an `Update` overwrites it (spec §4.2 `history/`).
fn archive_prior_revision(ctx: &AppContext, uid: &str, id: &str) -> Result<(), AppError> {
    if let Ok(prior) = ctx.objects.get(id) {
        ctx.users.history_write(uid, id, &prior)?;
    }
    Ok(())
}

fn handle_accept_follow(ctx: &AppContext, uid: &str, actor_id: &str, activity: &Value) -> Result<(), AppError> {
    if let Some(inner) = get_object_embedded(activity) {
        if get_type(inner) != Some("Follow") {
            return Ok(());
        }
    }
    ctx.users.relation_add(uid, relation::FOLLOWING, actor_id, None)?;
    Ok(())
}

fn handle_admire(ctx: &AppContext, uid: &str, actor_id: &str, activity: &Value, kind: AdmireKind) -> Result<(), AppError> {
    let Some(target) = get_object_id(activity) else {
        return Ok(());
    };
    ctx.objects.admire(target, actor_id, kind)?;
    if kind == AdmireKind::Announce {
        ctx.users.list_distribute(uid, actor_id, target)?;
    }
    Ok(())
}

fn handle_delete(ctx: &AppContext, actor_id: &str, activity: &Value) -> Result<(), AppError> {
    let Some(target) = get_object_id(activity) else {
        return Ok(());
    };
    if !ctx.objects.exists_by_md5(&md5_hex(target)) || !ctx.objects.exists_by_md5(&md5_hex(actor_id)) {
        return Ok(());
    }
    ctx.objects.delete(target)?;
    Ok(())
}

async fn handle_ping(ctx: &AppContext, uid: &str, actor_id: &str, activity: &Value) -> Result<(), AppError> {
    let pong = crate::activities::msg_pong(&ctx.actor_url(uid), activity, actor_id);
    if let Some(id) = get_id(&pong) {
        ctx.objects.put(id, &pong, false)?;
    }
    ctx.outbound.enqueue_message(uid, pong)?;
    Ok(())
}

async fn handle_move(ctx: &AppContext, uid: &str, actor_id: &str, actor: &Value, activity: &Value) -> Result<(), AppError> {
    let Some(new_actor) = get_object_id(activity) else {
        return Ok(());
    };
    if !ctx.users.is_following(uid, actor_id) {
        return Ok(());
    }
    let also_known_as = get_str_or_list(actor, "alsoKnownAs");
    if !also_known_as.iter().any(|a| a == actor_id) {
        return Ok(());
    }

    ctx.users.relation_add(uid, relation::FOLLOWING, new_actor, None)?;
    ctx.users.relation_remove(uid, relation::FOLLOWING, actor_id)?;

    let actor_url = ctx.actor_url(uid);
    let base_url = ctx.config.base_url();
    let follow = crate::activities::msg_follow(&base_url, &actor_url, new_actor);
    ctx.outbound.enqueue_message(uid, follow)?;
    let old_follow = crate::activities::msg_follow(&base_url, &actor_url, actor_id);
    let undo = crate::activities::msg_undo(&base_url, &actor_url, old_follow);
    ctx.outbound.enqueue_message(uid, undo)?;
    Ok(())
}

async fn notify(ctx: &AppContext, uid: &str, kind: &str, subtype: Option<&str>, actor_id: &str, activity: &Value) {
    let summary = subtype.map_or_else(|| kind.to_string(), |s| format!("{kind}({s})"));
    let body = NotifyBody {
        uid: uid.to_string(),
        kind: summary,
        summary: format!("{actor_id}: {}", get_id(activity).unwrap_or_default()),
    };
    let _ = ctx.notify.send(&body).await;
}
