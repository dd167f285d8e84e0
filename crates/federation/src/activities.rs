//! Message constructors (spec §4.7): pure(ish) functions producing canonical
//! activity documents. `msg_base` is the shared skeleton every other
//! constructor builds on.

use serde_json::{json, Value};
use snac_common::error::AppResult;
use snac_common::id::IdGenerator;
use snac_common::time::iso8601_now;
use snac_common::value::{get_attributed_to, get_id, get_str, get_type, is_public, PUBLIC_URI};

use crate::context::AppContext;

/// How an activity's `id` is derived.
pub enum IdTag<'a> {
    /// No `id` field at all (used for embedded sub-objects).
    None,
    /// A random, content-independent token.
    Dummy,
    /// Derived from the wrapped object's id plus the activity type plus a
    /// random token, so replays of the same object produce distinct ids.
    Object(&'a str),
    /// Derived from the wrapped object's id plus the activity type, with no
    /// random component — stable across retries of the same logical event.
    Wrapper(&'a str),
}

/// Build the common shape every activity shares: `id`, `type`, `actor`,
/// `published`, plus whatever `object` carries. When the wrapped `object` is
/// itself a document with `to`/`cc` (an embedded `Note`, or another activity
/// such as the `Follow` inside an `Undo`), those fields are copied onto the
/// wrapper too, so recipient resolution sees them without having to reach
/// into `object`.
#[must_use]
pub fn msg_base(base_url: &str, activity_type: &str, id_tag: IdTag<'_>, actor: &str, object: Value) -> Value {
    let to = object.get("to").cloned();
    let cc = object.get("cc").cloned();

    let mut msg = json!({
        "type": activity_type,
        "actor": actor,
        "published": iso8601_now(),
        "object": object,
    });
    if let Some(to) = to {
        msg["to"] = to;
    }
    if let Some(cc) = cc {
        msg["cc"] = cc;
    }

    let id = match id_tag {
        IdTag::None => None,
        IdTag::Dummy => Some(format!("{base_url}/activities/{}", IdGenerator.generate())),
        IdTag::Object(object_id) => {
            Some(format!("{object_id}/{}-{}", activity_type.to_lowercase(), IdGenerator.generate()))
        }
        IdTag::Wrapper(object_id) => Some(format!("{object_id}/{}", activity_type.to_lowercase())),
    };
    if let Some(id) = id {
        msg["id"] = json!(id);
    }
    msg
}

/// A `Person`/`Service` actor document for a local user.
#[must_use]
pub fn msg_actor(ctx: &AppContext, uid: &str, record: &snac_store::user::UserRecord, public_key_pem: &str) -> Value {
    let actor_url = ctx.actor_url(uid);
    json!({
        "id": actor_url,
        "type": record.actor_type,
        "preferredUsername": record.uid,
        "name": record.name,
        "summary": record.bio,
        "icon": record.avatar_url.as_ref().map(|u| json!({"type": "Image", "url": u})),
        "image": record.header_url.as_ref().map(|u| json!({"type": "Image", "url": u})),
        "inbox": format!("{actor_url}/inbox"),
        "outbox": format!("{actor_url}/outbox"),
        "followers": format!("{actor_url}/followers"),
        "following": format!("{actor_url}/following"),
        "endpoints": { "sharedInbox": format!("{}/shared-inbox", ctx.config.base_url()) },
        "publicKey": {
            "id": format!("{actor_url}#main-key"),
            "owner": actor_url,
            "publicKeyPem": public_key_pem,
        },
    })
}

/// Visibility scope for an outgoing note, per spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Public,
    MentionedOnly,
    Unlisted,
}

/// Build a `Note` (wrapped in a `Create` by the caller) from plain-text
/// `content`: formats to HTML via the configured [`snac_mfm::TextFormatter`],
/// extracts mentions/hashtags into `tag`, and builds `to`/`cc` per `scope`.
#[must_use]
pub fn msg_note(
    ctx: &AppContext,
    uid: &str,
    content: &str,
    in_reply_to: Option<&str>,
    attachments: Vec<Value>,
    scope: Scope,
) -> Value {
    let actor_url = ctx.actor_url(uid);
    let formatted = ctx.formatter.format(content, &ctx.config.base_url());
    let note_id = format!("{actor_url}/p/{}", IdGenerator.generate());

    let followers_url = format!("{actor_url}/followers");
    let (to, cc): (Vec<String>, Vec<String>) = match scope {
        Scope::Public => (vec![snac_common::value::PUBLIC_URI.to_string()], vec![followers_url]),
        Scope::Unlisted => (vec![followers_url], vec![snac_common::value::PUBLIC_URI.to_string()]),
        Scope::MentionedOnly => (Vec::new(), Vec::new()),
    };

    let mut to = to;
    let mut cc = cc;
    for mention in &formatted.mentions {
        if scope == Scope::MentionedOnly {
            to.push(format!("acct:{}", mention.trim_start_matches('@')));
        } else {
            cc.push(format!("acct:{}", mention.trim_start_matches('@')));
        }
    }
    to.dedup();
    cc.dedup();

    let tags: Vec<Value> = formatted
        .hashtags
        .iter()
        .map(|tag| json!({"type": "Hashtag", "name": format!("#{tag}"), "href": format!("{}/tag/{tag}", ctx.config.base_url())}))
        .collect();

    let (context, conversation) = in_reply_to
        .and_then(|parent| ctx.objects.get(parent).ok())
        .map(|parent| {
            let ctx_url = parent
                .get("context")
                .and_then(Value::as_str)
                .unwrap_or(&note_id)
                .to_string();
            (ctx_url.clone(), ctx_url)
        })
        .unwrap_or_else(|| (note_id.clone(), note_id.clone()));

    json!({
        "id": note_id,
        "type": "Note",
        "attributedTo": actor_url,
        "content": formatted.html,
        "to": to,
        "cc": cc,
        "tag": tags,
        "attachment": attachments,
        "inReplyTo": in_reply_to,
        "context": context,
        "conversation": conversation,
        "published": iso8601_now(),
    })
}

/// Poll kind: exclusive (`oneOf`) or multi-select (`anyOf`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    OneOf,
    AnyOf,
}

/// Build a `Question` with the given options and end time.
#[must_use]
pub fn msg_question(
    ctx: &AppContext,
    uid: &str,
    content: &str,
    options: &[String],
    kind: PollKind,
    end_time: chrono::DateTime<chrono::Utc>,
) -> Value {
    let actor_url = ctx.actor_url(uid);
    let formatted = ctx.formatter.format(content, &ctx.config.base_url());
    let question_id = format!("{actor_url}/p/{}", IdGenerator.generate());

    let option_docs: Vec<Value> = options
        .iter()
        .map(|name| json!({"type": "Note", "name": name, "replies": {"type": "Collection", "totalItems": 0}}))
        .collect();

    let key = match kind {
        PollKind::OneOf => "oneOf",
        PollKind::AnyOf => "anyOf",
    };

    json!({
        "id": question_id,
        "type": "Question",
        "attributedTo": actor_url,
        "content": formatted.html,
        "to": [snac_common::value::PUBLIC_URI],
        "cc": [format!("{actor_url}/followers")],
        key: option_docs,
        "endTime": snac_common::time::iso8601(end_time),
        "published": iso8601_now(),
    })
}

/// Recount a `Question`'s votes from its children index and close it once
/// `endTime` has passed (spec §4.7 `update_question`): every reply with a
/// `name` field is a vote for the matching option.
pub fn update_question(ctx: &AppContext, poll_id: &str) -> AppResult<()> {
    let mut poll = ctx.objects.get(poll_id)?;
    let children = ctx.objects.children(poll_id)?;

    let key = if poll.get("oneOf").is_some() { "oneOf" } else { "anyOf" };
    let Some(options) = poll.get(key).and_then(Value::as_array).cloned() else {
        return Ok(());
    };

    let mut tallies = vec![0u64; options.len()];
    for child_digest in &children {
        let Ok(reply) = ctx.objects.get_by_md5(child_digest) else { continue };
        let Some(vote) = get_str(&reply, "name") else { continue };
        if let Some(idx) = options.iter().position(|o| get_str(o, "name") == Some(vote)) {
            tallies[idx] += 1;
        }
    }

    let updated: Vec<Value> = options
        .into_iter()
        .zip(tallies)
        .map(|(mut option, count)| {
            option["replies"]["totalItems"] = json!(count);
            option
        })
        .collect();
    poll[key] = json!(updated);

    let closed = poll
        .get("endTime")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|end| end.with_timezone(&chrono::Utc) <= chrono::Utc::now());
    if closed {
        poll["closed"] = json!(snac_common::time::iso8601_now());
    }

    ctx.objects.put(poll_id, &poll, true)?;
    Ok(())
}

/// `Follow` activity. Addressed directly to `target`, matching `msg_ping`'s
/// pattern below: delivery resolves a `to` list, so a `Follow`'s sole
/// recipient has to be spelled out rather than left implicit.
#[must_use]
pub fn msg_follow(base_url: &str, actor: &str, target: &str) -> Value {
    let mut msg = msg_base(base_url, "Follow", IdTag::Dummy, actor, json!(target));
    msg["to"] = json!([target]);
    msg
}

/// `Accept` in response to an inbound `Follow`, addressed back to `to` (the
/// actor who sent the `Follow`).
#[must_use]
pub fn msg_accept(local_actor: &str, follow_activity: &Value, to: &str) -> Value {
    let mut accept = json!({
        "type": "Accept",
        "actor": local_actor,
        "object": follow_activity,
        "to": [to],
        "published": iso8601_now(),
    });
    if let Some(follow_id) = get_id(follow_activity) {
        accept["id"] = json!(format!("{follow_id}/accept"));
    }
    accept
}

/// `Undo` wrapping a previously-sent activity. `to`/`cc` come along for free
/// via `msg_base`, since `inner` already carries the recipients it was built
/// with.
#[must_use]
pub fn msg_undo(base_url: &str, actor: &str, inner: Value) -> Value {
    msg_base(base_url, "Undo", IdTag::Dummy, actor, inner)
}

/// Recipients for an admiration activity (`Like`/`EmojiReact`/`Announce`):
/// the public URI when `object` is public, plus its author.
fn admiration_to(object: &Value) -> Vec<String> {
    let mut to = Vec::new();
    if is_public(object) {
        to.push(PUBLIC_URI.to_string());
    }
    if let Some(author) = get_attributed_to(object) {
        to.push(author);
    }
    to
}

/// `Like` of a remote `object` (its full document, so the author and
/// visibility can be derived for `to`).
#[must_use]
pub fn msg_like(base_url: &str, actor: &str, object: &Value) -> Value {
    let object_id = get_id(object).unwrap_or_default();
    let mut msg = msg_base(base_url, "Like", IdTag::Object(object_id), actor, json!(object_id));
    msg["to"] = json!(admiration_to(object));
    msg
}

/// `EmojiReact` of a remote `object` with a custom or unicode emoji.
#[must_use]
pub fn msg_emoji_react(base_url: &str, actor: &str, object: &Value, content: &str) -> Value {
    let object_id = get_id(object).unwrap_or_default();
    let mut msg = msg_base(base_url, "EmojiReact", IdTag::Object(object_id), actor, json!(object_id));
    msg["to"] = json!(admiration_to(object));
    msg["content"] = json!(content);
    msg
}

/// `Announce` (boost) of a remote `object`.
#[must_use]
pub fn msg_announce(base_url: &str, actor: &str, object: &Value) -> Value {
    let object_id = get_id(object).unwrap_or_default();
    let mut msg = msg_base(base_url, "Announce", IdTag::Object(object_id), actor, json!(object_id));
    msg["to"] = json!(admiration_to(object));
    msg
}

/// `Delete` of a locally-authored object, wrapping a `Tombstone`.
#[must_use]
pub fn msg_delete(base_url: &str, actor: &str, object_id: &str) -> Value {
    let _ = base_url;
    let tombstone = json!({
        "id": object_id,
        "type": "Tombstone",
        "deleted": iso8601_now(),
    });
    json!({
        "id": format!("{object_id}/delete"),
        "type": "Delete",
        "actor": actor,
        "object": tombstone,
        "published": iso8601_now(),
    })
}

/// `Move` announcing `actor` has relocated to `new_actor`, sent to everyone
/// (with the follower collection as `cc`) the same way `msg_note`'s public
/// scope addresses a post.
#[must_use]
pub fn msg_move(base_url: &str, actor: &str, new_actor: &str) -> Value {
    let mut msg = msg_base(base_url, "Move", IdTag::Dummy, actor, json!(new_actor));
    msg["to"] = json!([PUBLIC_URI]);
    msg["cc"] = json!([format!("{actor}/followers")]);
    msg
}

/// `Ping` used for instance liveness checks.
#[must_use]
pub fn msg_ping(base_url: &str, actor: &str, target: &str) -> Value {
    let mut msg = msg_base(base_url, "Ping", IdTag::Dummy, actor, Value::Null);
    msg["to"] = json!(target);
    msg
}

/// `Pong` reply to an inbound `Ping`, addressed back to `to` (the actor that pinged us).
#[must_use]
pub fn msg_pong(local_actor: &str, ping_activity: &Value, to: &str) -> Value {
    let mut pong = json!({
        "type": "Pong",
        "actor": local_actor,
        "object": ping_activity,
        "to": [to],
        "published": iso8601_now(),
    });
    if let Some(ping_id) = get_id(ping_activity) {
        pong["id"] = json!(format!("{ping_id}/pong"));
    }
    pong
}

/// A local, non-federated `Block` of a remote actor or instance. Never
/// delivered (`cmd_block`/`cmd_unblock` act on `InstanceStore` directly), but
/// still carries a `to` so it matches every other constructor here.
#[must_use]
pub fn msg_block(base_url: &str, actor: &str, target: &str) -> Value {
    let mut msg = msg_base(base_url, "Block", IdTag::Dummy, actor, json!(target));
    msg["to"] = json!([target]);
    msg
}

/// Reject helper for the inbox processor's poll-vote path when the parent is
/// not actually a `Question`.
#[must_use]
pub fn is_question(object: &Value) -> bool {
    get_type(object) == Some("Question")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_base_copies_to_and_cc_from_the_wrapped_object() {
        let note = json!({"id": "https://a/p/1", "type": "Note", "to": ["https://b/actor"], "cc": ["https://a/actor/followers"]});
        let create = msg_base("https://a", "Create", IdTag::Wrapper("https://a/p/1"), "https://a/actor", note);
        assert_eq!(create["to"], json!(["https://b/actor"]));
        assert_eq!(create["cc"], json!(["https://a/actor/followers"]));
    }

    #[test]
    fn msg_base_omits_to_and_cc_when_the_wrapped_object_has_none() {
        let undo_target = json!("https://b/actor");
        let msg = msg_base("https://a", "Follow", IdTag::Dummy, "https://a/actor", undo_target);
        assert!(msg.get("to").is_none());
        assert!(msg.get("cc").is_none());
    }

    #[test]
    fn msg_follow_addresses_the_target_directly() {
        let follow = msg_follow("https://a", "https://a/actor", "https://b/actor");
        assert_eq!(follow["to"], json!(["https://b/actor"]));
        assert_eq!(follow["object"], json!("https://b/actor"));
    }

    #[test]
    fn msg_undo_inherits_the_wrapped_activitys_recipients() {
        let follow = msg_follow("https://a", "https://a/actor", "https://b/actor");
        let undo = msg_undo("https://a", "https://a/actor", follow);
        assert_eq!(undo["to"], json!(["https://b/actor"]));
    }

    #[test]
    fn msg_accept_is_addressed_back_to_the_follower() {
        let follow = msg_follow("https://b", "https://b/actor", "https://a/actor");
        let accept = msg_accept("https://a/actor", &follow, "https://b/actor");
        assert_eq!(accept["to"], json!(["https://b/actor"]));
        assert!(get_id(&accept).unwrap().ends_with("/accept"));
    }

    #[test]
    fn msg_pong_is_addressed_back_to_the_pinger() {
        let ping = msg_ping("https://a", "https://a/actor", "https://b/actor");
        let pong = msg_pong("https://a/actor", &ping, "https://b/actor");
        assert_eq!(pong["to"], json!(["https://b/actor"]));
        assert!(get_id(&pong).unwrap().ends_with("/pong"));
    }

    #[test]
    fn admiration_to_includes_public_uri_and_author_for_a_public_object() {
        let object = json!({"id": "https://b/p/1", "attributedTo": "https://b/actor", "to": [PUBLIC_URI]});
        let to = admiration_to(&object);
        assert!(to.contains(&PUBLIC_URI.to_string()));
        assert!(to.contains(&"https://b/actor".to_string()));
    }

    #[test]
    fn admiration_to_excludes_public_uri_for_an_unlisted_object() {
        let object = json!({"id": "https://b/p/1", "attributedTo": "https://b/actor", "to": ["https://b/actor/followers"]});
        let to = admiration_to(&object);
        assert!(!to.contains(&PUBLIC_URI.to_string()));
        assert_eq!(to, vec!["https://b/actor".to_string()]);
    }

    #[test]
    fn msg_announce_derives_object_id_and_recipients_from_the_full_object() {
        let object = json!({"id": "https://b/p/1", "attributedTo": "https://b/actor", "to": [PUBLIC_URI]});
        let announce = msg_announce("https://a", "https://a/actor", &object);
        assert_eq!(announce["object"], json!("https://b/p/1"));
        assert_eq!(announce["to"], json!([PUBLIC_URI, "https://b/actor"]));
    }

    #[test]
    fn msg_move_addresses_the_public_and_local_followers() {
        let mov = msg_move("https://a", "https://a/actor", "https://c/actor");
        assert_eq!(mov["to"], json!([PUBLIC_URI]));
        assert_eq!(mov["cc"], json!(["https://a/actor/followers"]));
    }

    #[test]
    fn update_question_is_reachable_outside_its_own_definition() {
        // compile-time check that the function named in the spec exists and
        // has the signature callers (worker.rs, commands.rs) rely on.
        let _: fn(&AppContext, &str) -> AppResult<()> = update_question;
    }
}
