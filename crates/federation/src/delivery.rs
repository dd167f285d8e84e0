//! Outbox recipient resolution (spec §4.6).

use serde_json::Value;
use snac_common::error::AppResult;
use snac_common::value::{get_str_or_list, PUBLIC_URI};

use crate::context::AppContext;

/// Union of `to`/`cc` on `msg`. When `expand_public` is set, the public URI
/// sentinel is replaced with the local author's `followers` collection URL,
/// so a public activity's recipient list carries a concrete collection
/// `expand_local_followers` can later expand into deliverable actors, rather
/// than the undeliverable "everyone" sentinel itself.
#[must_use]
pub fn recipients(msg: &Value, uid: &str, ctx: &AppContext, expand_public: bool) -> Vec<String> {
    let followers_url = format!("{}/followers", ctx.actor_url(uid));
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();

    for r in get_str_or_list(msg, "to").into_iter().chain(get_str_or_list(msg, "cc")) {
        let r = if expand_public && r == PUBLIC_URI {
            followers_url.clone()
        } else {
            r
        };
        if seen.insert(r.clone()) {
            out.push(r);
        }
    }
    out
}

/// Resolve a set of recipient actor URLs into distinct delivery inboxes,
/// preferring each actor's `endpoints.sharedInbox` when present, and
/// deduplicating inboxes shared by several recipients (spec §4.6).
pub async fn resolve_inboxes(ctx: &AppContext, recipients: &[String]) -> AppResult<Vec<String>> {
    let mut seen = std::collections::BTreeSet::new();
    let mut inboxes = Vec::new();

    for actor_url in recipients {
        if actor_url == PUBLIC_URI {
            continue;
        }
        if let Some(inbox) = actor_inbox(ctx, actor_url).await? {
            if seen.insert(inbox.clone()) {
                inboxes.push(inbox);
            }
        }
    }
    Ok(inboxes)
}

async fn actor_inbox(ctx: &AppContext, actor_url: &str) -> AppResult<Option<String>> {
    // A local followers/following collection URL is never itself a
    // deliverable inbox; `expand_public_or_followers` below replaces it with
    // the concrete member set before `resolve_inboxes` ever sees it.
    if ctx.local_uid(actor_url).is_some() {
        return Ok(None);
    }

    let result = crate::fetch::actor_fetch(ctx, actor_url, None).await?;
    let Some(actor) = result.object else {
        return Ok(None);
    };
    let inbox = actor
        .get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .or_else(|| actor.get("inbox").and_then(Value::as_str))
        .map(str::to_string);
    Ok(inbox)
}

/// Replace a local `followers` collection URL in `recipients` with the
/// actual follower actor URLs known to this instance, so `resolve_inboxes`
/// has concrete actors to look up rather than a collection URL it cannot
/// deliver to.
pub fn expand_local_followers(ctx: &AppContext, uid: &str, recipients: Vec<String>) -> AppResult<Vec<String>> {
    let followers_url = format!("{}/followers", ctx.actor_url(uid));
    let mut out = Vec::with_capacity(recipients.len());
    for r in recipients {
        if r == followers_url {
            for entry in ctx.users.relation_list(uid, snac_store::layout::relation::FOLLOWERS)? {
                out.push(entry.subject);
            }
        } else {
            out.push(r);
        }
    }
    Ok(out)
}

/// Additionally deliver a public `Create`/`Update` to every instance-wide
/// known shared inbox (spec §4.6), honoring `disable_inbox_collection` and
/// instance blocks. Returns inboxes not already present in `existing`.
pub fn instance_wide_shared_inboxes(ctx: &AppContext, existing: &[String]) -> AppResult<Vec<String>> {
    if ctx.config.disable_inbox_collection {
        return Ok(Vec::new());
    }
    let existing: std::collections::BTreeSet<&str> = existing.iter().map(String::as_str).collect();
    let hosts = ctx.instance.shared_inbox_hosts()?;
    Ok(hosts
        .into_iter()
        .filter(|h| !ctx.instance.is_blocked(h))
        .map(|h| format!("https://{h}/shared-inbox"))
        .filter(|inbox| !existing.contains(inbox.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().unwrap();
        let base = snac_store::Basedir::new(dir.path());
        let config = snac_common::config::ServerConfig::new("example.com".to_string());
        let ctx = AppContext::new(
            base,
            config,
            std::sync::Arc::new(snac_mfm::DefaultFormatter),
            std::sync::Arc::new(snac_common::webfinger::HttpResolver::new("test".to_string())),
            std::sync::Arc::new(snac_common::notify::NullSink),
            std::sync::Arc::new(snac_common::outbound::NullOutboundQueue),
        );
        (dir, ctx)
    }

    #[test]
    fn recipients_unions_to_and_cc_and_dedups() {
        let (_dir, ctx) = ctx();
        let msg = json!({"to": ["https://x/a", "https://x/b"], "cc": ["https://x/b", "https://x/c"]});
        assert_eq!(
            recipients(&msg, "alice", &ctx, false),
            vec!["https://x/a", "https://x/b", "https://x/c"]
        );
    }

    #[test]
    fn recipients_expands_public_uri_to_local_followers_collection() {
        let (_dir, ctx) = ctx();
        let followers = format!("{}/alice/followers", ctx.config.base_url());
        let msg = json!({"to": [PUBLIC_URI], "cc": []});
        assert_eq!(recipients(&msg, "alice", &ctx, true), vec![followers]);
    }

    #[test]
    fn recipients_leaves_public_uri_alone_when_not_expanding() {
        let (_dir, ctx) = ctx();
        let msg = json!({"to": [PUBLIC_URI], "cc": []});
        assert_eq!(recipients(&msg, "alice", &ctx, false), vec![PUBLIC_URI.to_string()]);
    }
}
