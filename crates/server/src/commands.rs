//! CLI subcommand implementations (spec §6).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use snac_common::config::{resolve_basedir, ServerConfig, CURRENT_LAYOUT};
use snac_common::error::{AppError, AppResult};
use snac_common::value::{get_attributed_to, get_id, get_str};
use snac_federation::activities::{self, IdTag, PollKind, Scope};
use snac_federation::AppContext;
use snac_queue::{DirQueue, QueueItem};
use snac_store::layout::relation;
use snac_store::user::Visibility;
use snac_store::{Basedir, InstanceStore};
use url::Url;

use crate::cli::Command;

const DEFAULT_STYLE_CSS: &str = "body { font-family: sans-serif; max-width: 40em; margin: 2em auto; }\n";

/// Dispatch one parsed subcommand.
pub async fn run(basedir_arg: Option<&str>, command: Command) -> AppResult<()> {
    let basedir = resolve_basedir(basedir_arg);

    match command {
        Command::Init { host } => cmd_init(&basedir, &host),
        Command::Upgrade => cmd_upgrade(&basedir),
        Command::Httpd => cmd_httpd(&basedir).await,
        Command::Purge => cmd_purge(&basedir),
        Command::Adduser { uid, name, actor_type } => cmd_adduser(&basedir, &uid, &name, &actor_type),
        Command::Deluser { uid } => cmd_deluser(&basedir, &uid),
        Command::Follow { uid, target } => cmd_follow(&basedir, &uid, &target).await,
        Command::Unfollow { uid, target } => cmd_unfollow(&basedir, &uid, &target).await,
        Command::Note { uid, content, reply_to, scope, draft } => {
            cmd_note(&basedir, &uid, &content, reply_to.as_deref(), scope.into(), draft)
        }
        Command::Boost { uid, object_id } => cmd_boost(&basedir, &uid, &object_id).await,
        Command::Like { uid, object_id } => cmd_like(&basedir, &uid, &object_id).await,
        Command::Unlike { uid, object_id } => cmd_unlike(&basedir, &uid, &object_id).await,
        Command::Ping { uid, target } => cmd_ping(&basedir, &uid, &target).await,
        Command::Question { uid, content, options, multiple, seconds } => {
            cmd_question(&basedir, &uid, &content, &options, multiple, seconds)
        }
        Command::Bookmark { uid, object_id } => cmd_bookmark(&basedir, &uid, &object_id),
        Command::Unbookmark { uid, object_id } => cmd_unbookmark(&basedir, &uid, &object_id),
        Command::Pin { uid, object_id } => cmd_pin(&basedir, &uid, &object_id),
        Command::Unpin { uid, object_id } => cmd_unpin(&basedir, &uid, &object_id),
        Command::Block { host } => cmd_block(&basedir, &host),
        Command::Unblock { host } => cmd_unblock(&basedir, &host),
        Command::Resetpwd { uid } => cmd_resetpwd(&basedir, &uid),
    }
}

/// Build a context against an already-initialized instance directory.
fn load_ctx(basedir: &Path) -> AppResult<AppContext> {
    let base = Basedir::new(basedir);
    let config = InstanceStore::new(base.clone()).load_config()?;
    let outbound = snac_queue::QueueSink::new(snac_store::UserStore::new(base.clone()));
    Ok(AppContext::new(
        base,
        config,
        Arc::new(snac_mfm::DefaultFormatter),
        Arc::new(snac_common::webfinger::HttpResolver::new(format!("snac-rs/{}", env!("CARGO_PKG_VERSION")))),
        Arc::new(snac_common::notify::NullSink),
        Arc::new(outbound),
    ))
}

fn require_user(ctx: &AppContext, uid: &str) -> AppResult<()> {
    if ctx.users.exists(uid) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("no such user: {uid}")))
    }
}

fn cmd_init(basedir: &Path, host: &str) -> AppResult<()> {
    std::fs::create_dir_all(basedir)?;
    if basedir.join("server.json").exists() {
        return Err(AppError::Conflict(format!("already initialized: {}", basedir.display())));
    }
    let config = ServerConfig::new(host.to_string());
    InstanceStore::new(Basedir::new(basedir)).save_config(&config)?;
    snac_common::fsio::atomic_write(&basedir.join("style.css"), DEFAULT_STYLE_CSS.as_bytes())?;
    println!("initialized instance for {host} at {}", basedir.display());
    Ok(())
}

fn cmd_upgrade(basedir: &Path) -> AppResult<()> {
    let path = basedir.join("server.json");
    let bytes = std::fs::read(&path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let mut value: Value = serde_json::from_slice(&bytes)?;
    let on_disk = value.get("layout").and_then(Value::as_u64).unwrap_or(0);

    if on_disk as u32 == CURRENT_LAYOUT {
        println!("layout {CURRENT_LAYOUT} already current, nothing to do");
        return Ok(());
    }

    value["layout"] = json!(CURRENT_LAYOUT);
    let config: ServerConfig = serde_json::from_value(value)?;
    config.save(basedir)?;
    println!("upgraded layout {on_disk} -> {CURRENT_LAYOUT}");
    Ok(())
}

async fn cmd_httpd(basedir: &Path) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(snac_queue::dispatcher::run(ctx.clone(), tx, Duration::from_secs(5)));
    tokio::spawn(snac_queue::worker::run_pool(ctx.clone(), rx, 4));
    tokio::spawn(purge_scheduler(ctx.clone()));

    let addr = format!("{}:{}", ctx.config.address, ctx.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("cannot bind {addr}: {e}")))?;
    tracing::info!(%addr, "listening");

    let app = crate::http::router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// Background task enqueuing a `purge` item on a fixed interval (spec §4.8:
/// "a separate thread periodically schedules `purge`").
async fn purge_scheduler(ctx: AppContext) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
    loop {
        ticker.tick().await;
        let queue = DirQueue::new(ctx.base.global_queue_dir());
        if let Err(e) = queue.enqueue(&QueueItem::Purge, Utc::now()) {
            tracing::warn!(error = %e, "failed to schedule purge");
        }
    }
}

fn cmd_purge(basedir: &Path) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    purge_once(&ctx)?;
    println!("purge complete");
    Ok(())
}

/// One purge pass (spec §6 config knobs): enforce `max_timeline_entries` and
/// expire entries past `timeline_purge_days`/`local_purge_days`.
fn purge_once(ctx: &AppContext) -> AppResult<()> {
    let now = Utc::now();
    let cap = usize::try_from(ctx.config.max_timeline_entries).unwrap_or(usize::MAX);

    for uid in ctx.users.list_uids()? {
        purge_index(ctx, Some(&uid), Visibility::Public, &ctx.base.user_public_index(&uid), cap, now)?;
        purge_index(ctx, Some(&uid), Visibility::Private, &ctx.base.user_private_index(&uid), cap, now)?;
    }
    purge_instance_timeline(ctx, cap, now)?;
    Ok(())
}

fn purge_index(
    ctx: &AppContext,
    uid: Option<&str>,
    visibility: Visibility,
    index_path: &Path,
    cap: usize,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let digests = snac_store::index::read_all(index_path)?;
    let overflow = digests.len().saturating_sub(cap);

    for (i, digest) in digests.iter().enumerate() {
        let Ok(obj) = ctx.objects.get_by_md5(digest) else { continue };
        let Some(id) = get_id(&obj).map(str::to_string) else { continue };
        if i >= overflow && !is_expired(ctx, &obj, now) {
            continue;
        }
        match uid {
            Some(uid) => ctx.users.timeline_unlink(uid, visibility, &ctx.objects, &id)?,
            None => {
                ctx.instance.public_timeline_remove(digest)?;
                ctx.objects.delete_if_unreferenced(&id)?;
            }
        }
    }
    Ok(())
}

fn purge_instance_timeline(ctx: &AppContext, cap: usize, now: DateTime<Utc>) -> AppResult<()> {
    purge_index(ctx, None, Visibility::Public, &ctx.base.public_timeline(), cap, now)
}

fn is_expired(ctx: &AppContext, obj: &Value, now: DateTime<Utc>) -> bool {
    let local = get_attributed_to(obj).is_some_and(|a| ctx.is_local_actor(&a));
    let days = if local { ctx.config.local_purge_days } else { ctx.config.timeline_purge_days };
    if days == 0 {
        return false;
    }
    let Some(published) = get_str(obj, "published").and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
    else {
        return false;
    };
    now.signed_duration_since(published.with_timezone(&Utc)) > chrono::Duration::days(i64::try_from(days).unwrap_or(i64::MAX))
}

fn cmd_adduser(basedir: &Path, uid: &str, name: &str, actor_type: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    ctx.users.create(uid, name, actor_type)?;
    println!("created user {uid}");
    Ok(())
}

fn cmd_deluser(basedir: &Path, uid: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    ctx.users.delete(uid)?;
    println!("deleted user {uid}");
    Ok(())
}

/// Resolve a CLI target to an actor URL: pass URLs through, webfinger-resolve
/// everything else (spec §1's `Resolver` boundary).
async fn resolve_actor(ctx: &AppContext, target: &str) -> AppResult<String> {
    if Url::parse(target).is_ok() {
        return Ok(target.to_string());
    }
    let (url, _handle) = ctx.resolver.resolve(target).await?;
    Ok(url.to_string())
}

fn enqueue_message(ctx: &AppContext, uid: &str, message: Value) -> AppResult<()> {
    let queue = DirQueue::new(ctx.users.queue_dir(uid));
    queue.enqueue(&QueueItem::Message { message }, Utc::now())?;
    Ok(())
}

/// Load `object_id` from the local cache, falling back to a signed remote
/// fetch (so `Like`/`Announce` can derive the target's author and
/// visibility for `to` without already having seen it).
async fn fetch_or_cached(ctx: &AppContext, uid: &str, object_id: &str) -> AppResult<Value> {
    if let Ok(obj) = ctx.objects.get(object_id) {
        return Ok(obj);
    }
    let result = snac_federation::fetch::fetch(ctx, object_id, Some(uid)).await?;
    result
        .object
        .ok_or_else(|| AppError::NotFound(format!("object not found: {object_id}")))
}

async fn cmd_follow(basedir: &Path, uid: &str, target: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    let target = resolve_actor(&ctx, target).await?;
    let actor_url = ctx.actor_url(uid);
    let follow = activities::msg_follow(&ctx.config.base_url(), &actor_url, &target);
    enqueue_message(&ctx, uid, follow)?;
    println!("follow request queued for {target}");
    Ok(())
}

async fn cmd_unfollow(basedir: &Path, uid: &str, target: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    let target = resolve_actor(&ctx, target).await?;
    let actor_url = ctx.actor_url(uid);
    let follow = activities::msg_follow(&ctx.config.base_url(), &actor_url, &target);
    let undo = activities::msg_undo(&ctx.config.base_url(), &actor_url, follow);
    enqueue_message(&ctx, uid, undo)?;
    ctx.users.relation_remove(uid, relation::FOLLOWING, &target)?;
    println!("unfollowed {target}");
    Ok(())
}

fn cmd_note(basedir: &Path, uid: &str, content: &str, reply_to: Option<&str>, scope: Scope, draft: bool) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;

    let note = activities::msg_note(&ctx, uid, content, reply_to, Vec::new(), scope);
    let note_id = get_id(&note).map(str::to_string).ok_or_else(|| AppError::Internal("note missing id".into()))?;
    ctx.objects.put(&note_id, &note, false)?;

    if draft {
        ctx.users.relation_add(uid, relation::DRAFT, &note_id, None)?;
        println!("{note_id}");
        return Ok(());
    }

    let visibility = if scope == Scope::MentionedOnly { Visibility::Private } else { Visibility::Public };
    ctx.users.timeline_link(uid, visibility, &ctx.objects, &note_id)?;
    if scope == Scope::Public {
        ctx.instance.public_timeline_add(&snac_common::digest::md5_hex(&note_id))?;
    }

    let actor_url = ctx.actor_url(uid);
    let create = activities::msg_base(&ctx.config.base_url(), "Create", IdTag::Wrapper(&note_id), &actor_url, note);
    enqueue_message(&ctx, uid, create)?;
    println!("{note_id}");
    Ok(())
}

fn cmd_bookmark(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    ctx.users.relation_add(uid, relation::BOOKMARK, object_id, None)?;
    println!("bookmarked {object_id}");
    Ok(())
}

fn cmd_unbookmark(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    ctx.users.relation_remove(uid, relation::BOOKMARK, object_id)?;
    println!("unbookmarked {object_id}");
    Ok(())
}

fn cmd_pin(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    ctx.users.relation_add(uid, relation::PINNED, object_id, None)?;
    println!("pinned {object_id}");
    Ok(())
}

fn cmd_unpin(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    ctx.users.relation_remove(uid, relation::PINNED, object_id)?;
    println!("unpinned {object_id}");
    Ok(())
}

async fn cmd_boost(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    let object = fetch_or_cached(&ctx, uid, object_id).await?;
    let actor_url = ctx.actor_url(uid);
    let announce = activities::msg_announce(&ctx.config.base_url(), &actor_url, &object);
    enqueue_message(&ctx, uid, announce)?;
    if let Some(attributed_to) = get_attributed_to(&object) {
        ctx.users.list_distribute(uid, &attributed_to, object_id)?;
    }
    println!("boosted {object_id}");
    Ok(())
}

async fn cmd_like(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    let object = fetch_or_cached(&ctx, uid, object_id).await?;
    let actor_url = ctx.actor_url(uid);
    let like = activities::msg_like(&ctx.config.base_url(), &actor_url, &object);
    enqueue_message(&ctx, uid, like)?;
    println!("liked {object_id}");
    Ok(())
}

async fn cmd_unlike(basedir: &Path, uid: &str, object_id: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    let object = fetch_or_cached(&ctx, uid, object_id).await?;
    let actor_url = ctx.actor_url(uid);
    let like = activities::msg_like(&ctx.config.base_url(), &actor_url, &object);
    let undo = activities::msg_undo(&ctx.config.base_url(), &actor_url, like);
    enqueue_message(&ctx, uid, undo)?;
    println!("unliked {object_id}");
    Ok(())
}

async fn cmd_ping(basedir: &Path, uid: &str, target: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;
    let target = resolve_actor(&ctx, target).await?;
    let actor_url = ctx.actor_url(uid);
    let ping = activities::msg_ping(&ctx.config.base_url(), &actor_url, &target);
    enqueue_message(&ctx, uid, ping)?;
    println!("pinged {target}");
    Ok(())
}

fn cmd_question(basedir: &Path, uid: &str, content: &str, options: &str, multiple: bool, seconds: u64) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    require_user(&ctx, uid)?;

    let opts: Vec<String> = options.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
    let kind = if multiple { PollKind::AnyOf } else { PollKind::OneOf };
    let end_time = Utc::now() + chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX));
    let question = activities::msg_question(&ctx, uid, content, &opts, kind, end_time);
    let question_id = get_id(&question).map(str::to_string).ok_or_else(|| AppError::Internal("question missing id".into()))?;

    ctx.objects.put(&question_id, &question, false)?;
    ctx.users.timeline_link(uid, Visibility::Public, &ctx.objects, &question_id)?;
    ctx.instance.public_timeline_add(&snac_common::digest::md5_hex(&question_id))?;

    let actor_url = ctx.actor_url(uid);
    let create = activities::msg_base(&ctx.config.base_url(), "Create", IdTag::Wrapper(&question_id), &actor_url, question);
    enqueue_message(&ctx, uid, create)?;

    let global_queue = DirQueue::new(ctx.base.global_queue_dir());
    global_queue.enqueue(&QueueItem::CloseQuestion { message: question_id.clone() }, end_time)?;

    println!("{question_id}");
    Ok(())
}

fn cmd_block(basedir: &Path, host: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    ctx.instance.block_add(host)?;
    println!("blocked {host}");
    Ok(())
}

fn cmd_unblock(basedir: &Path, host: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    ctx.instance.block_remove(host)?;
    println!("unblocked {host}");
    Ok(())
}

fn cmd_resetpwd(basedir: &Path, uid: &str) -> AppResult<()> {
    let ctx = load_ctx(basedir)?;
    let mut record = ctx.users.load(uid)?;
    let clear = snac_common::id::IdGenerator.generate();
    record.password_hash = Some(snac_common::password::hash_password(uid, &clear));
    ctx.users.save(&record)?;
    println!("new password for {uid} is {clear}");
    Ok(())
}
