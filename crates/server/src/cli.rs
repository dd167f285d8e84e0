//! Command-line surface (spec §6): base directory plus one subcommand.

use clap::{Parser, Subcommand, ValueEnum};

/// A small, standalone `ActivityPub` server.
#[derive(Debug, Parser)]
#[command(name = "snac", version, about = "A small, standalone ActivityPub server")]
pub struct Cli {
    /// Instance base directory. Falls back to `SNAC_BASEDIR`, then `.`.
    pub basedir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Visibility scope accepted on the command line for `note`.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ScopeArg {
    #[default]
    Public,
    Unlisted,
    MentionedOnly,
}

impl From<ScopeArg> for snac_federation::activities::Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Public => Self::Public,
            ScopeArg::Unlisted => Self::Unlisted,
            ScopeArg::MentionedOnly => Self::MentionedOnly,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new instance directory and `server.json`.
    Init {
        /// Public hostname this instance will be reachable at.
        host: String,
    },
    /// Migrate `server.json` to the layout this binary understands.
    Upgrade,
    /// Run the HTTP server, queue dispatcher, and worker pool.
    Httpd,
    /// Run one purge pass over expired timeline entries.
    Purge,
    /// Create a local user.
    Adduser {
        uid: String,
        name: String,
        #[arg(long = "type", default_value = "Person")]
        actor_type: String,
    },
    /// Delete a local user and every file it owns.
    Deluser { uid: String },
    /// Send a `Follow` to a remote actor (handle or URL).
    Follow { uid: String, target: String },
    /// Send `Undo(Follow)` and drop the local following entry.
    Unfollow { uid: String, target: String },
    /// Author and federate a new note.
    Note {
        uid: String,
        content: String,
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long, value_enum, default_value_t = ScopeArg::Public)]
        scope: ScopeArg,
        /// Save locally without federating; visible only via `lists`/`drafts`.
        #[arg(long)]
        draft: bool,
    },
    /// `Announce` (boost) a remote object.
    Boost { uid: String, object_id: String },
    /// `Like` a remote object.
    Like { uid: String, object_id: String },
    /// `Undo(Like)` a previously-liked object.
    Unlike { uid: String, object_id: String },
    /// Send a `Ping` to a remote actor for a liveness check.
    Ping { uid: String, target: String },
    /// Author and federate a poll; `options` is `;`-separated.
    Question {
        uid: String,
        content: String,
        options: String,
        /// Allow selecting more than one option (`anyOf` instead of `oneOf`).
        #[arg(long)]
        multiple: bool,
        #[arg(long, default_value_t = 300)]
        seconds: u64,
    },
    /// Bookmark a post (local or already-cached remote).
    Bookmark { uid: String, object_id: String },
    /// Remove a bookmark.
    Unbookmark { uid: String, object_id: String },
    /// Pin one of this user's own posts to their profile.
    Pin { uid: String, object_id: String },
    /// Unpin a previously pinned post.
    Unpin { uid: String, object_id: String },
    /// Block a remote instance by hostname.
    Block { host: String },
    /// Unblock a remote instance by hostname.
    Unblock { host: String },
    /// Generate and store a new random password for a user.
    Resetpwd { uid: String },
}
