//! The server context value (spec §5): one struct threading the base
//! directory, configuration, HTTP client, storage handles, and the three
//! boundary traits through every subsystem instead of reaching for globals.

use std::sync::Arc;

use snac_common::config::ServerConfig;
use snac_common::notify::Sink;
use snac_common::outbound::OutboundQueue;
use snac_common::webfinger::Resolver;
use snac_mfm::TextFormatter;
use snac_store::{Basedir, InstanceStore, ObjectStore, UserStore};

/// Shared, cheaply-clonable handle to everything a pipeline stage needs.
#[derive(Clone)]
pub struct AppContext {
    pub base: Basedir,
    pub config: ServerConfig,
    pub http: reqwest::Client,
    pub objects: ObjectStore,
    pub users: UserStore,
    pub instance: InstanceStore,
    pub formatter: Arc<dyn TextFormatter>,
    pub resolver: Arc<dyn Resolver>,
    pub notify: Arc<dyn Sink>,
    pub outbound: Arc<dyn OutboundQueue>,
}

impl AppContext {
    /// Build a context from a base directory and its loaded configuration.
    #[must_use]
    pub fn new(
        base: Basedir,
        config: ServerConfig,
        formatter: Arc<dyn TextFormatter>,
        resolver: Arc<dyn Resolver>,
        notify: Arc<dyn Sink>,
        outbound: Arc<dyn OutboundQueue>,
    ) -> Self {
        Self {
            objects: ObjectStore::new(base.clone()),
            users: UserStore::new(base.clone()),
            instance: InstanceStore::new(base.clone()),
            http: reqwest::Client::builder()
                .user_agent(format!("snac-rs/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base,
            config,
            formatter,
            resolver,
            notify,
            outbound,
        }
    }

    /// Canonical actor URL for a local user id, e.g. `https://host/alice`.
    #[must_use]
    pub fn actor_url(&self, uid: &str) -> String {
        format!("{}/{}", self.config.base_url(), uid)
    }

    /// Whether `actor_url` names a local user of this instance.
    #[must_use]
    pub fn is_local_actor(&self, actor_url: &str) -> bool {
        actor_url.starts_with(&self.config.base_url())
    }

    /// Extract the local uid from an actor URL this instance owns, if it is one.
    #[must_use]
    pub fn local_uid(&self, actor_url: &str) -> Option<&str> {
        let prefix = format!("{}/", self.config.base_url());
        actor_url.strip_prefix(&prefix)
    }
}
