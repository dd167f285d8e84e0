//! Webfinger discovery boundary.
//!
//! Spec §1 treats Webfinger discovery as an external collaborator: "a black
//! box `resolve(handle) -> (actor_url, canonical_handle)`". The pipeline only
//! ever depends on the [`Resolver`] trait, never on a concrete HTTP
//! implementation, so tests can supply a fake without a network.

use async_trait::async_trait;
use url::Url;

use crate::error::AppResult;

/// Resolves an `@user@host`-style handle (or a bare actor URL) to its actor
/// URL and canonical handle.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `handle` to `(actor_url, canonical_handle)`.
    async fn resolve(&self, handle: &str) -> AppResult<(Url, String)>;
}

/// Production resolver performing the real `.well-known/webfinger` round-trip.
pub struct HttpResolver {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpResolver {
    /// Create a resolver that identifies itself as `user_agent` to remote servers.
    #[must_use]
    pub fn new(user_agent: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent,
        }
    }

    fn split_handle(handle: &str) -> AppResult<(String, String)> {
        let trimmed = handle.trim_start_matches('@');
        let mut parts = trimmed.splitn(2, '@');
        let user = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| crate::error::AppError::Validation(format!("bad handle {handle}")))?;
        let host = parts
            .next()
            .ok_or_else(|| crate::error::AppError::Validation(format!("bad handle {handle}")))?;
        Ok((user.to_string(), host.to_string()))
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn resolve(&self, handle: &str) -> AppResult<(Url, String)> {
        let (user, host) = Self::split_handle(handle)?;
        let resource = format!("acct:{user}@{host}");
        let url = format!("https://{host}/.well-known/webfinger?resource={resource}");

        let resp = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/jrd+json, application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(crate::error::AppError::Transport(format!(
                "webfinger lookup for {handle} failed: {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        let actor_url = body
            .get("links")
            .and_then(|l| l.as_array())
            .and_then(|links| {
                links.iter().find(|l| {
                    l.get("rel").and_then(|r| r.as_str()) == Some("self")
                        && l.get("type").and_then(|t| t.as_str())
                            .is_some_and(|t| t.contains("activity+json") || t.contains("ld+json"))
                })
            })
            .and_then(|l| l.get("href"))
            .and_then(|h| h.as_str())
            .ok_or_else(|| {
                crate::error::AppError::Validation(format!("no self link in webfinger for {handle}"))
            })?;

        let url = Url::parse(actor_url)?;
        Ok((url, format!("@{user}@{host}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_handle_with_leading_at() {
        let (user, host) = HttpResolver::split_handle("@alice@example.com").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(host, "example.com");
    }

    #[test]
    fn splits_handle_without_leading_at() {
        let (user, host) = HttpResolver::split_handle("alice@example.com").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(host, "example.com");
    }

    #[test]
    fn rejects_malformed_handle() {
        assert!(HttpResolver::split_handle("alice").is_err());
    }
}
