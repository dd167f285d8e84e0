//! Plain-text-to-HTML formatting boundary (spec §4.7/§4.8: `msg_note`'s
//! formatting step).
//!
//! The engine itself does not need a full markdown grammar — only a place to
//! plug one in. [`TextFormatter`] is that seam: given a note body, produce
//! the HTML `content` a remote peer will render, plus the mention handles and
//! hashtags the caller needs to build `tag`/`cc`. [`DefaultFormatter`] covers
//! paragraphs, line breaks, and mention/hashtag linkification — grounded in
//! the original engine's `activitypub.c` mention/hashtag scan, not a Misskey
//! MFM-compatible renderer.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// The result of formatting one note body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedText {
    /// HTML suitable for the `content` field of an outgoing object.
    pub html: String,
    /// Raw `@user@host` (or bare `@user`) handles found in the body, in
    /// first-seen order, deduplicated.
    pub mentions: Vec<String>,
    /// Hashtags found in the body (without the leading `#`), in first-seen
    /// order, deduplicated.
    pub hashtags: Vec<String>,
}

/// Converts a note body into the HTML + extracted entities an outgoing
/// object needs. Implementations must not panic on arbitrary user input.
pub trait TextFormatter: Send + Sync {
    /// Format `raw`. `tag_base_url` is this instance's base URL, used to
    /// build local hashtag links (e.g. `{tag_base_url}/tag/{tag}`).
    fn format(&self, raw: &str, tag_base_url: &str) -> FormattedText;
}

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@[A-Za-z0-9_][A-Za-z0-9_.-]*(?:@[A-Za-z0-9.-]+)?").expect("static regex"));
static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#[A-Za-z0-9_]+").expect("static regex"));

/// The engine's built-in formatter: escapes HTML, wraps paragraphs, turns
/// `\n\n` into paragraph breaks and single `\n` into `<br>`, and linkifies
/// mentions (as `acct:` placeholders, resolved to actor URLs one layer up by
/// `snac-federation`, which knows how to do webfinger) and hashtags.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl TextFormatter for DefaultFormatter {
    fn format(&self, raw: &str, tag_base_url: &str) -> FormattedText {
        let mut mentions = Vec::new();
        let mut seen_mentions = BTreeSet::new();
        let mut hashtags = Vec::new();
        let mut seen_hashtags = BTreeSet::new();

        let paragraphs: Vec<String> = raw
            .split("\n\n")
            .map(|para| {
                let escaped = escape_html(para);
                let linked = linkify(&escaped, tag_base_url, &mut mentions, &mut seen_mentions, &mut hashtags, &mut seen_hashtags);
                linked.replace('\n', "<br>")
            })
            .collect();

        let html = paragraphs
            .into_iter()
            .map(|p| format!("<p>{p}</p>"))
            .collect::<Vec<_>>()
            .join("");

        FormattedText { html, mentions, hashtags }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn linkify(
    escaped: &str,
    tag_base_url: &str,
    mentions: &mut Vec<String>,
    seen_mentions: &mut BTreeSet<String>,
    hashtags: &mut Vec<String>,
    seen_hashtags: &mut BTreeSet<String>,
) -> String {
    let after_mentions = MENTION_RE.replace_all(escaped, |caps: &regex::Captures<'_>| {
        let handle = caps[0].to_string();
        if seen_mentions.insert(handle.clone()) {
            mentions.push(handle.clone());
        }
        format!(
            r#"<span class="h-card"><a href="acct:{}" class="u-url mention">{}</a></span>"#,
            handle.trim_start_matches('@'),
            handle
        )
    });

    HASHTAG_RE
        .replace_all(&after_mentions, |caps: &regex::Captures<'_>| {
            let full = caps[0].to_string();
            let tag = full.trim_start_matches('#').to_string();
            if seen_hashtags.insert(tag.clone()) {
                hashtags.push(tag.clone());
            }
            format!(r#"<a href="{tag_base_url}/tag/{tag}" class="mention hashtag" rel="tag">{full}</a>"#)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_paragraphs_and_breaks() {
        let f = DefaultFormatter;
        let out = f.format("line one\nline two\n\nsecond paragraph", "https://example.com");
        assert_eq!(out.html, "<p>line one<br>line two</p><p>second paragraph</p>");
    }

    #[test]
    fn escapes_html_special_characters() {
        let f = DefaultFormatter;
        let out = f.format("<script>alert(1)</script>", "https://example.com");
        assert!(out.html.contains("&lt;script&gt;"));
        assert!(!out.html.contains("<script>"));
    }

    #[test]
    fn extracts_and_links_mentions() {
        let f = DefaultFormatter;
        let out = f.format("hello @alice@remote.example, welcome", "https://example.com");
        assert_eq!(out.mentions, vec!["@alice@remote.example".to_string()]);
        assert!(out.html.contains(r#"href="acct:alice@remote.example""#));
    }

    #[test]
    fn extracts_and_links_hashtags() {
        let f = DefaultFormatter;
        let out = f.format("big news #rustlang today", "https://example.com");
        assert_eq!(out.hashtags, vec!["rustlang".to_string()]);
        assert!(out.html.contains(r#"href="https://example.com/tag/rustlang""#));
    }

    #[test]
    fn deduplicates_repeated_mentions_and_hashtags() {
        let f = DefaultFormatter;
        let out = f.format("#a #a @bob@x.example @bob@x.example", "https://example.com");
        assert_eq!(out.hashtags, vec!["a".to_string()]);
        assert_eq!(out.mentions, vec!["@bob@x.example".to_string()]);
    }
}
