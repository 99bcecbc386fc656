//! Image reference parsing.
//!
//! A raw reference has the form `name[:tag][@digest]`. The tricky case is
//! the registry-port colon: in `registry:5000/app` the colon belongs to the
//! host, not a tag. A colon only introduces a tag when it appears after the
//! last slash.

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// The string this was parsed from.
    pub raw: String,

    /// Repository name, possibly including a registry host and port.
    pub name: String,

    /// Explicit tag, empty when none was given.
    pub tag: String,

    /// Content digest, empty when the reference is not pinned.
    pub digest: String,
}

impl ImageReference {
    /// Parse a raw reference. This never fails; a degenerate input just
    /// produces a degenerate name.
    pub fn parse(raw: &str) -> Self {
        let (base, digest) = match raw.rsplit_once('@') {
            Some((base, digest)) => (base, digest.to_string()),
            None => (raw, String::new()),
        };

        let (name, tag) = match base.rsplit_once(':') {
            // A colon before the last slash is a registry port, not a tag.
            Some((name, tag)) if !tag.contains('/') => (name.to_string(), tag.to_string()),
            _ => (base.to_string(), String::new()),
        };

        Self {
            raw: raw.to_string(),
            name,
            tag,
            digest,
        }
    }

    /// The tag that applies in practice: the explicit tag or `latest`.
    pub fn effective_tag(&self) -> &str {
        if self.tag.is_empty() {
            "latest"
        } else {
            &self.tag
        }
    }

    /// Digest-pinned references name exact content and are never
    /// auto-updated. An image-ID "name" (`sha256:...`) counts as pinned.
    pub fn is_digest_pinned(&self) -> bool {
        !self.digest.is_empty() || self.raw.starts_with("sha256:")
    }
}
