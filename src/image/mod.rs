//! Parsing of container image reference strings into their structured parts.
//!
//! Pure, no IO. Splits off any `@sha256` suffix, splits the last path
//! segment on `:` for the tag, defaults the tag to `latest`, and splits the
//! remaining path on `/` to recover registry host, org and repo.

use crate::models::ImageReference;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,
    #[error("image reference {0:?} has no registry host")]
    MissingHost,
    #[error("image reference {0:?} has no repository")]
    MissingRepo,
}

/// Strip a leading `docker-pullable://` prefix, reporting whether it was present.
pub fn strip_pullable_prefix(image: &str) -> (&str, bool) {
    match image.strip_prefix("docker-pullable://") {
        Some(rest) => (rest, true),
        None => (image, false),
    }
}

/// True if `host` names an in-cluster registry rather than an external one.
pub fn is_internal_registry(host: &str) -> bool {
    host.contains("docker-registry")
}

/// Parse a reference of any of the shapes:
/// `host/org/repo:tag`, `host/org/repo@sha256:<hex>`,
/// `host/org/repo:tag@sha256:<hex>`, `host/org/repo` (tag defaults to `latest`).
pub fn parse(raw: &str) -> Result<ImageReference, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let (stripped, from_pullable) = strip_pullable_prefix(raw);

    // Peel off a trailing "@sha256:<hex>" before splitting the path/tag, so
    // tag-and-digest references (c) are handled the same as digest-only (b).
    let (without_digest, digest_hex) = match stripped.split_once("@sha256:") {
        Some((head, hex)) => (head, Some(hex)),
        None => (stripped, None),
    };

    let parts: Vec<&str> = without_digest.split('/').collect();
    if parts.len() < 2 {
        return Err(ParseError::MissingHost);
    }

    let registry_host = parts[0].to_string();
    let last = parts[parts.len() - 1];
    let (repo_leaf, tag) = match last.split_once(':') {
        Some((name, tag)) => (name, tag.to_string()),
        None => (last, "latest".to_string()),
    };
    if repo_leaf.is_empty() {
        return Err(ParseError::MissingRepo);
    }

    let mut org_parts = parts[1..parts.len() - 1].to_vec();
    org_parts.push(repo_leaf);
    let org_image_path = org_parts.join("/");
    if org_image_path.is_empty() {
        return Err(ParseError::MissingRepo);
    }

    let digest_path = digest_hex
        .map(|hex| format!("{repo_leaf}@sha256:{hex}"))
        .unwrap_or_default();

    Ok(ImageReference {
        full_path: raw.to_string(),
        registry_host: registry_host.clone(),
        org_image_path,
        repo_name: repo_leaf.to_string(),
        tag,
        digest_path,
        from_image_stream: from_pullable && is_internal_registry(&registry_host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_org_repo_tag() {
        let r = parse("registry.access.redhat.com/amq7/api:2.0.0").unwrap();
        assert_eq!(r.registry_host, "registry.access.redhat.com");
        assert_eq!(r.org_image_path, "amq7/api");
        assert_eq!(r.repo_name, "api");
        assert_eq!(r.tag, "2.0.0");
    }

    #[test]
    fn defaults_tag_to_latest() {
        let r = parse("quay.io/foo/bar").unwrap();
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn strips_docker_pullable_prefix() {
        let r = parse("docker-pullable://docker-registry.default.svc:5000/ns/app@sha256:abc").unwrap();
        assert!(r.from_image_stream);
        assert_eq!(r.repo_name, "app");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn rejects_missing_host() {
        assert_eq!(parse("justarepo"), Err(ParseError::MissingHost));
    }

    #[test]
    fn tolerates_tag_and_digest_together() {
        let r = parse("quay.io/foo/bar:1.0@sha256:deadbeef").unwrap();
        assert_eq!(r.tag, "1.0");
        assert_eq!(r.org_image_path, "foo/bar");
    }
}
