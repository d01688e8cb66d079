//! Tag-track analysis: major.minor extraction, floating/persistent tag
//! classification, and "latest patch in this track" selection.
//!
//! Pure functions over a catalogue listing (newest first).

use crate::models::{CatalogueTag, TagType};
use once_cell::sync::Lazy;
use regex::Regex;

static MAJOR_MINOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?\d(\d?\.?)\d?(\d?\d?\d?)").unwrap());

/// Extract the major.minor "track" a tag belongs to. When `tag` is literally
/// `"latest"`, substitutes the catalogue entry immediately following the
/// `latest` alias (publishers push the real name in the same instant).
pub fn resolve_major_minor(tags: &[CatalogueTag], tag: &str) -> String {
    let effective = if tag == "latest" {
        tags.iter()
            .position(|t| t.name == "latest")
            .and_then(|idx| tags.get(idx + 1))
            .map(|t| t.name.as_str())
            .unwrap_or(tag)
    } else {
        tag
    };
    MAJOR_MINOR
        .find(effective)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Whether `tag` names a persistent entry in the listing, and its index.
pub fn is_persistent_tag(tags: &[CatalogueTag], tag: &str) -> (bool, Option<usize>) {
    match tags.iter().position(|t| t.name == tag) {
        Some(idx) => (tags[idx].tag_type == TagType::Persistent, Some(idx)),
        None => (false, None),
    }
}

/// The floating tag for `tag`'s track, and whether `tag` itself is floating.
pub fn resolve_floating_tag(tags: &[CatalogueTag], tag: &str) -> (String, bool) {
    if tag == "latest" {
        return ("latest".to_string(), true);
    }
    let major_minor = resolve_major_minor(tags, tag);
    let mut candidate = String::new();
    for t in tags {
        if t.name == tag && t.tag_type == TagType::Floating {
            return (t.name.clone(), true);
        }
        if t.name == major_minor {
            candidate = t.name.clone();
        }
    }
    if !candidate.is_empty() {
        (candidate, false)
    } else {
        (String::new(), false)
    }
}

/// The newest tag in `tags` (already restricted to a prefix of the full
/// listing) whose name matches the track `major_minor`. Falls back to the
/// last element of the prefix when nothing matches, meaning "we're already
/// at the newest entry in this window".
pub fn latest_patch_in_track<'a>(
    tags: &'a [CatalogueTag],
    major_minor: &str,
) -> Option<&'a CatalogueTag> {
    if tags.is_empty() {
        return None;
    }
    let pattern = format!("^v?{major_minor}(\\W)+");
    let re = Regex::new(&pattern).ok()?;
    tags.iter()
        .find(|t| re.is_match(&t.name))
        .or_else(|| tags.last())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, time_added: i64, tag_type: TagType) -> CatalogueTag {
        CatalogueTag {
            name: name.to_string(),
            time_added,
            freshness_grade: String::new(),
            tag_type,
        }
    }

    #[test]
    fn major_minor_from_semver() {
        let tags = vec![tag("2.0.4", 1, TagType::Persistent)];
        assert_eq!(resolve_major_minor(&tags, "2.0.0"), "2.0");
    }

    #[test]
    fn major_minor_pivots_off_latest() {
        let tags = vec![
            tag("latest", 2, TagType::Floating),
            tag("2.0.4", 2, TagType::Persistent),
            tag("2.0.1", 1, TagType::Persistent),
        ];
        assert_eq!(resolve_major_minor(&tags, "latest"), "2.0");
    }

    #[test]
    fn persistent_classification() {
        let tags = vec![
            tag("2.0.2", 3, TagType::Persistent),
            tag("2.0", 3, TagType::Floating),
        ];
        assert_eq!(is_persistent_tag(&tags, "2.0.2"), (true, Some(0)));
        assert_eq!(is_persistent_tag(&tags, "2.0"), (false, Some(1)));
        assert_eq!(is_persistent_tag(&tags, "nope"), (false, None));
    }

    #[test]
    fn floating_tag_resolution_latest() {
        let tags = vec![tag("latest", 1, TagType::Floating)];
        assert_eq!(resolve_floating_tag(&tags, "latest"), ("latest".into(), true));
    }

    #[test]
    fn floating_tag_resolution_for_persistent_tag() {
        let tags = vec![
            tag("2.0.4", 3, TagType::Persistent),
            tag("2.0", 3, TagType::Floating),
        ];
        assert_eq!(resolve_floating_tag(&tags, "2.0.4"), ("2.0".into(), false));
    }

    #[test]
    fn latest_patch_falls_back_to_last_element() {
        let tags = vec![tag("1.0.0", 0, TagType::Persistent)];
        let result = latest_patch_in_track(&tags, "1.0").unwrap();
        assert_eq!(result.name, "1.0.0");
    }

    #[test]
    fn latest_patch_picks_first_match_in_prefix() {
        let tags = vec![
            tag("2.0.2", 3, TagType::Persistent),
            tag("2.0.1", 2, TagType::Persistent),
            tag("2.0.0", 0, TagType::Persistent),
        ];
        let result = latest_patch_in_track(&tags, "2.0").unwrap();
        assert_eq!(result.name, "2.0.2");
    }

    #[test]
    fn non_semver_track_with_dated_build_tags() {
        let tags = vec![
            tag("1.11-27.1579183773", 2, TagType::Persistent),
            tag("1.11-27.1578407517", 1, TagType::Persistent),
            tag("1.11", 2, TagType::Floating),
        ];
        let major_minor = resolve_major_minor(&tags, "1.11-27.1578407517");
        assert_eq!(major_minor, "1.11");
        let latest = latest_patch_in_track(&tags, &major_minor).unwrap();
        assert_eq!(latest.name, "1.11-27.1579183773");
    }
}
