//! Image check engine: orchestrates the parser, registry client, catalogue
//! client and tag-track analyzer for one cluster image and produces a
//! `ReportResult`.

use crate::analyzer;
use crate::catalog::{CatalogueClient, CatalogueError};
use crate::models::{ClusterImage, CatalogueTag, Cve, ReportResult};
use crate::registry::{RegistryClient, RegistryError};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),
    #[error("image {0} has neither a tag nor a digest")]
    InvariantViolation(String),
    #[error("programmer error: {0}")]
    Programmer(String),
}

pub struct ImageCheckEngine {
    registry: RegistryClient,
    catalogue: CatalogueClient,
    /// Resolved-reference -> digest, scoped to one engine instance (callers
    /// construct one engine per reconcile so this bounds round-trips across
    /// every image of a single workload, not just within one image's walk).
    digest_cache: HashMap<String, String>,
}

impl ImageCheckEngine {
    pub fn new(registry: RegistryClient, catalogue: CatalogueClient) -> Self {
        Self {
            registry,
            catalogue,
            digest_cache: HashMap::new(),
        }
    }

    #[instrument(skip(self, image), fields(image = %image.reference.full_path))]
    pub async fn check(&mut self, image: &ClusterImage, namespace: &str) -> Result<ReportResult, EngineError> {
        if image.reference.tag.is_empty() && image.reference.digest_path.is_empty() {
            return Err(EngineError::InvariantViolation(image.reference.full_path.clone()));
        }

        let tag_digest = self.cached_digest(&image.reference.full_path, namespace).await?;

        let sha_digest = if image.reference.from_image_stream {
            image.sha_from_path().to_string()
        } else {
            self.cached_digest(&image.sha256_path, namespace).await?
        };

        let up_to_date_with_own_tag = tag_digest == sha_digest;

        let org_path = image.reference.org_image_path.clone();
        let listing = self.catalogue.list_tags(&org_path).await?;

        let major_minor = analyzer::resolve_major_minor(&listing, &image.reference.tag);
        let (floating_tag, using_floating_tag) = analyzer::resolve_floating_tag(&listing, &image.reference.tag);
        let (is_persistent, idx) = analyzer::is_persistent_tag(&listing, &image.reference.tag);

        let mut up_to_date_with_floating_tag = false;
        if !floating_tag.is_empty() {
            let candidate = format!("{}:{}", image.reference.registry_path(), floating_tag);
            let floating_digest = self.cached_digest(&candidate, namespace).await?;
            up_to_date_with_floating_tag = floating_digest == sha_digest;
        }

        let (current_version_tag, latest_patch_tag) = if is_persistent {
            let idx = idx.ok_or_else(|| {
                EngineError::Programmer(format!("tag {} classified persistent but not found in listing", image.reference.tag))
            })?;
            let current = listing[idx].name.clone();
            let latest = analyzer::latest_patch_in_track(&listing[0..idx], &major_minor)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| current.clone());
            (current, latest)
        } else {
            self.resolve_current_by_digest(&listing, &major_minor, &image.reference, &sha_digest, namespace)
                .await?
        };

        let current_grade = listing
            .iter()
            .find(|t| t.name == current_version_tag)
            .map(|t| t.freshness_grade.clone())
            .unwrap_or_default();
        let latest_grade = listing
            .iter()
            .find(|t| t.name == latest_patch_tag)
            .map(|t| t.freshness_grade.clone())
            .unwrap_or_default();

        let resolvable_cves = if current_version_tag == latest_patch_tag {
            Vec::new()
        } else {
            self.resolvable_cves(&org_path, &current_version_tag, &latest_patch_tag).await?
        };

        Ok(ReportResult {
            component: image.component.clone(),
            actual_image_ref: image.reference.full_path.clone(),
            cluster_image: image.clone(),
            current_version: current_version_tag,
            current_grade,
            latest_available_patch_version: latest_patch_tag,
            latest_grade,
            floating_tag,
            using_floating_tag,
            up_to_date_with_own_tag,
            up_to_date_with_floating_tag,
            resolvable_cves,
        })
    }

    /// Floating-or-unknown branch of step 7: walk the listing looking for the
    /// entry whose resolved digest matches what's actually running.
    async fn resolve_current_by_digest(
        &mut self,
        listing: &[CatalogueTag],
        major_minor: &str,
        reference: &crate::models::ImageReference,
        sha_digest: &str,
        namespace: &str,
    ) -> Result<(String, String), EngineError> {
        let pattern = format!("^v?{major_minor}(\\W)+");
        let re = Regex::new(&pattern)
            .map_err(|e| EngineError::Programmer(format!("invalid track pattern {pattern:?}: {e}")))?;

        let mut found: Option<usize> = None;
        for (j, t) in listing.iter().enumerate() {
            if !re.is_match(&t.name) {
                continue;
            }
            let candidate = format!("{}:{}", reference.registry_path(), t.name);
            let digest = self.cached_digest(&candidate, namespace).await?;
            if digest != sha_digest {
                continue;
            }
            let more_specific_follows = listing[j + 1..].iter().any(|other| re.is_match(&other.name));
            if t.name == "latest" && more_specific_follows {
                continue;
            }
            found = Some(j);
            break;
        }

        let current_version_tag = found.map(|j| listing[j].name.clone()).unwrap_or_default();
        let latest_patch_tag = match found {
            Some(0) => listing[0].name.clone(),
            Some(j) => analyzer::latest_patch_in_track(&listing[0..j], major_minor)
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            None => String::new(),
        };

        Ok((current_version_tag, latest_patch_tag))
    }

    async fn resolvable_cves(&mut self, org_path: &str, current: &str, latest: &str) -> Result<Vec<Cve>, EngineError> {
        let current_cves = self.catalogue.cves_for(org_path, current).await?;
        let latest_cves = self.catalogue.cves_for(org_path, latest).await?;
        let latest_ids: HashSet<&str> = latest_cves.iter().map(|c| c.id.as_str()).collect();

        let mut seen = HashSet::new();
        let mut resolvable = Vec::new();
        for cve in current_cves {
            if !latest_ids.contains(cve.id.as_str()) && seen.insert(cve.id.clone()) {
                resolvable.push(cve);
            }
        }
        Ok(resolvable)
    }

    async fn cached_digest(&mut self, reference: &str, namespace: &str) -> Result<String, RegistryError> {
        if let Some(cached) = self.digest_cache.get(reference) {
            return Ok(cached.clone());
        }
        let digest = self.registry.digest(reference, namespace).await?;
        self.digest_cache.insert(reference.to_string(), digest.clone());
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagType;

    fn tag(name: &str, time_added: i64, tag_type: TagType, grade: &str) -> CatalogueTag {
        CatalogueTag {
            name: name.to_string(),
            time_added,
            freshness_grade: grade.to_string(),
            tag_type,
        }
    }

    #[test]
    fn resolvable_cves_is_a_set_difference_deduped_by_id() {
        let current = vec![
            Cve { id: "CVE-1".into(), severity: "moderate".into(), advisory_id: "RHSA-1".into() },
            Cve { id: "CVE-2".into(), severity: "important".into(), advisory_id: "RHSA-2".into() },
            Cve { id: "CVE-2".into(), severity: "important".into(), advisory_id: "RHSA-2".into() },
        ];
        let latest_ids: HashSet<&str> = ["CVE-1"].into_iter().collect();
        let mut seen = HashSet::new();
        let mut resolvable = Vec::new();
        for cve in current {
            if !latest_ids.contains(cve.id.as_str()) && seen.insert(cve.id.clone()) {
                resolvable.push(cve);
            }
        }
        assert_eq!(resolvable.len(), 1);
        assert_eq!(resolvable[0].id, "CVE-2");
    }

    #[test]
    fn grade_lookup_is_empty_when_tag_absent_from_listing() {
        let listing = vec![tag("2.0.4", 3, TagType::Persistent, "GOLD")];
        let grade = listing.iter().find(|t| t.name == "9.9.9").map(|t| t.freshness_grade.clone());
        assert_eq!(grade, None);
    }
}
