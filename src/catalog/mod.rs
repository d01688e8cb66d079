//! Client for the vendor container catalogue: published tag listings (with
//! freshness grade and floating/persistent classification) and per-tag CVE
//! lists.

pub mod types;

use crate::metrics::{REGISTRY_CALLS_FAILURE, REGISTRY_CALLS_SUCCESS, REGISTRY_CALLS_TOTAL};
use crate::models::{CatalogueTag, Cve, TagType};
use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use types::{CATALOGUE_TIME_FORMAT, ImageDetail, RepositoryListing};

const CATALOGUE_HOST: &str = "https://rhcc-api.redhat.com/rest/v1";
const REGISTRY_NAME: &str = "registry.access.redhat.com";

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("org and tag must not be empty (org={org:?}, tag={tag:?})")]
    MissingArgument { org: String, tag: String },
    #[error("transport error calling catalogue: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalogue returned unexpected status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
    #[error("failed to parse a pushed-at timestamp: {0}")]
    BadTimestamp(String),
}

impl CatalogueError {
    /// 5xx and transport failures are worth a caller retry; 4xx (other than
    /// throttling) are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogueError::Transport(_) => true,
            CatalogueError::UnexpectedStatus(status) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

pub struct CatalogueClient {
    http: reqwest::Client,
}

impl Default for CatalogueClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogueClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// List all published tags for `org_path`, newest first.
    pub async fn list_tags(&self, org_path: &str) -> Result<Vec<CatalogueTag>, CatalogueError> {
        REGISTRY_CALLS_TOTAL.inc();
        let encoded_org = double_encode(org_path);
        let url = format!("{CATALOGUE_HOST}/repository/{REGISTRY_NAME}/{encoded_org}/images");

        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                REGISTRY_CALLS_FAILURE.inc();
                return Err(e.into());
            }
        };
        if !resp.status().is_success() {
            REGISTRY_CALLS_FAILURE.inc();
            return Err(CatalogueError::UnexpectedStatus(resp.status()));
        }

        let listing: RepositoryListing = resp.json().await?;
        let now = Utc::now();

        let mut tags = Vec::new();
        for processed in &listing.processed {
            for image in &processed.images {
                let grade = active_freshness_grade(&image.freshness_grades, now);
                for repo in &image.repositories {
                    for raw in &repo.tags {
                        let added = DateTime::parse_from_str(&raw.added_date, CATALOGUE_TIME_FORMAT)
                            .map_err(|_| CatalogueError::BadTimestamp(raw.added_date.clone()))?;
                        let tag_type = if raw.tag_history.len() == 1 {
                            TagType::from_catalog_str(&raw.tag_history[0].tag_type)
                        } else {
                            TagType::Unknown
                        };
                        tags.push(CatalogueTag {
                            name: raw.name.clone(),
                            time_added: added.timestamp(),
                            freshness_grade: grade.clone().unwrap_or_default(),
                            tag_type,
                        });
                    }
                }
            }
        }

        tags.sort_by(|a, b| b.time_added.cmp(&a.time_added));
        REGISTRY_CALLS_SUCCESS.inc();
        Ok(tags)
    }

    /// CVEs reported for a specific `org_path`/`tag`, deduplicated by id.
    pub async fn cves_for(&self, org_path: &str, tag: &str) -> Result<Vec<Cve>, CatalogueError> {
        if org_path.is_empty() || tag.is_empty() {
            return Err(CatalogueError::MissingArgument {
                org: org_path.to_string(),
                tag: tag.to_string(),
            });
        }

        REGISTRY_CALLS_TOTAL.inc();
        let encoded_org = double_encode(org_path);
        let url =
            format!("{CATALOGUE_HOST}/repository/{REGISTRY_NAME}/{encoded_org}/images/{tag}?architecture=");

        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                REGISTRY_CALLS_FAILURE.inc();
                return Err(e.into());
            }
        };
        if !resp.status().is_success() {
            REGISTRY_CALLS_FAILURE.inc();
            return Err(CatalogueError::UnexpectedStatus(resp.status()));
        }

        let detail: ImageDetail = resp.json().await?;
        let mut seen = std::collections::HashSet::new();
        let mut cves = Vec::new();
        for processed in &detail.processed {
            for image in &processed.images {
                for v in &image.vulnerabilities_ref {
                    if seen.insert(v.cve_id.clone()) {
                        cves.push(Cve {
                            id: v.cve_id.clone(),
                            severity: v.severity.clone(),
                            advisory_id: v.advisory_id.clone(),
                        });
                    }
                }
            }
        }

        REGISTRY_CALLS_SUCCESS.inc();
        Ok(cves)
    }
}

/// The upstream API requires the org path to be percent-encoded twice.
fn double_encode(org_path: &str) -> String {
    urlencoding::encode(&urlencoding::encode(org_path)).into_owned()
}

fn active_freshness_grade(
    grades: &[types::FreshnessGrade],
    now: DateTime<Utc>,
) -> Option<String> {
    for g in grades {
        let Ok(start) = DateTime::<FixedOffset>::parse_from_str(&g.start_date, CATALOGUE_TIME_FORMAT)
        else {
            continue;
        };
        if start > now {
            continue;
        }
        if g.end_date.is_empty() {
            return Some(g.grade.clone());
        }
        let Ok(end) = DateTime::<FixedOffset>::parse_from_str(&g.end_date, CATALOGUE_TIME_FORMAT)
        else {
            continue;
        };
        if end <= now {
            return Some(g.grade.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_encodes_org_path_with_slash() {
        let encoded = double_encode("amq7/api");
        assert_eq!(encoded, "amq7%252Fapi");
    }

    #[test]
    fn rejects_empty_arguments_for_cves() {
        let err = CatalogueError::MissingArgument {
            org: String::new(),
            tag: "latest".to_string(),
        };
        assert!(matches!(err, CatalogueError::MissingArgument { .. }));
    }
}
