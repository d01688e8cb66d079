//! Wire types for the vendor catalogue HTTP API. Only the fields Heimdall
//! actually reads are modeled; everything else in the real payload is
//! ignored by `serde` rather than mirrored.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RepositoryListing {
    pub processed: Vec<ProcessedRepository>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessedRepository {
    pub images: Vec<RepositoryImage>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryImage {
    #[serde(default, rename = "freshness_grades")]
    pub freshness_grades: Vec<FreshnessGrade>,
    pub repositories: Vec<TaggedRepository>,
}

#[derive(Debug, Deserialize)]
pub struct FreshnessGrade {
    #[serde(default, rename = "end_date")]
    pub end_date: String,
    pub grade: String,
    #[serde(rename = "start_date")]
    pub start_date: String,
}

#[derive(Debug, Deserialize)]
pub struct TaggedRepository {
    pub tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
pub struct RawTag {
    #[serde(rename = "added_date")]
    pub added_date: String,
    pub name: String,
    #[serde(default, rename = "tag_history")]
    pub tag_history: Vec<TagHistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TagHistoryEntry {
    #[serde(rename = "tag_type")]
    pub tag_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageDetail {
    pub processed: Vec<ProcessedImageDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessedImageDetail {
    pub images: Vec<ImageDetailImage>,
}

#[derive(Debug, Deserialize)]
pub struct ImageDetailImage {
    #[serde(default, rename = "vulnerabilitiesRef")]
    pub vulnerabilities_ref: Vec<RawVulnerability>,
}

#[derive(Debug, Deserialize)]
pub struct RawVulnerability {
    pub severity: String,
    #[serde(rename = "advisory_id")]
    pub advisory_id: String,
    #[serde(rename = "cve_id")]
    pub cve_id: String,
}

/// Date format used throughout the catalogue API: `20060102T15:04:05.000-0700`.
pub const CATALOGUE_TIME_FORMAT: &str = "%Y%m%dT%H:%M:%S%.3f%z";
