use serde::{Deserialize, Serialize};

/// How a published tag's target digest behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagType {
    Floating,
    Persistent,
    Unknown,
}

impl TagType {
    pub fn from_catalog_str(s: &str) -> Self {
        match s {
            "floating" => TagType::Floating,
            "persistent" => TagType::Persistent,
            _ => TagType::Unknown,
        }
    }
}

/// A single tag as published in the upstream catalogue, decorated with its
/// freshness grade and push time. Listings are sorted by `time_added`
/// descending by the catalogue client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueTag {
    pub name: String,
    pub time_added: i64,
    pub freshness_grade: String,
    pub tag_type: TagType,
}

/// A vulnerability reported by the catalogue for one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cve {
    pub id: String,
    pub severity: String,
    pub advisory_id: String,
}
