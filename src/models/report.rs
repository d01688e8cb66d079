use super::catalog::Cve;
use super::image::ClusterImage;
use serde::{Deserialize, Serialize};

/// The result of checking one cluster image against the registry and catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResult {
    pub component: String,
    pub actual_image_ref: String,
    pub cluster_image: ClusterImage,
    pub current_version: String,
    pub current_grade: String,
    pub latest_available_patch_version: String,
    pub latest_grade: String,
    pub floating_tag: String,
    pub using_floating_tag: bool,
    pub up_to_date_with_own_tag: bool,
    pub up_to_date_with_floating_tag: bool,
    pub resolvable_cves: Vec<Cve>,
}

impl ReportResult {
    pub fn resolvable_critical_cves(&self) -> Vec<&Cve> {
        self.by_severity("critical")
    }

    pub fn resolvable_important_cves(&self) -> Vec<&Cve> {
        self.by_severity("important")
    }

    pub fn resolvable_moderate_cves(&self) -> Vec<&Cve> {
        self.by_severity("moderate")
    }

    fn by_severity(&self, severity: &str) -> Vec<&Cve> {
        self.resolvable_cves
            .iter()
            .filter(|c| c.severity.eq_ignore_ascii_case(severity))
            .collect()
    }
}
