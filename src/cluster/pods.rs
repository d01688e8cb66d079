//! Pod/workload writeback: patches the pods named in a `ReportResult` with
//! the label/annotation vocabulary described in the external interfaces.

use crate::models::ReportResult;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WritebackError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("pod {namespace}/{name} is not Running, refusing to label it")]
    NotRunning { namespace: String, name: String },
}

pub struct PodLabeller {
    client: Client,
}

impl PodLabeller {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Label every pod referenced by `report`. A pod that isn't `Running` is
    /// refused (logged, reported as an error) rather than silently skipped,
    /// so crash-looping pods are visible in logs; the caller continues with
    /// the remaining pods.
    pub async fn label_report(&self, report: &ReportResult) -> Vec<WritebackError> {
        let mut errors = Vec::new();

        for pod_ref in &report.cluster_image.pods {
            if let Err(e) = self.label_one_pod(report, pod_ref).await {
                error!(
                    namespace = %pod_ref.namespace,
                    pod = %pod_ref.name,
                    error = %e,
                    "failed to label pod"
                );
                errors.push(e);
            }
        }

        errors
    }

    async fn label_one_pod(
        &self,
        report: &ReportResult,
        pod_ref: &crate::models::PodAndContainerRef,
    ) -> Result<(), WritebackError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod_ref.namespace);
        let pod = pods.get(&pod_ref.name).await?;

        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("");
        if phase != "Running" {
            return Err(WritebackError::NotRunning {
                namespace: pod_ref.namespace.clone(),
                name: pod_ref.name.clone(),
            });
        }

        let critical = report.resolvable_critical_cves().len();
        let important = report.resolvable_important_cves().len();
        let moderate = report.resolvable_moderate_cves().len();
        let updated_available = !report.up_to_date_with_floating_tag;

        let mut labels = serde_json::Map::new();
        let mut annotations = serde_json::Map::new();

        for container in &pod_ref.containers {
            labels.insert(format!("heimdall.{container}.resolvableCriticalCVEs"), json!(critical.to_string()));
            labels.insert(format!("heimdall.{container}.resolvableImportantCVEs"), json!(important.to_string()));
            labels.insert(format!("heimdall.{container}.resolvableModerateCVEs"), json!(moderate.to_string()));
            labels.insert(format!("heimdall.{container}.currentImage"), json!(report.current_version.clone()));
            labels.insert(
                format!("heimdall.{container}.latestPatchImage"),
                json!(report.latest_available_patch_version.clone()),
            );

            if let Some(stream_ref) = &report.cluster_image.image_stream_tag {
                annotations.insert(format!("heimdall.{container}.imagestreamTag"), json!(stream_ref.name.clone()));
                annotations.insert(
                    format!("heimdall.{container}.imagestreamTagNamespace"),
                    json!(stream_ref.namespace.clone()),
                );
            }
        }

        labels.insert("heimdall.resolvableCriticalCVEs".to_string(), json!((critical > 0).to_string()));
        labels.insert("heimdall.resolvableImportantCVEs".to_string(), json!((important > 0).to_string()));
        labels.insert("heimdall.resolvableModerateCVEs".to_string(), json!((moderate > 0).to_string()));
        labels.insert("heimdall.updatedImageAvailable".to_string(), json!(updated_available.to_string()));

        let patch = json!({
            "metadata": {
                "labels": serde_json::Value::Object(labels),
                "annotations": serde_json::Value::Object(annotations),
            }
        });

        pods.patch(&pod_ref.name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        info!(namespace = %pod_ref.namespace, pod = %pod_ref.name, "labelled pod");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterImage, Cve, ImageReference};

    fn report_with_cves(critical: usize, important: usize) -> ReportResult {
        let mut cves = Vec::new();
        for i in 0..critical {
            cves.push(Cve { id: format!("CVE-C{i}"), severity: "critical".into(), advisory_id: "RHSA-1".into() });
        }
        for i in 0..important {
            cves.push(Cve { id: format!("CVE-I{i}"), severity: "important".into(), advisory_id: "RHSA-2".into() });
        }

        ReportResult {
            component: "api".into(),
            actual_image_ref: "foo.io/amq7/api:2.0.0".into(),
            cluster_image: ClusterImage {
                reference: ImageReference {
                    full_path: "foo.io/amq7/api:2.0.0".into(),
                    registry_host: "foo.io".into(),
                    org_image_path: "amq7/api".into(),
                    repo_name: "api".into(),
                    tag: "2.0.0".into(),
                    digest_path: String::new(),
                    from_image_stream: false,
                },
                sha256_path: "api@sha256:abc".into(),
                pods: Vec::new(),
                image_stream_tag: None,
                component: "api".into(),
            },
            current_version: "2.0.0".into(),
            current_grade: String::new(),
            latest_available_patch_version: "2.0.4".into(),
            latest_grade: String::new(),
            floating_tag: "2.0".into(),
            using_floating_tag: false,
            up_to_date_with_own_tag: true,
            up_to_date_with_floating_tag: false,
            resolvable_cves: cves,
        }
    }

    #[test]
    fn per_container_and_aggregate_counts_match_scenario_f() {
        let report = report_with_cves(1, 1);
        assert_eq!(report.resolvable_critical_cves().len(), 1);
        assert_eq!(report.resolvable_important_cves().len(), 1);
        assert_eq!(report.resolvable_moderate_cves().len(), 0);
        assert!(!report.up_to_date_with_floating_tag);
    }
}
