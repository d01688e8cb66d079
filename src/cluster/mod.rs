//! Cluster image discovery: for a workload, produce the distinct set of
//! `ClusterImage`s it is running, either from pod-template label selectors
//! or from image-change-trigger chains.

pub mod pods;

use crate::models::{ClusterImage, ImageStreamTagRef, PodAndContainerRef};
use crate::image::{self, ParseError as ImageParseError};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, ResourceExt, api::ListParams};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_IMAGE_STREAM_DEPTH: u32 = 10;

static LOCAL_DOCKER_HOST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(docker-[^@]*)@").unwrap());

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("image-stream-tag chain for {0} exceeded the maximum resolution depth")]
    CycleOrTooDeep(String),
    #[error("failed to parse image reference {0:?}: {1}")]
    Image(String, ImageParseError),
}

/// A declarative trigger pointing a workload's image at an image-stream tag.
#[derive(Debug, Clone)]
pub struct ImageChangeTrigger {
    pub container_name: String,
    pub from_name: String,
    pub from_namespace: Option<String>,
}

pub struct ClusterImageDiscovery {
    client: Client,
}

impl ClusterImageDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Label-selector mode: list pods matching `pod_template_labels`, parse
    /// each container's image, skip internal-registry references (those
    /// belong to the trigger-driven mode for some other workload), and
    /// dedupe by content digest. Pods are attached with their full **spec**
    /// container list, not just the containers whose image matched, so
    /// sidecars are still enumerated.
    pub async fn discover_from_labels(
        &self,
        namespace: &str,
        pod_template_labels: &BTreeMap<String, String>,
        component: &str,
    ) -> Result<Vec<ClusterImage>, DiscoveryError> {
        let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = pod_template_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let pods = pods_api.list(&ListParams::default().labels(&selector)).await?;

        let mut by_digest: HashMap<String, ClusterImage> = HashMap::new();

        for pod in &pods.items {
            let pod_name = pod.name_any();
            let spec_containers: Vec<String> = pod
                .spec
                .as_ref()
                .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                .unwrap_or_default();

            let statuses = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .cloned()
                .unwrap_or_default();

            for status in statuses {
                let Some(image_id) = status.image_id.clone().filter(|s| !s.is_empty()) else {
                    continue;
                };
                if image_id.contains("docker-registry") {
                    continue;
                }

                let reference = match image::parse(&status.image) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("skipping unparseable image {} on pod {}: {}", status.image, pod_name, e);
                        continue;
                    }
                };

                let sha256_path = normalize_digest_path(&reference.repo_name, &image_id);

                let entry = by_digest.entry(sha256_path.clone()).or_insert_with(|| ClusterImage {
                    reference: reference.clone(),
                    sha256_path: sha256_path.clone(),
                    pods: Vec::new(),
                    image_stream_tag: None,
                    component: component.to_string(),
                });

                if !entry.pods.iter().any(|p| p.name == pod_name && p.namespace == namespace) {
                    entry.pods.push(PodAndContainerRef {
                        name: pod_name.clone(),
                        namespace: namespace.to_string(),
                        containers: spec_containers.clone(),
                    });
                }
            }
        }

        Ok(by_digest.into_values().collect())
    }

    /// Trigger-driven mode: resolve each trigger's image-stream-tag chain to
    /// a concrete registry reference, bounded and cycle-detected.
    pub async fn discover_from_triggers(
        &self,
        namespace: &str,
        triggers: &[ImageChangeTrigger],
        pod_template_labels: &BTreeMap<String, String>,
        component: &str,
    ) -> Result<Vec<ClusterImage>, DiscoveryError> {
        let mut images = Vec::new();
        for trigger in triggers {
            let resolved = self.resolve_tag_chain(namespace, trigger).await?;
            let Some((full_ref, observed_digest, stream_ref)) = resolved else {
                continue;
            };

            let reference = image::parse(&full_ref)
                .map_err(|e| DiscoveryError::Image(full_ref.clone(), e))?;
            let sha256_path = normalize_digest_path(&reference.repo_name, &observed_digest);

            let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let selector = pod_template_labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            let pods = pods_api.list(&ListParams::default().labels(&selector)).await?;

            let mut pod_refs = Vec::new();
            for pod in &pods.items {
                let containers: Vec<String> = pod
                    .spec
                    .as_ref()
                    .map(|s| {
                        s.containers
                            .iter()
                            .filter(|c| c.name == trigger.container_name)
                            .map(|c| c.name.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                if !containers.is_empty() {
                    pod_refs.push(PodAndContainerRef {
                        name: pod.name_any(),
                        namespace: namespace.to_string(),
                        containers,
                    });
                }
            }

            images.push(ClusterImage {
                reference,
                sha256_path,
                pods: pod_refs,
                image_stream_tag: Some(stream_ref),
                component: component.to_string(),
            });
        }
        Ok(images)
    }

    /// Recursively follows an `ImageStreamTag` reference until a concrete
    /// registry image is reached, returning `(fullRef, contentDigest, originatingStreamRef)`.
    async fn resolve_tag_chain(
        &self,
        namespace: &str,
        trigger: &ImageChangeTrigger,
    ) -> Result<Option<(String, String, ImageStreamTagRef)>, DiscoveryError> {
        let origin = ImageStreamTagRef {
            name: trigger.from_name.clone(),
            namespace: trigger.from_namespace.clone().unwrap_or_else(|| namespace.to_string()),
        };

        let mut current = origin.clone();
        let mut visited = HashSet::new();
        let ist_resource = ApiResource::from_gvk(&GroupVersionKind::gvk("image.openshift.io", "v1", "ImageStreamTag"));

        for depth in 0..MAX_IMAGE_STREAM_DEPTH {
            let key = format!("{}/{}", current.namespace, current.name);
            if !visited.insert(key.clone()) {
                return Err(DiscoveryError::CycleOrTooDeep(key));
            }

            let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &current.namespace, &ist_resource);
            let obj = match api.get(&current.name).await {
                Ok(obj) => obj,
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    debug!("image stream tag {} not found", key);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(next) = follows_another_tag(&obj.data) {
                current = ImageStreamTagRef {
                    name: next.0,
                    namespace: next.1.unwrap_or_else(|| current.namespace.clone()),
                };
                continue;
            }

            let Some(mut docker_ref) = obj
                .data
                .get("image")
                .and_then(|i| i.get("dockerImageReference"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
            else {
                return Ok(None);
            };

            if local_reference_policy(&obj.data) {
                if let Some(external) = external_repository(&obj.data) {
                    docker_ref = rewrite_to_external_host(&docker_ref, &external);
                }
            }

            let digest = docker_ref.rsplit_once('@').map(|(_, d)| d.to_string()).unwrap_or_default();
            debug!(depth, stream_tag = %key, "resolved image stream tag");
            return Ok(Some((docker_ref, digest, origin)));
        }

        Err(DiscoveryError::CycleOrTooDeep(format!("{}/{}", current.namespace, current.name)))
    }
}

fn follows_another_tag(data: &serde_json::Value) -> Option<(String, Option<String>)> {
    let from = data.get("tag")?.get("from")?;
    if from.get("kind")?.as_str()? != "ImageStreamTag" {
        return None;
    }
    let name = from.get("name")?.as_str()?.to_string();
    let namespace = from.get("namespace").and_then(|v| v.as_str()).map(|s| s.to_string());
    Some((name, namespace))
}

fn local_reference_policy(data: &serde_json::Value) -> bool {
    data.get("tag")
        .and_then(|t| t.get("referencePolicy"))
        .and_then(|p| p.get("type"))
        .and_then(|v| v.as_str())
        == Some("Local")
}

fn external_repository(data: &serde_json::Value) -> Option<String> {
    data.get("image")
        .and_then(|i| i.get("dockerImageReference"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn rewrite_to_external_host(internal_ref: &str, external_repo: &str) -> String {
    if let Some(caps) = LOCAL_DOCKER_HOST.captures(internal_ref) {
        let suffix = &internal_ref[caps.get(0).unwrap().end()..];
        return format!("{external_repo}@{suffix}");
    }
    internal_ref.to_string()
}

fn normalize_digest_path(repo_name: &str, observed: &str) -> String {
    let stripped = observed
        .trim_start_matches("docker-pullable://")
        .trim_start_matches("docker://");
    if stripped.contains('@') {
        stripped.to_string()
    } else {
        format!("{repo_name}@{stripped}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_digest_with_repo_prefix() {
        assert_eq!(
            normalize_digest_path("api", "sha256:abc"),
            "api@sha256:abc"
        );
    }

    #[test]
    fn strips_pullable_prefix_from_observed_digest() {
        assert_eq!(
            normalize_digest_path("api", "docker-pullable://registry/org/api@sha256:abc"),
            "registry/org/api@sha256:abc"
        );
    }

    #[test]
    fn rewrites_internal_docker_host_to_external_repo() {
        let internal = "docker-registry.default.svc:5000/ns/api@sha256:abc";
        let rewritten = rewrite_to_external_host(internal, "registry.example.com/ns/api");
        assert_eq!(rewritten, "registry.example.com/ns/api@sha256:abc");
    }

    #[test]
    fn leaves_non_local_references_untouched() {
        let external = "registry.example.com/ns/api@sha256:abc";
        assert_eq!(rewrite_to_external_host(external, "unused"), external);
    }
}
