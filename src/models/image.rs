use serde::{Deserialize, Serialize};

/// A parsed reference to a container image, as it appears on a workload spec.
///
/// Exactly one of `tag` or `digest_path` is populated; `full_path` is the
/// original string the reference was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub full_path: String,
    pub registry_host: String,
    pub org_image_path: String,
    pub repo_name: String,
    pub tag: String,
    pub digest_path: String,
    pub from_image_stream: bool,
}

impl ImageReference {
    pub fn registry_path(&self) -> String {
        format!("{}/{}", self.registry_host, self.org_image_path)
    }

    pub fn org(&self) -> &str {
        self.org_image_path
            .split('/')
            .next()
            .unwrap_or(&self.org_image_path)
    }
}

/// A single pod (and the subset of its containers) running a `ClusterImage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodAndContainerRef {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<String>,
}

/// An image actually observed running in the cluster, with the pods backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterImage {
    pub reference: ImageReference,
    /// Content digest path as observed in container status, e.g.
    /// `repo@sha256:<hex>`, normalized (no `docker-pullable://` prefix).
    pub sha256_path: String,
    pub pods: Vec<PodAndContainerRef>,
    pub image_stream_tag: Option<ImageStreamTagRef>,
    pub component: String,
}

impl ClusterImage {
    /// The hex digest portion of `sha256_path`, or empty if malformed.
    pub fn sha_from_path(&self) -> &str {
        self.sha256_path.split(':').nth(1).unwrap_or("")
    }
}

/// The identity of the image-stream tag a `ClusterImage` was resolved through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStreamTagRef {
    pub name: String,
    pub namespace: String,
}
