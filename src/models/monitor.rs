use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `ImageMonitor` drives the labeller trigger: placing `heimdall.monitored`
/// on every deployment-like object in a namespace (honouring `excludePattern`)
/// and removing it, plus the Heimdall annotations, on deletion.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "heimdall.rhmi.org",
    version = "v1alpha1",
    kind = "ImageMonitor",
    plural = "imagemonitors",
    shortname = "im",
    namespaced,
    status = "ImageMonitorStatus",
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageMonitorSpec {
    /// Namespace to monitor; defaults to the `ImageMonitor`'s own namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Regex excluding matching deployment-like object names from monitoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageMonitorStatus {
    #[serde(default)]
    pub workloads_labelled: i64,
}

pub const FINALIZER: &str = "heimdall.rhmi.org";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_to_no_namespace_override() {
        let spec = ImageMonitorSpec { namespace: None, exclude_pattern: None };
        assert!(spec.namespace.is_none());
    }
}
