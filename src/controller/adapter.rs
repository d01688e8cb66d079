//! Kind-agnostic workload adapter: the reconciler body only ever talks to a
//! `WorkloadAdapter`, never to `Deployment`/`StatefulSet`/`DeploymentConfig`
//! directly. Each concrete adapter normalizes its kind down to the
//! `{get, list, update, podTemplateLabels}` surface the reconciler needs.

use crate::cluster::ImageChangeTrigger;
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;

pub const MONITORED_LABEL: &str = "heimdall.monitored";

/// A normalized view of one workload object, independent of its concrete kind.
#[derive(Debug, Clone)]
pub struct WorkloadHandle {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub pod_template_labels: BTreeMap<String, String>,
    pub image_change_triggers: Vec<ImageChangeTrigger>,
}

impl WorkloadHandle {
    pub fn is_monitored(&self) -> bool {
        self.labels.get(MONITORED_LABEL).map(|v| v == "true").unwrap_or(false)
    }
}

#[async_trait]
pub trait WorkloadAdapter: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkloadHandle>>;
    async fn list(&self, namespace: &str) -> Result<Vec<WorkloadHandle>>;
    async fn update_check_annotations(
        &self,
        namespace: &str,
        name: &str,
        last_checked: &str,
        images_checked: &str,
    ) -> Result<()>;
    async fn clear_check_annotations(&self, namespace: &str, name: &str) -> Result<()>;
    async fn set_monitored_label(&self, namespace: &str, name: &str, monitored: bool) -> Result<()>;
}

pub struct DeploymentAdapter {
    client: Client,
}

impl DeploymentAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkloadAdapter for DeploymentAdapter {
    fn kind(&self) -> &'static str {
        "Deployment"
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkloadHandle>> {
        match self.api(namespace).get(name).await {
            Ok(d) => Ok(Some(from_deployment(&d))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<WorkloadHandle>> {
        let items = self.api(namespace).list(&ListParams::default()).await?;
        Ok(items.items.iter().map(from_deployment).collect())
    }

    async fn update_check_annotations(
        &self,
        namespace: &str,
        name: &str,
        last_checked: &str,
        images_checked: &str,
    ) -> Result<()> {
        patch_annotations(&self.api(namespace), name, last_checked, images_checked).await
    }

    async fn clear_check_annotations(&self, namespace: &str, name: &str) -> Result<()> {
        clear_annotations(&self.api(namespace), name).await
    }

    async fn set_monitored_label(&self, namespace: &str, name: &str, monitored: bool) -> Result<()> {
        patch_monitored_label(&self.api(namespace), name, monitored).await
    }
}

pub struct StatefulSetAdapter {
    client: Client,
}

impl StatefulSetAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkloadAdapter for StatefulSetAdapter {
    fn kind(&self) -> &'static str {
        "StatefulSet"
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkloadHandle>> {
        match self.api(namespace).get(name).await {
            Ok(s) => Ok(Some(from_statefulset(&s))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<WorkloadHandle>> {
        let items = self.api(namespace).list(&ListParams::default()).await?;
        Ok(items.items.iter().map(from_statefulset).collect())
    }

    async fn update_check_annotations(
        &self,
        namespace: &str,
        name: &str,
        last_checked: &str,
        images_checked: &str,
    ) -> Result<()> {
        patch_annotations(&self.api(namespace), name, last_checked, images_checked).await
    }

    async fn clear_check_annotations(&self, namespace: &str, name: &str) -> Result<()> {
        clear_annotations(&self.api(namespace), name).await
    }

    async fn set_monitored_label(&self, namespace: &str, name: &str, monitored: bool) -> Result<()> {
        patch_monitored_label(&self.api(namespace), name, monitored).await
    }
}

/// OpenShift's `DeploymentConfig` has no compiled-in type in `k8s-openapi`;
/// it's addressed the same way `kubectl` does for any non-builtin kind, via
/// a `DynamicObject` scoped with an explicit `ApiResource`.
pub struct DeploymentConfigAdapter {
    client: Client,
    resource: ApiResource,
}

impl DeploymentConfigAdapter {
    pub fn new(client: Client) -> Self {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk("apps.openshift.io", "v1", "DeploymentConfig"));
        Self { client, resource }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl WorkloadAdapter for DeploymentConfigAdapter {
    fn kind(&self) -> &'static str {
        "DeploymentConfig"
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkloadHandle>> {
        match self.api(namespace).get(name).await {
            Ok(d) => Ok(Some(from_dynamic(&d))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<WorkloadHandle>> {
        let items = self.api(namespace).list(&ListParams::default()).await?;
        Ok(items.items.iter().map(from_dynamic).collect())
    }

    async fn update_check_annotations(
        &self,
        namespace: &str,
        name: &str,
        last_checked: &str,
        images_checked: &str,
    ) -> Result<()> {
        patch_annotations(&self.api(namespace), name, last_checked, images_checked).await
    }

    async fn clear_check_annotations(&self, namespace: &str, name: &str) -> Result<()> {
        clear_annotations(&self.api(namespace), name).await
    }

    async fn set_monitored_label(&self, namespace: &str, name: &str, monitored: bool) -> Result<()> {
        patch_monitored_label(&self.api(namespace), name, monitored).await
    }
}

fn from_deployment(d: &Deployment) -> WorkloadHandle {
    WorkloadHandle {
        namespace: d.namespace().unwrap_or_default(),
        name: d.name_any(),
        labels: d.metadata.labels.clone().unwrap_or_default().into_iter().collect(),
        annotations: d.metadata.annotations.clone().unwrap_or_default().into_iter().collect(),
        pod_template_labels: d
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.clone())
            .unwrap_or_default()
            .into_iter()
            .collect(),
        image_change_triggers: Vec::new(),
    }
}

fn from_statefulset(s: &StatefulSet) -> WorkloadHandle {
    WorkloadHandle {
        namespace: s.namespace().unwrap_or_default(),
        name: s.name_any(),
        labels: s.metadata.labels.clone().unwrap_or_default().into_iter().collect(),
        annotations: s.metadata.annotations.clone().unwrap_or_default().into_iter().collect(),
        pod_template_labels: s
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.clone())
            .unwrap_or_default()
            .into_iter()
            .collect(),
        image_change_triggers: Vec::new(),
    }
}

fn from_dynamic(d: &DynamicObject) -> WorkloadHandle {
    let pod_template_labels = d
        .data
        .get("spec")
        .and_then(|s| s.get("template"))
        .and_then(|t| t.get("metadata"))
        .and_then(|m| m.get("labels"))
        .and_then(|l| l.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let image_change_triggers = d
        .data
        .get("spec")
        .and_then(|s| s.get("triggers"))
        .and_then(|t| t.as_array())
        .map(|triggers| {
            triggers
                .iter()
                .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("ImageChange"))
                .filter_map(|t| {
                    let ic = t.get("imageChangeParams")?;
                    let container_name = ic.get("containerNames")?.as_array()?.first()?.as_str()?.to_string();
                    let from = ic.get("from")?;
                    let from_name = from.get("name")?.as_str()?.to_string();
                    let from_namespace = from.get("namespace").and_then(|v| v.as_str()).map(|s| s.to_string());
                    Some(ImageChangeTrigger { container_name, from_name, from_namespace })
                })
                .collect()
        })
        .unwrap_or_default();

    WorkloadHandle {
        namespace: d.namespace().unwrap_or_default(),
        name: d.name_any(),
        labels: d.labels().clone().into_iter().collect(),
        annotations: d.annotations().clone().into_iter().collect(),
        pod_template_labels,
        image_change_triggers,
    }
}

async fn patch_annotations<K>(api: &Api<K>, name: &str, last_checked: &str, images_checked: &str) -> Result<()>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + serde::Serialize,
{
    let patch = json!({
        "metadata": {
            "annotations": {
                "heimdall.lastcheck": last_checked,
                "heimdall.imageschecked": images_checked,
            }
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
    Ok(())
}

async fn clear_annotations<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + serde::Serialize,
{
    let patch = json!({
        "metadata": {
            "annotations": {
                "heimdall.lastcheck": serde_json::Value::Null,
                "heimdall.imageschecked": serde_json::Value::Null,
            }
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
    Ok(())
}

async fn patch_monitored_label<K>(api: &Api<K>, name: &str, monitored: bool) -> Result<()>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + serde::Serialize,
{
    let patch = if monitored {
        json!({ "metadata": { "labels": { MONITORED_LABEL: "true" } } })
    } else {
        json!({ "metadata": { "labels": { MONITORED_LABEL: serde_json::Value::Null } } })
    };
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
    Ok(())
}
