pub mod adapter;
pub mod image_monitor;
mod reconciler;

use crate::config::HeimdallConfig;
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::DynamicObject;
use kube::runtime::{controller::Controller, watcher::Config};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use adapter::{DeploymentAdapter, DeploymentConfigAdapter, StatefulSetAdapter, WorkloadAdapter};

struct ReconcileContext {
    client: Client,
    config: HeimdallConfig,
    adapter: Box<dyn WorkloadAdapter>,
}

/// Starts one `kube::runtime::Controller` per workload kind plus the
/// `ImageMonitor` labeller trigger, each restarting with exponential backoff
/// if its watch stream ends.
pub async fn start_controllers(config: HeimdallConfig) -> Result<JoinHandle<()>> {
    let client = Client::try_default().await?;
    info!("Starting Heimdall controllers");

    let handle = tokio::spawn(async move {
        tokio::join!(
            run_kind_loop(client.clone(), config.clone(), "Deployment", || {
                Box::new(DeploymentAdapter::new(client.clone()))
            }),
            run_kind_loop(client.clone(), config.clone(), "StatefulSet", || {
                Box::new(StatefulSetAdapter::new(client.clone()))
            }),
            run_kind_loop(client.clone(), config.clone(), "DeploymentConfig", || {
                Box::new(DeploymentConfigAdapter::new(client.clone()))
            }),
            image_monitor::run(client.clone()),
        );
    });

    Ok(handle)
}

async fn run_kind_loop<F>(client: Client, config: HeimdallConfig, kind: &'static str, make_adapter: F)
where
    F: Fn() -> Box<dyn WorkloadAdapter>,
{
    let mut backoff_seconds = 1;
    const MAX_BACKOFF: u64 = 60;

    loop {
        info!("starting {} controller", kind);
        match kind {
            "Deployment" => {
                let api: Api<Deployment> = Api::all(client.clone());
                run_once(api, client.clone(), config.clone(), make_adapter()).await;
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> = Api::all(client.clone());
                run_once(api, client.clone(), config.clone(), make_adapter()).await;
            }
            "DeploymentConfig" => {
                let resource = kube::api::ApiResource::from_gvk(&kube::api::GroupVersionKind::gvk(
                    "apps.openshift.io",
                    "v1",
                    "DeploymentConfig",
                ));
                let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
                run_once(api, client.clone(), config.clone(), make_adapter()).await;
            }
            _ => unreachable!(),
        }

        error!("{} controller stream ended, restarting in {}s", kind, backoff_seconds);
        tokio::time::sleep(Duration::from_secs(backoff_seconds)).await;
        backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF);
    }
}

async fn run_once<K>(api: Api<K>, client: Client, config: HeimdallConfig, adapter: Box<dyn WorkloadAdapter>)
where
    K: kube::Resource + Clone + std::fmt::Debug + Send + Sync + 'static,
    K: serde::de::DeserializeOwned,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let ctx = Arc::new(ReconcileContext { client, config, adapter });

    Controller::new(api, Config::default())
        .run(reconcile_any, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, _)) => debug!("reconciled {}/{}", obj_ref.namespace.as_deref().unwrap_or(""), obj_ref.name),
                Err(e) => error!("reconcile error: {}", e),
            }
        })
        .await;
}

async fn reconcile_any<K>(obj: Arc<K>, ctx: Arc<ReconcileContext>) -> Result<kube::runtime::controller::Action, anyhow::Error>
where
    K: kube::Resource,
{
    let namespace = obj.meta().namespace.clone().unwrap_or_default();
    let name = obj.meta().name.clone().unwrap_or_default();
    reconciler::reconcile(ctx.client.clone(), ctx.adapter.as_ref(), &ctx.config, &namespace, &name).await
}

fn error_policy<K>(_obj: Arc<K>, error: &anyhow::Error, _ctx: Arc<ReconcileContext>) -> kube::runtime::controller::Action {
    reconciler::error_policy(error)
}
