//! Kind-agnostic reconcile body: discover images, decide whether a check is
//! due, run the engine, write results back. Kind-specific behaviour lives
//! entirely behind `WorkloadAdapter`.

use crate::catalog::CatalogueClient;
use crate::cluster::pods::PodLabeller;
use crate::cluster::ClusterImageDiscovery;
use crate::config::HeimdallConfig;
use crate::controller::adapter::WorkloadAdapter;
use crate::engine::ImageCheckEngine;
use crate::metrics::{RECONCILE_ERRORS_TOTAL, RECONCILE_TOTAL, RESOLVABLE_CVES_TOTAL};
use crate::models::ReportResult;
use crate::recheck;
use crate::registry::{auth::AuthManager, RegistryClient};
use chrono::Utc;
use kube::Client;
use kube::runtime::controller::Action;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const REQUEUE_AFTER: Duration = Duration::from_secs(4 * 60 * 60);
const WATCH_ONLY: Duration = Duration::from_secs(60 * 60);

pub async fn reconcile(
    client: Client,
    adapter: &dyn WorkloadAdapter,
    config: &HeimdallConfig,
    namespace: &str,
    name: &str,
) -> anyhow::Result<Action> {
    RECONCILE_TOTAL.inc();
    let _timer = crate::metrics::RECONCILE_DURATION.start_timer();

    if let Some(allowed) = &config.namespace_filter
        && !allowed.iter().any(|n| n == namespace)
    {
        return Ok(Action::await_change());
    }

    if let Some(pattern) = &config.namespace_pattern {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(namespace) => return Ok(Action::await_change()),
            Ok(_) => {}
            Err(e) => warn!(namespace, pattern, error = %e, "invalid HEIMDALL_NAMESPACE_PATTERN, ignoring filter"),
        }
    }

    let Some(handle) = adapter.get(namespace, name).await? else {
        return Ok(Action::await_change());
    };

    if !handle.is_monitored() {
        return Ok(Action::await_change());
    }

    if config.component_filter != "*" && config.component_filter != handle.name {
        return Ok(Action::await_change());
    }

    let discovery = ClusterImageDiscovery::new(client.clone());
    let images = if handle.image_change_triggers.is_empty() {
        discovery
            .discover_from_labels(namespace, &handle.pod_template_labels, &handle.name)
            .await
    } else {
        discovery
            .discover_from_triggers(namespace, &handle.image_change_triggers, &handle.pod_template_labels, &handle.name)
            .await
    };

    let images = match images {
        Ok(images) => images,
        Err(e) => {
            RECONCILE_ERRORS_TOTAL.inc();
            warn!(namespace, name, error = %e, "image discovery failed");
            return Ok(Action::requeue(REQUEUE_AFTER));
        }
    };

    let redhat_images: Vec<_> = if config.redhat_only_filter {
        images.into_iter().filter(|i| i.reference.full_path.contains("redhat")).collect()
    } else {
        images
    };

    let current_digests: Vec<String> = redhat_images.iter().map(|i| i.sha256_path.clone()).collect();

    let decision = recheck::should_check(&handle.annotations, &current_digests);
    if let Some(err) = &decision.parse_error {
        warn!(namespace, name, error = %err, "clearing stale lastcheck annotation");
        adapter.update_check_annotations(namespace, name, "", "").await.ok();
        return Ok(Action::await_change());
    }
    if !decision.should_check {
        return Ok(Action::requeue(REQUEUE_AFTER));
    }

    let auth_manager = AuthManager::new(client.clone());
    let registry = RegistryClient::new(auth_manager);
    let catalogue = CatalogueClient::new();
    let mut engine = ImageCheckEngine::new(registry, catalogue);

    let mut reports: Vec<ReportResult> = Vec::new();
    let mut by_digest: HashMap<String, ReportResult> = HashMap::new();
    for image in &redhat_images {
        if let Some(cached) = by_digest.get(&image.sha256_path) {
            let mut reused = cached.clone();
            reused.component = handle.name.clone();
            reports.push(reused);
            continue;
        }
        match engine.check(image, namespace).await {
            Ok(report) => {
                for cve in &report.resolvable_cves {
                    RESOLVABLE_CVES_TOTAL.with_label_values(&[cve.severity.as_str()]).inc();
                }
                by_digest.insert(image.sha256_path.clone(), report.clone());
                reports.push(report);
            }
            Err(e) => {
                RECONCILE_ERRORS_TOTAL.inc();
                warn!(namespace, name, image = %image.reference.full_path, error = %e, "image check failed");
            }
        }
    }

    // Re-fetch: reports may have taken seconds; a stale copy risks a
    // conflicting update when we persist below.
    if adapter.get(namespace, name).await?.is_none() {
        return Ok(Action::await_change());
    }

    if config.label_pods {
        let labeller = PodLabeller::new(client.clone());
        for report in &reports {
            let errors = labeller.label_report(report).await;
            if errors.iter().any(|e| matches!(e, crate::cluster::pods::WritebackError::Kube(_))) {
                RECONCILE_ERRORS_TOTAL.inc();
                warn!(namespace, name, "pod labelling hit a transport error, skipping annotation writeback this pass");
                return Ok(Action::requeue(REQUEUE_AFTER));
            }
        }
    }

    let last_checked = Utc::now().format(crate::models::workload::TIME_FORMAT).to_string();
    let images_checked = current_digests.join(",");
    adapter
        .update_check_annotations(namespace, name, &last_checked, &images_checked)
        .await?;

    info!(namespace, name, images = redhat_images.len(), "reconciled workload");
    Ok(Action::requeue(REQUEUE_AFTER))
}

pub fn error_policy(_error: &anyhow::Error) -> Action {
    RECONCILE_ERRORS_TOTAL.inc();
    Action::requeue(WATCH_ONLY)
}
