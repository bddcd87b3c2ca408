pub mod controller;
pub mod crd;
pub mod executor;
pub mod health;
pub mod resources;
pub mod webhooks;

pub use controller::{
    error_policy, error_policy_pxf, reconcile, reconcile_pxf, BackoffConfig, Context, Error,
    PxfContext, Result, STOP_CLUSTER_FINALIZER,
};
pub use crd::{GreenplumCluster, GreenplumPXFService};
pub use executor::{PodExec, PodExecClient};
pub use health::{HealthState, Metrics};
pub use webhooks::{
    run_webhook_server, Validator, WebhookError, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT,
};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::resources::SshKeyGenerator;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the operator controller (cluster-wide).
///
/// This is the main controller loop that watches GreenplumCluster resources
/// and reconciles them. It can be called from main.rs or spawned as a
/// background task during integration tests.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    instance_image: String,
    operator_image: String,
) {
    run_controller_scoped(client, health_state, instance_image, operator_image, None).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
///
/// Use the scoped version for integration tests to enable parallel test execution.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    instance_image: String,
    operator_image: String,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for GreenplumCluster resources (scope: {})",
        scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context {
        client: client.clone(),
        instance_image,
        operator_image,
        ssh_creator: Arc::new(SshKeyGenerator),
        pod_exec: Arc::new(PodExecClient::new(client.clone())),
        health_state,
    });

    // Set up APIs for the controller (namespaced or cluster-wide)
    let clusters: Api<GreenplumCluster> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace);
    let jobs: Api<Job> = scoped_api(client.clone(), namespace);

    // Configure watcher to handle dynamic resource creation
    // Use any_semantic() for more reliable resource discovery in test environments
    let watcher_config = WatcherConfig::default().any_semantic();

    // Create and run the controller
    // Watch GreenplumCluster and all owned resources to trigger reconciliation
    Controller::new(clusters, watcher_config.clone())
        .owns(statefulsets, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(configmaps, watcher_config.clone())
        .owns(secrets, watcher_config.clone())
        .owns(jobs, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // NotFound errors are expected after deletion when related
                    // watch events trigger reconciliation for a deleted object.
                    // Log these at debug level instead of error.
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _)
                            if format!("{:?}", err).contains("NotFound")
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}

/// Run the PXF controller (cluster-wide).
///
/// This controller watches GreenplumPXFService resources and maintains the
/// Deployment and Service that expose the federation endpoint.
pub async fn run_pxf_controller(client: Client, instance_image: String) {
    run_pxf_controller_scoped(client, instance_image, None).await
}

/// Run the PXF controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
pub async fn run_pxf_controller_scoped(
    client: Client,
    instance_image: String,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for GreenplumPXFService resources (scope: {})",
        scope_msg
    );

    let ctx = Arc::new(PxfContext {
        client: client.clone(),
        instance_image,
    });

    // Set up APIs for the controller (namespaced or cluster-wide)
    let pxf_services: Api<GreenplumPXFService> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);

    // Configure watcher
    let watcher_config = WatcherConfig::default().any_semantic();

    // Create and run the controller
    // Watch GreenplumPXFService and owned workload resources
    Controller::new(pxf_services, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config)
        .run(reconcile_pxf, error_policy_pxf, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled PXF service: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _)
                            if format!("{:?}", err).contains("NotFound")
                    );
                    if is_not_found {
                        tracing::debug!("PXF object no longer exists: {:?}", e);
                    } else {
                        tracing::error!("PXF reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::error!("PXF controller stream ended unexpectedly");
}
