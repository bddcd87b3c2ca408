//! Reconciliation logic for GreenplumCluster resources
//!
//! Each reconcile converges the namespace toward the declared cluster: the
//! config and SSH material, the services, the pod RBAC, and one StatefulSet
//! per pool, then drives the phase and any pending segment expansion.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::anti_affinity::handle_anti_affinity;
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::expansion::handle_expand;
use crate::controller::finalizer::handle_finalizer;
use crate::controller::status::{reconcile_status, set_phase};
use crate::crd::{GreenplumCluster, GreenplumClusterPhase};
use crate::executor::current_active_master;
use crate::resources::{
    generate_statefulset_params, modify_agent_service, modify_config_map, modify_greenplum_service,
    modify_role, modify_role_binding, modify_service_account, modify_ssh_secret,
    modify_statefulset, StatefulSetType, AGENT_SERVICE_NAME, CONFIG_MAP_NAME,
    GREENPLUM_SERVICE_NAME, SSH_SECRET_NAME, SYSTEM_POD_RBAC_NAME,
};

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<GreenplumCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start = std::time::Instant::now();
    let result = reconcile_cluster(&cluster, &ctx).await;
    if result.is_ok() {
        if let Some(state) = &ctx.health_state {
            state.metrics.record_reconcile(
                &cluster.namespace().unwrap_or_default(),
                &cluster.name_any(),
                start.elapsed().as_secs_f64(),
            );
        }
    }
    result
}

async fn reconcile_cluster(cluster: &GreenplumCluster, ctx: &Context) -> Result<Action> {
    let mut cluster = cluster.clone();
    cluster.apply_spec_defaults();

    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = cluster.name_any();
    let clusters: Api<GreenplumCluster> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling GreenplumCluster");

    let mut active_master = current_active_master(ctx.pod_exec.as_ref(), &ns).await;
    debug!(?active_master, "current active master");

    if handle_finalizer(ctx, &clusters, &cluster, &mut active_master).await? {
        return Ok(Action::await_change());
    }

    // A cluster provisioned by a different database version stays untouched
    // until the resource itself is upgraded.
    if let Some(status) = &cluster.status {
        if !status.instance_image.is_empty() && status.instance_image != ctx.instance_image {
            warn!(
                existing_image = %status.instance_image,
                supported_image = %ctx.instance_image,
                "cluster was deployed from a different image, skipping"
            );
            return Ok(Action::await_change());
        }
    }

    let exists = cluster_exists(ctx, &ns, &name).await.map_err(|err| {
        Error::ReconcileError(format!(
            "unable to check if GreenplumCluster resources exist: {err}"
        ))
    })?;
    if !exists {
        handle_anti_affinity(ctx, &cluster).await?;
    }

    create_or_update_cluster_resources(ctx, &cluster, &ns).await?;

    let mut status = reconcile_status(
        &clusters,
        &cluster,
        &name,
        &ctx.instance_image,
        &ctx.operator_image,
    )
    .await?;

    if status.phase == GreenplumClusterPhase::Pending && active_master.is_some() {
        set_phase(&clusters, &name, &mut status, GreenplumClusterPhase::Running).await;
    }

    let Some(active_master) = active_master else {
        return Ok(Action::requeue(Duration::from_secs(5)));
    };

    handle_expand(ctx, &cluster, &active_master)
        .await
        .map_err(|err| match err {
            Error::ExpansionError(_) => err,
            other => Error::ExpansionError(other.to_string()),
        })?;

    Ok(Action::await_change())
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<GreenplumCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = cluster.name_any();
    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_error(&cluster.namespace().unwrap_or_default(), &name);
    }
    let backoff = BackoffConfig::default();
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// Anti-affinity node labeling happens once, before the first StatefulSet
/// exists; after that the node zones are frozen for the cluster's lifetime.
async fn cluster_exists(ctx: &Context, ns: &str, name: &str) -> Result<bool, kube::Error> {
    let statefulsets: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let params = ListParams::default().labels(&format!("greenplum-cluster={name}"));
    Ok(!statefulsets.list(&params).await?.items.is_empty())
}

async fn create_or_update_cluster_resources(
    ctx: &Context,
    cluster: &GreenplumCluster,
    ns: &str,
) -> Result<()> {
    let client = &ctx.client;

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), ns);
    create_or_update(&config_maps, CONFIG_MAP_NAME, ns, |config_map| {
        modify_config_map(config_map, cluster);
        Ok(())
    })
    .await?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
    create_or_update(&secrets, SSH_SECRET_NAME, ns, |secret| {
        modify_ssh_secret(secret, cluster, ctx.ssh_creator.as_ref())?;
        Ok(())
    })
    .await?;

    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    create_or_update(&services, AGENT_SERVICE_NAME, ns, |service| {
        modify_agent_service(service, cluster);
        Ok(())
    })
    .await?;
    create_or_update(&services, GREENPLUM_SERVICE_NAME, ns, |service| {
        modify_greenplum_service(service, cluster);
        Ok(())
    })
    .await?;

    let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), ns);
    create_or_update(&service_accounts, SYSTEM_POD_RBAC_NAME, ns, |sa| {
        modify_service_account(sa, cluster);
        Ok(())
    })
    .await?;

    let roles: Api<Role> = Api::namespaced(client.clone(), ns);
    create_or_update(&roles, SYSTEM_POD_RBAC_NAME, ns, |role| {
        modify_role(role, cluster);
        Ok(())
    })
    .await?;

    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), ns);
    create_or_update(&role_bindings, SYSTEM_POD_RBAC_NAME, ns, |role_binding| {
        modify_role_binding(role_binding, cluster);
        Ok(())
    })
    .await?;

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), ns);
    let mut pools = vec![StatefulSetType::Master, StatefulSetType::SegmentA];
    if cluster.spec.segments.mirrors == "yes" {
        pools.push(StatefulSetType::SegmentB);
    }
    for pool in pools {
        let params = generate_statefulset_params(pool, cluster, &ctx.instance_image);
        create_or_update(&statefulsets, pool.name(), ns, |statefulset| {
            modify_statefulset(statefulset, &params, cluster);
            Ok(())
        })
        .await?;
    }

    Ok(())
}

/// Fetch-or-default upsert: mutate a fresh or existing resource in place and
/// only write back when the mutation changed something.
async fn create_or_update<T, F>(api: &Api<T>, name: &str, namespace: &str, mutate: F) -> Result<()>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Default
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
    T::DynamicType: Default,
    F: FnOnce(&mut T) -> Result<()>,
{
    match api.get_opt(name).await? {
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            mutate(&mut existing)?;
            if serde_json::to_value(&existing)? != before {
                api.replace(name, &PostParams::default(), &existing).await?;
                debug!(kind = %T::kind(&T::DynamicType::default()), name, namespace, "updated");
            }
        }
        None => {
            let mut resource = T::default();
            resource.meta_mut().name = Some(name.to_string());
            resource.meta_mut().namespace = Some(namespace.to_string());
            mutate(&mut resource)?;
            api.create(&PostParams::default(), &resource).await?;
            debug!(kind = %T::kind(&T::DynamicType::default()), name, namespace, "created");
        }
    }
    Ok(())
}
