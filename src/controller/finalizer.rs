//! Finalizer handling: a cluster is shut down before its pods disappear

use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::info;

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::set_phase;
use crate::crd::{GreenplumCluster, GreenplumClusterPhase};
use crate::executor::PodExec;

pub const STOP_CLUSTER_FINALIZER: &str = "stopcluster.greenplumcluster.pivotal.io";

/// Add the stop-cluster finalizer to new clusters, and run the shutdown
/// path when a deletion is in progress. Returns true when the cluster is
/// being deleted and the caller should stop reconciling.
pub async fn handle_finalizer(
    ctx: &Context,
    api: &Api<GreenplumCluster>,
    cluster: &GreenplumCluster,
    active_master: &mut Option<String>,
) -> Result<bool> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let mut finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
    let has_finalizer = finalizers.iter().any(|f| f == STOP_CLUSTER_FINALIZER);

    if cluster.metadata.deletion_timestamp.is_none() {
        if !has_finalizer {
            finalizers.push(STOP_CLUSTER_FINALIZER.to_string());
            patch_finalizers(api, &name, &finalizers)
                .await
                .map_err(|err| Error::FinalizerError(format!("adding finalizer: {err}")))?;
        }
        return Ok(false);
    }

    if has_finalizer {
        let mut status = cluster.status.clone().unwrap_or_default();
        set_phase(api, &name, &mut status, GreenplumClusterPhase::Deleting).await;

        ensure_cluster_stopped(ctx.pod_exec.as_ref(), &namespace, active_master.as_deref()).await;
        *active_master = None;

        finalizers.retain(|f| f != STOP_CLUSTER_FINALIZER);
        if let Err(err) = patch_finalizers(api, &name, &finalizers).await {
            if matches!(&err, kube::Error::Api(api_err) if api_err.code == 404) {
                info!("attempted to remove finalizer, but GreenplumCluster was not found");
                return Ok(true);
            }
            return Err(Error::FinalizerError(format!("removing finalizer: {err}")));
        }
    }

    Ok(true)
}

async fn patch_finalizers(
    api: &Api<GreenplumCluster>,
    name: &str,
    finalizers: &[String],
) -> Result<(), kube::Error> {
    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await?;
    Ok(())
}

/// Best-effort immediate shutdown through the active master. Failures are
/// logged only; deletion proceeds regardless.
async fn ensure_cluster_stopped(
    pod_exec: &dyn PodExec,
    namespace: &str,
    active_master: Option<&str>,
) {
    let Some(master) = active_master else {
        return;
    };

    info!("initiating shutdown of the greenplum cluster");
    let command = crate::executor::greenplum_shell_command("gpstop -aM immediate");
    match pod_exec.execute(&command, namespace, master).await {
        Ok(_) => info!("success shutting down the greenplum cluster"),
        Err(_) => {
            info!("greenplum cluster did not shutdown cleanly. Please check gpAdminLogs for more info.")
        }
    }
}
