//! Status patching for GreenplumCluster resources

use kube::api::{Patch, PatchParams};
use kube::Api;
use serde_json::json;
use tracing::{error, info};

use crate::controller::error::Result;
use crate::crd::{GreenplumCluster, GreenplumClusterPhase, GreenplumClusterStatus};

/// Stamp the controller and instance images into the status, leaving the
/// phase at Pending for a new cluster. The patch is skipped when nothing
/// changed.
pub async fn reconcile_status(
    api: &Api<GreenplumCluster>,
    cluster: &GreenplumCluster,
    name: &str,
    instance_image: &str,
    operator_image: &str,
) -> Result<GreenplumClusterStatus> {
    let mut status = cluster.status.clone().unwrap_or_default();
    status.operator_version = operator_image.to_string();
    status.instance_image = instance_image.to_string();

    if cluster.status.as_ref() != Some(&status) {
        patch_status(api, name, &status).await?;
    }

    Ok(status)
}

/// Move the cluster to a new phase. Patch failures are logged rather than
/// propagated so a flaky status write never aborts a reconcile.
pub async fn set_phase(
    api: &Api<GreenplumCluster>,
    name: &str,
    status: &mut GreenplumClusterStatus,
    phase: GreenplumClusterPhase,
) {
    if status.phase == phase {
        return;
    }
    status.phase = phase.clone();
    match patch_status(api, name, status).await {
        Ok(()) => info!(name, %phase, "set GreenplumCluster status"),
        Err(err) => error!(name, %phase, %err, "failed to set GreenplumCluster status"),
    }
}

async fn patch_status(
    api: &Api<GreenplumCluster>,
    name: &str,
    status: &GreenplumClusterStatus,
) -> Result<()> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}
