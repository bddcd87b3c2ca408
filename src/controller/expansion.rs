//! Segment expansion: grow a running cluster to the declared segment count

use k8s_openapi::api::batch::v1::Job;
use kube::api::{DeleteParams, PostParams, PropagationPolicy};
use kube::{Api, ResourceExt};
use tracing::info;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::GreenplumCluster;
use crate::executor::{greenplum_shell_command, PodExec};
use crate::resources::{cluster_owner_reference, generate_gpexpand_job, gpexpand_job_name};

/// Fully qualified hostname of a master pod via the headless agent service
pub fn master_fqdn(active_master: &str, namespace: &str) -> String {
    format!("{active_master}.agent.{namespace}.svc.cluster.local")
}

/// Launch a gpexpand Job when the database has fewer segments than the spec
/// asks for. An unfinished Job from a previous expansion is left alone; a
/// completed one is deleted and replaced.
pub async fn handle_expand(
    ctx: &Context,
    cluster: &GreenplumCluster,
    active_master: &str,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let segment_count =
        current_segment_count(ctx.pod_exec.as_ref(), &namespace, active_master).await?;
    if cluster.spec.segments.primary_segment_count <= segment_count {
        return Ok(());
    }

    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace);
    let job_name = gpexpand_job_name(&cluster.name_any());

    if let Some(existing) = jobs.get_opt(&job_name).await? {
        let succeeded = existing
            .status
            .as_ref()
            .and_then(|s| s.succeeded)
            .unwrap_or(0);
        if succeeded < 1 {
            // still running (or failed); leave it for the operator
            return Ok(());
        }

        jobs.delete(
            &job_name,
            &DeleteParams {
                grace_period_seconds: Some(0),
                propagation_policy: Some(PropagationPolicy::Background),
                ..Default::default()
            },
        )
        .await?;
    }

    info!(
        job_name,
        desired = cluster.spec.segments.primary_segment_count,
        current = segment_count,
        "starting segment expansion"
    );

    let mut job = generate_gpexpand_job(
        &ctx.instance_image,
        &master_fqdn(active_master, &namespace),
        cluster.spec.segments.primary_segment_count,
    );
    job.metadata.name = Some(job_name);
    job.metadata.namespace = Some(namespace);
    job.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    jobs.create(&PostParams::default(), &job).await?;
    Ok(())
}

/// Count live primary segments by querying the catalog on the active master
async fn current_segment_count(
    pod_exec: &dyn PodExec,
    namespace: &str,
    master_pod: &str,
) -> Result<i32> {
    let command = greenplum_shell_command(
        r#"psql -t -U gpadmin -c "SELECT COUNT(*) FROM gp_segment_configuration WHERE hostname LIKE 'segment-a%'""#,
    );
    let output = pod_exec.execute(&command, namespace, master_pod).await?;
    let count = output.stdout.trim().parse::<i32>().map_err(|err| {
        crate::controller::error::Error::ExpansionError(format!(
            "parsing segment count {:?}: {err}",
            output.stdout.trim()
        ))
    })?;
    Ok(count)
}
