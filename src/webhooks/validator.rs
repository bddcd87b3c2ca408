//! Admission decisions that need live cluster state
//!
//! The [`Validator`] fetches whatever Kubernetes state a rule depends on
//! (existing clusters, PVCs, jobs, deployments, the active master) and then
//! delegates to the pure rule functions in [`super::policies`].

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::crd::{GreenplumCluster, GreenplumPXFService, APP_NAME};
use crate::executor::{current_active_master, greenplum_shell_command, PodExec};
use crate::resources::{gpexpand_job_name, StatefulSetType};

use super::policies::{cluster_create, cluster_update, pxf, PvcInfo, PvcState, ValidationResult};

const EXPANSION_SCHEMA_QUERY: &str = r#"psql -d postgres -tAc "SELECT count(*) FROM information_schema.schemata WHERE schema_name = 'gpexpand'""#;

#[derive(Clone)]
pub struct Validator {
    client: Client,
    instance_image: String,
    pod_exec: Arc<dyn PodExec>,
}

impl Validator {
    pub fn new(client: Client, instance_image: String, pod_exec: Arc<dyn PodExec>) -> Self {
        Self {
            client,
            instance_image,
            pod_exec,
        }
    }

    pub async fn validate_cluster_create(
        &self,
        namespace: &str,
        mut new: GreenplumCluster,
    ) -> ValidationResult {
        new.apply_spec_defaults();

        let clusters: Api<GreenplumCluster> = Api::namespaced(self.client.clone(), namespace);
        let existing = match clusters.list(&ListParams::default()).await {
            Ok(list) => list.items.len(),
            Err(err) => {
                return ValidationResult::denied(
                    "ClusterListFailed",
                    &format!("could not check if a cluster exists in namespace {namespace}. {err}"),
                );
            }
        };

        let pvcs = match self.gather_pvc_state(namespace, &new.name_any()).await {
            Ok(pvcs) => pvcs,
            Err(err) => return ValidationResult::denied("PvcListFailed", &err.to_string()),
        };

        cluster_create::validate_create(&new, existing, &pvcs)
    }

    pub async fn validate_cluster_update(
        &self,
        namespace: &str,
        old: &GreenplumCluster,
        new: &GreenplumCluster,
    ) -> ValidationResult {
        let result = cluster_update::validate_immutable_fields(old, new, &self.instance_image);
        if !result.allowed {
            return result;
        }

        if cluster_update::is_expanding(old, new) {
            let result = self.validate_expansion(namespace, new).await;
            if !result.allowed {
                return result;
            }
        }

        cluster_update::validate_service_name(old, new)
    }

    pub async fn validate_pxf(
        &self,
        namespace: &str,
        old: Option<&GreenplumPXFService>,
        new: &GreenplumPXFService,
    ) -> ValidationResult {
        if let Some(old) = old {
            if pxf::spec_changed(old, new) {
                let name = new.name_any();
                let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployed_image = match deployments.get_opt(&name).await {
                    Ok(deployment) => deployment.and_then(first_container_image),
                    Err(err) => {
                        return ValidationResult::denied(
                            "DeploymentUnavailable",
                            &format!("failed to get PXF Deployment. Try again later: {err}"),
                        );
                    }
                };
                let result = pxf::validate_deployed_image(
                    deployed_image.as_deref(),
                    &name,
                    &self.instance_image,
                );
                if !result.allowed {
                    return result;
                }
            }
        }

        pxf::validate_pxf_spec(new)
    }

    /// Preconditions for growing primarySegmentCount: a Running cluster, a
    /// reachable master, no leftover expansion schema, and no unfinished
    /// gpexpand Job.
    async fn validate_expansion(
        &self,
        namespace: &str,
        new: &GreenplumCluster,
    ) -> ValidationResult {
        let result = cluster_update::validate_expansion_phase(new);
        if !result.allowed {
            return result;
        }

        let Some(master) = current_active_master(self.pod_exec.as_ref(), namespace).await else {
            return ValidationResult::denied(
                "ExpansionBlocked",
                "failed to contact an active gpdb master",
            );
        };

        let command = greenplum_shell_command(EXPANSION_SCHEMA_QUERY);
        let output = match self.pod_exec.execute(&command, namespace, &master).await {
            Ok(output) => output,
            Err(err) => {
                return ValidationResult::denied(
                    "ExpansionBlocked",
                    &format!("failed to check for expansion schema: {err}"),
                );
            }
        };
        if output.stdout.trim() != "0" {
            return ValidationResult::denied(
                "ExpansionBlocked",
                "previous expansion schema exists. you must redistribute data and clean up expansion schema prior to performing another expansion",
            );
        }

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match jobs.get_opt(&gpexpand_job_name(&new.name_any())).await {
            Ok(Some(job)) => {
                if let Some(blocker) = cluster_update::expansion_job_blocker(&job) {
                    return ValidationResult::denied("ExpansionBlocked", blocker);
                }
            }
            Ok(None) => {}
            Err(err) => {
                return ValidationResult::denied(
                    "ExpansionBlocked",
                    &format!("failed to check for previous expand job: {err}"),
                );
            }
        }

        ValidationResult::allowed()
    }

    async fn gather_pvc_state(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<PvcState, kube::Error> {
        Ok(PvcState {
            master: self
                .gather_pvc_pool(namespace, cluster_name, StatefulSetType::Master)
                .await?,
            segment_a: self
                .gather_pvc_pool(namespace, cluster_name, StatefulSetType::SegmentA)
                .await?,
            segment_b: self
                .gather_pvc_pool(namespace, cluster_name, StatefulSetType::SegmentB)
                .await?,
        })
    }

    async fn gather_pvc_pool(
        &self,
        namespace: &str,
        cluster_name: &str,
        set_type: StatefulSetType,
    ) -> Result<PvcInfo, kube::Error> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!(
            "app={APP_NAME},greenplum-cluster={cluster_name},type={set_type}"
        );
        let list = pvcs
            .list(&ListParams::default().labels(&selector))
            .await?
            .items;
        debug!(pool = %set_type, count = list.len(), "listed PVCs for validation");

        let first = list.first();
        Ok(PvcInfo {
            storage: first.and_then(|pvc| {
                pvc.spec
                    .as_ref()
                    .and_then(|spec| spec.resources.as_ref())
                    .and_then(|resources| resources.limits.as_ref())
                    .and_then(|limits| limits.get("storage"))
                    .cloned()
            }),
            storage_class_name: first
                .and_then(|pvc| pvc.spec.as_ref())
                .and_then(|spec| spec.storage_class_name.clone()),
            major_versions: list
                .iter()
                .map(|pvc| pvc.labels().get("greenplum-major-version").cloned())
                .collect(),
        })
    }
}

fn first_container_image(deployment: Deployment) -> Option<String> {
    deployment
        .spec?
        .template
        .spec?
        .containers
        .first()?
        .image
        .clone()
}
