//! UPDATE rules for GreenplumCluster
//!
//! Nearly every spec field is frozen after creation; the only supported
//! mutation is growing `primarySegmentCount`, and even that only while the
//! cluster is healthy and no prior expansion is pending.

use k8s_openapi::api::batch::v1::Job;

use crate::crd::{GreenplumCluster, GreenplumClusterPhase};

use super::ValidationResult;

pub const UPGRADE_CLUSTER_HELP_MSG: &str = "Cannot update greenplumCluster instance -- operator only supports updates to clusters \
at the latest version. Please update greenplumCluster to the latest version in order to make updates";

/// Synchronous update rules: the version gate and field immutability.
/// Expansion preconditions that need live cluster state run separately.
pub fn validate_immutable_fields(
    old: &GreenplumCluster,
    new: &GreenplumCluster,
    instance_image: &str,
) -> ValidationResult {
    let old_spec = serde_json::to_value(&old.spec).unwrap_or_default();
    let new_spec = serde_json::to_value(&new.spec).unwrap_or_default();
    if old_spec != new_spec {
        let old_image = old
            .status
            .as_ref()
            .map(|s| s.instance_image.as_str())
            .unwrap_or_default();
        if old_image != instance_image {
            return ValidationResult::denied(
                "UnsupportedVersion",
                &format!(
                    "{}; GreenplumCluster has image: {}; Operator supports image: {}",
                    UPGRADE_CLUSTER_HELP_MSG, old_image, instance_image
                ),
            );
        }
    }

    let old_master = &old.spec.master_and_standby;
    let new_master = &new.spec.master_and_standby;
    let old_segments = &old.spec.segments;
    let new_segments = &new.spec.segments;

    if new_master.standby != old_master.standby {
        return denied_immutable("standby value cannot be changed after the cluster has been created");
    }

    if new_master.host_based_authentication != old_master.host_based_authentication {
        return denied_immutable(
            "hostBasedAuthentication cannot be changed after the cluster has been created",
        );
    }

    if new_master.pod.cpu.0 != old_master.pod.cpu.0 || new_segments.pod.cpu.0 != old_segments.pod.cpu.0 {
        return denied_immutable("CPU reservation cannot be changed after the cluster has been created");
    }

    if new_master.pod.memory.0 != old_master.pod.memory.0
        || new_segments.pod.memory.0 != old_segments.pod.memory.0
    {
        return denied_immutable(
            "Memory reservation cannot be changed after the cluster has been created",
        );
    }

    if new_master.pod.worker_selector != old_master.pod.worker_selector
        || new_segments.pod.worker_selector != old_segments.pod.worker_selector
    {
        return denied_immutable("workerSelector cannot be changed after the cluster has been created");
    }

    if !new_master.pod.anti_affinity.eq_ignore_ascii_case(&old_master.pod.anti_affinity)
        || !new_segments.pod.anti_affinity.eq_ignore_ascii_case(&old_segments.pod.anti_affinity)
    {
        return denied_immutable("antiAffinity cannot be changed after the cluster has been created");
    }

    if !new_segments.mirrors.eq_ignore_ascii_case(&old_segments.mirrors) {
        return denied_immutable("mirrors cannot be changed after the cluster has been created");
    }

    if new_master.pod.storage.0 != old_master.pod.storage.0
        || new_segments.pod.storage.0 != old_segments.pod.storage.0
    {
        return denied_immutable("storage cannot be changed after the cluster has been created");
    }

    if new_master.pod.storage_class_name != old_master.pod.storage_class_name
        || new_segments.pod.storage_class_name != old_segments.pod.storage_class_name
    {
        return denied_immutable(
            "storageClassName cannot be changed after the cluster has been created",
        );
    }

    if new_segments.primary_segment_count < old_segments.primary_segment_count {
        return denied_immutable(
            "primarySegmentCount cannot be decreased after the cluster has been created",
        );
    }

    ValidationResult::allowed()
}

/// Applied after the expansion preconditions, matching the original rule order
pub fn validate_service_name(old: &GreenplumCluster, new: &GreenplumCluster) -> ValidationResult {
    if new.spec.pxf.service_name != old.spec.pxf.service_name {
        return denied_immutable("PXF serviceName cannot be changed after the cluster has been created");
    }
    ValidationResult::allowed()
}

/// True when the update grows the primary segment count
pub fn is_expanding(old: &GreenplumCluster, new: &GreenplumCluster) -> bool {
    new.spec.segments.primary_segment_count > old.spec.segments.primary_segment_count
}

/// Expansion is only supported against a Running cluster
pub fn validate_expansion_phase(old: &GreenplumCluster) -> ValidationResult {
    if old.phase() != GreenplumClusterPhase::Running {
        return ValidationResult::denied(
            "ClusterNotRunning",
            "updates only supported when cluster is Running",
        );
    }
    ValidationResult::allowed()
}

/// Decide whether an existing gpexpand Job blocks a new expansion
pub fn expansion_job_blocker(job: &Job) -> Option<&'static str> {
    let status = job.status.as_ref();
    if status.and_then(|s| s.succeeded).unwrap_or(0) > 0 {
        return None;
    }
    if status.and_then(|s| s.failed).unwrap_or(0) > 0 {
        return Some("cannot expand cluster because previous gpexpand job failed");
    }
    // active, or the status is uninitialized
    Some("cannot expand cluster because a gpexpand job is currently running")
}

fn denied_immutable(message: &str) -> ValidationResult {
    ValidationResult::denied("FieldImmutable", message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::{
        GreenplumClusterSpec, GreenplumClusterStatus, GreenplumMasterAndStandbySpec,
        GreenplumPXFSpec, GreenplumPodSpec, GreenplumSegmentsSpec,
    };
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::core::ObjectMeta;

    const INSTANCE_IMAGE: &str = "greenplum-for-kubernetes:v2.3.0";

    fn running_cluster() -> GreenplumCluster {
        GreenplumCluster {
            metadata: ObjectMeta {
                name: Some("my-greenplum".to_string()),
                namespace: Some("test-ns".to_string()),
                ..Default::default()
            },
            spec: GreenplumClusterSpec {
                master_and_standby: GreenplumMasterAndStandbySpec {
                    pod: GreenplumPodSpec {
                        cpu: Quantity("0.5".to_string()),
                        memory: Quantity("1Gi".to_string()),
                        storage: Quantity("5G".to_string()),
                        anti_affinity: "no".to_string(),
                        ..Default::default()
                    },
                    standby: "no".to_string(),
                    ..Default::default()
                },
                segments: GreenplumSegmentsSpec {
                    pod: GreenplumPodSpec {
                        cpu: Quantity("0.5".to_string()),
                        memory: Quantity("1Gi".to_string()),
                        storage: Quantity("5G".to_string()),
                        anti_affinity: "no".to_string(),
                        ..Default::default()
                    },
                    primary_segment_count: 2,
                    mirrors: "no".to_string(),
                },
                pxf: GreenplumPXFSpec::default(),
            },
            status: Some(GreenplumClusterStatus {
                instance_image: INSTANCE_IMAGE.to_string(),
                operator_version: String::new(),
                phase: GreenplumClusterPhase::Running,
            }),
        }
    }

    #[test]
    fn test_unchanged_spec_is_allowed() {
        let old = running_cluster();
        let new = old.clone();
        assert!(validate_immutable_fields(&old, &new, INSTANCE_IMAGE).allowed);
    }

    #[test]
    fn test_old_image_blocks_any_spec_change() {
        let mut old = running_cluster();
        old.status.as_mut().unwrap().instance_image = "greenplum-for-kubernetes:v2.2.0".to_string();
        let mut new = old.clone();
        new.spec.segments.primary_segment_count = 4;

        let result = validate_immutable_fields(&old, &new, INSTANCE_IMAGE);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            format!(
                "{UPGRADE_CLUSTER_HELP_MSG}; GreenplumCluster has image: greenplum-for-kubernetes:v2.2.0; Operator supports image: {INSTANCE_IMAGE}"
            )
        );
    }

    #[test]
    fn test_anti_affinity_change_is_denied_case_insensitively() {
        let old = running_cluster();
        let mut new = old.clone();
        new.spec.segments.pod.anti_affinity = "yes".to_string();

        let result = validate_immutable_fields(&old, &new, INSTANCE_IMAGE);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "antiAffinity cannot be changed after the cluster has been created"
        );

        // same value in a different spelling is not a change
        let mut respelled = old.clone();
        respelled.spec.segments.pod.anti_affinity = "NO".to_string();
        respelled.spec.master_and_standby.pod.anti_affinity = "No".to_string();
        assert!(validate_immutable_fields(&old, &respelled, INSTANCE_IMAGE).allowed);
    }

    #[test]
    fn test_segment_count_may_only_grow() {
        let old = running_cluster();

        let mut grown = old.clone();
        grown.spec.segments.primary_segment_count = 4;
        assert!(validate_immutable_fields(&old, &grown, INSTANCE_IMAGE).allowed);
        assert!(is_expanding(&old, &grown));

        let mut shrunk = old.clone();
        shrunk.spec.segments.primary_segment_count = 1;
        let result = validate_immutable_fields(&old, &shrunk, INSTANCE_IMAGE);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "primarySegmentCount cannot be decreased after the cluster has been created"
        );
    }

    #[test]
    fn test_storage_and_class_are_immutable() {
        let old = running_cluster();

        let mut new = old.clone();
        new.spec.master_and_standby.pod.storage = Quantity("10G".to_string());
        let result = validate_immutable_fields(&old, &new, INSTANCE_IMAGE);
        assert_eq!(
            result.message.unwrap(),
            "storage cannot be changed after the cluster has been created"
        );

        let mut new = old.clone();
        new.spec.segments.pod.storage_class_name = "fast".to_string();
        let result = validate_immutable_fields(&old, &new, INSTANCE_IMAGE);
        assert_eq!(
            result.message.unwrap(),
            "storageClassName cannot be changed after the cluster has been created"
        );
    }

    #[test]
    fn test_pxf_service_name_is_immutable() {
        let old = running_cluster();
        let mut new = old.clone();
        new.spec.pxf.service_name = "other-pxf".to_string();

        let result = validate_service_name(&old, &new);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "PXF serviceName cannot be changed after the cluster has been created"
        );
    }

    #[test]
    fn test_expansion_requires_running_phase() {
        let mut old = running_cluster();
        assert!(validate_expansion_phase(&old).allowed);

        old.status.as_mut().unwrap().phase = GreenplumClusterPhase::Pending;
        let result = validate_expansion_phase(&old);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "updates only supported when cluster is Running"
        );
    }

    #[test]
    fn test_expansion_job_blockers() {
        let job_with = |status: JobStatus| Job {
            status: Some(status),
            ..Default::default()
        };

        assert_eq!(
            expansion_job_blocker(&job_with(JobStatus {
                succeeded: Some(1),
                ..Default::default()
            })),
            None
        );
        assert_eq!(
            expansion_job_blocker(&job_with(JobStatus {
                failed: Some(1),
                ..Default::default()
            })),
            Some("cannot expand cluster because previous gpexpand job failed")
        );
        assert_eq!(
            expansion_job_blocker(&job_with(JobStatus {
                active: Some(1),
                ..Default::default()
            })),
            Some("cannot expand cluster because a gpexpand job is currently running")
        );
    }
}
