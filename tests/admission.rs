//! Admission policy tests
//!
//! Exercises the webhook rule functions against realistic cluster specs and
//! pre-existing PVC state, without needing a running apiserver.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;

use greenplum_operator::controller::derive_pxf_phase;
use greenplum_operator::crd::{
    GreenplumCluster, GreenplumClusterPhase, GreenplumClusterSpec, GreenplumClusterStatus,
    GreenplumMasterAndStandbySpec, GreenplumPXFConf, GreenplumPXFService, GreenplumPXFServicePhase,
    GreenplumPXFServiceSpec, GreenplumPXFSpec, GreenplumPodSpec, GreenplumSegmentsSpec, S3Source,
};
use greenplum_operator::webhooks::policies::{
    cluster_create, cluster_update, pxf, PvcInfo, PvcState,
};

const INSTANCE_IMAGE: &str = "greenplum-for-kubernetes:v2.3.0";

fn pod_spec() -> GreenplumPodSpec {
    GreenplumPodSpec {
        memory: Quantity("1Gi".to_string()),
        cpu: Quantity("0.5".to_string()),
        storage: Quantity("5G".to_string()),
        storage_class_name: "standard".to_string(),
        worker_selector: BTreeMap::new(),
        anti_affinity: "no".to_string(),
    }
}

fn cluster(standby: &str, mirrors: &str, segment_count: i32) -> GreenplumCluster {
    GreenplumCluster {
        metadata: ObjectMeta {
            name: Some("my-greenplum".to_string()),
            namespace: Some("test-ns".to_string()),
            ..Default::default()
        },
        spec: GreenplumClusterSpec {
            master_and_standby: GreenplumMasterAndStandbySpec {
                pod: pod_spec(),
                host_based_authentication: String::new(),
                standby: standby.to_string(),
            },
            segments: GreenplumSegmentsSpec {
                pod: pod_spec(),
                primary_segment_count: segment_count,
                mirrors: mirrors.to_string(),
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

/// PVC facts as they would be gathered for a pool of `count` volumes labeled
/// with the supported major version
fn pvc_pool(count: usize, storage: &str) -> PvcInfo {
    PvcInfo {
        storage: if count > 0 {
            Some(Quantity(storage.to_string()))
        } else {
            None
        },
        storage_class_name: if count > 0 {
            Some("standard".to_string())
        } else {
            None
        },
        major_versions: vec![Some("6".to_string()); count],
    }
}

mod create {
    use super::*;

    #[test]
    fn fresh_cluster_with_no_leftover_pvcs_is_allowed() {
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &PvcState::default());
        assert!(result.allowed);
    }

    #[test]
    fn second_cluster_in_namespace_is_denied() {
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 1, &PvcState::default());
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "only one GreenplumCluster is allowed in namespace test-ns"
        );
    }

    #[test]
    fn anti_affinity_requires_standby_and_mirrors() {
        let mut no_standby = cluster("no", "yes", 2);
        no_standby.spec.master_and_standby.pod.anti_affinity = "yes".to_string();
        no_standby.spec.segments.pod.anti_affinity = "yes".to_string();
        let result = cluster_create::validate_anti_affinity_consistency(&no_standby);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"when standby is set to "no", antiAffinity must also be set to "no""#
        );

        let mut no_mirrors = cluster("yes", "no", 2);
        no_mirrors.spec.master_and_standby.pod.anti_affinity = "yes".to_string();
        no_mirrors.spec.segments.pod.anti_affinity = "yes".to_string();
        let result = cluster_create::validate_anti_affinity_consistency(&no_mirrors);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"when mirrors is set to "no", antiAffinity must also be set to "no""#
        );

        let mut both = cluster("yes", "yes", 2);
        both.spec.master_and_standby.pod.anti_affinity = "yes".to_string();
        both.spec.segments.pod.anti_affinity = "yes".to_string();
        assert!(cluster_create::validate_anti_affinity_consistency(&both).allowed);
    }

    #[test]
    fn recreate_with_matching_pvcs_is_allowed() {
        let pvcs = PvcState {
            master: pvc_pool(1, "5G"),
            segment_a: pvc_pool(2, "5G"),
            segment_b: PvcInfo::default(),
        };
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &pvcs);
        assert!(result.allowed);
    }

    #[test]
    fn recreate_with_different_storage_is_denied() {
        let pvcs = PvcState {
            master: pvc_pool(1, "10G"),
            segment_a: pvc_pool(2, "10G"),
            segment_b: PvcInfo::default(),
        };
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &pvcs);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "storage cannot be changed without first deleting PVCs. This will result in a new, empty Greenplum cluster"
        );
    }

    #[test]
    fn recreate_with_fewer_segments_is_denied() {
        let pvcs = PvcState {
            master: pvc_pool(1, "5G"),
            segment_a: pvc_pool(4, "5G"),
            segment_b: PvcInfo::default(),
        };
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &pvcs);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "my-greenplum has PVCs for 4 segments. segments.primarySegmentCount cannot be decreased without first deleting PVCs. This will result in a new, empty Greenplum cluster"
        );
    }

    #[test]
    fn recreate_with_different_standby_is_denied() {
        // two master PVCs mean the previous cluster ran with a standby
        let pvcs = PvcState {
            master: pvc_pool(2, "5G"),
            segment_a: pvc_pool(2, "5G"),
            segment_b: PvcInfo::default(),
        };
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &pvcs);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "my-greenplum has PVCs for 2 masters. masterAndStandby.standby cannot be changed without first deleting PVCs. This will result in a new, empty Greenplum cluster"
        );
    }

    #[test]
    fn recreate_toggling_mirrors_is_denied() {
        let pvcs = PvcState {
            master: pvc_pool(1, "5G"),
            segment_a: pvc_pool(2, "5G"),
            segment_b: PvcInfo::default(),
        };
        let result = cluster_create::validate_create(&cluster("no", "yes", 2), 0, &pvcs);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "my-greenplum has PVCs for 0 mirrors. segments.mirrors cannot be changed without first deleting PVCs. This will result in a new, empty Greenplum cluster"
        );
    }

    #[test]
    fn pvcs_from_an_older_major_version_are_denied() {
        let mut pvcs = PvcState {
            master: pvc_pool(1, "5G"),
            segment_a: pvc_pool(2, "5G"),
            segment_b: PvcInfo::default(),
        };
        pvcs.segment_a.major_versions = vec![Some("6".to_string()), Some("5".to_string())];
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &pvcs);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "the existing PVCs for my-greenplum are not compatible with this controller. Expected PVCs to have greenplum-major-version=6; found greenplum-major-version=5"
        );

        pvcs.segment_a.major_versions = vec![None];
        let result = cluster_create::validate_create(&cluster("no", "no", 2), 0, &pvcs);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "the existing PVCs for my-greenplum are not compatible with this controller. Expected PVCs to have greenplum-major-version=6; found no label"
        );
    }

    #[test]
    fn validation_is_idempotent() {
        let instance = cluster("no", "no", 2);
        let pvcs = PvcState::default();
        assert!(cluster_create::validate_create(&instance, 0, &pvcs).allowed);
        assert!(cluster_create::validate_create(&instance, 0, &pvcs).allowed);
    }

    #[test]
    fn negative_cpu_is_denied() {
        let mut instance = cluster("no", "no", 2);
        instance.spec.segments.pod.cpu = Quantity("-1".to_string());
        let result = cluster_create::validate_create(&instance, 0, &PvcState::default());
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"invalid segments cpu value: "-1": must be greater than or equal to 0"#
        );
    }
}

mod update {
    use super::*;

    #[test]
    fn growing_the_segment_count_is_the_only_allowed_change() {
        let old = cluster("no", "no", 2);
        let mut new = old.clone();
        new.spec.segments.primary_segment_count = 4;

        assert!(cluster_update::validate_immutable_fields(&old, &new, INSTANCE_IMAGE).allowed);
        assert!(cluster_update::is_expanding(&old, &new));
        assert!(cluster_update::validate_expansion_phase(&old).allowed);
        assert!(cluster_update::validate_service_name(&old, &new).allowed);
    }

    #[test]
    fn anti_affinity_cannot_change() {
        let old = cluster("no", "no", 2);
        let mut new = old.clone();
        new.spec.master_and_standby.pod.anti_affinity = "yes".to_string();
        new.spec.segments.pod.anti_affinity = "yes".to_string();

        let result = cluster_update::validate_immutable_fields(&old, &new, INSTANCE_IMAGE);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "antiAffinity cannot be changed after the cluster has been created"
        );
    }

    #[test]
    fn updates_are_blocked_for_clusters_from_an_older_image() {
        let mut old = cluster("no", "no", 2);
        old.status.as_mut().unwrap().instance_image = "greenplum-for-kubernetes:v2.2.0".to_string();
        let mut new = old.clone();
        new.spec.segments.primary_segment_count = 4;

        let result = cluster_update::validate_immutable_fields(&old, &new, INSTANCE_IMAGE);
        assert!(!result.allowed);
        let message = result.message.unwrap();
        assert!(message.starts_with("Cannot update greenplumCluster instance"));
        assert!(message.contains("GreenplumCluster has image: greenplum-for-kubernetes:v2.2.0"));
        assert!(message.contains("Operator supports image: greenplum-for-kubernetes:v2.3.0"));
    }

    #[test]
    fn expansion_is_blocked_while_the_cluster_is_pending() {
        let mut old = cluster("no", "no", 2);
        old.status.as_mut().unwrap().phase = GreenplumClusterPhase::Pending;

        let result = cluster_update::validate_expansion_phase(&old);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "updates only supported when cluster is Running"
        );
    }

    #[test]
    fn unfinished_gpexpand_jobs_block_expansion() {
        let job = |status: JobStatus| Job {
            metadata: ObjectMeta::default(),
            spec: None,
            status: Some(status),
        };

        assert!(cluster_update::expansion_job_blocker(&job(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        }))
        .is_none());

        assert_eq!(
            cluster_update::expansion_job_blocker(&job(JobStatus {
                failed: Some(1),
                ..Default::default()
            })),
            Some("cannot expand cluster because previous gpexpand job failed")
        );

        assert_eq!(
            cluster_update::expansion_job_blocker(&job(JobStatus {
                active: Some(1),
                ..Default::default()
            })),
            Some("cannot expand cluster because a gpexpand job is currently running")
        );
    }
}

mod pxf_service {
    use super::*;

    fn service() -> GreenplumPXFService {
        GreenplumPXFService {
            metadata: ObjectMeta {
                name: Some("my-pxf".to_string()),
                namespace: Some("test-ns".to_string()),
                ..Default::default()
            },
            spec: GreenplumPXFServiceSpec {
                replicas: 2,
                cpu: Quantity("0.5".to_string()),
                memory: Quantity("1Gi".to_string()),
                worker_selector: BTreeMap::new(),
                pxf_conf: None,
            },
            status: None,
        }
    }

    #[test]
    fn valid_spec_with_s3_conf_is_allowed() {
        let mut pxf = service();
        pxf.spec.pxf_conf = Some(GreenplumPXFConf {
            s3_source: S3Source {
                secret: "s3-secret".to_string(),
                bucket: "pxf-conf".to_string(),
                endpoint: "s3.amazonaws.com".to_string(),
                protocol: "https".to_string(),
                folder: "conf".to_string(),
            },
        });
        assert!(pxf::validate_pxf_spec(&pxf).allowed);
    }

    #[test]
    fn negative_memory_is_denied() {
        let mut pxf = service();
        pxf.spec.memory = Quantity("-1Gi".to_string());
        let result = pxf::validate_pxf_spec(&pxf);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"invalid pxf memory value: "-1Gi": must be greater than or equal to 0"#
        );
    }

    #[test]
    fn update_without_deployed_pxf_is_denied() {
        let result = pxf::validate_deployed_image(None, "my-pxf", "pxf:v2.3.0");
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"failed to get PXF Deployment. Try again later: deployments.apps "my-pxf" not found"#
        );
    }

    #[test]
    fn update_against_older_deployed_pxf_is_denied() {
        let result = pxf::validate_deployed_image(Some("pxf:old"), "my-pxf", "pxf:new");
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            pxf::image_mismatch_message("pxf:old", "pxf:new")
        );
    }

    #[test]
    fn image_mismatch_denial_names_both_images() {
        let message = pxf::image_mismatch_message("pxf:old", "pxf:new");
        assert_eq!(
            message,
            "Cannot update GreenplumPXFService instance -- operator only supports updates to greenplumpxfservices at the latest version. Please update GreenplumPXFService to the latest version in order to make updates; GreenplumPXFService has image: pxf:old; Operator supports image: pxf:new"
        );
    }

    #[test]
    fn phase_follows_deployment_replica_counters() {
        assert_eq!(derive_pxf_phase(2, 0, 2, 0), GreenplumPXFServicePhase::Pending);
        assert_eq!(derive_pxf_phase(2, 1, 1, 2), GreenplumPXFServicePhase::Degraded);
        assert_eq!(derive_pxf_phase(2, 2, 0, 2), GreenplumPXFServicePhase::Running);
    }
}
