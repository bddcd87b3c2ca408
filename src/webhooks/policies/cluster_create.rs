//! CREATE rules for GreenplumCluster
//!
//! Creation is validated against what already exists in the namespace:
//! PVCs from a previously deleted cluster constrain the new spec, so a
//! delete-and-recreate cannot silently lose or corrupt data.

use kube::ResourceExt;

use crate::crd::{GreenplumCluster, SUPPORTED_GREENPLUM_MAJOR_VERSION};

use super::shared::{
    long_pvc_error, quantities_equal, short_pvc_error, validate_resource_quantity,
    validate_worker_selector, PvcInfo, PvcState,
};
use super::ValidationResult;

/// Validate a new cluster against pre-fetched namespace state. The spec is
/// expected to be default-normalized (tri-state fields lowercased) already.
pub fn validate_create(
    cluster: &GreenplumCluster,
    existing_cluster_count: usize,
    pvcs: &PvcState,
) -> ValidationResult {
    let result = validate_anti_affinity_consistency(cluster);
    if !result.allowed {
        return result;
    }

    if existing_cluster_count > 0 {
        return ValidationResult::denied(
            "ClusterExists",
            &format!(
                "only one GreenplumCluster is allowed in namespace {}",
                cluster.namespace().unwrap_or_default()
            ),
        );
    }

    let result = validate_storage_against_pvcs(cluster, pvcs);
    if !result.allowed {
        return result;
    }

    for pool in [&pvcs.master, &pvcs.segment_a, &pvcs.segment_b] {
        let result = validate_pvc_major_version(cluster, pool);
        if !result.allowed {
            return result;
        }
    }

    let result = validate_primary_segment_count(cluster, pvcs);
    if !result.allowed {
        return result;
    }

    let result = validate_standby(cluster, pvcs);
    if !result.allowed {
        return result;
    }

    let result = validate_mirrors(cluster, pvcs);
    if !result.allowed {
        return result;
    }

    for (selector, typ) in [
        (&cluster.spec.master_and_standby.pod.worker_selector, "masterAndStandby"),
        (&cluster.spec.segments.pod.worker_selector, "segments"),
    ] {
        let result = validate_worker_selector(selector, typ);
        if !result.allowed {
            return result;
        }
    }

    let master = &cluster.spec.master_and_standby.pod;
    let segments = &cluster.spec.segments.pod;
    for (quantity, typ, field) in [
        (&master.cpu, "masterAndStandby", "cpu"),
        (&segments.cpu, "segments", "cpu"),
        (&master.memory, "masterAndStandby", "memory"),
        (&segments.memory, "segments", "memory"),
        (&master.storage, "masterAndStandby", "storage"),
        (&segments.storage, "segments", "storage"),
    ] {
        let result = validate_resource_quantity(quantity, typ, field);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}

/// Anti-affinity needs both a standby master and mirrored segments;
/// otherwise the placement rules would strand pods.
pub fn validate_anti_affinity_consistency(cluster: &GreenplumCluster) -> ValidationResult {
    let master_anti_affinity = &cluster.spec.master_and_standby.pod.anti_affinity;
    let segment_anti_affinity = &cluster.spec.segments.pod.anti_affinity;

    if cluster.spec.master_and_standby.standby == "no"
        && (master_anti_affinity != "no" || segment_anti_affinity != "no")
    {
        return ValidationResult::denied(
            "InvalidAntiAffinity",
            r#"when standby is set to "no", antiAffinity must also be set to "no""#,
        );
    }
    if cluster.spec.segments.mirrors == "no"
        && (master_anti_affinity != "no" || segment_anti_affinity != "no")
    {
        return ValidationResult::denied(
            "InvalidAntiAffinity",
            r#"when mirrors is set to "no", antiAffinity must also be set to "no""#,
        );
    }
    ValidationResult::allowed()
}

fn validate_storage_against_pvcs(cluster: &GreenplumCluster, pvcs: &PvcState) -> ValidationResult {
    let result = validate_storage_pool(
        &pvcs.master,
        &cluster.spec.master_and_standby.pod.storage,
        &cluster.spec.master_and_standby.pod.storage_class_name,
    );
    if !result.allowed {
        return result;
    }
    validate_storage_pool(
        &pvcs.segment_a,
        &cluster.spec.segments.pod.storage,
        &cluster.spec.segments.pod.storage_class_name,
    )
}

fn validate_storage_pool(
    pool: &PvcInfo,
    new_storage: &k8s_openapi::apimachinery::pkg::api::resource::Quantity,
    new_storage_class: &str,
) -> ValidationResult {
    if pool.count() == 0 {
        return ValidationResult::allowed();
    }
    if let Some(pvc_storage) = &pool.storage {
        if !quantities_equal(pvc_storage, new_storage) {
            return ValidationResult::denied(
                "StorageImmutable",
                &short_pvc_error("storage", "changed", "Greenplum"),
            );
        }
    }
    if let Some(pvc_class) = &pool.storage_class_name {
        if pvc_class != new_storage_class {
            return ValidationResult::denied(
                "StorageImmutable",
                &short_pvc_error("storageClassName", "changed", "Greenplum"),
            );
        }
    }
    ValidationResult::allowed()
}

fn validate_pvc_major_version(cluster: &GreenplumCluster, pool: &PvcInfo) -> ValidationResult {
    for version in &pool.major_versions {
        let found = match version {
            None => "no label".to_string(),
            Some(v) if v != SUPPORTED_GREENPLUM_MAJOR_VERSION => {
                format!("greenplum-major-version={v}")
            }
            Some(_) => continue,
        };
        return ValidationResult::denied(
            "IncompatiblePvcVersion",
            &format!(
                "the existing PVCs for {} are not compatible with this controller. Expected PVCs to have greenplum-major-version={}; found {}",
                cluster.name_any(),
                SUPPORTED_GREENPLUM_MAJOR_VERSION,
                found
            ),
        );
    }
    ValidationResult::allowed()
}

fn validate_primary_segment_count(cluster: &GreenplumCluster, pvcs: &PvcState) -> ValidationResult {
    let previous_count = pvcs.segment_a.count();
    if (cluster.spec.segments.primary_segment_count as usize) < previous_count {
        return ValidationResult::denied(
            "SegmentCountDecreased",
            &long_pvc_error(
                "Greenplum",
                &cluster.name_any(),
                previous_count,
                "segments",
                "segments.primarySegmentCount",
                "decreased",
            ),
        );
    }
    ValidationResult::allowed()
}

fn validate_standby(cluster: &GreenplumCluster, pvcs: &PvcState) -> ValidationResult {
    let previous_masters = pvcs.master.count();
    if previous_masters == 0 {
        // no previous cluster
        return ValidationResult::allowed();
    }

    let previous_standby = if previous_masters == 2 { "yes" } else { "no" };
    if previous_standby != cluster.spec.master_and_standby.standby {
        return ValidationResult::denied(
            "StandbyImmutable",
            &long_pvc_error(
                "Greenplum",
                &cluster.name_any(),
                previous_masters,
                "masters",
                "masterAndStandby.standby",
                "changed",
            ),
        );
    }
    ValidationResult::allowed()
}

fn validate_mirrors(cluster: &GreenplumCluster, pvcs: &PvcState) -> ValidationResult {
    if pvcs.segment_a.count() == 0 {
        // new cluster
        return ValidationResult::allowed();
    }

    let previous_mirrors = pvcs.segment_b.count();
    let mirrors = &cluster.spec.segments.mirrors;
    if (previous_mirrors == 0 && mirrors == "yes") || (previous_mirrors > 0 && mirrors == "no") {
        return ValidationResult::denied(
            "MirrorsImmutable",
            &long_pvc_error(
                "Greenplum",
                &cluster.name_any(),
                previous_mirrors,
                "mirrors",
                "segments.mirrors",
                "changed",
            ),
        );
    }
    ValidationResult::allowed()
}
