use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::{GreenplumCluster, GreenplumPXFService, APP_NAME, PXF_APP_NAME};

/// Name of the image pull secret referenced by every generated pod spec
pub const IMAGE_PULL_SECRET_NAME: &str = "regsecret";

/// Labels stamped on every child resource of a cluster
pub fn cluster_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_NAME.to_string()),
        ("greenplum-cluster".to_string(), cluster_name.to_string()),
    ])
}

/// Labels stamped on every child resource of a PXF service
pub fn pxf_labels(pxf_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), PXF_APP_NAME.to_string()),
        ("greenplum-pxf".to_string(), pxf_name.to_string()),
    ])
}

/// Controller owner reference pointing at the cluster, so children are
/// garbage collected with it.
pub fn cluster_owner_reference(cluster: &GreenplumCluster) -> OwnerReference {
    OwnerReference {
        api_version: "greenplum.pivotal.io/v1".to_string(),
        kind: "GreenplumCluster".to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Controller owner reference pointing at the PXF service
pub fn pxf_owner_reference(pxf: &GreenplumPXFService) -> OwnerReference {
    OwnerReference {
        api_version: "greenplum.pivotal.io/v1beta1".to_string(),
        kind: "GreenplumPXFService".to_string(),
        name: pxf.name_any(),
        uid: pxf.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
