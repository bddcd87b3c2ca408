use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::GreenplumCluster;
use crate::resources::{cluster_labels, cluster_owner_reference};

/// Name of the ConfigMap mounted into every database pod
pub const CONFIG_MAP_NAME: &str = "greenplum-config";

/// Server configuration applied at initialization
const GUCS: &str = "gp_resource_manager = group\ngp_resource_group_memory_limit = 1.0";

/// Fill in the cluster ConfigMap from the spec. The data is consumed by the
/// container startup scripts, which expect "true"/"false" rather than the
/// spec's yes/no strings.
pub fn modify_config_map(config_map: &mut ConfigMap, cluster: &GreenplumCluster) {
    config_map.metadata.labels = Some(cluster_labels(&cluster.name_any()));
    config_map.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    config_map.data = Some(BTreeMap::from([
        (
            "segmentCount".to_string(),
            cluster.spec.segments.primary_segment_count.to_string(),
        ),
        (
            "standby".to_string(),
            (cluster.spec.master_and_standby.standby == "yes").to_string(),
        ),
        (
            "mirrors".to_string(),
            (cluster.spec.segments.mirrors == "yes").to_string(),
        ),
        (
            "hostBasedAuthentication".to_string(),
            cluster
                .spec
                .master_and_standby
                .host_based_authentication
                .clone(),
        ),
        ("GUCs".to_string(), GUCS.to_string()),
        (
            "pxfServiceName".to_string(),
            cluster.spec.pxf.service_name.clone(),
        ),
    ]));
}
