use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::GreenplumCluster;
use crate::resources::{cluster_labels, cluster_owner_reference};

/// Headless service giving every pod a stable DNS name for SSH
pub const AGENT_SERVICE_NAME: &str = "agent";

/// LoadBalancer service exposing the active master for psql clients
pub const GREENPLUM_SERVICE_NAME: &str = "greenplum";

/// Fill in the headless `agent` service used for pod-to-pod SSH
pub fn modify_agent_service(service: &mut Service, cluster: &GreenplumCluster) {
    let labels = cluster_labels(&cluster.name_any());
    service.metadata.labels = Some(labels.clone());
    service.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.ports = Some(vec![ServicePort {
        port: 22,
        target_port: Some(IntOrString::Int(22)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);
    spec.selector = Some(labels);
    spec.type_ = Some("ClusterIP".to_string());
    spec.cluster_ip = Some("None".to_string());
}

/// Fill in the external `greenplum` service. It pins its selector to the
/// `master-0` pod; clients reach the standby only after a manual failover
/// repoints the pod.
pub fn modify_greenplum_service(service: &mut Service, cluster: &GreenplumCluster) {
    service.metadata.labels = Some(cluster_labels(&cluster.name_any()));
    service.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.ports = Some(vec![ServicePort {
        name: Some("psql".to_string()),
        port: 5432,
        target_port: Some(IntOrString::Int(5432)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);
    spec.selector = Some(BTreeMap::from([(
        "statefulset.kubernetes.io/pod-name".to_string(),
        "master-0".to_string(),
    )]));
    spec.type_ = Some("LoadBalancer".to_string());
    spec.external_traffic_policy = Some("Local".to_string());
    spec.session_affinity = Some("None".to_string());
}
