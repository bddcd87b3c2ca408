use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::{GreenplumCluster, APP_NAME};
use crate::resources::cluster_owner_reference;

/// Shared name of the ServiceAccount, Role, and RoleBinding granted to
/// database pods
pub const SYSTEM_POD_RBAC_NAME: &str = "greenplum-system-pod";

pub fn modify_service_account(service_account: &mut ServiceAccount, cluster: &GreenplumCluster) {
    service_account.metadata.labels = Some(app_label());
    service_account.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);
}

/// Grant database pods the permissions their startup and failover tooling
/// needs: relabeling their own PVCs, inspecting peer pods, and watching the
/// agent service endpoints for DNS readiness.
pub fn modify_role(role: &mut Role, cluster: &GreenplumCluster) {
    role.metadata.labels = Some(app_label());
    role.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    role.rules = Some(vec![
        PolicyRule {
            verbs: vec!["get".to_string(), "patch".to_string()],
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["persistentvolumeclaims".to_string()]),
            ..Default::default()
        },
        PolicyRule {
            verbs: vec!["get".to_string()],
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["pods".to_string()]),
            ..Default::default()
        },
        PolicyRule {
            verbs: vec!["list".to_string(), "watch".to_string()],
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["endpoints".to_string()]),
            ..Default::default()
        },
    ]);
}

pub fn modify_role_binding(role_binding: &mut RoleBinding, cluster: &GreenplumCluster) {
    role_binding.metadata.labels = Some(app_label());
    role_binding.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    role_binding.subjects = Some(vec![Subject {
        kind: "ServiceAccount".to_string(),
        api_group: Some(String::new()),
        name: SYSTEM_POD_RBAC_NAME.to_string(),
        namespace: cluster.namespace(),
    }]);
    role_binding.role_ref = RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: "Role".to_string(),
        name: SYSTEM_POD_RBAC_NAME.to_string(),
    };
}

fn app_label() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), APP_NAME.to_string())])
}
