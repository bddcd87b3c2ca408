use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pod name label applied to every resource belonging to a cluster
pub const APP_NAME: &str = "greenplum";

/// Major version of the database this controller knows how to manage.
/// PVCs carry this as the `greenplum-major-version` label.
pub const SUPPORTED_GREENPLUM_MAJOR_VERSION: &str = "6";

/// GreenplumCluster is the Schema for the greenplumclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "greenplum.pivotal.io",
    version = "v1",
    kind = "GreenplumCluster",
    plural = "greenplumclusters",
    shortname = "gpc",
    namespaced,
    status = "GreenplumClusterStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumClusterSpec {
    pub master_and_standby: GreenplumMasterAndStandbySpec,
    pub segments: GreenplumSegmentsSpec,
    #[serde(default)]
    pub pxf: GreenplumPXFSpec,
}

/// Pod-resource fields shared by the master and segment pools.
///
/// Flattened into the enclosing spec so the wire format stays flat
/// (`masterAndStandby.cpu`, not `masterAndStandby.podSpec.cpu`).
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumPodSpec {
    /// Quantity expressed with an SI suffix, like 2Gi, 200m, 3.5, etc.
    #[serde(default)]
    pub memory: Quantity,

    /// Quantity expressed with an SI suffix, like 2Gi, 200m, 3.5, etc.
    #[serde(default)]
    pub cpu: Quantity,

    /// Size of the persistent volume backing each pod
    #[serde(default)]
    pub storage: Quantity,

    /// Name of the storage class to use for persistent volumes
    #[serde(default)]
    pub storage_class_name: String,

    /// A set of node labels for scheduling pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub worker_selector: BTreeMap<String, String>,

    /// "yes" or "no" (any case), whether to schedule with anti-affinity
    #[serde(default = "default_no")]
    pub anti_affinity: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumMasterAndStandbySpec {
    #[serde(flatten)]
    pub pod: GreenplumPodSpec,

    /// Additional entries to add to pg_hba.conf
    #[serde(default)]
    pub host_based_authentication: String,

    /// "yes" or "no" (any case), whether to deploy a standby master
    #[serde(default = "default_no")]
    pub standby: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumSegmentsSpec {
    #[serde(flatten)]
    pub pod: GreenplumPodSpec,

    /// Number of primary segments to create (1..10000)
    pub primary_segment_count: i32,

    /// "yes" or "no" (any case), whether to deploy a mirror for each primary
    #[serde(default = "default_no")]
    pub mirrors: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumPXFSpec {
    /// Name of the PXF service used by this cluster
    #[serde(default)]
    pub service_name: String,
}

fn default_no() -> String {
    "no".to_string()
}

/// Cluster lifecycle phase, serialized into status and read back across
/// controller restarts. String values are part of the stored contract.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub enum GreenplumClusterPhase {
    #[default]
    Pending,
    Running,
    Failed,
    Deleting,
}

impl std::fmt::Display for GreenplumClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GreenplumClusterPhase::Pending => write!(f, "Pending"),
            GreenplumClusterPhase::Running => write!(f, "Running"),
            GreenplumClusterPhase::Failed => write!(f, "Failed"),
            GreenplumClusterPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Status of the GreenplumCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumClusterStatus {
    /// Image of the database instance the last reconciling controller deployed
    #[serde(default)]
    pub instance_image: String,

    /// Image of the controller that last reconciled this cluster
    #[serde(default)]
    pub operator_version: String,

    #[serde(default)]
    pub phase: GreenplumClusterPhase,
}

impl GreenplumCluster {
    /// Lowercase the tri-state yes/no fields so "YES"/"Yes"/"yes" behave
    /// identically everywhere downstream.
    pub fn apply_spec_defaults(&mut self) {
        let fields = [
            &mut self.spec.master_and_standby.pod.anti_affinity,
            &mut self.spec.segments.pod.anti_affinity,
            &mut self.spec.master_and_standby.standby,
            &mut self.spec.segments.mirrors,
        ];
        for field in fields {
            *field = field.to_lowercase();
        }
    }

    /// Current phase, treating a missing status as Pending
    pub fn phase(&self) -> GreenplumClusterPhase {
        self.status
            .as_ref()
            .map(|s| s.phase.clone())
            .unwrap_or_default()
    }
}
