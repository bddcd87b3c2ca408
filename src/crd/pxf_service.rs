use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pod name label applied to PXF resources
pub const PXF_APP_NAME: &str = "greenplum-pxf";

/// GreenplumPXFService is the Schema for the greenplumpxfservices API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "greenplum.pivotal.io",
    version = "v1beta1",
    kind = "GreenplumPXFService",
    plural = "greenplumpxfservices",
    namespaced,
    status = "GreenplumPXFServiceStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumPXFServiceSpec {
    /// Number of pods to create (1..1000)
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Quantity expressed with an SI suffix, like 2Gi, 200m, 3.5, etc.
    #[serde(default)]
    pub cpu: Quantity,

    /// Quantity expressed with an SI suffix, like 2Gi, 200m, 3.5, etc.
    #[serde(default)]
    pub memory: Quantity,

    /// A set of node labels for scheduling pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub worker_selector: BTreeMap<String, String>,

    /// S3 bucket and secret for downloading PXF configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxf_conf: Option<GreenplumPXFConf>,
}

fn default_replicas() -> i32 {
    2
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumPXFConf {
    pub s3_source: S3Source,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Source {
    /// Secret holding `access_key_id` and `secret_access_key` keys
    pub secret: String,

    pub bucket: String,

    pub endpoint: String,

    /// "http" or "https"; anything but "http" is treated as secure
    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub folder: String,
}

/// PXF service phase, derived each reconcile from the child Deployment
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub enum GreenplumPXFServicePhase {
    #[default]
    Pending,
    Degraded,
    Running,
}

impl std::fmt::Display for GreenplumPXFServicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GreenplumPXFServicePhase::Pending => write!(f, "Pending"),
            GreenplumPXFServicePhase::Degraded => write!(f, "Degraded"),
            GreenplumPXFServicePhase::Running => write!(f, "Running"),
        }
    }
}

/// Status of the GreenplumPXFService
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreenplumPXFServiceStatus {
    #[serde(default)]
    pub phase: GreenplumPXFServicePhase,
}

impl GreenplumPXFService {
    /// Current phase, treating a missing status as Pending
    pub fn phase(&self) -> GreenplumPXFServicePhase {
        self.status
            .as_ref()
            .map(|s| s.phase.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_replicas_defaults_to_two() {
        let spec: GreenplumPXFServiceSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.replicas, 2);
    }

    #[test]
    fn test_s3_source_wire_field_names() {
        let spec: GreenplumPXFServiceSpec = serde_json::from_value(serde_json::json!({
            "replicas": 3,
            "pxfConf": {
                "s3Source": {
                    "secret": "my-secret",
                    "bucket": "my-bucket",
                    "endpoint": "s3.example.com",
                    "protocol": "http",
                    "folder": "conf"
                }
            }
        }))
        .unwrap();
        let s3 = spec.pxf_conf.unwrap().s3_source;
        assert_eq!(s3.secret, "my-secret");
        assert_eq!(s3.protocol, "http");
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(
            serde_json::to_value(GreenplumPXFServicePhase::Degraded).unwrap(),
            "Degraded"
        );
    }
}
