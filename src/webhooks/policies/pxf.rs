//! Rules for GreenplumPXFService CREATE and UPDATE

use crate::crd::GreenplumPXFService;

use super::shared::{validate_resource_quantity, validate_worker_selector};
use super::ValidationResult;

pub const UPGRADE_PXF_HELP_MSG: &str = "Cannot update GreenplumPXFService instance -- operator only supports updates to greenplumpxfservices \
at the latest version. Please update GreenplumPXFService to the latest version in order to make updates";

/// Spec rules applied to both CREATE and UPDATE
pub fn validate_pxf_spec(pxf: &GreenplumPXFService) -> ValidationResult {
    let result = validate_worker_selector(&pxf.spec.worker_selector, "pxf");
    if !result.allowed {
        return result;
    }

    let result = validate_resource_quantity(&pxf.spec.cpu, "pxf", "cpu");
    if !result.allowed {
        return result;
    }
    validate_resource_quantity(&pxf.spec.memory, "pxf", "memory")
}

/// True when an update actually changes the spec
pub fn spec_changed(old: &GreenplumPXFService, new: &GreenplumPXFService) -> bool {
    serde_json::to_value(&old.spec).ok() != serde_json::to_value(&new.spec).ok()
}

/// Denial for updates against a deployment built from an older PXF image
pub fn image_mismatch_message(deployed_image: &str, instance_image: &str) -> String {
    format!(
        "{}; GreenplumPXFService has image: {}; Operator supports image: {}",
        UPGRADE_PXF_HELP_MSG, deployed_image, instance_image
    )
}

/// Gate spec updates on the deployed image. A Deployment that cannot be
/// found is a denial, not a pass: updates are only safe once the deployed
/// image is known to match.
pub fn validate_deployed_image(
    deployed_image: Option<&str>,
    deployment_name: &str,
    instance_image: &str,
) -> ValidationResult {
    match deployed_image {
        None => ValidationResult::denied(
            "DeploymentUnavailable",
            &format!(
                "failed to get PXF Deployment. Try again later: deployments.apps \"{deployment_name}\" not found"
            ),
        ),
        Some(image) if image != instance_image => ValidationResult::denied(
            "UnsupportedVersion",
            &image_mismatch_message(image, instance_image),
        ),
        Some(_) => ValidationResult::allowed(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::GreenplumPXFServiceSpec;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn pxf_service() -> GreenplumPXFService {
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
    fn test_valid_spec_is_allowed() {
        assert!(validate_pxf_spec(&pxf_service()).allowed);
    }

    #[test]
    fn test_negative_cpu_is_denied() {
        let mut pxf = pxf_service();
        pxf.spec.cpu = Quantity("-0.5".to_string());
        let result = validate_pxf_spec(&pxf);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"invalid pxf cpu value: "-0.5": must be greater than or equal to 0"#
        );
    }

    #[test]
    fn test_oversized_worker_selector_is_denied() {
        let mut pxf = pxf_service();
        pxf.spec
            .worker_selector
            .insert("zone".to_string(), "z".repeat(64));
        let result = validate_pxf_spec(&pxf);
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "pxf workerSelector key/value is longer than 63 characters"
        );
    }

    #[test]
    fn test_spec_changed_detects_replica_change() {
        let old = pxf_service();
        let mut new = old.clone();
        assert!(!spec_changed(&old, &new));
        new.spec.replicas = 3;
        assert!(spec_changed(&old, &new));
    }

    #[test]
    fn test_missing_deployment_denies_update() {
        let result = validate_deployed_image(None, "my-pxf", "pxf:v2.3.0");
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"failed to get PXF Deployment. Try again later: deployments.apps "my-pxf" not found"#
        );
    }

    #[test]
    fn test_matching_deployed_image_is_allowed() {
        assert!(validate_deployed_image(Some("pxf:v2.3.0"), "my-pxf", "pxf:v2.3.0").allowed);
    }

    #[test]
    fn test_image_mismatch_message() {
        let message = image_mismatch_message("pxf:v2.2.0", "pxf:v2.3.0");
        assert!(message.starts_with(UPGRADE_PXF_HELP_MSG));
        assert!(message.ends_with(
            "GreenplumPXFService has image: pxf:v2.2.0; Operator supports image: pxf:v2.3.0"
        ));
    }
}
