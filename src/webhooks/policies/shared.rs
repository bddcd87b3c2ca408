//! Rule helpers shared by cluster and PXF validation

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

use super::ValidationResult;

/// Kubernetes label values cannot exceed this length
pub const MAX_LABEL_LEN: usize = 63;

/// Pre-fetched facts about the PVCs of one pool, gathered by label
/// `{app=greenplum, greenplum-cluster=<name>, type=<pool>}`
#[derive(Debug, Clone, Default)]
pub struct PvcInfo {
    /// Storage request of the first PVC, if any exist
    pub storage: Option<Quantity>,
    /// Storage class of the first PVC, if any exist
    pub storage_class_name: Option<String>,
    /// `greenplum-major-version` label of every PVC (None when unlabeled)
    pub major_versions: Vec<Option<String>>,
}

impl PvcInfo {
    pub fn count(&self) -> usize {
        self.major_versions.len()
    }
}

/// PVC facts for all three pools
#[derive(Debug, Clone, Default)]
pub struct PvcState {
    pub master: PvcInfo,
    pub segment_a: PvcInfo,
    pub segment_b: PvcInfo,
}

pub fn validate_worker_selector(
    worker_selector: &BTreeMap<String, String>,
    typ: &str,
) -> ValidationResult {
    for (key, value) in worker_selector {
        if key.len() > MAX_LABEL_LEN || value.len() > MAX_LABEL_LEN {
            return ValidationResult::denied(
                "InvalidWorkerSelector",
                &format!(
                    "{} workerSelector key/value is longer than {} characters",
                    typ, MAX_LABEL_LEN
                ),
            );
        }
    }
    ValidationResult::allowed()
}

pub fn validate_resource_quantity(quantity: &Quantity, typ: &str, field: &str) -> ValidationResult {
    let negative = match parse_quantity(quantity) {
        Some(value) => value < 0.0,
        None => quantity.0.trim_start().starts_with('-'),
    };
    if negative {
        return ValidationResult::denied(
            "InvalidQuantity",
            &format!(
                r#"invalid {} {} value: "{}": must be greater than or equal to 0"#,
                typ, field, quantity.0
            ),
        );
    }
    ValidationResult::allowed()
}

/// Parse a Kubernetes resource quantity into a plain number. Returns None
/// for strings that are not valid quantities.
pub fn parse_quantity(quantity: &Quantity) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let s = quantity.0.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(value) = s.parse::<f64>() {
        return Some(value);
    }
    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|v| v * multiplier);
        }
    }
    None
}

/// True when two quantities denote the same amount (falling back to string
/// equality when either fails to parse)
pub fn quantities_equal(a: &Quantity, b: &Quantity) -> bool {
    match (parse_quantity(a), parse_quantity(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.0 == b.0,
    }
}

pub(crate) fn long_pvc_error(
    parent_object_type: &str,
    parent_object: &str,
    previous_count: usize,
    child_object_name: &str,
    child_object_path: &str,
    verb: &str,
) -> String {
    let info = format!(
        "{} has PVCs for {} {}.",
        parent_object, previous_count, child_object_name
    );
    format!(
        "{} {}",
        info,
        short_pvc_error(child_object_path, verb, parent_object_type)
    )
}

pub(crate) fn short_pvc_error(child_object_path: &str, verb: &str, parent_object_type: &str) -> String {
    format!(
        "{} cannot be {} without first deleting PVCs. This will result in a new, empty {} cluster",
        child_object_path, verb, parent_object_type
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity_suffixes() {
        assert_eq!(parse_quantity(&Quantity("1Gi".to_string())).unwrap(), 1_073_741_824.0);
        assert_eq!(parse_quantity(&Quantity("500m".to_string())).unwrap(), 0.5);
        assert_eq!(parse_quantity(&Quantity("2".to_string())).unwrap(), 2.0);
        assert_eq!(parse_quantity(&Quantity("1G".to_string())).unwrap(), 1e9);
        assert!(parse_quantity(&Quantity("abc".to_string())).is_none());
    }

    #[test]
    fn test_quantities_equal_across_notations() {
        assert!(quantities_equal(
            &Quantity("1024Mi".to_string()),
            &Quantity("1Gi".to_string())
        ));
        assert!(!quantities_equal(
            &Quantity("1G".to_string()),
            &Quantity("1Gi".to_string())
        ));
    }

    #[test]
    fn test_negative_quantity_is_denied() {
        let result = validate_resource_quantity(&Quantity("-1".to_string()), "segments", "cpu");
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            r#"invalid segments cpu value: "-1": must be greater than or equal to 0"#
        );
    }

    #[test]
    fn test_long_worker_selector_is_denied() {
        let selector = BTreeMap::from([("key".to_string(), "v".repeat(64))]);
        let result = validate_worker_selector(&selector, "masterAndStandby");
        assert!(!result.allowed);
        assert_eq!(
            result.message.unwrap(),
            "masterAndStandby workerSelector key/value is longer than 63 characters"
        );
    }

    #[test]
    fn test_pvc_error_strings() {
        assert_eq!(
            long_pvc_error("Greenplum", "my-gp", 2, "masters", "masterAndStandby.standby", "changed"),
            "my-gp has PVCs for 2 masters. masterAndStandby.standby cannot be changed without first deleting PVCs. This will result in a new, empty Greenplum cluster"
        );
    }
}
