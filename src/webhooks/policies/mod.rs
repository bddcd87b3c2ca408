//! Admission webhook policies
//!
//! The rule functions here are pure: they operate on the incoming objects
//! plus pre-fetched cluster state, so they can be tested without a cluster.

pub mod cluster_create;
pub mod cluster_update;
pub mod pxf;
mod shared;

pub use shared::{
    parse_quantity, validate_resource_quantity, validate_worker_selector, PvcInfo, PvcState,
    MAX_LABEL_LEN,
};

/// Result of a policy validation
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}
