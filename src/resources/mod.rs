//! Templating for the Kubernetes child resources of a cluster

mod common;
mod configmap;
mod job;
mod pxf;
mod rbac;
mod secret;
mod service;
mod statefulset;

pub use common::*;
pub use configmap::*;
pub use job::*;
pub use pxf::*;
pub use rbac::*;
pub use secret::*;
pub use service::*;
pub use statefulset::*;
