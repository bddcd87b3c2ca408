mod greenplum_cluster;
mod pxf_service;

pub use greenplum_cluster::*;
pub use pxf_service::*;
