//! Controllers for GreenplumCluster and GreenplumPXFService resources

mod anti_affinity;
mod context;
mod error;
mod expansion;
mod finalizer;
mod pxf_reconciler;
mod reconciler;
mod status;

pub use anti_affinity::handle_anti_affinity;
pub use context::{Context, PxfContext};
pub use error::{BackoffConfig, Error, Result};
pub use expansion::handle_expand;
pub use finalizer::{handle_finalizer, STOP_CLUSTER_FINALIZER};
pub use pxf_reconciler::{derive_pxf_phase, error_policy_pxf, reconcile_pxf};
pub use reconciler::{error_policy, reconcile};
