use std::sync::Arc;

use kube::Client;

use crate::executor::PodExec;
use crate::health::HealthState;
use crate::resources::SshKeyCreator;

/// Shared context for the GreenplumCluster controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Database image deployed into cluster pods
    pub instance_image: String,
    /// Image of this controller, recorded in cluster status
    pub operator_image: String,
    /// Creator of the inter-pod SSH keypair
    pub ssh_creator: Arc<dyn SshKeyCreator>,
    /// Executor for commands inside database pods
    pub pod_exec: Arc<dyn PodExec>,
    /// Metrics sink, absent in tests
    pub health_state: Option<Arc<HealthState>>,
}

/// Shared context for the GreenplumPXFService controller
#[derive(Clone)]
pub struct PxfContext {
    pub client: Client,
    pub instance_image: String,
}
