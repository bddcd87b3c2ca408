use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::crd::GreenplumCluster;
use crate::resources::{cluster_labels, cluster_owner_reference};

/// Name of the Secret holding the inter-pod SSH keypair
pub const SSH_SECRET_NAME: &str = "ssh-secrets";

const PRIVATE_KEY_NAME: &str = "id_rsa";
const PUBLIC_KEY_NAME: &str = "id_rsa.pub";

#[derive(Error, Debug)]
pub enum SshKeyError {
    #[error("failed to generate SSH keypair: {0}")]
    Generation(#[from] rcgen::Error),
}

/// Generates the keypair that pods use to SSH between each other.
///
/// Trait-typed so tests can substitute deterministic key material.
pub trait SshKeyCreator: Send + Sync {
    fn generate_key_pair(&self) -> Result<BTreeMap<String, ByteString>, SshKeyError>;
}

/// Production key creator generating a fresh PEM-encoded keypair
#[derive(Clone, Copy, Default)]
pub struct SshKeyGenerator;

impl SshKeyCreator for SshKeyGenerator {
    fn generate_key_pair(&self) -> Result<BTreeMap<String, ByteString>, SshKeyError> {
        let key_pair = rcgen::KeyPair::generate()?;
        Ok(BTreeMap::from([
            (
                PRIVATE_KEY_NAME.to_string(),
                ByteString(key_pair.serialize_pem().into_bytes()),
            ),
            (
                PUBLIC_KEY_NAME.to_string(),
                ByteString(key_pair.public_key_pem().into_bytes()),
            ),
        ]))
    }
}

/// Fill in the SSH Secret. Key material is generated only when the Secret
/// has no data yet, so an existing keypair survives reconciles.
pub fn modify_ssh_secret(
    secret: &mut Secret,
    cluster: &GreenplumCluster,
    creator: &dyn SshKeyCreator,
) -> Result<(), SshKeyError> {
    secret.metadata.labels = Some(cluster_labels(&cluster.name_any()));
    secret.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);
    secret.type_ = Some("Opaque".to_string());

    if secret.data.is_none() {
        secret.data = Some(creator.generate_key_pair()?);
    }

    Ok(())
}
