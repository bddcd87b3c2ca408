//! Validating admission webhook for GreenplumCluster and GreenplumPXFService

pub mod policies;
mod server;
mod validator;

pub use server::{
    run_webhook_server, WebhookError, WebhookState, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH,
    WEBHOOK_PORT,
};
pub use validator::Validator;
