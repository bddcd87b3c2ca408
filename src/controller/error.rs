//! Error types for the GreenplumCluster and GreenplumPXFService controllers

use std::time::Duration;

use thiserror::Error;

use crate::executor::ExecError;
use crate::resources::SshKeyError;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ExecError`).
/// This is idiomatic for error enums and improves readability at call sites.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Pod exec error: {0}")]
    ExecError(#[from] ExecError),

    #[error("SSH key error: {0}")]
    SshKeyError(#[from] SshKeyError),

    #[error("antiAffinity: {0}")]
    AntiAffinityError(String),

    #[error("{0}")]
    FinalizerError(String),

    #[error("unable to run gpexpand: {0}")]
    ExpansionError(String),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("{0}")]
    ReconcileError(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Kubernetes API errors are often retryable
            Error::KubeError(e) => {
                match e {
                    kube::Error::Api(api_err) => {
                        // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                        let code = api_err.code;
                        if (400..500).contains(&code) {
                            return code == 409 || code == 429;
                        }
                        // 5xx errors are retryable
                        true
                    }
                    // Network and other errors are retryable
                    _ => true,
                }
            }
            // Exec failures usually mean a pod is mid-startup or mid-failover
            Error::ExecError(_) => true,
            Error::FinalizerError(_) => true,
            Error::ReconcileError(_) => true,
            // Node capacity or flag mismatches need operator action, but
            // node lists can also change underneath us
            Error::AntiAffinityError(_) => true,
            Error::ExpansionError(_) => true,
            Error::SerializationError(_) => false,
            Error::SshKeyError(_) => false,
            Error::MissingObjectKey(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait out the maximum delay so manual
            // intervention has a chance to land
            self.max_delay
        }
    }
}
