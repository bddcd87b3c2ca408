//! Remote command execution inside database pods
//!
//! Live cluster state (active master, segment count, expansion schema) can
//! only be observed by running queries inside a master pod. The [`PodExec`]
//! trait is the seam that lets reconcilers and the admission webhook share
//! one production transport while tests substitute canned responses.

mod active_master;

pub use active_master::current_active_master;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use thiserror::Error;

/// Errors that can occur while executing a command in a pod
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to attach to exec streams: {0}")]
    AttachFailed(String),

    #[error("IO error during exec: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Command failed: {0}")]
    CommandFailed(String),
}

/// Captured output of a completed pod command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a command inside a named pod and capture its output.
///
/// A non-zero exit or transport failure is an `Err`; stderr is carried in
/// the error message where available.
#[async_trait]
pub trait PodExec: Send + Sync {
    async fn execute(
        &self,
        command: &[String],
        namespace: &str,
        pod_name: &str,
    ) -> Result<ExecOutput, ExecError>;
}

/// Production executor backed by the Kubernetes exec subresource
#[derive(Clone)]
pub struct PodExecClient {
    client: Client,
}

impl PodExecClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodExec for PodExecClient {
    async fn execute(
        &self,
        command: &[String],
        namespace: &str,
        pod_name: &str,
    ) -> Result<ExecOutput, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let attach_params = AttachParams {
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached = pods.exec(pod_name, command.to_vec(), &attach_params).await?;

        let stdout = attached
            .stdout()
            .ok_or_else(|| ExecError::AttachFailed("no stdout stream from exec".to_string()))?;
        let stderr = attached
            .stderr()
            .ok_or_else(|| ExecError::AttachFailed("no stderr stream from exec".to_string()))?;

        let stdout_output = read_stream(stdout).await?;
        let stderr_output = read_stream(stderr).await?;

        let status = attached
            .take_status()
            .ok_or_else(|| ExecError::AttachFailed("no status from exec".to_string()))?;

        if let Some(status) = status.await {
            if status.status != Some("Success".to_string()) {
                let message = if stderr_output.is_empty() {
                    format!("command exited with status: {:?}", status.status)
                } else {
                    stderr_output.clone()
                };
                return Err(ExecError::CommandFailed(message));
            }
        }

        Ok(ExecOutput {
            stdout: stdout_output,
            stderr: stderr_output,
        })
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Result<String, ExecError> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

/// Wrap a query in a login shell that sources the Greenplum environment
pub(crate) fn greenplum_shell_command(script: &str) -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        "--".to_string(),
        format!("source /usr/local/greenplum-db/greenplum_path.sh && {}", script),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_sources_greenplum_path() {
        let cmd = greenplum_shell_command("gpstop -aM immediate");
        assert_eq!(cmd[0], "/bin/bash");
        assert_eq!(cmd[1], "-c");
        assert_eq!(cmd[2], "--");
        assert_eq!(
            cmd[3],
            "source /usr/local/greenplum-db/greenplum_path.sh && gpstop -aM immediate"
        );
    }
}
