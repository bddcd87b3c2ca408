use tracing::debug;

use super::{greenplum_shell_command, PodExec};

const ACTIVE_MASTER_QUERY: &str =
    "psql -U gpadmin -c 'select * from gp_segment_configuration'";

/// Find which master pod currently accepts queries.
///
/// Probes `master-0` then `master-1` with a trivial catalog query and
/// returns the first pod that answers. `None` means the cluster has no
/// reachable active master right now, which is a normal transient state
/// during startup or failover.
pub async fn current_active_master(pod_exec: &dyn PodExec, namespace: &str) -> Option<String> {
    let command = greenplum_shell_command(ACTIVE_MASTER_QUERY);

    for pod_name in ["master-0", "master-1"] {
        match pod_exec.execute(&command, namespace, pod_name).await {
            Ok(_) => return Some(pod_name.to_string()),
            Err(err) => {
                debug!(namespace, pod_name, %err, "master pod not active");
            }
        }
    }

    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::{ExecError, ExecOutput};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fake executor that succeeds only for a configured pod name and
    /// records every probe it receives.
    struct FakePodExec {
        active_pod: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakePodExec {
        fn new(active_pod: Option<&str>) -> Self {
            Self {
                active_pod: active_pod.map(str::to_string),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PodExec for FakePodExec {
        async fn execute(
            &self,
            command: &[String],
            _namespace: &str,
            pod_name: &str,
        ) -> Result<ExecOutput, ExecError> {
            assert!(command[3].contains("gp_segment_configuration"));
            self.calls.lock().unwrap().push(pod_name.to_string());
            if self.active_pod.as_deref() == Some(pod_name) {
                Ok(ExecOutput::default())
            } else {
                Err(ExecError::CommandFailed("connection refused".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_returns_master_0_when_it_answers() {
        let exec = FakePodExec::new(Some("master-0"));
        let active = current_active_master(&exec, "test-ns").await;
        assert_eq!(active.as_deref(), Some("master-0"));
        assert_eq!(*exec.calls.lock().unwrap(), vec!["master-0"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_master_1() {
        let exec = FakePodExec::new(Some("master-1"));
        let active = current_active_master(&exec, "test-ns").await;
        assert_eq!(active.as_deref(), Some("master-1"));
        assert_eq!(*exec.calls.lock().unwrap(), vec!["master-0", "master-1"]);
    }

    #[tokio::test]
    async fn test_returns_none_when_no_master_answers() {
        let exec = FakePodExec::new(None);
        let active = current_active_master(&exec, "test-ns").await;
        assert_eq!(active, None);
    }
}
