use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};

use crate::resources::{IMAGE_PULL_SECRET_NAME, SSH_SECRET_NAME};

/// Name of the expansion Job for a cluster
pub fn gpexpand_job_name(cluster_name: &str) -> String {
    format!("{}-gpexpand-job", cluster_name)
}

/// Render the one-shot Job that runs gpexpand against the active master.
/// No retries: a failed expansion needs operator attention before another
/// attempt makes sense.
pub fn generate_gpexpand_job(image: &str, master_hostname: &str, new_segment_count: i32) -> Job {
    Job {
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    volumes: Some(vec![Volume {
                        name: "ssh-key".to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(SSH_SECRET_NAME.to_string()),
                            default_mode: Some(0o444),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: IMAGE_PULL_SECRET_NAME.to_string(),
                    }]),
                    containers: vec![Container {
                        name: "gpexpand".to_string(),
                        image: Some(image.to_string()),
                        command: Some(vec!["/home/gpadmin/tools/gpexpand_job.sh".to_string()]),
                        env: Some(vec![
                            EnvVar {
                                name: "GPEXPAND_HOST".to_string(),
                                value: Some(master_hostname.to_string()),
                                value_from: None,
                            },
                            EnvVar {
                                name: "NEW_SEG_COUNT".to_string(),
                                value: Some(new_segment_count.to_string()),
                                value_from: None,
                            },
                        ]),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "ssh-key".to_string(),
                            mount_path: "/etc/ssh-key".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name() {
        assert_eq!(gpexpand_job_name("my-greenplum"), "my-greenplum-gpexpand-job");
    }

    #[test]
    fn test_job_runs_once_with_expansion_env() {
        let job = generate_gpexpand_job(
            "img:v1",
            "master-0.agent.test-ns.svc.cluster.local",
            6,
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));

        let container = &pod.containers[0];
        assert_eq!(container.name, "gpexpand");
        assert_eq!(
            container.command.as_ref().unwrap()[0],
            "/home/gpadmin/tools/gpexpand_job.sh"
        );
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "GPEXPAND_HOST");
        assert_eq!(
            env[0].value.as_deref(),
            Some("master-0.agent.test-ns.svc.cluster.local")
        );
        assert_eq!(env[1].name, "NEW_SEG_COUNT");
        assert_eq!(env[1].value.as_deref(), Some("6"));
    }
}
