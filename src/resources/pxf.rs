use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, LocalObjectReference, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::GreenplumPXFService;
use crate::resources::{pxf_labels, pxf_owner_reference, IMAGE_PULL_SECRET_NAME};

const PXF_PORT: i32 = 5888;

/// Fill in the PXF Deployment from the service spec
pub fn modify_pxf_deployment(deployment: &mut Deployment, pxf: &GreenplumPXFService, image: &str) {
    let labels = pxf_labels(&pxf.name_any());

    deployment.metadata.labels = Some(labels.clone());
    deployment.metadata.owner_references = Some(vec![pxf_owner_reference(pxf)]);

    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    spec.replicas = Some(pxf.spec.replicas);
    spec.selector = LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    };
    spec.template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            node_selector: if pxf.spec.worker_selector.is_empty() {
                None
            } else {
                Some(pxf.spec.worker_selector.clone())
            },
            image_pull_secrets: Some(vec![LocalObjectReference {
                name: IMAGE_PULL_SECRET_NAME.to_string(),
            }]),
            containers: vec![pxf_container(pxf, image)],
            ..Default::default()
        }),
    };
}

fn pxf_container(pxf: &GreenplumPXFService, image: &str) -> Container {
    let mut env = vec![EnvVar {
        name: "PXF_JVM_OPTS".to_string(),
        value: Some("-XX:MaxRAMPercentage=75.0".to_string()),
        value_from: None,
    }];
    if let Some(conf) = &pxf.spec.pxf_conf {
        if !conf.s3_source.secret.is_empty() {
            env.extend(s3_env(pxf));
        }
    }

    Container {
        name: "pxf".to_string(),
        args: Some(vec!["/home/gpadmin/tools/startPXF".to_string()]),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: PXF_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "/usr/local/pxf-gp6/bin/pxf".to_string(),
                    "status".to_string(),
                ]),
            }),
            initial_delay_seconds: Some(30),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), pxf.spec.cpu.clone()),
                ("memory".to_string(), pxf.spec.memory.clone()),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment for fetching PXF configuration from an S3 bucket. Only the
/// "http" protocol marks the endpoint insecure.
fn s3_env(pxf: &GreenplumPXFService) -> Vec<EnvVar> {
    let Some(conf) = &pxf.spec.pxf_conf else {
        return Vec::new();
    };
    let s3 = &conf.s3_source;
    let endpoint_is_secure = s3.protocol != "http";

    let secret_ref = |key: &str| EnvVarSource {
        secret_key_ref: Some(SecretKeySelector {
            name: s3.secret.clone(),
            key: key.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };

    vec![
        EnvVar {
            name: "S3_SECRET_ACCESS_KEY".to_string(),
            value: None,
            value_from: Some(secret_ref("secret_access_key")),
        },
        EnvVar {
            name: "S3_ACCESS_KEY_ID".to_string(),
            value: None,
            value_from: Some(secret_ref("access_key_id")),
        },
        EnvVar {
            name: "S3_BUCKET".to_string(),
            value: Some(s3.bucket.clone()),
            value_from: None,
        },
        EnvVar {
            name: "S3_ENDPOINT".to_string(),
            value: Some(s3.endpoint.clone()),
            value_from: None,
        },
        EnvVar {
            name: "S3_ENDPOINT_IS_SECURE".to_string(),
            value: Some(endpoint_is_secure.to_string()),
            value_from: None,
        },
        EnvVar {
            name: "S3_FOLDER".to_string(),
            value: Some(s3.folder.clone()),
            value_from: None,
        },
    ]
}

/// Fill in the ClusterIP Service fronting the PXF pods
pub fn modify_pxf_service(service: &mut Service, pxf: &GreenplumPXFService) {
    let labels = pxf_labels(&pxf.name_any());

    service.metadata.labels = Some(labels.clone());
    service.metadata.owner_references = Some(vec![pxf_owner_reference(pxf)]);

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = Some(labels);
    spec.ports = Some(vec![ServicePort {
        port: PXF_PORT,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::Int(PXF_PORT)),
        ..Default::default()
    }]);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{GreenplumPXFConf, GreenplumPXFServiceSpec, S3Source};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::core::ObjectMeta as KubeObjectMeta;

    fn test_pxf(pxf_conf: Option<GreenplumPXFConf>) -> GreenplumPXFService {
        GreenplumPXFService {
            metadata: KubeObjectMeta {
                name: Some("my-pxf".to_string()),
                namespace: Some("test-ns".to_string()),
                uid: Some("uid-2".to_string()),
                ..Default::default()
            },
            spec: GreenplumPXFServiceSpec {
                replicas: 3,
                cpu: Quantity("2".to_string()),
                memory: Quantity("1Gi".to_string()),
                worker_selector: BTreeMap::new(),
                pxf_conf,
            },
            status: None,
        }
    }

    fn s3_conf(protocol: &str) -> GreenplumPXFConf {
        GreenplumPXFConf {
            s3_source: S3Source {
                secret: "s3-secret".to_string(),
                bucket: "my-bucket".to_string(),
                endpoint: "s3.example.com".to_string(),
                protocol: protocol.to_string(),
                folder: "conf".to_string(),
            },
        }
    }

    #[test]
    fn test_deployment_shape() {
        let mut deployment = Deployment::default();
        modify_pxf_deployment(&mut deployment, &test_pxf(None), "pxf-img:v1");

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(container.name, "pxf");
        assert_eq!(container.args.as_ref().unwrap()[0], "/home/gpadmin/tools/startPXF");
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 5888);
        let probe = container.readiness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(30));
        assert_eq!(
            probe.exec.as_ref().unwrap().command.as_ref().unwrap(),
            &vec!["/usr/local/pxf-gp6/bin/pxf".to_string(), "status".to_string()]
        );

        let env = container.env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "PXF_JVM_OPTS");
    }

    #[test]
    fn test_s3_env_added_when_configured() {
        let mut deployment = Deployment::default();
        modify_pxf_deployment(&mut deployment, &test_pxf(Some(s3_conf("https"))), "img");

        let spec = deployment.spec.unwrap();
        let container = &spec.template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        let by_name: BTreeMap<_, _> = env.iter().map(|e| (e.name.as_str(), e)).collect();

        let key_ref = by_name["S3_SECRET_ACCESS_KEY"]
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(key_ref.name, "s3-secret");
        assert_eq!(key_ref.key, "secret_access_key");
        assert_eq!(by_name["S3_BUCKET"].value.as_deref(), Some("my-bucket"));
        assert_eq!(by_name["S3_ENDPOINT_IS_SECURE"].value.as_deref(), Some("true"));
        assert_eq!(by_name["S3_FOLDER"].value.as_deref(), Some("conf"));
    }

    #[test]
    fn test_s3_endpoint_insecure_only_for_http() {
        let mut deployment = Deployment::default();
        modify_pxf_deployment(&mut deployment, &test_pxf(Some(s3_conf("http"))), "img");

        let spec = deployment.spec.unwrap();
        let container = &spec.template.spec.unwrap().containers[0];
        let secure = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "S3_ENDPOINT_IS_SECURE")
            .unwrap();
        assert_eq!(secure.value.as_deref(), Some("false"));
    }

    #[test]
    fn test_service_shape() {
        let mut service = Service::default();
        modify_pxf_service(&mut service, &test_pxf(None));

        let spec = service.spec.unwrap();
        assert_eq!(
            spec.selector.unwrap().get("greenplum-pxf").unwrap(),
            "my-pxf"
        );
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 5888);
        assert_eq!(port.target_port, Some(IntOrString::Int(5888)));
    }
}
