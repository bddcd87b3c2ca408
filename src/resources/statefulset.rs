use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, DownwardAPIVolumeFile,
    DownwardAPIVolumeSource, HostPathVolumeSource, LocalObjectReference, NodeAffinity,
    NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity,
    PodDNSConfig, PodSpec, Probe, ResourceRequirements, SecretVolumeSource, TCPSocketAction,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::{GreenplumCluster, GreenplumPodSpec, APP_NAME};
use crate::resources::{
    cluster_owner_reference, AGENT_SERVICE_NAME, CONFIG_MAP_NAME, IMAGE_PULL_SECRET_NAME,
    SSH_SECRET_NAME, SYSTEM_POD_RBAC_NAME,
};

/// The three pools a cluster is built from. The string value is both the
/// StatefulSet name and the `type` pod label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatefulSetType {
    Master,
    SegmentA,
    SegmentB,
}

impl StatefulSetType {
    pub fn name(&self) -> &'static str {
        match self {
            StatefulSetType::Master => "master",
            StatefulSetType::SegmentA => "segment-a",
            StatefulSetType::SegmentB => "segment-b",
        }
    }
}

impl std::fmt::Display for StatefulSetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to render one pool's StatefulSet
pub struct StatefulSetParams {
    pub set_type: StatefulSetType,
    pub cluster_name: String,
    pub replicas: i32,
    pub instance_image: String,
    pub pod_spec: GreenplumPodSpec,
}

/// Derive a pool's parameters from the cluster spec. The master pool runs
/// two replicas when a standby is requested; segment pools track
/// `primarySegmentCount`.
pub fn generate_statefulset_params(
    set_type: StatefulSetType,
    cluster: &GreenplumCluster,
    instance_image: &str,
) -> StatefulSetParams {
    let (replicas, pod_spec) = match set_type {
        StatefulSetType::Master => {
            let replicas = if cluster.spec.master_and_standby.standby == "yes" {
                2
            } else {
                1
            };
            (replicas, cluster.spec.master_and_standby.pod.clone())
        }
        StatefulSetType::SegmentA | StatefulSetType::SegmentB => (
            cluster.spec.segments.primary_segment_count,
            cluster.spec.segments.pod.clone(),
        ),
    };

    StatefulSetParams {
        set_type,
        cluster_name: cluster.name_any(),
        replicas,
        instance_image: instance_image.to_string(),
        pod_spec,
    }
}

/// Fill in a pool StatefulSet from its parameters.
///
/// Mutates the live object in place: labels are merged rather than replaced
/// and the pod template and container are edited field by field, so values
/// this operator does not own (extra labels, probe timeouts) survive an
/// update.
pub fn modify_statefulset(
    statefulset: &mut StatefulSet,
    params: &StatefulSetParams,
    cluster: &GreenplumCluster,
) {
    let namespace = cluster.namespace().unwrap_or_default();
    let labels = pool_labels(params.set_type, &params.cluster_name);

    merge_labels(&mut statefulset.metadata.labels, &labels);
    statefulset.metadata.owner_references = Some(vec![cluster_owner_reference(cluster)]);

    let spec = statefulset.spec.get_or_insert_with(StatefulSetSpec::default);
    spec.replicas = Some(params.replicas);
    spec.selector = LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    };
    spec.service_name = Some(AGENT_SERVICE_NAME.to_string());
    spec.pod_management_policy = Some("Parallel".to_string());
    spec.volume_claim_templates = Some(vec![data_volume_claim(params)]);

    let template_meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
    merge_labels(&mut template_meta.labels, &labels);

    let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
    modify_pool_pod_spec(pod, params, &namespace);
}

fn merge_labels(target: &mut Option<BTreeMap<String, String>>, labels: &BTreeMap<String, String>) {
    target
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

fn pool_labels(set_type: StatefulSetType, cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_NAME.to_string()),
        ("type".to_string(), set_type.name().to_string()),
        ("greenplum-cluster".to_string(), cluster_name.to_string()),
    ])
}

fn data_volume_claim(params: &StatefulSetParams) -> PersistentVolumeClaim {
    let storage = BTreeMap::from([("storage".to_string(), params.pod_spec.storage.clone())]);
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(format!("{}-pgdata", params.cluster_name)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(params.pod_spec.storage_class_name.clone()),
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                limits: Some(storage.clone()),
                requests: Some(storage),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn modify_pool_pod_spec(pod: &mut PodSpec, params: &StatefulSetParams, namespace: &str) {
    pod.dns_config = Some(PodDNSConfig {
        searches: Some(vec![format!(
            "{}.{}.svc.cluster.local",
            AGENT_SERVICE_NAME, namespace
        )]),
        ..Default::default()
    });
    pod.node_selector = if params.pod_spec.worker_selector.is_empty() {
        None
    } else {
        Some(params.pod_spec.worker_selector.clone())
    };
    pod.image_pull_secrets = Some(vec![LocalObjectReference {
        name: IMAGE_PULL_SECRET_NAME.to_string(),
    }]);
    pod.volumes = Some(pod_volumes());
    pod.affinity = if params.pod_spec.anti_affinity == "yes" {
        Some(pool_affinity(params.set_type, namespace))
    } else {
        None
    };
    pod.service_account_name = Some(SYSTEM_POD_RBAC_NAME.to_string());

    let idx = pod
        .containers
        .iter()
        .position(|c| c.name == APP_NAME)
        .unwrap_or_else(|| {
            pod.containers.push(Container {
                name: APP_NAME.to_string(),
                ..Default::default()
            });
            pod.containers.len() - 1
        });
    if let Some(container) = pod.containers.get_mut(idx) {
        modify_database_container(container, params);
    }
}

fn modify_database_container(container: &mut Container, params: &StatefulSetParams) {
    container.args = Some(vec!["/home/gpadmin/tools/startGreenplumContainer".to_string()]);
    container.image = Some(params.instance_image.clone());
    container.image_pull_policy = Some("IfNotPresent".to_string());
    container.ports = Some(vec![ContainerPort {
        container_port: 22,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);

    // Only the handler and initial delay are owned here; tuning fields such
    // as timeoutSeconds stay as set on the live object.
    let probe = container.readiness_probe.get_or_insert_with(Probe::default);
    probe.tcp_socket = Some(TCPSocketAction {
        port: IntOrString::Int(22),
        ..Default::default()
    });
    probe.initial_delay_seconds = Some(5);

    container.resources = Some(ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("memory".to_string(), params.pod_spec.memory.clone()),
            ("cpu".to_string(), params.pod_spec.cpu.clone()),
        ])),
        ..Default::default()
    });
    container.env = Some(vec![k8s_openapi::api::core::v1::EnvVar {
        name: "MASTER_DATA_DIRECTORY".to_string(),
        value: Some("/greenplum/data-1".to_string()),
        value_from: None,
    }]);
    container.volume_mounts = Some(vec![
        mount("ssh-key-volume", "/etc/ssh-key"),
        mount("config-volume", "/etc/config"),
        mount(&format!("{}-pgdata", params.cluster_name), "/greenplum"),
        mount("cgroups", "/sys/fs/cgroup"),
        mount("podinfo", "/etc/podinfo"),
    ]);
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn pod_volumes() -> Vec<Volume> {
    vec![
        Volume {
            name: "ssh-key-volume".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(SSH_SECRET_NAME.to_string()),
                default_mode: Some(0o444),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "config-volume".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: CONFIG_MAP_NAME.to_string(),
                default_mode: Some(0o644),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "cgroups".to_string(),
            host_path: Some(HostPathVolumeSource {
                path: "/sys/fs/cgroup".to_string(),
                type_: Some(String::new()),
            }),
            ..Default::default()
        },
        Volume {
            name: "podinfo".to_string(),
            downward_api: Some(DownwardAPIVolumeSource {
                items: Some(vec![
                    DownwardAPIVolumeFile {
                        path: "namespace".to_string(),
                        field_ref: Some(ObjectFieldSelector {
                            api_version: Some("v1".to_string()),
                            field_path: "metadata.namespace".to_string(),
                        }),
                        ..Default::default()
                    },
                    DownwardAPIVolumeFile {
                        path: "greenplumClusterName".to_string(),
                        field_ref: Some(ObjectFieldSelector {
                            api_version: Some("v1".to_string()),
                            field_path: "metadata.labels['greenplum-cluster']".to_string(),
                        }),
                        ..Default::default()
                    },
                ]),
                default_mode: Some(0o644),
            }),
            ..Default::default()
        },
    ]
}

/// Anti-affinity placement: masters land on master-labeled nodes and repel
/// each other; segment pools split across the "a" and "b" node zones.
fn pool_affinity(set_type: StatefulSetType, namespace: &str) -> Affinity {
    let (key, values, pod_anti_affinity) = match set_type {
        StatefulSetType::Master => (
            format!("greenplum-affinity-{}-master", namespace),
            vec!["true".to_string()],
            Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                    label_selector: Some(LabelSelector {
                        match_expressions: Some(vec![LabelSelectorRequirement {
                            key: "type".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec!["master".to_string()]),
                        }]),
                        ..Default::default()
                    }),
                    topology_key: "kubernetes.io/hostname".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        ),
        StatefulSetType::SegmentA => (
            format!("greenplum-affinity-{}-segment", namespace),
            vec!["a".to_string()],
            None,
        ),
        StatefulSetType::SegmentB => (
            format!("greenplum-affinity-{}-segment", namespace),
            vec!["b".to_string()],
            None,
        ),
    };

    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key,
                        operator: "In".to_string(),
                        values: Some(values),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        pod_anti_affinity,
        ..Default::default()
    }
}
