//! Node labeling for anti-affinity scheduling
//!
//! Masters need two candidate nodes so the standby lands apart from the
//! primary master, and segments need two node zones ("a" and "b") so each
//! mirror lands apart from its primary. Nodes are labeled alternately by
//! list position.

use k8s_openapi::api::core::v1::Node;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::GreenplumCluster;

/// Validate node capacity and label nodes for the cluster's anti-affinity
/// placement. Does nothing when neither pool asks for anti-affinity.
pub async fn handle_anti_affinity(ctx: &Context, cluster: &GreenplumCluster) -> Result<()> {
    if cluster.spec.master_and_standby.pod.anti_affinity != "yes"
        && cluster.spec.segments.pod.anti_affinity != "yes"
    {
        return Ok(());
    }

    let namespace = cluster.namespace().unwrap_or_default();
    let nodes: Api<Node> = Api::all(ctx.client.clone());

    let master_nodes = list_nodes(&nodes, &cluster.spec.master_and_standby.pod.worker_selector)
        .await
        .map_err(|err| anti_affinity_error(format!("master node worker selector list: {err}")))?;
    let segment_nodes = list_nodes(&nodes, &cluster.spec.segments.pod.worker_selector)
        .await
        .map_err(|err| anti_affinity_error(format!("segment node worker selector list: {err}")))?;

    if let Err(reason) = validate_node_pools(cluster, master_nodes.len(), segment_nodes.len()) {
        return Err(anti_affinity_error(format!(
            "instance {} does not meet requirements: {}",
            cluster.name_any(),
            reason
        )));
    }

    let master_key = format!("greenplum-affinity-{}-master", namespace);
    label_alternate_nodes(&nodes, &master_nodes, &master_key, "true", "true").await?;

    let segment_key = format!("greenplum-affinity-{}-segment", namespace);
    label_alternate_nodes(&nodes, &segment_nodes, &segment_key, "a", "b").await?;

    Ok(())
}

/// Pure capacity and consistency check over pre-fetched node counts
pub fn validate_node_pools(
    cluster: &GreenplumCluster,
    master_node_count: usize,
    segment_node_count: usize,
) -> Result<(), String> {
    let master_anti_affinity = &cluster.spec.master_and_standby.pod.anti_affinity;
    let segment_anti_affinity = &cluster.spec.segments.pod.anti_affinity;
    if master_anti_affinity != segment_anti_affinity {
        return Err(format!(
            "master and segment antiAffinity must be the same value: segment antiAffinity is {}, and master antiAffinity is {}",
            segment_anti_affinity, master_anti_affinity
        ));
    }

    if master_node_count < 2 || segment_node_count < 2 {
        return Err(format!(
            "there must be at least two nodes available to both master and segments for anti-affinity: the number of nodes available for master is {} and for segment is {}",
            master_node_count, segment_node_count
        ));
    }

    Ok(())
}

async fn list_nodes(
    nodes: &Api<Node>,
    worker_selector: &BTreeMap<String, String>,
) -> Result<Vec<Node>, kube::Error> {
    let mut params = ListParams::default();
    if !worker_selector.is_empty() {
        let selector = worker_selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        params = params.labels(&selector);
    }
    Ok(nodes.list(&params).await?.items)
}

/// Label every other node with the even value, the rest with the odd value
async fn label_alternate_nodes(
    nodes: &Api<Node>,
    node_list: &[Node],
    key: &str,
    even_value: &str,
    odd_value: &str,
) -> Result<()> {
    for (i, node) in node_list.iter().enumerate() {
        let value = if i % 2 == 0 { even_value } else { odd_value };
        let node_name = node.name_any();
        nodes
            .patch(
                &node_name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "metadata": { "labels": { key: value } } })),
            )
            .await
            .map_err(|err| {
                anti_affinity_error(format!(
                    "failed to add label '{key}={value}' to node '{node_name}': {err}"
                ))
            })?;
    }
    Ok(())
}

fn anti_affinity_error(message: String) -> Error {
    Error::AntiAffinityError(message)
}
