//! Reconciliation logic for GreenplumPXFService resources

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::controller::context::PxfContext;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::crd::{GreenplumPXFService, GreenplumPXFServicePhase, GreenplumPXFServiceStatus};
use crate::resources::{modify_pxf_deployment, modify_pxf_service};

/// Reconcile one GreenplumPXFService into its Service and Deployment
#[instrument(skip(pxf, ctx), fields(name = %pxf.name_any(), namespace = pxf.namespace().unwrap_or_default()))]
pub async fn reconcile_pxf(pxf: Arc<GreenplumPXFService>, ctx: Arc<PxfContext>) -> Result<Action> {
    let ns = pxf
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = pxf.name_any();

    info!("Reconciling GreenplumPXFService");

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);

    // A deployment built from a different PXF version stays untouched until
    // the resource itself is upgraded.
    match deployments.get_opt(&name).await {
        Ok(Some(existing)) => {
            let current_image = existing
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|s| s.containers.first())
                .and_then(|c| c.image.as_deref())
                .unwrap_or_default();
            if current_image != ctx.instance_image {
                warn!(
                    existing_image = %current_image,
                    supported_image = %ctx.instance_image,
                    "PXF deployment was built from a different image, skipping"
                );
                return Ok(Action::await_change());
            }
        }
        Ok(None) => {}
        Err(err) => {
            return Err(Error::ReconcileError(format!(
                "unable to fetch PXF Deployment: {err}"
            )));
        }
    }

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    upsert_service(&services, &name, &ns, &pxf)
        .await
        .map_err(|err| {
            Error::ReconcileError(format!("unable to CreateOrUpdate PXF Service: {err}"))
        })?;

    let deployment = upsert_deployment(&deployments, &name, &ns, &pxf, &ctx.instance_image)
        .await
        .map_err(|err| {
            Error::ReconcileError(format!("unable to CreateOrUpdate PXF Deployment: {err}"))
        })?;

    let phase = derive_pxf_phase(
        pxf.spec.replicas,
        deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
        deployment
            .status
            .as_ref()
            .and_then(|s| s.unavailable_replicas)
            .unwrap_or(0),
        deployment
            .status
            .as_ref()
            .and_then(|s| s.updated_replicas)
            .unwrap_or(0),
    );

    if phase != pxf.phase() {
        let pxf_api: Api<GreenplumPXFService> = Api::namespaced(ctx.client.clone(), &ns);
        let status = GreenplumPXFServiceStatus { phase };
        pxf_api
            .patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;
    }

    Ok(Action::await_change())
}

/// Error policy for the PXF controller
pub fn error_policy_pxf(pxf: Arc<GreenplumPXFService>, error: &Error, _ctx: Arc<PxfContext>) -> Action {
    let name = pxf.name_any();
    let backoff = BackoffConfig::default();
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// Derive the service phase from its Deployment's replica counters
pub fn derive_pxf_phase(
    desired_replicas: i32,
    ready_replicas: i32,
    unavailable_replicas: i32,
    updated_replicas: i32,
) -> GreenplumPXFServicePhase {
    if ready_replicas == 0 {
        GreenplumPXFServicePhase::Pending
    } else if unavailable_replicas != 0 || updated_replicas < desired_replicas {
        GreenplumPXFServicePhase::Degraded
    } else {
        GreenplumPXFServicePhase::Running
    }
}

async fn upsert_service(
    api: &Api<Service>,
    name: &str,
    namespace: &str,
    pxf: &GreenplumPXFService,
) -> Result<(), Error> {
    match api.get_opt(name).await? {
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            modify_pxf_service(&mut existing, pxf);
            if serde_json::to_value(&existing)? != before {
                api.replace(name, &PostParams::default(), &existing).await?;
            }
        }
        None => {
            let mut service = Service::default();
            service.metadata.name = Some(name.to_string());
            service.metadata.namespace = Some(namespace.to_string());
            modify_pxf_service(&mut service, pxf);
            api.create(&PostParams::default(), &service).await?;
        }
    }
    Ok(())
}

async fn upsert_deployment(
    api: &Api<Deployment>,
    name: &str,
    namespace: &str,
    pxf: &GreenplumPXFService,
    image: &str,
) -> Result<Deployment, Error> {
    match api.get_opt(name).await? {
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            modify_pxf_deployment(&mut existing, pxf, image);
            if serde_json::to_value(&existing)? != before {
                existing = api.replace(name, &PostParams::default(), &existing).await?;
            }
            Ok(existing)
        }
        None => {
            let mut deployment = Deployment::default();
            deployment.metadata.name = Some(name.to_string());
            deployment.metadata.namespace = Some(namespace.to_string());
            modify_pxf_deployment(&mut deployment, pxf, image);
            Ok(api.create(&PostParams::default(), &deployment).await?)
        }
    }
}
