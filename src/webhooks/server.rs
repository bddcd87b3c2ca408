//! Webhook HTTP server handlers
//!
//! Implements the ValidatingAdmissionWebhook HTTP endpoint for both
//! GreenplumCluster and GreenplumPXFService resources, plus a readiness
//! probe.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::crd::{GreenplumCluster, GreenplumPXFService};

use super::policies::ValidationResult;
use super::validator::Validator;

const CRD_GROUP: &str = "greenplum.pivotal.io";

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared state for webhook handlers
pub struct WebhookState {
    pub validator: Validator,
}

impl WebhookState {
    pub fn new(validator: Validator) -> Self {
        Self { validator }
    }
}

/// Create the webhook router
pub(crate) fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/ready", get(ready))
        .with_state(state)
}

async fn ready() -> &'static str {
    "OK\n"
}

/// Admission webhook handler for both supported kinds
pub(crate) async fn validate(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/json" {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        )
            .into_response();
    }

    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            warn!(error = %err, "failed to parse AdmissionReview");
            return (
                StatusCode::OK,
                Json(create_response(
                    "",
                    false,
                    &format!("parsing request: {err}"),
                    None,
                )),
            )
                .into_response();
        }
    };

    let Some(request) = review.request else {
        return (
            StatusCode::BAD_REQUEST,
            Json(create_response(
                "",
                false,
                "Missing request in AdmissionReview",
                None,
            )),
        )
            .into_response();
    };

    let uid = request.uid.clone();
    let result = dispatch(&state.validator, &request).await;

    info!(
        gvk = %request.kind,
        name = ?request.name,
        namespace = ?request.namespace,
        uid = %uid,
        operation = %request.operation,
        allowed = result.allowed,
        message = result.message.as_deref().unwrap_or_default(),
        "processed admission request"
    );

    let message = result.message.unwrap_or_default();
    (
        StatusCode::OK,
        Json(create_response(
            &uid,
            result.allowed,
            &message,
            result.reason.as_deref(),
        )),
    )
        .into_response()
}

/// Route the request by group/kind/operation. Anything unrecognized is
/// denied so a misconfigured webhook registration cannot silently let
/// objects through.
async fn dispatch(validator: &Validator, request: &AdmissionRequest) -> ValidationResult {
    if request.kind.group != CRD_GROUP {
        return unexpected_object(&request.kind);
    }
    let namespace = request.namespace.clone().unwrap_or_default();

    match request.kind.kind.as_str() {
        "GreenplumCluster" => match request.operation.as_str() {
            "CREATE" => {
                let new: GreenplumCluster = match unmarshal(&request.object, "Request.Object") {
                    Ok(new) => new,
                    Err(result) => return result,
                };
                validator.validate_cluster_create(&namespace, new).await
            }
            "UPDATE" => {
                let new: GreenplumCluster = match unmarshal(&request.object, "Request.Object") {
                    Ok(new) => new,
                    Err(result) => return result,
                };
                let old: GreenplumCluster = match unmarshal(&request.old_object, "Request.OldObject")
                {
                    Ok(old) => old,
                    Err(result) => return result,
                };
                validator.validate_cluster_update(&namespace, &old, &new).await
            }
            op => unexpected_operation(op),
        },
        "GreenplumPXFService" => match request.operation.as_str() {
            "CREATE" => {
                let new: GreenplumPXFService = match unmarshal(&request.object, "Request.Object") {
                    Ok(new) => new,
                    Err(result) => return result,
                };
                validator.validate_pxf(&namespace, None, &new).await
            }
            "UPDATE" => {
                let new: GreenplumPXFService = match unmarshal(&request.object, "Request.Object") {
                    Ok(new) => new,
                    Err(result) => return result,
                };
                let old: GreenplumPXFService =
                    match unmarshal(&request.old_object, "Request.OldObject") {
                        Ok(old) => old,
                        Err(result) => return result,
                    };
                validator.validate_pxf(&namespace, Some(&old), &new).await
            }
            op => unexpected_operation(op),
        },
        _ => unexpected_object(&request.kind),
    }
}

fn unmarshal<T: serde::de::DeserializeOwned + kube::Resource>(
    object: &Option<serde_json::Value>,
    field: &str,
) -> Result<T, ValidationResult>
where
    T::DynamicType: Default,
{
    let dynamic_type = T::DynamicType::default();
    let kind = T::kind(&dynamic_type);
    let Some(value) = object else {
        return Err(ValidationResult::denied(
            "BadRequest",
            &format!("failed to unmarshal {field} into {kind}: missing object"),
        ));
    };
    serde_json::from_value(value.clone()).map_err(|err| {
        ValidationResult::denied(
            "BadRequest",
            &format!("failed to unmarshal {field} into {kind}: {err}"),
        )
    })
}

fn unexpected_operation(operation: &str) -> ValidationResult {
    ValidationResult::denied(
        "UnexpectedOperation",
        &format!("unexpected operation for validation: {operation}"),
    )
}

fn unexpected_object(gvk: &GroupVersionKind) -> ValidationResult {
    ValidationResult::denied(
        "UnexpectedObject",
        &format!("unexpected validation request for object: {gvk}"),
    )
}

/// Create an AdmissionReview response
fn create_response(
    uid: &str,
    allowed: bool,
    message: &str,
    reason: Option<&str>,
) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: if allowed {
                None
            } else {
                Some(AdmissionStatus {
                    code: 403,
                    message: message.to_string(),
                    reason: reason.map(String::from),
                })
            },
        },
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:8443 and serves the /validate and /ready endpoints.
/// TLS certificates are loaded from the paths specified.
pub async fn run_webhook_server(
    validator: Validator,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let state = Arc::new(WebhookState::new(validator));
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}
