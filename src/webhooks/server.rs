//! Admission webhook server.
//!
//! Provides HTTP endpoints for the image policy webhook:
//! - `POST /validate` - ValidatingAdmissionWebhook AdmissionReview for pods
//! - `POST /imagereview` - ImagePolicyWebhook ImageReview backend
//!
//! To enable the webhook:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a ValidatingWebhookConfiguration pointing at `/validate`
//! 3. Mount the TLS certificate secret at /etc/webhook/certs/

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::health::HealthState;
use crate::policy::PolicyStore;
use crate::webhooks::admission::{Outcome, review_admission};
use crate::webhooks::image_review::review_images;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const ENDPOINT_VALIDATE: &str = "validate";
const ENDPOINT_IMAGE_REVIEW: &str = "imagereview";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub policy: Arc<PolicyStore>,
    pub health: Arc<HealthState>,
}

impl WebhookState {
    pub fn new(policy: Arc<PolicyStore>, health: Arc<HealthState>) -> Self {
        Self { policy, health }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate", post(validate_pod))
        .route("/imagereview", post(image_review))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Validate a pod AdmissionReview
async fn validate_pod(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let policy = state.policy.snapshot().await;
    let metrics = &state.health.metrics;

    let response = match review_admission(&body, &policy) {
        Ok(outcome) => {
            metrics.record_request(ENDPOINT_VALIDATE, outcome.outcome);
            if let Some(key) = &outcome.break_glass_key {
                metrics.record_break_glass(key);
            }
            (StatusCode::OK, Json(outcome.response.into_review())).into_response()
        }
        Err(e) => {
            error!(error = %e, "Rejecting uncorrelated admission request");
            metrics.record_request(ENDPOINT_VALIDATE, Outcome::Uncorrelated);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    };

    metrics.observe_duration(ENDPOINT_VALIDATE, started.elapsed().as_secs_f64());
    response
}

/// Answer an ImagePolicyWebhook ImageReview
async fn image_review(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let policy = state.policy.snapshot().await;
    let metrics = &state.health.metrics;

    let response = match review_images(&body, &policy) {
        Ok((review, decision)) => {
            let outcome = match (&decision.break_glass_key, decision.allowed) {
                (Some(key), _) => {
                    warn!(
                        key = %key,
                        namespace = ?review.spec.namespace,
                        "ImageReview allowed by break-glass annotation"
                    );
                    metrics.record_break_glass(key);
                    Outcome::BreakGlass
                }
                (None, true) => {
                    info!(images = review.spec.containers.len(), "ImageReview allowed");
                    Outcome::Allowed
                }
                (None, false) => {
                    warn!(reason = %decision.reason, "ImageReview denied");
                    Outcome::Denied
                }
            };
            metrics.record_request(ENDPOINT_IMAGE_REVIEW, outcome);
            (StatusCode::OK, Json(review)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to decode ImageReview");
            metrics.record_request(ENDPOINT_IMAGE_REVIEW, Outcome::Invalid);
            (
                StatusCode::BAD_REQUEST,
                format!("Invalid ImageReview: {}", e),
            )
                .into_response()
        }
    };

    metrics.observe_duration(ENDPOINT_IMAGE_REVIEW, started.elapsed().as_secs_f64());
    response
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Server error
    #[error("Webhook server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Paths to the PEM-encoded certificate and key
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Run the webhook server.
///
/// Serves over TLS when `tls` is given, plain HTTP otherwise. The server
/// stops when `handle` is told to shut down.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    addr: SocketAddr,
    tls: Option<TlsPaths>,
    handle: Handle,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state);

    match tls {
        Some(paths) => {
            let config = RustlsConfig::from_pem_file(paths.cert_path, paths.key_path)
                .await
                .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

            info!(port = addr.port(), "Webhook server listening with TLS");
            axum_server::bind_rustls(addr, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            warn!(port = addr.port(), "Webhook server listening without TLS");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    Ok(())
}
