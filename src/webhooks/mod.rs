//! Webhook module for validating pod admission requests.
//!
//! The request path is split into leaf components:
//! - `review`: decodes the AdmissionReview envelope, then the embedded pod
//! - `admission`: evaluates the pod's images and picks the outcome
//! - `response`: builds the uid-correlated kube `AdmissionResponse`
//! - `image_review`: the ImagePolicyWebhook ImageReview variant
//! - `server`: axum routes, TLS and metrics recording

pub mod admission;
pub mod image_review;
pub mod response;
pub mod review;
mod server;

pub use admission::{AdmissionOutcome, Outcome, UncorrelatedError, review_admission};
pub use image_review::{ImageReview, review_images};
pub use response::{BREAK_GLASS_AUDIT_KEY, build, invalid, reject};
pub use review::{DecodeError, PodRequest, decode};
pub use server::{
    MAX_BODY_BYTES, TlsPaths, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError,
    WebhookState, create_webhook_router, run_webhook_server,
};
