//! image-policy-webhook library crate
//!
//! A validating admission webhook that admits pods only when every
//! container image comes from an allowed registry (and, optionally, an
//! allowed repository). This crate exports the image reference parser,
//! the policy evaluator, the AdmissionReview codec and the HTTP servers.

pub mod config;
pub mod health;
pub mod image;
pub mod policy;
pub mod webhooks;

pub use config::{Args, ConfigError, load_policy, reload_policy};
pub use health::{HealthState, Readiness};
pub use image::{ContainerImage, ImageReference, ParseError};
pub use policy::{Decision, Policy, PolicyStore, evaluate};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    review_admission, run_webhook_server,
};
