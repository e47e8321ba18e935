//! Pod admission review.
//!
//! Runs one request through decode, evaluate and build. Every path that
//! knows the request uid produces a correlated AdmissionReview; only a
//! request whose uid cannot be read at all fails with
//! [`UncorrelatedError`].

use kube::core::admission::{AdmissionResponse, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::policy::{Decision, Policy, evaluate};
use crate::webhooks::response::{build, invalid, reject};
use crate::webhooks::review::{DecodeError, decode};

/// A request that cannot be answered with a correlated response
#[derive(Error, Debug)]
#[error("Admission request cannot be correlated: {0}")]
pub struct UncorrelatedError(#[from] pub DecodeError);

/// How a request was answered, for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// All images satisfied the policy
    Allowed,
    /// Admitted through a break-glass annotation
    BreakGlass,
    /// An image violated the policy
    Denied,
    /// The request could not be decoded; denied
    Invalid,
    /// The request could not be correlated; no review produced
    Uncorrelated,
}

impl Outcome {
    /// Metric label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::BreakGlass => "break_glass",
            Outcome::Denied => "denied",
            Outcome::Invalid => "invalid",
            Outcome::Uncorrelated => "uncorrelated",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The answered request plus how it was decided
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    /// Response correlated with the request; wrap with `into_review()`
    pub response: AdmissionResponse,
    pub outcome: Outcome,
    /// Break-glass key that admitted the pod, if any
    pub break_glass_key: Option<String>,
}

impl AdmissionOutcome {
    fn decided(response: AdmissionResponse, decision: &Decision) -> Self {
        let outcome = match (decision.allowed, &decision.break_glass_key) {
            (true, Some(_)) => Outcome::BreakGlass,
            (true, None) => Outcome::Allowed,
            (false, _) => Outcome::Denied,
        };
        Self {
            response,
            outcome,
            break_glass_key: decision.break_glass_key.clone(),
        }
    }

    fn invalid(response: AdmissionResponse) -> Self {
        Self {
            response,
            outcome: Outcome::Invalid,
            break_glass_key: None,
        }
    }
}

/// Review a raw AdmissionReview body against `policy`.
pub fn review_admission(
    body: &[u8],
    policy: &Policy,
) -> Result<AdmissionOutcome, UncorrelatedError> {
    let decoded = match decode(body) {
        Ok(decoded) => decoded,
        Err(e) => {
            let response = if let DecodeError::InvalidRequest {
                uid, api_version, ..
            } = &e
            {
                invalid(uid, api_version, &e.to_string())
            } else if let Some(request) = e.request() {
                reject(request, &e.to_string())
            } else {
                return Err(UncorrelatedError(e));
            };
            error!(uid = %response.uid, error = %e, "Failed to decode admission request");
            return Ok(AdmissionOutcome::invalid(response));
        }
    };

    let request = &decoded.request;
    let uid = decoded.uid();
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    // DELETE and CONNECT admit no new images
    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        info!(uid = %uid, operation = ?request.operation, "Admission request allowed");
        let decision = Decision::allowed();
        return Ok(AdmissionOutcome::decided(build(request, &decision), &decision));
    }

    if decoded.pod.is_none() {
        error!(uid = %uid, "Missing object in request");
        return Ok(AdmissionOutcome::invalid(reject(
            request,
            "Missing object in request",
        )));
    }

    let images = decoded.container_images();
    let decision = evaluate(&images, &decoded.annotations, policy);

    if let Some(key) = &decision.break_glass_key {
        warn!(
            uid = %uid,
            namespace = ?request.namespace,
            name = %request.name,
            key = %key,
            images = ?images.iter().map(|i| i.image.as_str()).collect::<Vec<_>>(),
            "Admission request allowed by break-glass annotation"
        );
    } else if decision.allowed {
        info!(uid = %uid, images = images.len(), "Admission request allowed");
    } else {
        warn!(
            uid = %uid,
            namespace = ?request.namespace,
            name = %request.name,
            reason = %decision.reason,
            "Admission request denied"
        );
    }

    Ok(AdmissionOutcome::decided(build(request, &decision), &decision))
}
