//! AdmissionReview response building.
//!
//! Responses start from kube's `AdmissionResponse`, which copies the uid
//! and API version from the request being answered.

use kube::Resource;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};

use crate::policy::Decision;

/// Audit annotation recording which break-glass key admitted a pod
pub const BREAK_GLASS_AUDIT_KEY: &str = "break-glass-key";

/// HTTP-style code attached to policy denials
const CODE_FORBIDDEN: u16 = 403;
/// HTTP-style code attached to undecodable requests
const CODE_BAD_REQUEST: u16 = 400;

const REASON_FORBIDDEN: &str = "Forbidden";
const REASON_INVALID: &str = "InvalidRequest";

/// Build the response to `request` from a policy decision.
///
/// Denials carry code 403 and the decision reason. A break-glass
/// admission carries its reason and records the key as an audit
/// annotation.
pub fn build<T: Resource>(
    request: &AdmissionRequest<T>,
    decision: &Decision,
) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request);

    if decision.allowed {
        response.result.message = decision.reason.clone();
    } else {
        response = response.deny(&decision.reason);
        response.result.code = CODE_FORBIDDEN;
        response.result.reason = REASON_FORBIDDEN.to_string();
    }

    if let Some(key) = &decision.break_glass_key {
        response
            .audit_annotations
            .insert(BREAK_GLASS_AUDIT_KEY.to_string(), key.clone());
    }
    response
}

/// Denial for a decoded request whose object could not be used
pub fn reject<T: Resource>(request: &AdmissionRequest<T>, message: &str) -> AdmissionResponse {
    let mut response =
        AdmissionResponse::from(request).deny(format!("[{}] {}", REASON_INVALID, message));
    response.result.code = CODE_BAD_REQUEST;
    response.result.reason = REASON_INVALID.to_string();
    response
}

/// Denial for a request that only yielded its uid and API version
pub fn invalid(uid: &str, api_version: &str, message: &str) -> AdmissionResponse {
    let mut response = AdmissionResponse::invalid(format!("[{}] {}", REASON_INVALID, message));
    response.uid = uid.to_string();
    response.types.api_version = api_version.to_string();
    response.result.code = CODE_BAD_REQUEST;
    response
}
