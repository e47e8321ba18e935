//! Policy evaluation.
//!
//! Checks run in two tiers:
//! - Tier 1 (Override): a break-glass annotation allows the pod outright
//! - Tier 2 (Images): every image, in declaration order, must satisfy the
//!   allow-lists; the first failure is reported

use std::collections::BTreeMap;

use super::Policy;
use crate::image::ContainerImage;

/// Reason attached to decisions allowed through a break-glass annotation
pub const BREAK_GLASS_REASON: &str = "break-glass override";

/// Result of evaluating a pod's images against a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the pod is admitted
    pub allowed: bool,
    /// Why the pod was denied, or why an override applied; empty otherwise
    pub reason: String,
    /// Annotation key that triggered a break-glass override
    pub break_glass_key: Option<String>,
}

impl Decision {
    /// Create an allowed decision
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            break_glass_key: None,
        }
    }

    /// Create a denied decision
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            break_glass_key: None,
        }
    }

    /// Create a decision allowed by a break-glass annotation
    pub fn break_glass(key: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: BREAK_GLASS_REASON.to_string(),
            break_glass_key: Some(key.into()),
        }
    }
}

/// Evaluate `images` against `policy`.
///
/// Stops at the first image that fails to parse or is not allowed and cites
/// that image's original string. A pod with no images is allowed.
pub fn evaluate(
    images: &[ContainerImage],
    annotations: &BTreeMap<String, String>,
    policy: &Policy,
) -> Decision {
    if let Some(key) = policy.break_glass_key(annotations) {
        return Decision::break_glass(key);
    }

    for image in images {
        match &image.reference {
            Ok(reference) if policy.permits(reference) => continue,
            Ok(_) => {
                return Decision::denied(format!(
                    "image {} is not permitted by policy",
                    image.image
                ));
            }
            Err(e) => {
                return Decision::denied(format!(
                    "image {} is not a valid image reference: {}",
                    image.image, e
                ));
            }
        }
    }

    Decision::allowed()
}
