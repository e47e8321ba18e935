//! ImagePolicyWebhook backend.
//!
//! The kube-apiserver `ImagePolicyWebhook` admission plugin posts an
//! `imagepolicy.k8s.io/v1alpha1` `ImageReview` listing a pod's container
//! images. The same object is returned with `status` filled in.
//!
//! Note: the apiserver only forwards pod annotations matching
//! `*.image-policy.k8s.io/*`, so break-glass keys used with this endpoint
//! must follow that pattern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::image::ContainerImage;
use crate::policy::{Decision, Policy, evaluate};
use crate::webhooks::response::BREAK_GLASS_AUDIT_KEY;

/// API version of ImageReview objects
pub const IMAGE_REVIEW_API_VERSION: &str = "imagepolicy.k8s.io/v1alpha1";
/// Kind of ImageReview objects
pub const IMAGE_REVIEW_KIND: &str = "ImageReview";

fn default_api_version() -> String {
    IMAGE_REVIEW_API_VERSION.to_string()
}

fn default_kind() -> String {
    IMAGE_REVIEW_KIND.to_string()
}

/// An ImageReview request or response
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub spec: ImageReviewSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ImageReviewStatus>,
}

/// Images and context of the pod under review
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReviewSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ImageReviewContainerSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// One container image
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ImageReviewContainerSpec {
    #[serde(default)]
    pub image: String,
}

/// Verdict returned to the apiserver
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReviewStatus {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub audit_annotations: BTreeMap<String, String>,
}

impl ImageReview {
    /// Images in the review, in the order they were listed
    pub fn container_images(&self) -> Vec<ContainerImage> {
        self.spec
            .containers
            .iter()
            .enumerate()
            .map(|(i, container)| {
                ContainerImage::new(format!("container-{}", i), container.image.as_str())
            })
            .collect()
    }

    /// Fill in `status` from a decision
    pub fn with_decision(mut self, decision: &Decision) -> Self {
        let audit_annotations = decision
            .break_glass_key
            .iter()
            .map(|key| (BREAK_GLASS_AUDIT_KEY.to_string(), key.clone()))
            .collect();

        self.status = Some(ImageReviewStatus {
            allowed: decision.allowed,
            reason: decision.reason.clone(),
            audit_annotations,
        });
        self
    }
}

/// Decode an ImageReview body, evaluate it and return the answered review.
pub fn review_images(
    body: &[u8],
    policy: &Policy,
) -> Result<(ImageReview, Decision), serde_json::Error> {
    let review: ImageReview = serde_json::from_slice(body)?;
    let decision = evaluate(&review.container_images(), &review.spec.annotations, policy);
    Ok((review.with_decision(&decision), decision))
}
