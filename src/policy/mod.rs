//! Image admission policy.
//!
//! A [`Policy`] is immutable configuration: the registries (and optionally
//! the exact repositories) pods may pull from, plus the annotation keys
//! that act as a break-glass override. Evaluation is a pure function of
//! the pod's images, its annotations and a policy snapshot.

mod evaluator;
pub mod store;

pub use evaluator::{BREAK_GLASS_REASON, Decision, evaluate};
pub use store::PolicyStore;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::image::ImageReference;

/// Registry and repository allow-lists plus break-glass annotation keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Registries images may be pulled from (e.g. `docker.io`, `ghcr.io`)
    #[serde(default)]
    pub allowed_registries: BTreeSet<String>,

    /// When set, only these `registry/namespace/repository` keys are allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_repositories: Option<BTreeSet<String>>,

    /// Annotation keys whose presence on a pod bypasses image checks
    #[serde(default)]
    pub break_glass_annotation_keys: BTreeSet<String>,
}

impl Policy {
    /// Lowercase registry hosts and repository keys, matching how parsed
    /// references are normalized.
    pub fn normalized(self) -> Self {
        let lowercase = |set: BTreeSet<String>| -> BTreeSet<String> {
            set.into_iter().map(|entry| entry.to_ascii_lowercase()).collect()
        };
        Self {
            allowed_registries: lowercase(self.allowed_registries),
            allowed_repositories: self.allowed_repositories.map(lowercase),
            break_glass_annotation_keys: self.break_glass_annotation_keys,
        }
    }

    /// Whether a single parsed reference satisfies the allow-lists.
    pub fn permits(&self, reference: &ImageReference) -> bool {
        if !self.allowed_registries.contains(&reference.registry) {
            return false;
        }
        match &self.allowed_repositories {
            Some(repositories) => repositories.contains(&reference.policy_key()),
            None => true,
        }
    }

    /// The first break-glass key present in `annotations`, if any.
    pub fn break_glass_key<'a>(
        &self,
        annotations: &'a BTreeMap<String, String>,
    ) -> Option<&'a str> {
        annotations
            .keys()
            .find(|key| self.break_glass_annotation_keys.contains(*key))
            .map(String::as_str)
    }
}
