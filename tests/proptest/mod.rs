// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for image-policy-webhook.
//!
//! Uses proptest to generate random inputs and verify invariants.

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;

use common::fixtures::{BREAK_GLASS_KEY, PodReviewBuilder, test_policy};
use image_policy_webhook::webhooks::{Outcome, review_admission};
use image_policy_webhook::{ContainerImage, ImageReference, evaluate};

/// Strategy for a valid path component.
fn path_component() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,8}([._-][a-z0-9]{1,8})?"
}

/// Strategy for a valid tag.
fn tag() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_][A-Za-z0-9_.-]{0,20}"
}

/// Strategy for registries, allowed and not.
fn registry() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("docker.io".to_string()),
        Just("ghcr.io".to_string()),
        Just("quay.io".to_string()),
        Just("registry.example.com:5000".to_string()),
        Just("localhost:5000".to_string()),
    ]
}

/// Strategy for fully qualified image references.
fn qualified_image() -> impl Strategy<Value = String> {
    (registry(), path_component(), path_component(), tag())
        .prop_map(|(registry, namespace, repository, tag)| {
            format!("{}/{}/{}:{}", registry, namespace, repository, tag)
        })
}

/// Strategy for request uids.
fn uid() -> impl Strategy<Value = String> {
    "[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}"
}

fn images(references: &[String]) -> Vec<ContainerImage> {
    references
        .iter()
        .enumerate()
        .map(|(i, image)| ContainerImage::new(format!("c{}", i), image.as_str()))
        .collect()
}

proptest! {
    /// Parsing never panics, whatever the input
    #[test]
    fn parse_never_panics(image in ".{0,64}") {
        let _ = ImageReference::parse(&image);
    }

    /// Official image shorthand names the same repository as its explicit form
    #[test]
    fn shorthand_matches_explicit_form(repository in path_component(), tag in tag()) {
        let short = ImageReference::parse(&format!("{}:{}", repository, tag)).unwrap();
        let explicit =
            ImageReference::parse(&format!("docker.io/library/{}:{}", repository, tag)).unwrap();
        prop_assert_eq!(short, explicit);
    }

    /// A parsed reference always carries exactly one of tag or digest
    #[test]
    fn parsed_reference_has_tag_xor_digest(image in qualified_image()) {
        let reference = ImageReference::parse(&image).unwrap();
        prop_assert!(reference.tag.is_some() != reference.digest.is_some());
    }

    /// Evaluation is deterministic for the same inputs
    #[test]
    fn evaluate_is_deterministic(references in prop::collection::vec(qualified_image(), 0..6)) {
        let policy = test_policy();
        let images = images(&references);
        let annotations = BTreeMap::new();
        prop_assert_eq!(
            evaluate(&images, &annotations, &policy),
            evaluate(&images, &annotations, &policy)
        );
    }

    /// A denial names the first image that fails the policy
    #[test]
    fn denial_cites_first_rejected_image(
        references in prop::collection::vec(qualified_image(), 1..6)
    ) {
        let policy = test_policy();
        let decision = evaluate(&images(&references), &BTreeMap::new(), &policy);

        let first_rejected = references.iter().find(|image| {
            !ImageReference::parse(image).is_ok_and(|reference| policy.permits(&reference))
        });
        match first_rejected {
            Some(image) => {
                prop_assert!(!decision.allowed);
                prop_assert!(decision.reason.contains(image.as_str()));
            }
            None => prop_assert!(decision.allowed),
        }
    }

    /// A configured break-glass annotation admits any set of images
    #[test]
    fn break_glass_always_allows(
        references in prop::collection::vec(".{0,32}", 0..6),
        value in ".{0,16}",
    ) {
        let annotations = BTreeMap::from([(BREAK_GLASS_KEY.to_string(), value)]);
        let decision = evaluate(&images(&references), &annotations, &test_policy());
        prop_assert!(decision.allowed);
        prop_assert_eq!(decision.break_glass_key.as_deref(), Some(BREAK_GLASS_KEY));
    }

    /// Every decodable request is answered with its own uid
    #[test]
    fn response_uid_matches_request(
        uid in uid(),
        references in prop::collection::vec(qualified_image(), 0..4),
    ) {
        let body = references
            .iter()
            .enumerate()
            .fold(PodReviewBuilder::new(uid.clone()), |builder, (i, image)| {
                builder.container(format!("c{}", i), image.as_str())
            })
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        prop_assert_eq!(&result.response.uid, &uid);
        prop_assert_eq!(
            result.response.allowed,
            matches!(result.outcome, Outcome::Allowed | Outcome::BreakGlass)
        );
    }

    /// Arbitrary bodies never panic and never produce an allowing review
    #[test]
    fn arbitrary_body_is_never_allowed(body in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(result) = review_admission(&body, &test_policy()) {
            prop_assert!(!result.response.allowed);
        }
    }
}
