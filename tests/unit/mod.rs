// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for image-policy-webhook.
//!
//! These tests run without a Kubernetes cluster and drive whole requests
//! through the public library API.

#[path = "../common/mod.rs"]
mod common;

mod admission_tests {
    use super::common::fixtures::{
        BREAK_GLASS_KEY, PodReviewBuilder, review_body, repository_policy, test_policy,
    };
    use image_policy_webhook::webhooks::response::BREAK_GLASS_AUDIT_KEY;
    use image_policy_webhook::webhooks::{Outcome, review_admission};
    use serde_json::json;

    #[test]
    fn test_allowed_pod() {
        let body = PodReviewBuilder::new("uid-allowed")
            .container("web", "nginx:1.21")
            .container("sidecar", "ghcr.io/org/proxy@sha256:abcdef0123456789")
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Allowed);
        assert_eq!(result.response.uid, "uid-allowed");
        assert!(result.response.allowed);
        assert!(result.response.result.message.is_empty());
        let review = result.response.into_review();
        assert_eq!(review.types.kind, "AdmissionReview");
        assert_eq!(review.types.api_version, "admission.k8s.io/v1");
    }

    #[test]
    fn test_denied_pod_cites_first_bad_image() {
        let body = PodReviewBuilder::new("uid-denied")
            .container("web", "nginx")
            .container("bad", "quay.io/evil/miner:1.0")
            .container("worse", "registry.example.com/other")
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Denied);
        let response = &result.response;
        assert_eq!(response.uid, "uid-denied");
        assert!(!response.allowed);
        assert_eq!(response.result.code, 403);
        assert!(response.result.message.contains("quay.io/evil/miner:1.0"));
        assert!(!response.result.message.contains("registry.example.com"));
    }

    #[test]
    fn test_init_container_is_evaluated_first() {
        let body = PodReviewBuilder::new("uid-init")
            .init_container("setup", "quay.io/tools/setup")
            .container("web", "quay.io/app/web")
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Denied);
        assert!(result.response.result.message.contains("quay.io/tools/setup"));
    }

    #[test]
    fn test_invalid_image_denied() {
        let body = PodReviewBuilder::new("uid-invalid-image")
            .container("web", "NGINX:latest")
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Denied);
        assert!(
            result
                .response
                .result
                .message
                .contains("not a valid image reference")
        );
    }

    #[test]
    fn test_repository_allow_list() {
        let policy = repository_policy(&["docker.io/library/nginx"]);

        let allowed = PodReviewBuilder::new("uid-1")
            .container("web", "docker.io/library/nginx:1.25")
            .build();
        assert_eq!(
            review_admission(&allowed, &policy).unwrap().outcome,
            Outcome::Allowed
        );

        let denied = PodReviewBuilder::new("uid-2")
            .container("cache", "redis:7")
            .build();
        assert_eq!(
            review_admission(&denied, &policy).unwrap().outcome,
            Outcome::Denied
        );
    }

    #[test]
    fn test_break_glass_admits_and_audits() {
        let body = PodReviewBuilder::new("uid-break-glass")
            .container("debug", "quay.io/debug/toolbox")
            .annotation(BREAK_GLASS_KEY, "INC-1234")
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::BreakGlass);
        assert_eq!(result.break_glass_key.as_deref(), Some(BREAK_GLASS_KEY));
        let response = &result.response;
        assert!(response.allowed);
        assert_eq!(
            response.audit_annotations.get(BREAK_GLASS_AUDIT_KEY).map(String::as_str),
            Some(BREAK_GLASS_KEY)
        );
    }

    #[test]
    fn test_unknown_annotation_is_not_break_glass() {
        let body = PodReviewBuilder::new("uid-annotation")
            .container("debug", "quay.io/debug/toolbox")
            .annotation("break-glass", "true")
            .build();

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Denied);
        assert!(result.break_glass_key.is_none());
    }

    #[test]
    fn test_delete_is_allowed() {
        let body = review_body("uid-delete", "DELETE", "default", serde_json::Value::Null);

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Allowed);
        assert_eq!(result.response.uid, "uid-delete");
    }

    #[test]
    fn test_missing_object_is_invalid() {
        let body = review_body("uid-missing", "CREATE", "default", serde_json::Value::Null);

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Invalid);
        let response = &result.response;
        assert_eq!(response.uid, "uid-missing");
        assert!(!response.allowed);
        assert_eq!(response.result.code, 400);
    }

    #[test]
    fn test_malformed_pod_is_correlated() {
        let object = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "broken"},
            "spec": {"containers": "not-a-list"}
        });
        let body = review_body("uid-malformed", "CREATE", "default", object);

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Invalid);
        assert_eq!(result.response.uid, "uid-malformed");
        assert!(
            result
                .response
                .result
                .message
                .starts_with("[InvalidRequest]")
        );
    }

    #[test]
    fn test_pod_without_spec_is_invalid() {
        let object = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "bare"}});
        let body = review_body("uid-no-spec", "CREATE", "default", object);

        let result = review_admission(&body, &test_policy()).unwrap();
        assert_eq!(result.outcome, Outcome::Invalid);
        assert_eq!(result.response.uid, "uid-no-spec");
    }

    #[test]
    fn test_uncorrelated_requests_fail() {
        for body in [
            b"".as_slice(),
            b"not json".as_slice(),
            br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview"}"#.as_slice(),
            br#"{"request":{"operation":"CREATE"}}"#.as_slice(),
        ] {
            assert!(review_admission(body, &test_policy()).is_err());
        }
    }

    #[test]
    fn test_response_serializes_for_api_server() {
        let body = PodReviewBuilder::new("uid-wire")
            .container("bad", "quay.io/evil/miner")
            .build();
        let result = review_admission(&body, &test_policy()).unwrap();

        let value = serde_json::to_value(result.response.into_review()).unwrap();
        assert_eq!(value["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(value["kind"], "AdmissionReview");
        assert_eq!(value["response"]["uid"], "uid-wire");
        assert_eq!(value["response"]["allowed"], false);
        assert_eq!(value["response"]["status"]["code"], 403);
    }
}

mod image_review_tests {
    use super::common::fixtures::{BREAK_GLASS_KEY, test_policy};
    use image_policy_webhook::webhooks::review_images;
    use serde_json::json;

    fn image_review(images: &[&str], annotations: serde_json::Value) -> Vec<u8> {
        let containers: Vec<_> = images.iter().map(|image| json!({"image": image})).collect();
        serde_json::to_vec(&json!({
            "apiVersion": "imagepolicy.k8s.io/v1alpha1",
            "kind": "ImageReview",
            "spec": {
                "containers": containers,
                "annotations": annotations,
                "namespace": "payments"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_image_review_allowed() {
        let body = image_review(&["nginx", "ghcr.io/org/app:v2"], json!({}));
        let (review, decision) = review_images(&body, &test_policy()).unwrap();
        assert!(decision.allowed);
        assert!(review.status.unwrap().allowed);
    }

    #[test]
    fn test_image_review_denied() {
        let body = image_review(&["quay.io/evil/miner"], json!({}));
        let (review, decision) = review_images(&body, &test_policy()).unwrap();
        assert!(!decision.allowed);
        let status = review.status.unwrap();
        assert!(!status.allowed);
        assert!(status.reason.contains("quay.io/evil/miner"));
    }

    #[test]
    fn test_image_review_break_glass() {
        let body = image_review(
            &["quay.io/evil/miner"],
            json!({"break-glass.image-policy.k8s.io/override": "true"}),
        );
        let (review, decision) = review_images(&body, &test_policy()).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.break_glass_key.as_deref(), Some(BREAK_GLASS_KEY));
        assert!(!review.status.unwrap().audit_annotations.is_empty());
    }

    #[test]
    fn test_image_review_rejects_garbage() {
        assert!(review_images(b"{", &test_policy()).is_err());
    }
}

mod policy_store_tests {
    use super::common::fixtures::{PodReviewBuilder, test_policy};
    use image_policy_webhook::webhooks::{Outcome, review_admission};
    use image_policy_webhook::{Policy, PolicyStore};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_published_policy_applies_to_next_request() {
        let store = PolicyStore::new(test_policy());
        let body = PodReviewBuilder::new("uid-reload")
            .container("web", "quay.io/app/web")
            .build();

        let before = store.snapshot().await;
        assert_eq!(
            review_admission(&body, &before).unwrap().outcome,
            Outcome::Denied
        );

        let generation = store
            .publish(Policy {
                allowed_registries: BTreeSet::from(["quay.io".to_string()]),
                ..Policy::default()
            })
            .await;
        assert_eq!(generation, 1);

        let after = store.snapshot().await;
        assert_eq!(
            review_admission(&body, &after).unwrap().outcome,
            Outcome::Allowed
        );
        // A snapshot taken earlier is unaffected
        assert_eq!(
            review_admission(&body, &before).unwrap().outcome,
            Outcome::Denied
        );
    }
}
