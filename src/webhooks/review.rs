//! AdmissionReview request decoding.
//!
//! Decoding happens in two independent steps. The envelope is decoded
//! first into kube's `AdmissionReview<DynamicObject>`, so the request
//! `uid` is known before the pod itself is touched. The pod is then parsed
//! out of the dynamic object; a malformed pod yields an error that still
//! carries the request, allowing a correlated denial.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview, META_API_VERSION_V1};
use kube::core::dynamic::ParseDynamicObjectError;
use serde::Deserialize;
use thiserror::Error;

use crate::image::ContainerImage;

/// API version assumed when the envelope does not state one
pub const ADMISSION_API_VERSION: &str = META_API_VERSION_V1;

const POD_KIND: &str = "Pod";

/// Errors that can occur while decoding an admission request
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The body is not an AdmissionReview and carries no recoverable uid
    #[error("Malformed AdmissionReview: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The envelope has no `request`
    #[error("AdmissionReview has no request")]
    MissingRequest,

    /// The request has an empty `uid`
    #[error("AdmissionReview request has no uid")]
    MissingUid,

    /// The envelope is malformed but its uid could still be read
    #[error("Malformed AdmissionReview request {uid}: {source}")]
    InvalidRequest {
        uid: String,
        api_version: String,
        #[source]
        source: serde_json::Error,
    },

    /// The embedded object is not a valid pod
    #[error("Request {} object is not a valid Pod: {source}", .request.uid)]
    InvalidObject {
        request: Box<AdmissionRequest<DynamicObject>>,
        #[source]
        source: ParseDynamicObjectError,
    },

    /// The embedded pod has no spec
    #[error("Request {} Pod has no spec", .request.uid)]
    MissingPodSpec {
        request: Box<AdmissionRequest<DynamicObject>>,
    },

    /// The request is for something other than a pod
    #[error("Request {} has unsupported kind {}", .request.uid, .request.kind.kind)]
    UnsupportedKind {
        request: Box<AdmissionRequest<DynamicObject>>,
    },
}

impl DecodeError {
    /// The request uid, when it could be recovered
    pub fn uid(&self) -> Option<&str> {
        match self {
            DecodeError::Envelope(_)
            | DecodeError::MissingRequest
            | DecodeError::MissingUid => None,
            DecodeError::InvalidRequest { uid, .. } => Some(uid.as_str()),
            DecodeError::InvalidObject { request, .. }
            | DecodeError::MissingPodSpec { request }
            | DecodeError::UnsupportedKind { request } => Some(request.uid.as_str()),
        }
    }

    /// The decoded envelope, when the failure came after step one
    pub fn request(&self) -> Option<&AdmissionRequest<DynamicObject>> {
        match self {
            DecodeError::InvalidObject { request, .. }
            | DecodeError::MissingPodSpec { request }
            | DecodeError::UnsupportedKind { request } => Some(request.as_ref()),
            _ => None,
        }
    }
}

/// Decoded admission request for a pod
#[derive(Debug)]
pub struct PodRequest {
    /// The request as kube decoded it, object still dynamic
    pub request: AdmissionRequest<DynamicObject>,
    /// Pod annotations; empty when the pod has none
    pub annotations: BTreeMap<String, String>,
    /// The decoded pod, absent when the request carries no object
    pub pod: Option<Pod>,
}

impl PodRequest {
    /// Correlation token copied into the response
    pub fn uid(&self) -> &str {
        &self.request.uid
    }

    /// Images of every container in the pod, in evaluation order:
    /// init containers, then regular containers, then ephemeral containers.
    pub fn container_images(&self) -> Vec<ContainerImage> {
        let Some(spec) = self.pod.as_ref().and_then(|pod| pod.spec.as_ref()) else {
            return Vec::new();
        };

        let init = spec.init_containers.iter().flatten().map(|c| (&c.name, &c.image));
        let regular = spec.containers.iter().map(|c| (&c.name, &c.image));
        let ephemeral = spec
            .ephemeral_containers
            .iter()
            .flatten()
            .map(|c| (&c.name, &c.image));

        init.chain(regular)
            .chain(ephemeral)
            .map(|(name, image)| {
                ContainerImage::new(name.as_str(), image.clone().unwrap_or_default())
            })
            .collect()
    }
}

/// Minimal view used to recover the uid from an otherwise malformed envelope
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialReview {
    api_version: Option<String>,
    request: Option<PartialRequest>,
}

#[derive(Deserialize)]
struct PartialRequest {
    uid: Option<String>,
}

fn recover_uid(body: &[u8], source: serde_json::Error) -> DecodeError {
    let Ok(partial) = serde_json::from_slice::<PartialReview>(body) else {
        return DecodeError::Envelope(source);
    };
    match partial.request.and_then(|r| r.uid).filter(|uid| !uid.is_empty()) {
        Some(uid) => DecodeError::InvalidRequest {
            uid,
            api_version: partial
                .api_version
                .unwrap_or_else(|| ADMISSION_API_VERSION.to_string()),
            source,
        },
        None => DecodeError::Envelope(source),
    }
}

/// Decode a raw AdmissionReview body.
pub fn decode(body: &[u8]) -> Result<PodRequest, DecodeError> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|source| recover_uid(body, source))?;

    let request: AdmissionRequest<DynamicObject> = review
        .try_into()
        .map_err(|_| DecodeError::MissingRequest)?;
    if request.uid.is_empty() {
        return Err(DecodeError::MissingUid);
    }

    if request.kind.kind != POD_KIND {
        return Err(DecodeError::UnsupportedKind {
            request: Box::new(request),
        });
    }

    let pod = match request.object.clone() {
        Some(object) => match decode_pod(object) {
            Ok(pod) => Some(pod),
            Err(PodError::Parse(source)) => {
                return Err(DecodeError::InvalidObject {
                    request: Box::new(request),
                    source,
                });
            }
            Err(PodError::MissingSpec) => {
                return Err(DecodeError::MissingPodSpec {
                    request: Box::new(request),
                });
            }
        },
        None => None,
    };

    let annotations = pod
        .as_ref()
        .and_then(|pod| pod.metadata.annotations.clone())
        .unwrap_or_default();

    Ok(PodRequest {
        request,
        annotations,
        pod,
    })
}

enum PodError {
    Parse(ParseDynamicObjectError),
    MissingSpec,
}

/// Second decode step: the dynamic object as a pod
fn decode_pod(object: DynamicObject) -> Result<Pod, PodError> {
    let pod: Pod = object.try_parse().map_err(PodError::Parse)?;
    if pod.spec.is_none() {
        return Err(PodError::MissingSpec);
    }
    Ok(pod)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use kube::core::admission::Operation;
    use serde_json::json;

    const UID: &str = "705ab4f5-6393-11e8-b7cc-42010a800002";

    fn review_for(kind: serde_json::Value, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": UID,
                "kind": kind,
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "operation": "CREATE",
                "namespace": "default",
                "name": "web",
                "userInfo": {"username": "admin"},
                "object": object,
            }
        }))
        .unwrap()
    }

    fn review(object: serde_json::Value) -> Vec<u8> {
        review_for(json!({"group": "", "version": "v1", "kind": "Pod"}), object)
    }

    fn pod(annotations: Option<serde_json::Value>) -> serde_json::Value {
        let mut metadata = json!({"name": "web"});
        if let Some(annotations) = annotations {
            metadata["annotations"] = annotations;
        }
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": metadata,
            "spec": {
                "initContainers": [{"name": "init", "image": "busybox"}],
                "containers": [
                    {"name": "web", "image": "nginx:1.21"},
                    {"name": "sidecar", "image": "ghcr.io/org/proxy@sha256:deadbeef"}
                ]
            }
        })
    }

    #[test]
    fn test_decode_valid_request() {
        let decoded = decode(&review(pod(Some(json!({"team": "web"}))))).unwrap();
        assert_eq!(decoded.uid(), UID);
        assert_eq!(decoded.request.types.api_version, "admission.k8s.io/v1");
        assert_eq!(decoded.request.kind.kind, "Pod");
        assert_eq!(decoded.request.operation, Operation::Create);
        assert_eq!(decoded.request.namespace.as_deref(), Some("default"));
        assert_eq!(decoded.annotations.get("team").map(String::as_str), Some("web"));
        assert!(decoded.request.object.is_some());
    }

    #[test]
    fn test_annotations_default_to_empty() {
        let decoded = decode(&review(pod(None))).unwrap();
        assert!(decoded.annotations.is_empty());
    }

    #[test]
    fn test_container_images_in_order() {
        let decoded = decode(&review(pod(None))).unwrap();
        let images: Vec<String> = decoded
            .container_images()
            .into_iter()
            .map(|image| image.image)
            .collect();
        assert_eq!(
            images,
            vec!["busybox", "nginx:1.21", "ghcr.io/org/proxy@sha256:deadbeef"]
        );
    }

    #[test]
    fn test_missing_image_becomes_parse_error() {
        let decoded = decode(&review(json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [{"name": "web"}]}
        })))
        .unwrap();
        let images = decoded.container_images();
        assert_eq!(images.len(), 1);
        assert!(images[0].reference.is_err());
    }

    #[test]
    fn test_malformed_pod_keeps_request() {
        let err = decode(&review(json!({"spec": {"containers": "not-a-list"}}))).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidObject { .. }));
        assert_eq!(err.uid(), Some(UID));
        assert_eq!(err.request().unwrap().name, "web");
    }

    #[test]
    fn test_malformed_metadata_keeps_uid() {
        let err = decode(&review(json!({
            "metadata": {"annotations": ["not", "a", "map"]},
            "spec": {"containers": []}
        })))
        .unwrap_err();
        assert_eq!(err.uid(), Some(UID));
    }

    #[test]
    fn test_pod_without_spec_is_rejected() {
        let err = decode(&review(json!({"metadata": {"name": "web"}}))).unwrap_err();
        assert!(matches!(err, DecodeError::MissingPodSpec { .. }));
        assert!(err.request().is_some());
    }

    #[test]
    fn test_null_object_decodes_without_pod() {
        let decoded = decode(&review(serde_json::Value::Null)).unwrap();
        assert!(decoded.pod.is_none());
        assert!(decoded.container_images().is_empty());
    }

    #[test]
    fn test_unsupported_kind() {
        let body = review_for(
            json!({"group": "apps", "version": "v1", "kind": "Deployment"}),
            json!({}),
        );
        let err = decode(&body).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedKind { .. }));
        assert_eq!(err.uid(), Some(UID));
        assert!(err.to_string().contains("Deployment"));
    }

    #[test]
    fn test_malformed_envelope_recovers_uid() {
        let body = br#"{
            "apiVersion": "admission.k8s.io/v1beta1",
            "request": {"uid": "abc", "kind": "Pod", "operation": "CREATE"}
        }"#;
        let err = decode(body).unwrap_err();
        let DecodeError::InvalidRequest { uid, api_version, .. } = &err else {
            panic!("expected InvalidRequest, got {:?}", err);
        };
        assert_eq!(uid, "abc");
        assert_eq!(api_version, "admission.k8s.io/v1beta1");
        assert!(err.request().is_none());
    }

    #[test]
    fn test_uncorrelated_errors() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Envelope(_))));
        assert!(matches!(
            decode(br#"{"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"}"#),
            Err(DecodeError::MissingRequest)
        ));
        let missing_uid = br#"{"request": {
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "operation": "CREATE"
        }}"#;
        assert!(matches!(decode(missing_uid), Err(DecodeError::Envelope(_))));

        let empty_uid = serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "operation": "CREATE",
                "userInfo": {}
            }
        }))
        .unwrap();
        let err = decode(&empty_uid).unwrap_err();
        assert!(matches!(err, DecodeError::MissingUid));
        assert_eq!(err.uid(), None);
    }
}
