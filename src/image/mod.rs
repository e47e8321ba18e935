//! Container image references.
//!
//! Turns the raw `image` strings found in a pod spec into structured
//! references so policy checks never have to slice strings themselves.

mod reference;

pub use reference::{
    DEFAULT_NAMESPACE, DEFAULT_REGISTRY, DEFAULT_TAG, ImageReference, ParseError, parse,
};

/// An image as declared by one container of a pod, together with the
/// outcome of parsing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImage {
    /// Name of the declaring container
    pub container: String,
    /// The image string exactly as written in the pod spec
    pub image: String,
    /// Parsed reference, or why the string is not a valid image reference
    pub reference: Result<ImageReference, ParseError>,
}

impl ContainerImage {
    /// Parse the image declared by `container`.
    pub fn new(container: impl Into<String>, image: impl Into<String>) -> Self {
        let image = image.into();
        let reference = parse(&image);
        Self {
            container: container.into(),
            image,
            reference,
        }
    }
}
