//! Image reference grammar.
//!
//! An image string is read right to left:
//! - everything after the last `@` is a digest (`algorithm:hex`)
//! - everything after the last `:` is a tag, unless it contains a `/`,
//!   in which case the colon belongs to a registry port (`localhost:5000/app`)
//! - the first `/`-separated segment is a registry host when it contains
//!   a `.` or `:` or is `localhost`; otherwise the image lives on Docker Hub
//!
//! Docker Hub images without a namespace live under `library`, and an image
//! with neither tag nor digest means `latest`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Registry assumed when an image does not name one
pub const DEFAULT_REGISTRY: &str = "docker.io";
/// Namespace of official Docker Hub images
pub const DEFAULT_NAMESPACE: &str = "library";
/// Tag assumed when an image carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Historical Docker Hub host, normalized to [`DEFAULT_REGISTRY`]
const LEGACY_DEFAULT_REGISTRY: &str = "index.docker.io";

/// Errors produced while parsing an image reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,

    #[error("image reference contains whitespace")]
    Whitespace,

    #[error("image reference has no repository name")]
    MissingName,

    #[error("invalid digest {0:?}, expected algorithm:hex")]
    InvalidDigest(String),

    #[error("invalid tag {0:?}")]
    InvalidTag(String),

    #[error("image reference has both tag {0:?} and a digest")]
    TagAndDigest(String),

    #[error("invalid registry host {0:?}")]
    InvalidRegistry(String),

    #[error("invalid path component {0:?}")]
    InvalidPathComponent(String),
}

/// A parsed container image reference.
///
/// After parsing, exactly one of `tag` or `digest` is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: String,
    pub namespace: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image string. See [`parse`].
    pub fn parse(image: &str) -> Result<Self, ParseError> {
        parse(image)
    }

    /// The `registry/namespace/repository` key matched against
    /// allow-listed repositories. Images without a namespace render as
    /// `registry/repository`.
    pub fn policy_key(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}/{}/{}", self.registry, namespace, self.repository),
            None => format!("{}/{}", self.registry, self.repository),
        }
    }

    /// Whether the reference pins content by digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

impl FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.policy_key())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Parse a raw image string into its canonical reference.
///
/// # Example
/// ```
/// use image_policy_webhook::image::parse;
///
/// let reference = parse("nginx").unwrap();
/// assert_eq!(reference.registry, "docker.io");
/// assert_eq!(reference.namespace.as_deref(), Some("library"));
/// assert_eq!(reference.repository, "nginx");
/// assert_eq!(reference.tag.as_deref(), Some("latest"));
/// ```
pub fn parse(image: &str) -> Result<ImageReference, ParseError> {
    if image.is_empty() {
        return Err(ParseError::Empty);
    }
    if image.chars().any(char::is_whitespace) {
        return Err(ParseError::Whitespace);
    }

    let (name_and_tag, digest) = match image.rsplit_once('@') {
        Some((name_and_tag, digest)) => {
            if !is_valid_digest(digest) {
                return Err(ParseError::InvalidDigest(digest.to_string()));
            }
            (name_and_tag, Some(digest))
        }
        None => (image, None),
    };

    let (name, tag) = match name_and_tag.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => {
            if !is_valid_tag(tag) {
                return Err(ParseError::InvalidTag(tag.to_string()));
            }
            (name, Some(tag))
        }
        _ => (name_and_tag, None),
    };

    if let (Some(tag), Some(_)) = (tag, digest) {
        return Err(ParseError::TagAndDigest(tag.to_string()));
    }

    if name.is_empty() {
        return Err(ParseError::MissingName);
    }

    let segments: Vec<&str> = name.split('/').collect();
    let (registry, path) = match segments.split_first() {
        Some((first, rest)) if !rest.is_empty() && is_registry_host(first) => {
            if !is_valid_registry(first) {
                return Err(ParseError::InvalidRegistry((*first).to_string()));
            }
            (normalize_registry(first), rest)
        }
        _ => (DEFAULT_REGISTRY.to_string(), segments.as_slice()),
    };

    if let Some(component) = path.iter().find(|c| !is_valid_path_component(c)) {
        return Err(ParseError::InvalidPathComponent((*component).to_string()));
    }

    let (repository, namespace) = match path.split_last() {
        Some((repository, [])) => (
            *repository,
            (registry == DEFAULT_REGISTRY).then(|| DEFAULT_NAMESPACE.to_string()),
        ),
        Some((repository, namespace)) => (*repository, Some(namespace.join("/"))),
        None => return Err(ParseError::MissingName),
    };

    // Neither tag nor digest means the implicit default tag
    let tag = match (tag, digest) {
        (None, None) => Some(DEFAULT_TAG.to_string()),
        (tag, _) => tag.map(str::to_string),
    };

    Ok(ImageReference {
        registry,
        namespace,
        repository: repository.to_string(),
        tag,
        digest: digest.map(str::to_string),
    })
}

/// First path segment names a registry rather than a Docker Hub namespace
fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment.eq_ignore_ascii_case("localhost")
}

/// Lowercase the host and fold `index.docker.io` into `docker.io`
fn normalize_registry(registry: &str) -> String {
    let host = registry.to_ascii_lowercase();
    if host == LEGACY_DEFAULT_REGISTRY {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}

/// Check a registry host with optional port
fn is_valid_registry(registry: &str) -> bool {
    // Pattern: host labels separated by dots, optional :port
    static REGISTRY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
        Regex::new(concat!(
            r"^[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?",
            r"(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*",
            r"(?::[0-9]+)?$",
        ))
        .ok()
    });
    REGISTRY_RE.as_ref().is_some_and(|re| re.is_match(registry))
}

/// Check a namespace or repository path component
fn is_valid_path_component(component: &str) -> bool {
    // Pattern: lowercase alphanumerics joined by '.', '_', '__' or runs of '-'
    static COMPONENT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").ok()
    });
    COMPONENT_RE
        .as_ref()
        .is_some_and(|re| re.is_match(component))
}

/// Check a tag
fn is_valid_tag(tag: &str) -> bool {
    static TAG_RE: LazyLock<Option<Regex>> =
        LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").ok());
    TAG_RE.as_ref().is_some_and(|re| re.is_match(tag))
}

/// Check a digest of the form `algorithm:hex`
fn is_valid_digest(digest: &str) -> bool {
    static DIGEST_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
        Regex::new(r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[0-9a-fA-F]+$").ok()
    });
    DIGEST_RE.as_ref().is_some_and(|re| re.is_match(digest))
}
