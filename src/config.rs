//! Command-line configuration and policy file loading.
//!
//! Every flag can also be set through its environment variable. The policy
//! itself lives in a TOML file (typically a mounted ConfigMap):
//!
//! ```toml
//! allowed_registries = ["docker.io", "ghcr.io"]
//! allowed_repositories = ["docker.io/library/nginx", "ghcr.io/org/app"]
//! break_glass_annotation_keys = ["break-glass.image-policy.k8s.io/override"]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use crate::health::{HEALTH_PORT, HealthState};
use crate::policy::{Policy, PolicyStore};
use crate::webhooks::{TlsPaths, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT};

/// Default path to the policy file
pub const POLICY_PATH: &str = "/etc/image-policy/policy.toml";

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The policy file could not be read
    #[error("Failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The policy file is not a valid policy
    #[error("Invalid policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Image policy admission webhook
#[derive(Debug, Clone, Parser)]
#[command(name = "image-policy-webhook", version, about)]
pub struct Args {
    /// Path to the TOML policy file
    #[arg(long, env = "IMAGE_POLICY_FILE", default_value = POLICY_PATH)]
    pub policy_file: PathBuf,

    /// Path to the PEM-encoded TLS certificate
    #[arg(long, env = "WEBHOOK_CERT_PATH", default_value = WEBHOOK_CERT_PATH)]
    pub cert_path: PathBuf,

    /// Path to the PEM-encoded TLS private key
    #[arg(long, env = "WEBHOOK_KEY_PATH", default_value = WEBHOOK_KEY_PATH)]
    pub key_path: PathBuf,

    /// Port for the webhook endpoints
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = WEBHOOK_PORT)]
    pub port: u16,

    /// Port for health and metrics endpoints
    #[arg(long, env = "HEALTH_PORT", default_value_t = HEALTH_PORT)]
    pub health_port: u16,

    /// Serve the webhook over plain HTTP (local testing only)
    #[arg(long, env = "WEBHOOK_PLAINTEXT")]
    pub plaintext: bool,
}

impl Args {
    /// Address the webhook server binds to
    pub fn webhook_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// TLS material, or `None` when serving plain HTTP
    pub fn tls_paths(&self) -> Option<TlsPaths> {
        (!self.plaintext).then(|| TlsPaths {
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
        })
    }
}

impl Policy {
    /// Parse a policy from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Policy>(contents).map(Policy::normalized)
    }
}

/// Load the policy file at `path`.
pub fn load_policy(path: &Path) -> Result<Policy, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let policy = Policy::from_toml(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        path = %path.display(),
        registries = policy.allowed_registries.len(),
        repositories = ?policy.allowed_repositories.as_ref().map(|r| r.len()),
        break_glass_keys = policy.break_glass_annotation_keys.len(),
        "Loaded image policy"
    );
    Ok(policy)
}

/// Reload the policy file and publish it.
///
/// On failure the current policy stays in effect.
pub async fn reload_policy(
    path: &Path,
    store: &PolicyStore,
    health: &HealthState,
) -> Result<u64, ConfigError> {
    match load_policy(path) {
        Ok(policy) => {
            let generation = store.publish(policy).await;
            health.metrics.record_reload(true);
            health.policy_loaded(generation).await;
            info!(generation, "Published reloaded policy");
            Ok(generation)
        }
        Err(e) => {
            health.metrics.record_reload(false);
            error!(error = %e, "Policy reload failed, keeping current policy");
            Err(e)
        }
    }
}
