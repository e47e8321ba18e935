//! image-policy-webhook - A Kubernetes admission webhook enforcing an image registry policy.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the image policy
//! - Starts the health server and the webhook server
//! - Reloads the policy on SIGHUP

use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use image_policy_webhook::config::{Args, load_policy, reload_policy};
use image_policy_webhook::health::{HealthState, run_health_server};
use image_policy_webhook::policy::PolicyStore;
use image_policy_webhook::webhooks::{WebhookState, run_webhook_server};

/// Grace period for in-flight admission requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("image_policy_webhook=info".parse()?),
        )
        .json()
        .init();

    let args = Args::parse();
    info!("Starting image-policy-webhook");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so the kubelet can reach it during startup
    let health_handle = {
        let health_state = health_state.clone();
        let port = args.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Startup fails without a valid policy; /readyz reports 503 until then
    let policy = load_policy(&args.policy_file)?;
    let store = Arc::new(PolicyStore::new(policy));

    // Start webhook server
    let server_handle = Handle::new();
    let webhook_handle = {
        let state = Arc::new(WebhookState::new(store.clone(), health_state.clone()));
        let addr = args.webhook_addr();
        let tls = args.tls_paths();
        let server_handle = server_handle.clone();
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, addr, tls, server_handle).await {
                error!("Webhook server error: {}", e);
            }
        })
    };

    // Reload the policy file on SIGHUP
    let reload_handle = {
        let store = store.clone();
        let health_state = health_state.clone();
        let path = args.policy_file.clone();
        tokio::spawn(async move {
            reload_on_hangup(&path, &store, &health_state).await;
        })
    };

    health_state.policy_loaded(store.generation()).await;
    info!(generation = store.generation(), "Marked webhook as ready");

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = reload_handle => {
            if let Err(e) = result {
                error!("Policy reload task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing new requests here
            health_state.begin_shutdown().await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting up to {}s for in-flight admission requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            server_handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)));
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Webhook stopped");
    Ok(())
}

/// Reload the policy each time SIGHUP arrives
#[cfg(unix)]
async fn reload_on_hangup(
    path: &std::path::Path,
    store: &PolicyStore,
    health_state: &HealthState,
) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, policy reload disabled: {}", e);
            return std::future::pending().await;
        }
    };

    while hangup.recv().await.is_some() {
        info!(path = %path.display(), "Received SIGHUP, reloading policy");
        if reload_policy(path, store, health_state).await.is_err() {
            warn!(generation = store.generation(), "Still serving previous policy");
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _path: &std::path::Path,
    _store: &PolicyStore,
    _health_state: &HealthState,
) {
    std::future::pending::<()>().await;
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
