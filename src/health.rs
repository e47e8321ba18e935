//! Health server for Kubernetes liveness and readiness checks and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness check (always returns 200 if server is running)
//! - `/readyz` - Readiness check (returns 200 once the policy is loaded)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::webhooks::Outcome;

/// Default health server port
pub const HEALTH_PORT: u16 = 8080;

/// Labels for admission request metrics (endpoint + decision)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RequestLabels {
    pub endpoint: String,
    pub decision: String,
}

impl EncodeLabelSet for RequestLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("endpoint", self.endpoint.as_str()).encode(encoder.encode_label())?;
        ("decision", self.decision.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-endpoint metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct EndpointLabels {
    pub endpoint: String,
}

impl EncodeLabelSet for EndpointLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("endpoint", self.endpoint.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for break-glass metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BreakGlassLabels {
    pub key: String,
}

impl EncodeLabelSet for BreakGlassLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("key", self.key.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for policy reload metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReloadLabels {
    pub result: String,
}

impl EncodeLabelSet for ReloadLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("result", self.result.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admission requests by endpoint and decision
    pub admission_requests_total: Family<RequestLabels, Counter>,
    /// Pods admitted through a break-glass annotation
    pub break_glass_total: Family<BreakGlassLabels, Counter>,
    /// Request handling duration histogram
    pub request_duration_seconds: Family<EndpointLabels, Histogram>,
    /// Policy reload attempts by result
    pub policy_reloads_total: Family<ReloadLabels, Counter>,
    /// Generation of the policy currently served
    pub policy_generation: Gauge,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let admission_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "image_policy_admission_requests",
            "Total number of admission requests by decision",
            admission_requests_total.clone(),
        );

        let break_glass_total = Family::<BreakGlassLabels, Counter>::default();
        registry.register(
            "image_policy_break_glass",
            "Total number of pods admitted through a break-glass annotation",
            break_glass_total.clone(),
        );

        let request_duration_seconds =
            Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0001, 2.0, 15))
            });
        registry.register(
            "image_policy_request_duration_seconds",
            "Duration of admission request handling in seconds",
            request_duration_seconds.clone(),
        );

        let policy_reloads_total = Family::<ReloadLabels, Counter>::default();
        registry.register(
            "image_policy_policy_reloads",
            "Total number of policy reload attempts",
            policy_reloads_total.clone(),
        );

        let policy_generation = Gauge::default();
        registry.register(
            "image_policy_policy_generation",
            "Generation of the policy currently in use",
            policy_generation.clone(),
        );

        Self {
            admission_requests_total,
            break_glass_total,
            request_duration_seconds,
            policy_reloads_total,
            policy_generation,
            registry,
        }
    }

    /// Record an answered request
    pub fn record_request(&self, endpoint: &str, outcome: Outcome) {
        let labels = RequestLabels {
            endpoint: endpoint.to_string(),
            decision: outcome.as_str().to_string(),
        };
        self.admission_requests_total.get_or_create(&labels).inc();
    }

    /// Record a break-glass admission
    pub fn record_break_glass(&self, key: &str) {
        let labels = BreakGlassLabels {
            key: key.to_string(),
        };
        self.break_glass_total.get_or_create(&labels).inc();
    }

    /// Record how long a request took
    pub fn observe_duration(&self, endpoint: &str, duration_secs: f64) {
        let labels = EndpointLabels {
            endpoint: endpoint.to_string(),
        };
        self.request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a policy reload attempt
    pub fn record_reload(&self, success: bool) {
        let labels = ReloadLabels {
            result: if success { "success" } else { "failure" }.to_string(),
        };
        self.policy_reloads_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Whether the webhook should receive admission traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No policy has been published yet
    AwaitingPolicy,
    /// Serving the policy with this generation
    Serving { generation: u64 },
    /// Draining before shutdown; never ready again
    ShuttingDown,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::AwaitingPolicy => f.write_str("policy not loaded"),
            Readiness::Serving { generation } => {
                write!(f, "ready (policy generation {})", generation)
            }
            Readiness::ShuttingDown => f.write_str("shutting down"),
        }
    }
}

/// Shared state for the health server
pub struct HealthState {
    readiness: RwLock<Readiness>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state, waiting for a policy
    pub fn new() -> Self {
        Self {
            readiness: RwLock::new(Readiness::AwaitingPolicy),
            metrics: Metrics::new(),
        }
    }

    /// Record that policy `generation` is now being served.
    ///
    /// Ignored once shutdown has begun.
    pub async fn policy_loaded(&self, generation: u64) {
        let mut readiness = self.readiness.write().await;
        if *readiness != Readiness::ShuttingDown {
            *readiness = Readiness::Serving { generation };
            self.metrics
                .policy_generation
                .set(i64::try_from(generation).unwrap_or(i64::MAX));
        }
    }

    /// Stop reporting ready so the Service drains this pod
    pub async fn begin_shutdown(&self) {
        *self.readiness.write().await = Readiness::ShuttingDown;
    }

    pub async fn readiness(&self) -> Readiness {
        *self.readiness.read().await
    }

    /// Ready only while a loaded policy is being served
    pub async fn is_ready(&self) -> bool {
        matches!(self.readiness().await, Readiness::Serving { .. })
    }
}

/// Liveness handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness handler
///
/// Returns 200 OK while a policy is served, 503 with the reason otherwise.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    let readiness = state.readiness().await;
    let status = match readiness {
        Readiness::Serving { .. } => StatusCode::OK,
        Readiness::AwaitingPolicy | Readiness::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, readiness.to_string()).into_response()
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0 on `port` and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
