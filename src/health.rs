//! Health & Metrics HTTP surface.
//!
//! Liveness, readiness, and Prometheus exposition over a small `axum`
//! server — the only externally-reachable interface this crate exposes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use sqlx::{Pool, Postgres};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::db::checkpoint::CheckpointStore;
use crate::rpc::RpcPool;

/// How long a readiness verdict is cached before being recomputed, to damp
/// upstream load from frequent orchestrator probes.
const READINESS_CACHE_TTL: Duration = Duration::from_secs(5);

struct ReadinessCache {
    checked_at: Instant,
    ready: bool,
    detail: String,
}

pub struct HealthState {
    db: Pool<Postgres>,
    rpc: Arc<RpcPool>,
    chain_id: u64,
    readiness_lag_threshold: u64,
    shutting_down: AtomicBool,
    cache: Mutex<Option<ReadinessCache>>,
}

impl HealthState {
    pub fn new(db: Pool<Postgres>, rpc: Arc<RpcPool>, config: &AppConfig) -> Arc<Self> {
        Arc::new(Self {
            db,
            rpc,
            chain_id: config.chain_id,
            readiness_lag_threshold: config.readiness_lag_threshold,
            shutting_down: AtomicBool::new(false),
            cache: Mutex::new(None),
        })
    }

    /// Marks the process as shutting down; liveness starts failing
    /// immediately so an orchestrator stops routing new traffic/signals.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    async fn check_readiness(&self) -> (bool, String) {
        if let Some(cached) = self.cache.lock().await.as_ref() {
            if cached.checked_at.elapsed() < READINESS_CACHE_TTL {
                return (cached.ready, cached.detail.clone());
            }
        }

        let (ready, detail) = self.compute_readiness().await;

        *self.cache.lock().await = Some(ReadinessCache {
            checked_at: Instant::now(),
            ready,
            detail: detail.clone(),
        });

        (ready, detail)
    }

    async fn compute_readiness(&self) -> (bool, String) {
        if let Err(e) = sqlx::query("SELECT 1").execute(&self.db).await {
            return (false, format!("database unreachable: {e}"));
        }

        let head = match self.rpc.fetch_latest_block_number().await {
            Ok(h) => h,
            Err(e) => return (false, format!("rpc unreachable: {e}")),
        };

        let next_block = match CheckpointStore::get(&self.db, self.chain_id).await {
            Ok(status) => status.and_then(|s| s.next_block.to_u64().ok()).unwrap_or(0),
            Err(e) => return (false, format!("checkpoint lookup failed: {e}")),
        };

        let lag = head.saturating_sub(next_block.saturating_sub(1).min(head));
        if lag > self.readiness_lag_threshold {
            return (
                false,
                format!("sync lag {lag} exceeds readiness threshold {}", self.readiness_lag_threshold),
            );
        }

        (true, "ok".to_string())
    }
}

async fn liveness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.shutting_down.load(Ordering::SeqCst) {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    } else {
        (StatusCode::OK, "ok").into_response()
    }
}

async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let (ready, detail) = state.check_readiness().await;
    if ready {
        (StatusCode::OK, detail).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, detail).into_response()
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        crate::metrics::encode(),
    )
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

pub async fn serve(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health/metrics server listening");
    axum::serve(listener, router(state)).await
}
