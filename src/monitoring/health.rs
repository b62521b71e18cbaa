//! Status HTTP endpoint.
//!
//! Serves `/health` (service status as JSON) and `/api/subscribers` (stored
//! subscriber configuration) for external uptime monitors.

use std::sync::Arc;

use axum::extract::State;
use axum::http::Method;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::db::store::Store;
use crate::scheduler::triggers::Trigger;
use crate::sync::engine::SyncReport;

/// Shared health state updated by the service loop.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthData>>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthData {
    status: String,
    started_at: DateTime<Utc>,
    last_trigger: Option<String>,
    last_trigger_at: Option<DateTime<Utc>>,
    last_sync_at: Option<DateTime<Utc>>,
    triggers_handled: u64,
    totals: SyncReport,
    uptime_seconds: i64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthData {
                status: "starting".to_string(),
                started_at: Utc::now(),
                last_trigger: None,
                last_trigger_at: None,
                last_sync_at: None,
                triggers_handled: 0,
                totals: SyncReport::default(),
                uptime_seconds: 0,
            })),
        }
    }

    pub async fn record_trigger(&self, trigger: Trigger, report: Option<SyncReport>) {
        let now = Utc::now();
        let mut data = self.inner.write().await;
        data.status = "ok".to_string();
        data.triggers_handled += 1;
        data.last_trigger = Some(trigger.to_string());
        data.last_trigger_at = Some(now);
        if let Some(report) = report {
            data.totals += report;
            data.last_sync_at = Some(now);
        }
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let mut data = self.inner.read().await.clone();
        data.uptime_seconds = (Utc::now() - data.started_at).num_seconds();
        serde_json::to_value(&data).unwrap_or_default()
    }
}

#[derive(Clone)]
struct ServerState {
    health: HealthState,
    store: Arc<Store>,
}

pub fn router(health: HealthState, store: Arc<Store>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET]);
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/subscribers", get(subscribers_handler))
        .layer(cors)
        .with_state(ServerState { health, store })
}

/// Spawn the status HTTP server. Returns a handle that can be aborted.
pub fn spawn_health_server(health: HealthState, store: Arc<Store>, bind: &str) -> JoinHandle<()> {
    let addr = bind.to_string();
    let app = router(health, store);

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => {
                info!(addr = %addr, "Health server listening");
                l
            }
            Err(e) => {
                warn!(error = %e, addr = %addr, "Failed to bind health server, continuing without it");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Health server error");
        }
    })
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.health.to_json().await)
}

async fn subscribers_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.store.list_subscribers().await {
        Ok(subscribers) => Json(serde_json::to_value(&subscribers).unwrap_or_default()),
        Err(e) => Json(serde_json::json!({"error": e.to_string()})),
    }
}
