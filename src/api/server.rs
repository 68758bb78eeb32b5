use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditFilter, AuditRecord};
use crate::core::LiveIndexSummary;
use crate::error::LifecycleError;
use crate::manager::{ApplyOutcome, ApplyRequest, IndexLifecycleManager};
use crate::stats::StatsReport;

pub struct AppState {
    pub manager: IndexLifecycleManager,
    pub recommendations: Option<PathBuf>,
}

#[derive(Deserialize)]
pub struct AuditParams {
    /// 逗号分隔：create,delete_failed
    pub action: Option<String>,
    /// 支持通配符
    pub index: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// 错误 → HTTP：校验错误 400，其余一律 500
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        if e.is_validation() {
            Self::bad_request(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/apply", post(apply_handler))
        .route("/indexes", get(indexes_handler))
        .route("/audit", get(audit_handler))
        .route("/recommendations", get(recommendations_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

pub struct ApiServer {
    pub state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP API listening on {}", listener.local_addr()?);
        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }
}

async fn ping_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn apply_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<ApplyOutcome>, ApiError> {
    // DDL 可能较慢，放到 blocking 线程池，避免卡住 runtime
    let outcome = tokio::task::spawn_blocking(move || state.manager.apply_request(&req))
        .await
        .map_err(|e| ApiError::internal(format!("apply task failed: {}", e)))??;
    Ok(Json(outcome))
}

async fn indexes_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LiveIndexSummary>>, ApiError> {
    let out = tokio::task::spawn_blocking(move || state.manager.live_summaries())
        .await
        .map_err(|e| ApiError::internal(format!("live view task failed: {}", e)))??;
    Ok(Json(out))
}

async fn audit_handler(
    Query(params): Query<AuditParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let mut actions = Vec::new();
    if let Some(raw) = params.action.as_deref() {
        for a in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let action = AuditAction::parse(a)
                .ok_or_else(|| ApiError::bad_request(format!("unknown action {:?}", a)))?;
            actions.push(action);
        }
    }
    let filter = AuditFilter {
        actions,
        index: params.index,
        limit: params.limit,
    };
    Ok(Json(state.manager.audit_records(&filter)?))
}

async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(path) = state.recommendations.as_ref() else {
        return Ok(Json(serde_json::json!([])));
    };
    let data = match tokio::fs::read(path).await {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(serde_json::json!([])));
        }
        Err(e) => return Err(ApiError::internal(format!("read {:?}: {}", path, e))),
    };
    let recs = serde_json::from_slice(&data)
        .map_err(|e| ApiError::internal(format!("parse {:?}: {}", path, e)))?;
    Ok(Json(recs))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsReport> {
    Json(state.manager.stats())
}
