use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    cache::{self, CacheProbe, CacheStatus},
    config::AppConfig,
    error::ScanError,
    models::NewFinding,
    query::ScanQuery,
    service::{parse_job_id, RequestContext, ScanService},
};

#[derive(Clone)]
pub struct AppState {
    pub service: ScanService,
    pub cache: Option<Arc<dyn CacheProbe>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    fn ctx(&self) -> RequestContext {
        RequestContext::new(self.config.store_timeout())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/scans", get(list_scans).post(create_scan))
        .route("/api/v1/scans/metrics", get(metrics))
        .route(
            "/api/v1/scans/{id}",
            get(get_scan).patch(update_scan).delete(delete_scan),
        )
        .route("/api/v1/scans/{id}/findings", post(add_finding))
        .route("/api/v1/scans/{id}/purge", delete(purge_scan))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = match &self {
            ScanError::Validation(_) => StatusCode::BAD_REQUEST,
            ScanError::NotFound(_) => StatusCode::NOT_FOUND,
            ScanError::Conflict(_) => StatusCode::CONFLICT,
            ScanError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "store call failed");
        } else {
            warn!(kind = self.kind(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct SuccessBody<T: Serialize> {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

/// Malformed or mistyped bodies are validation failures, not axum's 422.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ScanError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ScanError::validation(rejection.body_text()))
}

fn success<T: Serialize>(message: &'static str, data: Option<T>) -> Response {
    Json(SuccessBody {
        success: true,
        message,
        data,
    })
    .into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    let store_ok = state.service.ping_store(&state.ctx()).await.is_ok();
    let cache = cache::check(state.cache.as_deref()).await;
    let status = match (store_ok, cache) {
        (false, _) => "unavailable",
        (true, CacheStatus::Degraded) => "degraded",
        (true, _) => "ok",
    };
    let (code, store) = if store_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "scan-ledger",
            "version": env!("CARGO_PKG_VERSION"),
            "store": store,
            "cache": cache,
            "time": state.service.now().to_rfc3339(),
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateScanRequest {
    target: String,
    scan_type: String,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

pub async fn create_scan(
    State(state): State<AppState>,
    payload: Result<Json<CreateScanRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };
    match state
        .service
        .create_job(&state.ctx(), &req.target, &req.scan_type, req.metadata)
        .await
    {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_scans(
    State(state): State<AppState>,
    query: Result<Query<ScanQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return ScanError::validation(rejection.body_text()).into_response(),
    };
    match state.service.list_jobs(&state.ctx(), query).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_scan(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = match parse_job_id(&id) {
        Ok(id) => state.service.get_job(&state.ctx(), id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateScanRequest {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

pub async fn update_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateScanRequest>, JsonRejection>,
) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };
    let Some(status) = req.status else {
        if req.error_message.is_some() {
            return ScanError::validation("error_message requires status failed").into_response();
        }
        return success::<()>("nothing to update", None);
    };
    match state
        .service
        .update_status(&state.ctx(), id, &status, req.error_message)
        .await
    {
        Ok(job) => success("scan status updated", Some(job)),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_scan(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = match parse_job_id(&id) {
        Ok(id) => state.service.delete_job(&state.ctx(), id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => success::<()>("scan job deleted", None),
        Err(e) => e.into_response(),
    }
}

pub async fn purge_scan(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = match parse_job_id(&id) {
        Ok(id) => state.service.purge_job(&state.ctx(), id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => success::<()>("scan job purged", None),
        Err(e) => e.into_response(),
    }
}

pub async fn add_finding(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<NewFinding>, JsonRejection>,
) -> Response {
    let result = match (parse_job_id(&id), json_body(payload)) {
        (Ok(id), Ok(finding)) => state.service.add_finding(&state.ctx(), id, finding).await,
        (Err(e), _) | (_, Err(e)) => Err(e),
    };
    match result {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.service.metrics(&state.ctx()).await {
        Ok(m) => Json(m).into_response(),
        Err(e) => e.into_response(),
    }
}
