//! HTTP read API.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::QueryError;
use crate::queries;
use crate::state::AppContext;
use crate::types::SubjectOutcomes;

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    message: String,
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QueryRejection> for ApiFailure {
    fn from(rejection: QueryRejection) -> Self {
        ApiFailure {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
            details: None,
        }
    }
}

impl From<QueryError> for ApiFailure {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidArgument(message) => ApiFailure {
                status: StatusCode::BAD_REQUEST,
                message,
                details: None,
            },
            QueryError::StoreUnavailable(ref source) => {
                log::error!("Subject query failed: {}", source);
                ApiFailure {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Failed to load subjects".to_string(),
                    details: Some(json!({ "code": err.code() })),
                }
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectsParams {
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    records: Option<usize>,
    last_sync: Option<crate::types::SyncReport>,
}

pub fn app(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/user-subjects", get(user_subjects))
        .route("/health", get(health))
        .route("/sync", post(trigger_sync))
        .with_state(ctx)
}

async fn liveness() -> &'static str {
    "Server is running"
}

async fn user_subjects(
    State(ctx): State<Arc<AppContext>>,
    params: Result<Query<SubjectsParams>, QueryRejection>,
) -> Result<Json<SubjectOutcomes>, ApiFailure> {
    let Query(params) = params?;
    let given = params.first_name.unwrap_or_default();
    let family = params.last_name.unwrap_or_default();
    let outcomes = queries::resolve(ctx.store.as_ref(), &given, &family).await?;
    Ok(Json(outcomes))
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let records = match ctx.store.count().await {
        Ok(n) => Some(n),
        Err(e) => {
            log::warn!("Health: store count failed: {}", e);
            None
        }
    };
    Json(HealthResponse {
        status: if records.is_some() { "ok" } else { "degraded" },
        records,
        last_sync: ctx.last_sync.read().clone(),
    })
}

async fn trigger_sync(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    log::info!("HTTP: manual sync requested");
    ctx.sync_wake.notify_one();
    (StatusCode::ACCEPTED, Json(json!({ "status": "scheduled" })))
}
