//! Risk alert routes

use crate::auth::request_context;
use crate::error::ApiResult;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use cs_core::{AlertListFilter, NewRiskAlert, RiskAlert};
use std::sync::Arc;
use uuid::Uuid;

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<AlertListFilter>,
) -> ApiResult<Json<Vec<RiskAlert>>> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.core.alerts.list(&ctx, &filter).await?))
}

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NewRiskAlert>,
) -> ApiResult<(StatusCode, Json<RiskAlert>)> {
    let ctx = request_context(&state, &headers);
    let alert = state.core.alerts.create(&ctx, payload).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RiskAlert>> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.core.alerts.resolve(&ctx, id).await?))
}

pub async fn delete_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let ctx = request_context(&state, &headers);
    state.core.alerts.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
