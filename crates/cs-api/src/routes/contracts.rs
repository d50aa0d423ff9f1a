//! Contract reads

use crate::auth::request_context;
use crate::error::ApiResult;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use cs_core::{AuditResult, SmartContract};
use std::sync::Arc;
use uuid::Uuid;

pub async fn list_contracts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<SmartContract>>> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.core.registry.list_contracts(&ctx).await?))
}

pub async fn get_findings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<AuditResult>>> {
    let ctx = request_context(&state, &headers);
    Ok(Json(state.core.registry.findings_for(&ctx, id).await?))
}
