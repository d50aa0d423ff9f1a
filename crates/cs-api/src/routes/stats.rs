//! Dashboard statistics

use crate::auth::request_context;
use crate::error::ApiResult;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use cs_core::{DashboardSnapshot, StatsScope};
use std::sync::Arc;

/// Scoped to the caller when authenticated, global otherwise
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<DashboardSnapshot>> {
    let ctx = request_context(&state, &headers);
    let scope = StatsScope::from_context(&ctx);
    Ok(Json(state.core.dashboard.compute_for_policy(&scope).await?))
}
