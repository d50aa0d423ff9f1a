//! Audit submission

use crate::auth::request_context;
use crate::error::ApiResult;
use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use cs_core::{AuditResult, AuditSubmission, PersistenceWarning, SmartContract};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct SubmitAuditResponse {
    pub contract: SmartContract,
    /// `None` when the findings could not be stored
    pub findings: Option<Vec<AuditResult>>,
    pub warning: Option<PersistenceWarning>,
}

pub async fn submit_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AuditSubmission>,
) -> ApiResult<(StatusCode, Json<SubmitAuditResponse>)> {
    let ctx = request_context(&state, &headers);
    let outcome = state.core.registry.submit_audit(&ctx, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitAuditResponse {
            findings: outcome.findings().map(|f| f.to_vec()),
            warning: outcome.warning().cloned(),
            contract: outcome.contract,
        }),
    ))
}
