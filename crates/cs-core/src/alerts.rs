//! Risk alert lifecycle
//!
//! Alerts move from open to resolved; deletion is available from either state
//! and is final.

use crate::config::CoreConfig;
use crate::context::RequestContext;
use crate::model::{AlertType, NewRiskAlert, RiskAlert, Severity};
use crate::store::{AlertFilter, NewAlertRow, SecurityStore};
use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Listing criteria; every provided field must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertListFilter {
    pub severity: Option<Severity>,
    #[serde(rename = "type")]
    pub alert_type: Option<AlertType>,
    #[serde(default)]
    pub include_resolved: bool,
}

pub struct AlertManager {
    store: Arc<dyn SecurityStore>,
    config: CoreConfig,
}

impl AlertManager {
    pub fn new(store: Arc<dyn SecurityStore>, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Open a new, unresolved alert owned by the caller
    pub async fn create(&self, ctx: &RequestContext, alert: NewRiskAlert) -> CoreResult<RiskAlert> {
        let owner = ctx.require_principal()?;
        if alert.title.trim().is_empty() {
            return Err(CoreError::Validation("alert title is required".to_string()));
        }

        let created = self
            .store
            .insert_alert(NewAlertRow {
                owner_id: owner.id().to_string(),
                alert_type: alert.alert_type,
                severity: alert.severity,
                title: alert.title,
                description: alert.description,
                target_address: alert.target_address,
                resolved: false,
            })
            .await?;

        info!(
            "Created {} {} alert {} for {}",
            created.severity, created.alert_type, created.id, created.target_address
        );
        Ok(created)
    }

    /// Mark an alert resolved. Resolving twice is a no-op.
    pub async fn resolve(&self, ctx: &RequestContext, id: Uuid) -> CoreResult<RiskAlert> {
        self.set_resolved(ctx, id, true).await
    }

    /// Set the resolved flag explicitly.
    ///
    /// Reopening (`true -> false`) is rejected unless
    /// [`CoreConfig::allow_alert_reopen`] is set.
    pub async fn set_resolved(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        resolved: bool,
    ) -> CoreResult<RiskAlert> {
        let owner = ctx.require_principal()?;

        if !resolved && !self.config.allow_alert_reopen {
            let current = self
                .store
                .get_alert(id, owner.id())
                .await?
                .ok_or_else(|| not_found(id))?;
            if current.resolved {
                return Err(CoreError::Validation(format!(
                    "alert {} is resolved and cannot be reopened",
                    id
                )));
            }
            return Ok(current);
        }

        let updated = self
            .store
            .update_alert_resolved(id, owner.id(), resolved)
            .await?
            .ok_or_else(|| not_found(id))?;

        debug!("Alert {} resolved={}", id, updated.resolved);
        Ok(updated)
    }

    /// Permanently remove an alert
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> CoreResult<()> {
        let owner = ctx.require_principal()?;
        if !self.store.delete_alert(id, owner.id()).await? {
            return Err(not_found(id));
        }
        info!("Deleted alert {}", id);
        Ok(())
    }

    /// The caller's alerts matching `filter`, newest first
    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &AlertListFilter,
    ) -> CoreResult<Vec<RiskAlert>> {
        let owner = ctx.require_principal()?;
        let alerts = self
            .store
            .select_alerts(&AlertFilter {
                owner_id: Some(owner.id().to_string()),
                severity: filter.severity,
                alert_type: filter.alert_type,
                include_resolved: filter.include_resolved,
            })
            .await?;
        Ok(alerts)
    }

    /// Number of the caller's open alerts
    pub async fn unresolved_count(&self, ctx: &RequestContext) -> CoreResult<u64> {
        let owner = ctx.require_principal()?;
        Ok(self
            .store
            .count_alerts(&AlertFilter {
                owner_id: Some(owner.id().to_string()),
                ..Default::default()
            })
            .await?)
    }
}

fn not_found(id: Uuid) -> CoreError {
    CoreError::NotFound(format!("alert {}", id))
}
