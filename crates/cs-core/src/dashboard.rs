//! Dashboard roll-up statistics
//!
//! Six independent reads are issued concurrently and combined. There is no
//! snapshot isolation between them, so under concurrent writes the fields may
//! disagree with each other momentarily.

use crate::config::{CoreConfig, StatsPolicy};
use crate::context::RequestContext;
use crate::model::{AuditStatus, DashboardStats, Severity};
use crate::scoring::round_tenths;
use crate::store::{
    AlertFilter, ContractFilter, FindingFilter, SecurityStore, StoreError, StoreResult,
    TransactionFilter,
};
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Whose records the statistics cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsScope {
    All,
    Owner(String),
}

impl StatsScope {
    /// Owner scope for an authenticated caller, global otherwise
    pub fn from_context(ctx: &RequestContext) -> Self {
        match &ctx.principal {
            Some(p) => StatsScope::Owner(p.id().to_string()),
            None => StatsScope::All,
        }
    }

    fn owner(&self) -> Option<String> {
        match self {
            StatsScope::All => None,
            StatsScope::Owner(id) => Some(id.clone()),
        }
    }
}

/// Where a statistic's value came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FieldSource {
    Ok,
    /// The read failed and the field was set to zero
    Degraded { error: String },
}

impl FieldSource {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FieldSource::Degraded { .. })
    }
}

/// Per-field provenance, mirroring [`DashboardStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsProvenance {
    pub total_contracts_audited: FieldSource,
    pub active_audits: FieldSource,
    pub critical_vulnerabilities: FieldSource,
    pub transactions_analyzed: FieldSource,
    pub risk_alerts: FieldSource,
    pub avg_risk_score: FieldSource,
}

impl StatsProvenance {
    fn fields(&self) -> [(&'static str, &FieldSource); 6] {
        [
            ("total_contracts_audited", &self.total_contracts_audited),
            ("active_audits", &self.active_audits),
            ("critical_vulnerabilities", &self.critical_vulnerabilities),
            ("transactions_analyzed", &self.transactions_analyzed),
            ("risk_alerts", &self.risk_alerts),
            ("avg_risk_score", &self.avg_risk_score),
        ]
    }

    /// Names and errors of every degraded field
    pub fn degraded(&self) -> Vec<(&'static str, &str)> {
        self.fields()
            .into_iter()
            .filter_map(|(name, source)| match source {
                FieldSource::Degraded { error } => Some((name, error.as_str())),
                FieldSource::Ok => None,
            })
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.fields().iter().any(|(_, source)| source.is_degraded())
    }
}

/// One `compute_stats` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub stats: DashboardStats,
    pub provenance: StatsProvenance,
    pub computed_at: DateTime<Utc>,
}

pub struct DashboardAggregator {
    store: Arc<dyn SecurityStore>,
    config: CoreConfig,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn SecurityStore>, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Compute the snapshot. Never fails; a failed read zeroes its field and
    /// is recorded in the provenance.
    pub async fn compute_stats(&self, scope: &StatsScope) -> DashboardSnapshot {
        let owner = scope.owner();

        let audited = ContractFilter::owned_by(owner.as_deref()).with_statuses(&[AuditStatus::Completed]);
        let active = ContractFilter::owned_by(owner.as_deref())
            .with_statuses(&[AuditStatus::Pending, AuditStatus::InProgress]);
        let all_contracts = ContractFilter::owned_by(owner.as_deref());
        let critical = FindingFilter {
            owner_id: owner.clone(),
            severity: Some(Severity::Critical),
            ..Default::default()
        };
        let transactions = TransactionFilter {
            owner_id: owner.clone(),
            ..Default::default()
        };
        let open_alerts = AlertFilter {
            owner_id: owner.clone(),
            include_resolved: false,
            ..Default::default()
        };

        let (audited, active, critical, transactions, alerts, scores) = tokio::join!(
            self.store.count_contracts(&audited),
            self.store.count_contracts(&active),
            self.store.count_audit_results(&critical),
            self.store.count_transactions(&transactions),
            self.store.count_alerts(&open_alerts),
            self.store.contract_risk_scores(&all_contracts),
        );

        let (total_contracts_audited, audited_src) = settle("total_contracts_audited", audited);
        let (active_audits, active_src) = settle("active_audits", active);
        let (critical_vulnerabilities, critical_src) = settle("critical_vulnerabilities", critical);
        let (transactions_analyzed, tx_src) = settle("transactions_analyzed", transactions);
        let (risk_alerts, alerts_src) = settle("risk_alerts", alerts);
        let (avg_risk_score, avg_src) = settle("avg_risk_score", scores.map(|s| average(&s)));

        DashboardSnapshot {
            stats: DashboardStats {
                total_contracts_audited,
                active_audits,
                critical_vulnerabilities,
                transactions_analyzed,
                risk_alerts,
                avg_risk_score,
            },
            provenance: StatsProvenance {
                total_contracts_audited: audited_src,
                active_audits: active_src,
                critical_vulnerabilities: critical_src,
                transactions_analyzed: tx_src,
                risk_alerts: alerts_src,
                avg_risk_score: avg_src,
            },
            computed_at: Utc::now(),
        }
    }

    /// Like [`compute_stats`](Self::compute_stats) but fails on the first
    /// degraded field instead of masking it
    pub async fn compute_stats_strict(&self, scope: &StatsScope) -> CoreResult<DashboardStats> {
        let snapshot = self.compute_stats(scope).await;
        surface_degraded(&snapshot.provenance)?;
        Ok(snapshot.stats)
    }

    /// Apply the configured [`StatsPolicy`]
    pub async fn compute_for_policy(&self, scope: &StatsScope) -> CoreResult<DashboardSnapshot> {
        let snapshot = self.compute_stats(scope).await;
        if self.config.stats_policy == StatsPolicy::Surface {
            surface_degraded(&snapshot.provenance)?;
        }
        Ok(snapshot)
    }
}

fn surface_degraded(provenance: &StatsProvenance) -> CoreResult<()> {
    match provenance.degraded().first() {
        Some((field, error)) => Err(CoreError::Persistence(StoreError::Backend(format!(
            "{} unavailable: {}",
            field, error
        )))),
        None => Ok(()),
    }
}

fn settle<T: Default>(field: &'static str, result: StoreResult<T>) -> (T, FieldSource) {
    match result {
        Ok(value) => (value, FieldSource::Ok),
        Err(e) => {
            warn!("Dashboard field {} degraded to default: {}", field, e);
            (
                T::default(),
                FieldSource::Degraded {
                    error: e.to_string(),
                },
            )
        }
    }
}

fn average(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    round_tenths(scores.iter().sum::<f64>() / scores.len() as f64)
}
