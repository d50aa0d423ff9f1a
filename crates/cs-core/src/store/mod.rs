//! Persistence adapter boundary
//!
//! Services only talk to storage through [`SecurityStore`]. Each call is
//! expected to be atomic on its own; nothing here spans calls.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::model::{AlertType, AuditResult, AuditStatus, RiskAlert, Severity, SmartContract};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("row decode error: {0}")]
    Decode(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract row written by an upsert on `(owner_id, network, address)`
#[derive(Debug, Clone)]
pub struct ContractUpsert {
    pub owner_id: String,
    pub address: String,
    pub name: String,
    pub network: String,
    /// Status when the key is new
    pub insert_status: AuditStatus,
    /// Status written over an existing row
    pub update_status: AuditStatus,
    pub risk_score: f64,
    pub vulnerabilities_count: u32,
}

/// Finding row tagged with its owning contract
#[derive(Debug, Clone)]
pub struct NewAuditResultRow {
    pub contract_id: Uuid,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    pub line_number: Option<u32>,
}

/// Alert row as inserted
#[derive(Debug, Clone)]
pub struct NewAlertRow {
    pub owner_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub target_address: String,
    pub resolved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub id: Option<Uuid>,
    pub owner_id: Option<String>,
    pub network: Option<String>,
    pub address: Option<String>,
    /// Empty matches every status
    pub statuses: Vec<AuditStatus>,
}

impl ContractFilter {
    pub fn owned_by(owner_id: Option<&str>) -> Self {
        Self {
            owner_id: owner_id.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[AuditStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, contract: &SmartContract) -> bool {
        self.id.map_or(true, |id| contract.id == id)
            && self.owner_id.as_ref().map_or(true, |o| &contract.owner_id == o)
            && self.network.as_ref().map_or(true, |n| &contract.network == n)
            && self.address.as_ref().map_or(true, |a| &contract.address == a)
            && (self.statuses.is_empty() || self.statuses.contains(&contract.audit_status))
    }
}

/// Finding filter; `owner_id` applies through the owning contract
#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    pub owner_id: Option<String>,
    pub contract_id: Option<Uuid>,
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub owner_id: Option<String>,
    pub network: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub owner_id: Option<String>,
    pub severity: Option<Severity>,
    pub alert_type: Option<AlertType>,
    pub include_resolved: bool,
}

impl AlertFilter {
    pub fn matches(&self, alert: &RiskAlert) -> bool {
        self.owner_id.as_ref().map_or(true, |o| &alert.owner_id == o)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && (self.include_resolved || !alert.resolved)
    }
}

/// Row-oriented store over the four tracked collections
#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Short backend name for logs
    fn backend_tag(&self) -> &'static str;

    /// Insert or overwrite the contract keyed by owner, network and address.
    /// The conflict must be resolved atomically by the backend.
    async fn upsert_contract(&self, row: ContractUpsert) -> StoreResult<SmartContract>;

    /// Matching contracts, most recently updated first
    async fn select_contracts(&self, filter: &ContractFilter) -> StoreResult<Vec<SmartContract>>;

    async fn count_contracts(&self, filter: &ContractFilter) -> StoreResult<u64>;

    async fn contract_risk_scores(&self, filter: &ContractFilter) -> StoreResult<Vec<f64>>;

    /// Insert a batch of findings; either every row is written or none is
    async fn insert_audit_results(
        &self,
        rows: Vec<NewAuditResultRow>,
    ) -> StoreResult<Vec<AuditResult>>;

    async fn select_audit_results(&self, filter: &FindingFilter) -> StoreResult<Vec<AuditResult>>;

    async fn count_audit_results(&self, filter: &FindingFilter) -> StoreResult<u64>;

    async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64>;

    async fn insert_alert(&self, row: NewAlertRow) -> StoreResult<RiskAlert>;

    /// Matching alerts, newest first
    async fn select_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<RiskAlert>>;

    async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64>;

    /// Set `resolved` on an owner's alert; `None` when no such alert exists
    async fn update_alert_resolved(
        &self,
        id: Uuid,
        owner_id: &str,
        resolved: bool,
    ) -> StoreResult<Option<RiskAlert>>;

    /// Fetch one of an owner's alerts
    async fn get_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<Option<RiskAlert>>;

    /// Remove an owner's alert; `false` when it did not exist
    async fn delete_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<bool>;
}
