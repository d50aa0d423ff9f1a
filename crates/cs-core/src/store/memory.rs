//! In-process store backed by tokio mutexes

use super::{
    AlertFilter, ContractFilter, ContractUpsert, FindingFilter, NewAlertRow, NewAuditResultRow,
    SecurityStore, StoreError, StoreResult, TransactionFilter,
};
use crate::model::{AuditResult, OnChainTransaction, RiskAlert, SmartContract};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    contracts: Vec<SmartContract>,
    audit_results: Vec<AuditResult>,
    transactions: Vec<OnChainTransaction>,
    alerts: Vec<RiskAlert>,
}

/// Store used for tests, demos and the API when no database is configured.
///
/// All collections sit behind one lock, so each trait call is atomic.
/// Operations can be made to fail on demand with [`MemoryStore::fail_operation`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: std::sync::Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of the named trait method fail
    pub fn fail_operation(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation.to_string());
        }
    }

    /// Undo [`MemoryStore::fail_operation`]
    pub fn heal_operation(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(operation);
        }
    }

    /// Seed a transaction; ingestion itself lives outside this crate
    pub async fn insert_transaction(&self, tx: OnChainTransaction) {
        self.tables.lock().await.transactions.push(tx);
    }

    fn check(&self, operation: &str) -> StoreResult<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| StoreError::Backend("failure registry poisoned".to_string()))?;
        if failing.contains(operation) {
            return Err(StoreError::Backend(format!("{} unavailable", operation)));
        }
        Ok(())
    }
}

fn finding_matches(tables: &Tables, filter: &FindingFilter, finding: &AuditResult) -> bool {
    if filter.contract_id.map_or(false, |id| finding.contract_id != id) {
        return false;
    }
    if filter.severity.map_or(false, |s| finding.severity != s) {
        return false;
    }
    match &filter.owner_id {
        None => true,
        Some(owner) => tables
            .contracts
            .iter()
            .any(|c| c.id == finding.contract_id && &c.owner_id == owner),
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn upsert_contract(&self, row: ContractUpsert) -> StoreResult<SmartContract> {
        self.check("upsert_contract")?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(existing) = tables.contracts.iter_mut().find(|c| {
            c.owner_id == row.owner_id && c.network == row.network && c.address == row.address
        }) {
            existing.name = row.name;
            existing.audit_status = row.update_status;
            existing.risk_score = row.risk_score;
            existing.vulnerabilities_count = row.vulnerabilities_count;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let contract = SmartContract {
            id: Uuid::new_v4(),
            address: row.address,
            name: row.name,
            network: row.network,
            audit_status: row.insert_status,
            risk_score: row.risk_score,
            vulnerabilities_count: row.vulnerabilities_count,
            owner_id: row.owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.contracts.push(contract.clone());
        Ok(contract)
    }

    async fn select_contracts(&self, filter: &ContractFilter) -> StoreResult<Vec<SmartContract>> {
        self.check("select_contracts")?;
        let tables = self.tables.lock().await;
        let mut contracts: Vec<SmartContract> = tables
            .contracts
            .iter()
            .rev()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        contracts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(contracts)
    }

    async fn count_contracts(&self, filter: &ContractFilter) -> StoreResult<u64> {
        self.check("count_contracts")?;
        let tables = self.tables.lock().await;
        Ok(tables.contracts.iter().filter(|c| filter.matches(c)).count() as u64)
    }

    async fn contract_risk_scores(&self, filter: &ContractFilter) -> StoreResult<Vec<f64>> {
        self.check("contract_risk_scores")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .contracts
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| c.risk_score)
            .collect())
    }

    async fn insert_audit_results(
        &self,
        rows: Vec<NewAuditResultRow>,
    ) -> StoreResult<Vec<AuditResult>> {
        self.check("insert_audit_results")?;
        let mut tables = self.tables.lock().await;

        for row in &rows {
            if !tables.contracts.iter().any(|c| c.id == row.contract_id) {
                return Err(StoreError::Backend(format!(
                    "contract {} does not exist",
                    row.contract_id
                )));
            }
        }

        let now = Utc::now();
        let inserted: Vec<AuditResult> = rows
            .into_iter()
            .map(|row| AuditResult {
                id: Uuid::new_v4(),
                contract_id: row.contract_id,
                vulnerability_type: row.vulnerability_type,
                severity: row.severity,
                description: row.description,
                recommendation: row.recommendation,
                line_number: row.line_number,
                created_at: now,
            })
            .collect();
        tables.audit_results.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn select_audit_results(&self, filter: &FindingFilter) -> StoreResult<Vec<AuditResult>> {
        self.check("select_audit_results")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .audit_results
            .iter()
            .filter(|f| finding_matches(&tables, filter, f))
            .cloned()
            .collect())
    }

    async fn count_audit_results(&self, filter: &FindingFilter) -> StoreResult<u64> {
        self.check("count_audit_results")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .audit_results
            .iter()
            .filter(|f| finding_matches(&tables, filter, f))
            .count() as u64)
    }

    async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64> {
        self.check("count_transactions")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| filter.owner_id.as_ref().map_or(true, |o| &t.owner_id == o))
            .filter(|t| filter.network.as_ref().map_or(true, |n| &t.network == n))
            .count() as u64)
    }

    async fn insert_alert(&self, row: NewAlertRow) -> StoreResult<RiskAlert> {
        self.check("insert_alert")?;
        let alert = RiskAlert {
            id: Uuid::new_v4(),
            alert_type: row.alert_type,
            severity: row.severity,
            title: row.title,
            description: row.description,
            target_address: row.target_address,
            resolved: row.resolved,
            created_at: Utc::now(),
            owner_id: row.owner_id,
        };
        self.tables.lock().await.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn select_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<RiskAlert>> {
        self.check("select_alerts")?;
        let tables = self.tables.lock().await;
        // Reverse insertion order first so equal timestamps stay newest first
        let mut alerts: Vec<RiskAlert> = tables
            .alerts
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64> {
        self.check("count_alerts")?;
        let tables = self.tables.lock().await;
        Ok(tables.alerts.iter().filter(|a| filter.matches(a)).count() as u64)
    }

    async fn update_alert_resolved(
        &self,
        id: Uuid,
        owner_id: &str,
        resolved: bool,
    ) -> StoreResult<Option<RiskAlert>> {
        self.check("update_alert_resolved")?;
        let mut tables = self.tables.lock().await;
        Ok(tables
            .alerts
            .iter_mut()
            .find(|a| a.id == id && a.owner_id == owner_id)
            .map(|alert| {
                alert.resolved = resolved;
                alert.clone()
            }))
    }

    async fn get_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<Option<RiskAlert>> {
        self.check("get_alert")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .alerts
            .iter()
            .find(|a| a.id == id && a.owner_id == owner_id)
            .cloned())
    }

    async fn delete_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<bool> {
        self.check("delete_alert")?;
        let mut tables = self.tables.lock().await;
        let before = tables.alerts.len();
        tables.alerts.retain(|a| !(a.id == id && a.owner_id == owner_id));
        Ok(tables.alerts.len() < before)
    }
}
