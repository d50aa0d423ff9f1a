//! Contract registry
//!
//! Owns writes to tracked contracts and their findings. Submitting an audit
//! upserts the contract row for `(owner, network, address)` and then attaches
//! the findings to whichever row the upsert produced.

use crate::config::CoreConfig;
use crate::context::RequestContext;
use crate::model::{AuditResult, AuditStatus, NewFinding, SmartContract};
use crate::scoring;
use crate::store::{
    ContractFilter, ContractUpsert, FindingFilter, NewAuditResultRow, SecurityStore, StoreError,
};
use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One audit run as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSubmission {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub findings: Vec<NewFinding>,
}

/// Findings that could not be stored after the contract row was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceWarning {
    pub contract_id: Uuid,
    pub attempted: usize,
    pub error: String,
}

/// Second half of an audit submission
#[derive(Debug, Clone, PartialEq)]
pub enum FindingsOutcome {
    Persisted(Vec<AuditResult>),
    NotPersisted(PersistenceWarning),
}

/// Result of [`ContractRegistry::submit_audit`].
///
/// The contract row is always current when this is returned. Findings are
/// reported separately because their insert can fail after the upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutcome {
    pub contract: SmartContract,
    pub findings: FindingsOutcome,
}

impl AuditOutcome {
    /// Stored findings, or `None` if they were not persisted
    pub fn findings(&self) -> Option<&[AuditResult]> {
        match &self.findings {
            FindingsOutcome::Persisted(results) => Some(results),
            FindingsOutcome::NotPersisted(_) => None,
        }
    }

    pub fn warning(&self) -> Option<&PersistenceWarning> {
        match &self.findings {
            FindingsOutcome::Persisted(_) => None,
            FindingsOutcome::NotPersisted(warning) => Some(warning),
        }
    }

    pub fn is_fully_persisted(&self) -> bool {
        matches!(self.findings, FindingsOutcome::Persisted(_))
    }
}

struct PreparedAudit {
    upsert: ContractUpsert,
    findings: Vec<NewFinding>,
}

pub struct ContractRegistry {
    store: Arc<dyn SecurityStore>,
    config: CoreConfig,
}

impl ContractRegistry {
    pub fn new(store: Arc<dyn SecurityStore>, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Record an audit for the caller's contract.
    ///
    /// Fails with `Unauthenticated` without a principal and with `Persistence`
    /// if the contract upsert fails, in which case no findings are written.
    /// A failed findings insert after a good upsert is reported through
    /// [`AuditOutcome::warning`] instead of an error.
    pub async fn submit_audit(
        &self,
        ctx: &RequestContext,
        submission: AuditSubmission,
    ) -> CoreResult<AuditOutcome> {
        let owner = ctx.require_principal()?;
        let prepared = self.prepare(owner.id(), submission)?;

        // The two writes run detached so a dropped caller cannot stop between them
        let store = Arc::clone(&self.store);
        tokio::spawn(apply_audit(store, prepared))
            .await
            .map_err(|e| {
                error!("Audit submission task failed: {}", e);
                CoreError::Persistence(StoreError::Backend(format!("audit task failed: {}", e)))
            })?
    }

    fn prepare(&self, owner_id: &str, submission: AuditSubmission) -> CoreResult<PreparedAudit> {
        let address = submission.address.trim().to_string();
        if address.is_empty() {
            return Err(CoreError::Validation("contract address is required".to_string()));
        }

        let network = match submission.network.trim() {
            "" => self.config.default_network.clone(),
            n => n.to_string(),
        };

        let name = match submission.name.trim() {
            "" => default_contract_name(&address),
            n => n.to_string(),
        };

        let vulnerabilities_count = u32::try_from(submission.findings.len())
            .map_err(|_| CoreError::Validation("too many findings in one audit".to_string()))?;

        // Only a newly created row takes the configured empty-audit status
        let insert_status = if submission.findings.is_empty() {
            self.config.empty_audit_status
        } else {
            AuditStatus::Completed
        };

        let risk_score = scoring::score_findings(&submission.findings);

        Ok(PreparedAudit {
            upsert: ContractUpsert {
                owner_id: owner_id.to_string(),
                address,
                name,
                network,
                insert_status,
                update_status: AuditStatus::Completed,
                risk_score,
                vulnerabilities_count,
            },
            findings: submission.findings,
        })
    }

    /// Look up the caller's contract by network and address
    pub async fn get_contract(
        &self,
        ctx: &RequestContext,
        network: &str,
        address: &str,
    ) -> CoreResult<Option<SmartContract>> {
        let owner = ctx.require_principal()?;
        let filter = ContractFilter {
            owner_id: Some(owner.id().to_string()),
            network: Some(network.to_string()),
            address: Some(address.to_string()),
            ..Default::default()
        };
        Ok(self.store.select_contracts(&filter).await?.into_iter().next())
    }

    /// The caller's contracts, most recently updated first
    pub async fn list_contracts(&self, ctx: &RequestContext) -> CoreResult<Vec<SmartContract>> {
        let owner = ctx.require_principal()?;
        let filter = ContractFilter::owned_by(Some(owner.id()));
        Ok(self.store.select_contracts(&filter).await?)
    }

    /// Findings attached to one of the caller's contracts
    pub async fn findings_for(
        &self,
        ctx: &RequestContext,
        contract_id: Uuid,
    ) -> CoreResult<Vec<AuditResult>> {
        let owner = ctx.require_principal()?;
        let filter = ContractFilter {
            id: Some(contract_id),
            ..ContractFilter::owned_by(Some(owner.id()))
        };
        if self.store.count_contracts(&filter).await? == 0 {
            return Err(CoreError::NotFound(format!("contract {}", contract_id)));
        }

        let findings = self
            .store
            .select_audit_results(&FindingFilter {
                contract_id: Some(contract_id),
                ..Default::default()
            })
            .await?;
        Ok(findings)
    }
}

async fn apply_audit(store: Arc<dyn SecurityStore>, prepared: PreparedAudit) -> CoreResult<AuditOutcome> {
    let PreparedAudit { upsert, findings } = prepared;
    let address = upsert.address.clone();

    let contract = store.upsert_contract(upsert).await.map_err(|e| {
        error!("Contract upsert for {} failed on {}: {}", address, store.backend_tag(), e);
        CoreError::from(e)
    })?;

    info!(
        "Audit recorded for contract {} ({} findings, risk {:.1})",
        contract.id, contract.vulnerabilities_count, contract.risk_score
    );

    if findings.is_empty() {
        return Ok(AuditOutcome {
            contract,
            findings: FindingsOutcome::Persisted(Vec::new()),
        });
    }

    let attempted = findings.len();
    let rows = findings
        .into_iter()
        .map(|f| NewAuditResultRow {
            contract_id: contract.id,
            vulnerability_type: f.vulnerability_type,
            severity: f.severity,
            description: f.description,
            recommendation: f.recommendation,
            line_number: f.line_number,
        })
        .collect();

    let findings = match store.insert_audit_results(rows).await {
        Ok(results) => {
            debug!("Stored {} findings for contract {}", results.len(), contract.id);
            FindingsOutcome::Persisted(results)
        }
        Err(e) => {
            warn!(
                "Contract {} updated but {} findings were not stored: {}",
                contract.id, attempted, e
            );
            FindingsOutcome::NotPersisted(PersistenceWarning {
                contract_id: contract.id,
                attempted,
                error: e.to_string(),
            })
        }
    };

    Ok(AuditOutcome { contract, findings })
}

/// Display name used when a submission has none
pub fn default_contract_name(address: &str) -> String {
    let prefix: String = address.chars().take(8).collect();
    format!("Contract {}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;
    use crate::model::{RiskAlert, Severity};
    use crate::store::{AlertFilter, MemoryStore, NewAlertRow, StoreResult, TransactionFilter};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn finding(severity: Severity) -> NewFinding {
        NewFinding {
            vulnerability_type: "Reentrancy".to_string(),
            severity,
            description: "External call before state update".to_string(),
            recommendation: "Use checks-effects-interactions".to_string(),
            line_number: Some(45),
        }
    }

    fn submission(address: &str, findings: Vec<NewFinding>) -> AuditSubmission {
        AuditSubmission {
            address: address.to_string(),
            name: String::new(),
            network: "ethereum".to_string(),
            findings,
        }
    }

    fn registry(store: Arc<MemoryStore>, config: CoreConfig) -> ContractRegistry {
        ContractRegistry::new(store, config)
    }

    fn ctx(owner: &str) -> RequestContext {
        RequestContext::for_principal(Principal::new(owner))
    }

    #[tokio::test]
    async fn test_requires_principal() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone(), CoreConfig::default());

        let result = registry
            .submit_audit(&RequestContext::anonymous(), submission("0xabc", vec![]))
            .await;
        assert!(matches!(result, Err(CoreError::Unauthenticated)));
        assert_eq!(store.count_contracts(&ContractFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_submission_wins() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone(), CoreConfig::default());

        let first = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![finding(Severity::Critical)]))
            .await
            .unwrap();
        let second = registry
            .submit_audit(
                &ctx("u1"),
                submission("0xabc", vec![finding(Severity::Low), finding(Severity::Low)]),
            )
            .await
            .unwrap();

        assert_eq!(first.contract.id, second.contract.id);
        assert_eq!(second.contract.risk_score, 3.0);
        assert_eq!(second.contract.vulnerabilities_count, 2);
        assert_eq!(store.count_contracts(&ContractFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_failure_writes_no_findings() {
        let store = Arc::new(MemoryStore::new());
        store.fail_operation("upsert_contract");
        let registry = registry(store.clone(), CoreConfig::default());

        let result = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![finding(Severity::High)]))
            .await;
        assert!(matches!(result, Err(CoreError::Persistence(_))));
        assert_eq!(
            store.count_audit_results(&FindingFilter::default()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_findings_failure_is_a_warning() {
        let store = Arc::new(MemoryStore::new());
        store.fail_operation("insert_audit_results");
        let registry = registry(store.clone(), CoreConfig::default());

        let outcome = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![finding(Severity::High)]))
            .await
            .unwrap();

        assert!(outcome.findings().is_none());
        let warning = outcome.warning().unwrap();
        assert_eq!(warning.contract_id, outcome.contract.id);
        assert_eq!(warning.attempted, 1);
        assert_eq!(outcome.contract.risk_score, 7.0);
        assert!(!outcome.is_fully_persisted());
    }

    #[tokio::test]
    async fn test_empty_findings_use_configured_status() {
        let store = Arc::new(MemoryStore::new());
        let config = CoreConfig {
            empty_audit_status: AuditStatus::Pending,
            ..CoreConfig::default()
        };
        let registry = registry(store.clone(), config);

        let outcome = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![]))
            .await
            .unwrap();

        assert_eq!(outcome.contract.audit_status, AuditStatus::Pending);
        assert_eq!(outcome.contract.risk_score, 0.0);
        assert_eq!(outcome.findings(), Some(&[][..]));
        assert!(outcome.warning().is_none());
    }

    #[tokio::test]
    async fn test_empty_resubmission_marks_existing_row_completed() {
        let store = Arc::new(MemoryStore::new());
        let config = CoreConfig {
            empty_audit_status: AuditStatus::Pending,
            ..CoreConfig::default()
        };
        let registry = registry(store.clone(), config);

        let first = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![finding(Severity::Low)]))
            .await
            .unwrap();
        assert_eq!(first.contract.audit_status, AuditStatus::Completed);

        let second = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![]))
            .await
            .unwrap();
        assert_eq!(second.contract.id, first.contract.id);
        assert_eq!(second.contract.audit_status, AuditStatus::Completed);
        assert_eq!(second.contract.risk_score, 0.0);

        let active = ContractFilter::owned_by(Some("u1"))
            .with_statuses(&[AuditStatus::Pending, AuditStatus::InProgress]);
        assert_eq!(store.count_contracts(&active).await.unwrap(), 0);
    }

    /// Parks `upsert_contract` until released
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SecurityStore for GatedStore {
        fn backend_tag(&self) -> &'static str {
            "gated"
        }

        async fn upsert_contract(&self, row: ContractUpsert) -> StoreResult<SmartContract> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.upsert_contract(row).await
        }

        async fn select_contracts(&self, filter: &ContractFilter) -> StoreResult<Vec<SmartContract>> {
            self.inner.select_contracts(filter).await
        }

        async fn count_contracts(&self, filter: &ContractFilter) -> StoreResult<u64> {
            self.inner.count_contracts(filter).await
        }

        async fn contract_risk_scores(&self, filter: &ContractFilter) -> StoreResult<Vec<f64>> {
            self.inner.contract_risk_scores(filter).await
        }

        async fn insert_audit_results(
            &self,
            rows: Vec<NewAuditResultRow>,
        ) -> StoreResult<Vec<AuditResult>> {
            self.inner.insert_audit_results(rows).await
        }

        async fn select_audit_results(&self, filter: &FindingFilter) -> StoreResult<Vec<AuditResult>> {
            self.inner.select_audit_results(filter).await
        }

        async fn count_audit_results(&self, filter: &FindingFilter) -> StoreResult<u64> {
            self.inner.count_audit_results(filter).await
        }

        async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64> {
            self.inner.count_transactions(filter).await
        }

        async fn insert_alert(&self, row: NewAlertRow) -> StoreResult<RiskAlert> {
            self.inner.insert_alert(row).await
        }

        async fn select_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<RiskAlert>> {
            self.inner.select_alerts(filter).await
        }

        async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64> {
            self.inner.count_alerts(filter).await
        }

        async fn update_alert_resolved(
            &self,
            id: Uuid,
            owner_id: &str,
            resolved: bool,
        ) -> StoreResult<Option<RiskAlert>> {
            self.inner.update_alert_resolved(id, owner_id, resolved).await
        }

        async fn get_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<Option<RiskAlert>> {
            self.inner.get_alert(id, owner_id).await
        }

        async fn delete_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<bool> {
            self.inner.delete_alert(id, owner_id).await
        }
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_split_audit() {
        let store = Arc::new(GatedStore::default());
        let registry = ContractRegistry::new(store.clone(), CoreConfig::default());
        let owner = ctx("u1");

        tokio::select! {
            _ = registry.submit_audit(&owner, submission("0xabc", vec![finding(Severity::High)])) => {
                panic!("submission finished while the upsert was parked");
            }
            _ = store.entered.notified() => {}
        }

        // The caller's future is gone; let the detached write continue
        store.release.notify_one();

        let mut stored = 0;
        for _ in 0..100 {
            stored = store
                .count_audit_results(&FindingFilter::default())
                .await
                .unwrap();
            if stored > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(stored, 1);
        assert_eq!(store.count_contracts(&ContractFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_defaults_and_validation() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store, CoreConfig::default());

        let blank = registry
            .submit_audit(&ctx("u1"), submission("   ", vec![]))
            .await;
        assert!(matches!(blank, Err(CoreError::Validation(_))));

        let mut sub = submission("0x1234567890abcdef", vec![]);
        sub.network = String::new();
        let outcome = registry.submit_audit(&ctx("u1"), sub).await.unwrap();
        assert_eq!(outcome.contract.network, "ethereum");
        assert_eq!(outcome.contract.name, "Contract 0x123456...");
    }

    #[tokio::test]
    async fn test_findings_scoped_to_owner() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store, CoreConfig::default());

        let outcome = registry
            .submit_audit(&ctx("u1"), submission("0xabc", vec![finding(Severity::Medium)]))
            .await
            .unwrap();

        let own = registry.findings_for(&ctx("u1"), outcome.contract.id).await.unwrap();
        assert_eq!(own.len(), 1);

        let other = registry.findings_for(&ctx("u2"), outcome.contract.id).await;
        assert!(matches!(other, Err(CoreError::NotFound(_))));

        assert!(registry
            .get_contract(&ctx("u2"), "ethereum", "0xabc")
            .await
            .unwrap()
            .is_none());
        assert_eq!(registry.list_contracts(&ctx("u1")).await.unwrap().len(), 1);
    }
}
