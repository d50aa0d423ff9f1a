//! Records tracked by the security-posture core

use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Severity levels for findings and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Fixed weight contributed to a contract's risk score
    pub fn weight(self) -> u32 {
        match self {
            Severity::Critical => 9,
            Severity::High => 7,
            Severity::Medium => 5,
            Severity::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(CoreError::Validation(format!("unknown severity '{}'", other))),
        }
    }
}

/// Audit lifecycle of a tracked contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::InProgress => "in_progress",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
        }
    }

    /// Statuses counted as "active audits" on the dashboard
    pub fn is_active(self) -> bool {
        matches!(self, AuditStatus::Pending | AuditStatus::InProgress)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "pending" => Ok(AuditStatus::Pending),
            "in_progress" => Ok(AuditStatus::InProgress),
            "completed" => Ok(AuditStatus::Completed),
            "failed" => Ok(AuditStatus::Failed),
            other => Err(CoreError::Validation(format!("unknown audit status '{}'", other))),
        }
    }
}

/// What a risk alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Contract,
    Transaction,
    Address,
    Network,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Contract => "contract",
            AlertType::Transaction => "transaction",
            AlertType::Address => "address",
            AlertType::Network => "network",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "contract" => Ok(AlertType::Contract),
            "transaction" => Ok(AlertType::Transaction),
            "address" => Ok(AlertType::Address),
            "network" => Ok(AlertType::Network),
            other => Err(CoreError::Validation(format!("unknown alert type '{}'", other))),
        }
    }
}

/// A tracked on-chain contract under a given owner.
///
/// `(owner_id, network, address)` is unique across the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartContract {
    pub id: Uuid,
    pub address: String,
    pub name: String,
    pub network: String,
    pub audit_status: AuditStatus,
    pub risk_score: f64,
    pub vulnerabilities_count: u32,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SmartContract {
    pub fn key(&self) -> ContractKey {
        ContractKey {
            owner_id: self.owner_id.clone(),
            network: self.network.clone(),
            address: self.address.clone(),
        }
    }

    pub fn risk_band(&self) -> crate::scoring::RiskBand {
        crate::scoring::RiskBand::from_score(self.risk_score)
    }
}

/// Uniqueness key of a tracked contract
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractKey {
    pub owner_id: String,
    pub network: String,
    pub address: String,
}

/// One finding belonging to exactly one contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    pub line_number: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// A finding as submitted, before it is attached to a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinding {
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    #[serde(default)]
    pub line_number: Option<u32>,
}

/// An actionable notification, distinct from audit findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub target_address: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub owner_id: String,
}

/// Alert fields supplied by the caller on creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRiskAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub target_address: String,
}

/// Observed transaction, written by an external ingestion process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainTransaction {
    pub id: Uuid,
    pub hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
    pub gas_used: String,
    pub gas_price: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub risk_score: f64,
    pub flagged_reason: Option<String>,
    pub network: String,
    pub owner_id: String,
}

/// Roll-up dashboard snapshot, recomputed on every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_contracts_audited: u64,
    pub active_audits: u64,
    pub critical_vulnerabilities: u64,
    pub transactions_analyzed: u64,
    pub risk_alerts: u64,
    pub avg_risk_score: f64,
}

/// Count severities; every severity is present in the result
pub fn severity_counts<I>(severities: I) -> BTreeMap<Severity, usize>
where
    I: IntoIterator<Item = Severity>,
{
    let mut counts: BTreeMap<Severity, usize> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for severity in severities {
        *counts.entry(severity).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse_is_closed() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert!(matches!(
            "severe".parse::<Severity>(),
            Err(CoreError::Validation(_))
        ));
        assert!("Critical".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_audit_status_text_matches_serde() {
        for status in [
            AuditStatus::Pending,
            AuditStatus::InProgress,
            AuditStatus::Completed,
            AuditStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<AuditStatus>().unwrap(), status);
        }
        assert!(AuditStatus::InProgress.is_active());
        assert!(!AuditStatus::Failed.is_active());
    }

    #[test]
    fn test_alert_serializes_type_field() {
        let alert = NewRiskAlert {
            alert_type: AlertType::Network,
            severity: Severity::High,
            title: "Reorg".to_string(),
            description: "Deep reorg observed".to_string(),
            target_address: "0x0".to_string(),
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["type"], "network");
        assert_eq!(value["severity"], "high");
    }

    #[test]
    fn test_severity_counts_includes_zero_buckets() {
        let finding = AuditResult {
            id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            vulnerability_type: "Reentrancy".to_string(),
            severity: Severity::Critical,
            description: String::new(),
            recommendation: String::new(),
            line_number: Some(45),
            created_at: Utc::now(),
        };
        let counts = severity_counts([&finding, &finding].iter().map(|f| f.severity));
        assert_eq!(counts[&Severity::Critical], 2);
        assert_eq!(counts[&Severity::Low], 0);
        assert_eq!(counts.len(), 4);
    }
}
