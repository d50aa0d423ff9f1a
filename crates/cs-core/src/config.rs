//! Runtime configuration for the core services

use crate::model::AuditStatus;
use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// How the dashboard reacts when a sub-query fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPolicy {
    /// Default the failed field to zero and record it as degraded
    Degrade,
    /// Fail the whole request
    Surface,
}

impl std::str::FromStr for StatsPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "degrade" => Ok(StatsPolicy::Degrade),
            "surface" => Ok(StatsPolicy::Surface),
            other => Err(CoreError::Validation(format!("unknown stats policy '{}'", other))),
        }
    }
}

/// Core service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Status given to a contract whose audit produced no findings
    pub empty_audit_status: AuditStatus,
    /// Network used when a submission leaves it blank
    pub default_network: String,
    /// Permit `resolved: true -> false` on alerts
    pub allow_alert_reopen: bool,
    /// Dashboard behaviour on sub-query failure
    pub stats_policy: StatsPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            empty_audit_status: AuditStatus::Completed,
            default_network: "ethereum".to_string(),
            allow_alert_reopen: false,
            stats_policy: StatsPolicy::Degrade,
        }
    }
}

impl CoreConfig {
    /// Build from `CS_*` environment variables, falling back to defaults
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(status) = lookup("CS_EMPTY_AUDIT_STATUS") {
            config.empty_audit_status = status
                .trim()
                .parse::<AuditStatus>()
                .map_err(invalid("CS_EMPTY_AUDIT_STATUS"))?;
        }
        if let Some(network) = lookup("CS_DEFAULT_NETWORK") {
            let network = network.trim();
            if network.is_empty() {
                return Err(CoreError::Config("CS_DEFAULT_NETWORK is empty".to_string()));
            }
            config.default_network = network.to_string();
        }
        if let Some(flag) = lookup("CS_ALLOW_ALERT_REOPEN") {
            config.allow_alert_reopen = parse_flag(&flag)?;
        }
        if let Some(policy) = lookup("CS_STATS_POLICY") {
            config.stats_policy = policy
                .parse::<StatsPolicy>()
                .map_err(invalid("CS_STATS_POLICY"))?;
        }

        Ok(config)
    }
}

fn invalid(key: &'static str) -> impl Fn(CoreError) -> CoreError {
    move |e| CoreError::Config(format!("{}: {}", key, e))
}

fn parse_flag(value: &str) -> CoreResult<bool> {
    let v = value.trim();
    if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(CoreError::Config(format!("expected a boolean flag, got '{}'", value)))
    }
}
