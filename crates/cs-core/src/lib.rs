//! Contract Sentry Core
//!
//! Risk scoring, contract registry, dashboard aggregation and alert lifecycle
//! for on-chain smart contracts, over a pluggable persistence layer.

pub mod alerts;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod model;
pub mod registry;
pub mod scoring;
pub mod store;

use std::sync::Arc;
use thiserror::Error;

pub use alerts::{AlertListFilter, AlertManager};
pub use config::{CoreConfig, StatsPolicy};
pub use context::{Principal, RequestContext};
pub use dashboard::{DashboardAggregator, DashboardSnapshot, FieldSource, StatsScope};
pub use model::{
    AlertType, AuditResult, AuditStatus, DashboardStats, NewFinding, NewRiskAlert, RiskAlert,
    Severity, SmartContract,
};
pub use registry::{
    AuditOutcome, AuditSubmission, ContractRegistry, FindingsOutcome, PersistenceWarning,
};
pub use scoring::RiskBand;
pub use store::{MemoryStore, PgStore, SecurityStore, StoreError};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// The three services sharing one store and configuration
pub struct SecurityCore {
    pub registry: ContractRegistry,
    pub alerts: AlertManager,
    pub dashboard: DashboardAggregator,
}

impl SecurityCore {
    pub fn new(store: Arc<dyn SecurityStore>, config: CoreConfig) -> Self {
        Self {
            registry: ContractRegistry::new(store.clone(), config.clone()),
            alerts: AlertManager::new(store.clone(), config.clone()),
            dashboard: DashboardAggregator::new(store, config),
        }
    }

    /// Services over a fresh [`MemoryStore`]
    pub fn in_memory(config: CoreConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }
}
