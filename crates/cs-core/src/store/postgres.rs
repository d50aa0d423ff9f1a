//! PostgreSQL store

use super::{
    AlertFilter, ContractFilter, ContractUpsert, FindingFilter, NewAlertRow, NewAuditResultRow,
    SecurityStore, StoreError, StoreResult, TransactionFilter,
};
use crate::model::{AlertType, AuditResult, AuditStatus, RiskAlert, Severity, SmartContract};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;
use uuid::Uuid;

const CONTRACT_COLUMNS: &str = "id, owner_id, address, name, network, audit_status, risk_score, \
                                vulnerabilities_count, created_at, updated_at";

const FINDING_COLUMNS: &str = "ar.id, ar.contract_id, ar.vulnerability_type, ar.severity, \
                               ar.description, ar.recommendation, ar.line_number, ar.created_at";

const ALERT_COLUMNS: &str = "id, owner_id, alert_type, severity, title, description, \
                             target_address, resolved, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("Connected to database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }
}

fn decode<T, E: std::fmt::Display>(value: Result<T, E>) -> StoreResult<T> {
    value.map_err(|e| StoreError::Decode(e.to_string()))
}

fn contract_from_row(row: &PgRow) -> StoreResult<SmartContract> {
    let status: String = row.try_get("audit_status")?;
    let count: i32 = row.try_get("vulnerabilities_count")?;
    Ok(SmartContract {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        name: row.try_get("name")?,
        network: row.try_get("network")?,
        audit_status: decode(status.parse::<AuditStatus>())?,
        risk_score: row.try_get("risk_score")?,
        vulnerabilities_count: decode(u32::try_from(count))?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn finding_from_row(row: &PgRow) -> StoreResult<AuditResult> {
    let severity: String = row.try_get("severity")?;
    let line_number: Option<i32> = row.try_get("line_number")?;
    Ok(AuditResult {
        id: row.try_get("id")?,
        contract_id: row.try_get("contract_id")?,
        vulnerability_type: row.try_get("vulnerability_type")?,
        severity: decode(severity.parse::<Severity>())?,
        description: row.try_get("description")?,
        recommendation: row.try_get("recommendation")?,
        line_number: decode(line_number.map(u32::try_from).transpose())?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> StoreResult<RiskAlert> {
    let alert_type: String = row.try_get("alert_type")?;
    let severity: String = row.try_get("severity")?;
    Ok(RiskAlert {
        id: row.try_get("id")?,
        alert_type: decode(alert_type.parse::<AlertType>())?,
        severity: decode(severity.parse::<Severity>())?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        target_address: row.try_get("target_address")?,
        resolved: row.try_get("resolved")?,
        created_at: row.try_get("created_at")?,
        owner_id: row.try_get("owner_id")?,
    })
}

fn push_contract_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ContractFilter) {
    qb.push(" WHERE TRUE");
    if let Some(id) = filter.id {
        qb.push(" AND id = ").push_bind(id);
    }
    if let Some(owner) = &filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner.clone());
    }
    if let Some(network) = &filter.network {
        qb.push(" AND network = ").push_bind(network.clone());
    }
    if let Some(address) = &filter.address {
        qb.push(" AND address = ").push_bind(address.clone());
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        qb.push(" AND audit_status = ANY(").push_bind(statuses).push(")");
    }
}

fn push_finding_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &FindingFilter) {
    qb.push(" FROM audit_results ar JOIN smart_contracts sc ON sc.id = ar.contract_id WHERE TRUE");
    if let Some(owner) = &filter.owner_id {
        qb.push(" AND sc.owner_id = ").push_bind(owner.clone());
    }
    if let Some(contract_id) = filter.contract_id {
        qb.push(" AND ar.contract_id = ").push_bind(contract_id);
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND ar.severity = ").push_bind(severity.as_str());
    }
}

fn push_alert_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AlertFilter) {
    qb.push(" WHERE TRUE");
    if let Some(owner) = &filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner.clone());
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(alert_type) = filter.alert_type {
        qb.push(" AND alert_type = ").push_bind(alert_type.as_str());
    }
    if !filter.include_resolved {
        qb.push(" AND resolved = FALSE");
    }
}

async fn fetch_count(mut qb: QueryBuilder<'_, Postgres>, pool: &PgPool) -> StoreResult<u64> {
    let count = qb.build_query_scalar::<i64>().fetch_one(pool).await?;
    Ok(count.max(0) as u64)
}

#[async_trait]
impl SecurityStore for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn upsert_contract(&self, row: ContractUpsert) -> StoreResult<SmartContract> {
        let sql = format!(
            r#"
            INSERT INTO smart_contracts
                (id, owner_id, address, name, network, audit_status, risk_score,
                 vulnerabilities_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (owner_id, network, address) DO UPDATE SET
                name = EXCLUDED.name,
                audit_status = $9,
                risk_score = EXCLUDED.risk_score,
                vulnerabilities_count = EXCLUDED.vulnerabilities_count,
                updated_at = NOW()
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        );
        let count = i32::try_from(row.vulnerabilities_count)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let record = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&row.owner_id)
            .bind(&row.address)
            .bind(&row.name)
            .bind(&row.network)
            .bind(row.insert_status.as_str())
            .bind(row.risk_score)
            .bind(count)
            .bind(row.update_status.as_str())
            .fetch_one(&self.pool)
            .await?;

        contract_from_row(&record)
    }

    async fn select_contracts(&self, filter: &ContractFilter) -> StoreResult<Vec<SmartContract>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM smart_contracts", CONTRACT_COLUMNS));
        push_contract_filter(&mut qb, filter);
        qb.push(" ORDER BY updated_at DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(contract_from_row).collect()
    }

    async fn count_contracts(&self, filter: &ContractFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM smart_contracts");
        push_contract_filter(&mut qb, filter);
        fetch_count(qb, &self.pool).await
    }

    async fn contract_risk_scores(&self, filter: &ContractFilter) -> StoreResult<Vec<f64>> {
        let mut qb = QueryBuilder::new("SELECT risk_score FROM smart_contracts");
        push_contract_filter(&mut qb, filter);
        let scores = qb.build_query_scalar::<f64>().fetch_all(&self.pool).await?;
        Ok(scores)
    }

    async fn insert_audit_results(
        &self,
        rows: Vec<NewAuditResultRow>,
    ) -> StoreResult<Vec<AuditResult>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(rows.len());

        for row in rows {
            let line_number = row
                .line_number
                .map(i32::try_from)
                .transpose()
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            let record = sqlx::query(
                r#"
                INSERT INTO audit_results
                    (id, contract_id, vulnerability_type, severity, description,
                     recommendation, line_number, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                RETURNING id, contract_id, vulnerability_type, severity, description,
                          recommendation, line_number, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.contract_id)
            .bind(&row.vulnerability_type)
            .bind(row.severity.as_str())
            .bind(&row.description)
            .bind(&row.recommendation)
            .bind(line_number)
            .fetch_one(&mut *tx)
            .await?;

            inserted.push(finding_from_row(&record)?);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn select_audit_results(&self, filter: &FindingFilter) -> StoreResult<Vec<AuditResult>> {
        let mut qb = QueryBuilder::new(format!("SELECT {}", FINDING_COLUMNS));
        push_finding_filter(&mut qb, filter);
        qb.push(" ORDER BY ar.created_at ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(finding_from_row).collect()
    }

    async fn count_audit_results(&self, filter: &FindingFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*)");
        push_finding_filter(&mut qb, filter);
        fetch_count(qb, &self.pool).await
    }

    async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM on_chain_transactions WHERE TRUE");
        if let Some(owner) = &filter.owner_id {
            qb.push(" AND owner_id = ").push_bind(owner.clone());
        }
        if let Some(network) = &filter.network {
            qb.push(" AND network = ").push_bind(network.clone());
        }
        fetch_count(qb, &self.pool).await
    }

    async fn insert_alert(&self, row: NewAlertRow) -> StoreResult<RiskAlert> {
        let sql = format!(
            r#"
            INSERT INTO risk_alerts
                (id, owner_id, alert_type, severity, title, description,
                 target_address, resolved, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING {}
            "#,
            ALERT_COLUMNS
        );

        let record = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&row.owner_id)
            .bind(row.alert_type.as_str())
            .bind(row.severity.as_str())
            .bind(&row.title)
            .bind(&row.description)
            .bind(&row.target_address)
            .bind(row.resolved)
            .fetch_one(&self.pool)
            .await?;

        alert_from_row(&record)
    }

    async fn select_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<RiskAlert>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM risk_alerts", ALERT_COLUMNS));
        push_alert_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, seq DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM risk_alerts");
        push_alert_filter(&mut qb, filter);
        fetch_count(qb, &self.pool).await
    }

    async fn update_alert_resolved(
        &self,
        id: Uuid,
        owner_id: &str,
        resolved: bool,
    ) -> StoreResult<Option<RiskAlert>> {
        let sql = format!(
            "UPDATE risk_alerts SET resolved = $3 WHERE id = $1 AND owner_id = $2 RETURNING {}",
            ALERT_COLUMNS
        );
        let record = sqlx::query(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(resolved)
            .fetch_optional(&self.pool)
            .await?;

        record.as_ref().map(alert_from_row).transpose()
    }

    async fn get_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<Option<RiskAlert>> {
        let sql = format!(
            "SELECT {} FROM risk_alerts WHERE id = $1 AND owner_id = $2",
            ALERT_COLUMNS
        );
        let record = sqlx::query(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;

        record.as_ref().map(alert_from_row).transpose()
    }

    async fn delete_alert(&self, id: Uuid, owner_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM risk_alerts WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
