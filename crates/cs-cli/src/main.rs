//! Contract Sentry CLI

use clap::{Parser, Subcommand};
use cs_core::model::severity_counts;
use cs_core::scoring;
use cs_core::{
    AlertListFilter, AlertType, AuditSubmission, CoreConfig, NewFinding, NewRiskAlert, PgStore,
    Principal, RequestContext, RiskBand, SecurityCore, Severity, StatsScope,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cs-sentry")]
#[command(about = "Smart Contract Security Posture Tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Owner id to act as
    #[arg(long, env = "CS_OWNER", global = true)]
    owner: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a findings file without touching the database
    Score {
        /// JSON file: a list of findings or an audit submission
        #[arg(short, long)]
        findings: PathBuf,
    },

    /// Record an audit for a contract
    Submit {
        /// Contract address
        #[arg(short, long)]
        address: String,

        /// Display name (defaults to one derived from the address)
        #[arg(short, long, default_value = "")]
        name: String,

        /// Network (defaults to CS_DEFAULT_NETWORK or ethereum)
        #[arg(short = 'N', long, default_value = "")]
        network: String,

        /// JSON file with the findings
        #[arg(short, long)]
        findings: PathBuf,
    },

    /// List the owner's contracts
    Contracts,

    /// Show dashboard statistics
    Stats {
        /// Cover every owner instead of --owner
        #[arg(long)]
        global: bool,
    },

    /// Manage risk alerts
    #[command(subcommand)]
    Alerts(AlertCommands),
}

#[derive(Subcommand)]
enum AlertCommands {
    /// List alerts, newest first
    List {
        /// Only this severity (low, medium, high, critical)
        #[arg(short, long)]
        severity: Option<String>,

        /// Only this type (contract, transaction, address, network)
        #[arg(short = 't', long = "type")]
        alert_type: Option<String>,

        /// Include resolved alerts
        #[arg(long)]
        all: bool,
    },

    /// Open a new alert
    Create {
        #[arg(short = 't', long = "type")]
        alert_type: String,

        #[arg(short, long)]
        severity: String,

        #[arg(long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Address the alert concerns
        #[arg(long)]
        target: String,
    },

    /// Mark an alert resolved
    Resolve { id: Uuid },

    /// Delete an alert
    Delete { id: Uuid },
}

/// Accepted shapes of a findings file
#[derive(Deserialize)]
#[serde(untagged)]
enum FindingsFile {
    List(Vec<NewFinding>),
    Submission(AuditSubmission),
}

impl FindingsFile {
    fn into_findings(self) -> Vec<NewFinding> {
        match self {
            FindingsFile::List(findings) => findings,
            FindingsFile::Submission(submission) => submission.findings,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    match cli.command {
        Commands::Score { findings } => {
            cmd_score(&findings);
        }
        Commands::Submit { address, name, network, findings } => {
            let (core, ctx) = open_core(cli.database_url, cli.owner).await;
            cmd_submit(&core, &ctx, address, name, network, &findings).await;
        }
        Commands::Contracts => {
            let (core, ctx) = open_core(cli.database_url, cli.owner).await;
            cmd_contracts(&core, &ctx).await;
        }
        Commands::Stats { global } => {
            let (core, ctx) = open_core(cli.database_url, cli.owner).await;
            let scope = if global {
                StatsScope::All
            } else {
                StatsScope::from_context(&ctx)
            };
            cmd_stats(&core, &scope).await;
        }
        Commands::Alerts(command) => {
            let (core, ctx) = open_core(cli.database_url, cli.owner).await;
            cmd_alerts(&core, &ctx, command).await;
        }
    }
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{}: {}", context, e);
    std::process::exit(1);
}

async fn open_core(database_url: Option<String>, owner: Option<String>) -> (SecurityCore, RequestContext) {
    let url = database_url
        .unwrap_or_else(|| fail("No database", "pass --database-url or set DATABASE_URL"));
    let config = CoreConfig::from_env().unwrap_or_else(|e| fail("Invalid configuration", e));

    let store = PgStore::connect(&url, 2)
        .await
        .unwrap_or_else(|e| fail("Failed to connect to database", e));
    store
        .migrate()
        .await
        .unwrap_or_else(|e| fail("Failed to run migrations", e));

    let ctx = match owner {
        Some(owner) => RequestContext::for_principal(Principal::new(owner)),
        None => RequestContext::anonymous(),
    };
    (SecurityCore::new(Arc::new(store), config), ctx)
}

fn load_findings(path: &Path) -> Vec<NewFinding> {
    let raw = std::fs::read_to_string(path)
        .unwrap_or_else(|e| fail(&format!("Failed to read {}", path.display()), e));
    parse_findings(&raw).unwrap_or_else(|e| fail(&format!("Invalid findings in {}", path.display()), e))
}

fn parse_findings(raw: &str) -> serde_json::Result<Vec<NewFinding>> {
    serde_json::from_str::<FindingsFile>(raw).map(FindingsFile::into_findings)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => fail("Failed to serialize output", e),
    }
}

fn cmd_score(path: &Path) {
    info!("Scoring findings: {}", path.display());
    let findings = load_findings(path);
    let score = scoring::score_findings(&findings);

    println!("\nRisk Score\n{}", "=".repeat(50));
    println!("Findings: {}", findings.len());
    println!("Score:    {:.1} ({})", score, RiskBand::from_score(score));

    println!("\nBy severity:");
    for (severity, count) in severity_counts(findings.iter().map(|f| f.severity)).iter().rev() {
        println!("  {:<9} {}", severity, count);
    }
}

async fn cmd_submit(
    core: &SecurityCore,
    ctx: &RequestContext,
    address: String,
    name: String,
    network: String,
    findings_path: &Path,
) {
    let submission = AuditSubmission {
        address,
        name,
        network,
        findings: load_findings(findings_path),
    };

    let outcome = core
        .registry
        .submit_audit(ctx, submission)
        .await
        .unwrap_or_else(|e| fail("Audit submission failed", e));

    let contract = &outcome.contract;
    println!("Contract:  {} ({})", contract.name, contract.id);
    println!("Network:   {}", contract.network);
    println!("Status:    {}", contract.audit_status);
    println!("Risk:      {:.1} ({})", contract.risk_score, contract.risk_band());
    println!("Findings:  {}", contract.vulnerabilities_count);

    if let Some(warning) = outcome.warning() {
        println!(
            "\nWARNING: contract saved but {} findings were not stored: {}",
            warning.attempted, warning.error
        );
        std::process::exit(2);
    }
}

async fn cmd_contracts(core: &SecurityCore, ctx: &RequestContext) {
    let contracts = core
        .registry
        .list_contracts(ctx)
        .await
        .unwrap_or_else(|e| fail("Failed to list contracts", e));

    println!("\nContracts\n{}", "=".repeat(50));
    for c in &contracts {
        println!(
            "{:<12} {:<10} {:>4.1} {:<9} {}",
            c.network,
            c.audit_status,
            c.risk_score,
            c.risk_band(),
            c.address
        );
    }
    println!("\n{} contracts", contracts.len());
}

async fn cmd_stats(core: &SecurityCore, scope: &StatsScope) {
    let snapshot = core
        .dashboard
        .compute_for_policy(scope)
        .await
        .unwrap_or_else(|e| fail("Failed to compute stats", e));

    print_json(&snapshot);

    for (field, err) in snapshot.provenance.degraded() {
        eprintln!("Warning: {} degraded: {}", field, err);
    }
}

async fn cmd_alerts(core: &SecurityCore, ctx: &RequestContext, command: AlertCommands) {
    match command {
        AlertCommands::List { severity, alert_type, all } => {
            let filter = AlertListFilter {
                severity: severity.map(|s| parse_or_exit::<Severity>(&s)),
                alert_type: alert_type.map(|t| parse_or_exit::<AlertType>(&t)),
                include_resolved: all,
            };
            let alerts = core
                .alerts
                .list(ctx, &filter)
                .await
                .unwrap_or_else(|e| fail("Failed to list alerts", e));

            for alert in &alerts {
                let state = if alert.resolved { "resolved" } else { "open" };
                println!(
                    "{} [{}] {:<8} {:<11} {} ({})",
                    alert.id, state, alert.severity, alert.alert_type, alert.title, alert.target_address
                );
            }
            println!("\n{} alerts", alerts.len());
        }
        AlertCommands::Create { alert_type, severity, title, description, target } => {
            let alert = NewRiskAlert {
                alert_type: parse_or_exit(&alert_type),
                severity: parse_or_exit(&severity),
                title,
                description,
                target_address: target,
            };
            let created = core
                .alerts
                .create(ctx, alert)
                .await
                .unwrap_or_else(|e| fail("Failed to create alert", e));
            println!("Created alert {}", created.id);
        }
        AlertCommands::Resolve { id } => {
            core.alerts
                .resolve(ctx, id)
                .await
                .unwrap_or_else(|e| fail("Failed to resolve alert", e));
            println!("Resolved alert {}", id);
        }
        AlertCommands::Delete { id } => {
            core.alerts
                .delete(ctx, id)
                .await
                .unwrap_or_else(|e| fail("Failed to delete alert", e));
            println!("Deleted alert {}", id);
        }
    }
}

fn parse_or_exit<T>(value: &str) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .to_lowercase()
        .parse()
        .unwrap_or_else(|e| fail("Invalid argument", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_findings_file_shapes() {
        let list = r#"[{"vulnerability_type":"Reentrancy","severity":"critical","description":"","recommendation":""}]"#;
        assert_eq!(parse_findings(list).unwrap().len(), 1);

        let submission = r#"{"address":"0xabc","findings":[
            {"vulnerability_type":"A","severity":"low","description":"","recommendation":""},
            {"vulnerability_type":"B","severity":"high","description":"","recommendation":"","line_number":7}
        ]}"#;
        let findings = parse_findings(submission).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(scoring::score_findings(&findings), 5.0);

        assert!(parse_findings(r#"[{"severity":"severe"}]"#).is_err());
    }

    #[test]
    fn test_cli_parses_alert_subcommand() {
        let cli = Cli::try_parse_from([
            "cs-sentry", "--owner", "u1", "alerts", "list", "--severity", "critical", "--all",
        ])
        .unwrap();
        assert_eq!(cli.owner.as_deref(), Some("u1"));
        assert!(matches!(
            cli.command,
            Commands::Alerts(AlertCommands::List { all: true, .. })
        ));
    }
}
