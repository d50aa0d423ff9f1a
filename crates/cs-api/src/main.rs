//! Contract Sentry API Server

mod auth;
mod error;
mod routes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use cs_core::{CoreConfig, MemoryStore, PgStore, SecurityCore, SecurityStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers
pub struct AppState {
    pub core: SecurityCore,
    pub config: AppConfig,
}

/// Application configuration
#[derive(Clone)]
pub struct AppConfig {
    /// Postgres URL; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub max_connections: u32,
    /// Owner id -> bearer token
    pub api_tokens: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            api_tokens: auth::parse_api_tokens(&std::env::var("API_TOKENS").unwrap_or_default()),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(routes::health_check))

        // Contracts and audits
        .route("/api/audits", post(routes::audits::submit_audit))
        .route("/api/contracts", get(routes::contracts::list_contracts))
        .route("/api/contracts/:id/findings", get(routes::contracts::get_findings))

        // Dashboard
        .route("/api/stats", get(routes::stats::get_stats))

        // Alerts
        .route("/api/alerts", get(routes::alerts::list_alerts))
        .route("/api/alerts", post(routes::alerts::create_alert))
        .route("/api/alerts/:id/resolve", post(routes::alerts::resolve_alert))
        .route("/api/alerts/:id", delete(routes::alerts::delete_alert))

        // CORS
        .layer(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any))

        // Tracing
        .layer(TraceLayer::new_for_http())

        // State
        .with_state(state)
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn SecurityStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cs_api=debug,cs_core=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Contract Sentry API Server");

    let config = AppConfig::default();

    let core_config = match CoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let store = match open_store(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    if config.api_tokens.is_empty() {
        warn!("API_TOKENS is empty; every request is treated as anonymous");
    } else {
        info!("Loaded tokens for {} owners", config.api_tokens.len());
    }

    let state = Arc::new(AppState {
        core: SecurityCore::new(store, core_config),
        config: config.clone(),
    });

    let app = build_router(state);

    // Start server
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let mut api_tokens = BTreeMap::new();
        api_tokens.insert("u1".to_string(), "token-u1".to_string());
        api_tokens.insert("u2".to_string(), "token-u2".to_string());

        let state = Arc::new(AppState {
            core: SecurityCore::in_memory(CoreConfig::default()),
            config: AppConfig {
                database_url: None,
                bind_addr: "127.0.0.1:0".to_string(),
                max_connections: 1,
                api_tokens,
            },
        });
        build_router(state)
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        // Extractor rejections are plain text
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_requires_token() {
        let app = test_app();
        let body = serde_json::json!({ "address": "0xabc", "findings": [] });

        let (status, _) = send(&app, request("POST", "/api/audits", None, Some(body.clone()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, request("POST", "/api/audits", Some("bogus"), Some(body))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_and_read_back() {
        let app = test_app();
        let body = serde_json::json!({
            "address": "0x742d35Cc6634C0532925a3b8D4C9db96590c6C87",
            "network": "ethereum",
            "findings": [
                {
                    "vulnerability_type": "Reentrancy",
                    "severity": "critical",
                    "description": "External call before state update",
                    "recommendation": "Use checks-effects-interactions",
                    "line_number": 45
                },
                {
                    "vulnerability_type": "Access Control",
                    "severity": "high",
                    "description": "Missing modifier",
                    "recommendation": "Add onlyOwner"
                }
            ]
        });

        let (status, created) =
            send(&app, request("POST", "/api/audits", Some("token-u1"), Some(body))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["contract"]["risk_score"], 8.0);
        assert_eq!(created["contract"]["audit_status"], "completed");
        assert_eq!(created["contract"]["name"], "Contract 0x742d35...");
        assert_eq!(created["findings"].as_array().unwrap().len(), 2);
        assert!(created["warning"].is_null());

        let id = created["contract"]["id"].as_str().unwrap().to_string();
        let (status, findings) = send(
            &app,
            request("GET", &format!("/api/contracts/{}/findings", id), Some("token-u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(findings.as_array().unwrap().len(), 2);

        let (status, _) = send(
            &app,
            request("GET", &format!("/api/contracts/{}/findings", id), Some("token-u2"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, stats) = send(&app, request("GET", "/api/stats", Some("token-u1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["stats"]["total_contracts_audited"], 1);
        assert_eq!(stats["stats"]["critical_vulnerabilities"], 1);
        assert_eq!(stats["provenance"]["avg_risk_score"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_invalid_severity_rejected() {
        let app = test_app();
        let body = serde_json::json!({
            "address": "0xabc",
            "findings": [{
                "vulnerability_type": "Reentrancy",
                "severity": "severe",
                "description": "",
                "recommendation": ""
            }]
        });
        let (status, _) = send(&app, request("POST", "/api/audits", Some("token-u1"), Some(body))).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_alert_lifecycle() {
        let app = test_app();
        let body = serde_json::json!({
            "type": "transaction",
            "severity": "high",
            "title": "Large outbound transfer",
            "description": "Transfer above threshold",
            "target_address": "0xdead"
        });

        let (status, alert) =
            send(&app, request("POST", "/api/alerts", Some("token-u1"), Some(body))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(alert["resolved"], false);
        let id = alert["id"].as_str().unwrap().to_string();

        let (_, listed) =
            send(&app, request("GET", "/api/alerts?severity=high&type=transaction", Some("token-u1"), None)).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, resolved) = send(
            &app,
            request("POST", &format!("/api/alerts/{}/resolve", id), Some("token-u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["resolved"], true);

        let (_, open) = send(&app, request("GET", "/api/alerts", Some("token-u1"), None)).await;
        assert!(open.as_array().unwrap().is_empty());

        let (_, all) =
            send(&app, request("GET", "/api/alerts?include_resolved=true", Some("token-u1"), None)).await;
        assert_eq!(all.as_array().unwrap().len(), 1);

        let uri = format!("/api/alerts/{}", id);
        let (status, _) = send(&app, request("DELETE", &uri, Some("token-u2"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, request("DELETE", &uri, Some("token-u1"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, request("DELETE", &uri, Some("token-u1"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
