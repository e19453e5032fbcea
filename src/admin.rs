//! HTTP admin surface: configuration reload, health and the reviewer UI
//! bootstrap script.

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::proxy::ValidatingProxy;
use crate::validator::ValidatorMode;

/// Default admin port
pub const DEFAULT_SERVER_PORT: u16 = 3000;

// ── Response Types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: ValidatorMode,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Settings handed to the reviewer UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    pub mode: ValidatorMode,
    pub wss_url: String,
    pub timeout_secs: u64,
}

impl UiConfig {
    /// Body of `/config.js`
    pub fn script(&self) -> Result<String, serde_json::Error> {
        Ok(format!("window.FIREWALL_CONFIG = {};\n", serde_json::to_string(self)?))
    }
}

#[derive(Clone)]
struct AdminState {
    proxy: Arc<ValidatingProxy>,
    ui: Arc<UiConfig>,
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /api/reload: re-read address book and rule tables
async fn reload(State(state): State<AdminState>) -> impl IntoResponse {
    match state.proxy.reload_config().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReloadResponse {
                status: "reloaded".into(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Configuration reload failed, keeping previous configuration");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReloadResponse {
                    status: "error".into(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// GET /health
async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        mode: state.proxy.validator().mode(),
    })
}

/// GET /config.js
async fn config_script(State(state): State<AdminState>) -> impl IntoResponse {
    match state.ui.script() {
        Ok(script) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/javascript")],
            script,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

// ── Router ──────────────────────────────────────────────────────

/// Build the admin router with CORS and request tracing
pub fn build_router(proxy: Arc<ValidatingProxy>, ui: UiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/reload", post(reload))
        .route("/health", get(health))
        .route("/config.js", get(config_script))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AdminState {
            proxy,
            ui: Arc::new(ui),
        })
}

/// Serve the admin router on `0.0.0.0:port` until `shutdown` resolves
pub async fn serve<F>(router: Router, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Admin server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_book::{AddressBook, AddressBookStore};
    use crate::builder::TransactionBuilder;
    use crate::upstream::{Upstream, UpstreamConfig};
    use crate::validator::{MockTransactionValidator, ValidatorError};
    use std::collections::HashMap;

    fn ui() -> UiConfig {
        UiConfig {
            mode: ValidatorMode::Interactive,
            wss_url: "ws://localhost:8546".into(),
            timeout_secs: 60,
        }
    }

    async fn spawn_admin(validator: MockTransactionValidator) -> SocketAddr {
        let book = AddressBookStore::from_book(AddressBook::new(HashMap::new(), HashMap::new()));
        let upstream = Upstream::new(UpstreamConfig::default()).unwrap();
        let proxy = Arc::new(ValidatingProxy::new(
            TransactionBuilder::new(Arc::new(book)),
            Arc::new(validator),
            upstream,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(proxy, ui());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_config_script() {
        let script = ui().script().unwrap();
        assert!(script.starts_with("window.FIREWALL_CONFIG = {"));
        assert!(script.contains("\"mode\":\"interactive\""));
        assert!(script.contains("\"wssUrl\":\"ws://localhost:8546\""));
        assert!(script.contains("\"timeoutSecs\":60"));
    }

    #[test]
    fn test_reload_response_omits_empty_error() {
        let json = serde_json::to_string(&ReloadResponse {
            status: "reloaded".into(),
            error: None,
        })
        .unwrap();
        assert_eq!(json, "{\"status\":\"reloaded\"}");
    }

    #[tokio::test]
    async fn test_health_reports_mode() {
        let mut validator = MockTransactionValidator::new();
        validator.expect_mode().return_const(ValidatorMode::Rules);
        let addr = spawn_admin(validator).await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mode"], "rules");
    }

    #[tokio::test]
    async fn test_reload_failure_returns_500() {
        let mut validator = MockTransactionValidator::new();
        validator
            .expect_prepare_reload()
            .returning(|| Err(ValidatorError::Server("rules unreadable".into())));
        validator.expect_commit_reload().never();
        let addr = spawn_admin(validator).await;

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/reload"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("rules unreadable"));
    }

    #[tokio::test]
    async fn test_config_js_served_as_javascript() {
        let addr = spawn_admin(MockTransactionValidator::new()).await;

        let response = reqwest::get(format!("http://{addr}/config.js")).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/javascript"
        );
        assert!(response.text().await.unwrap().contains("FIREWALL_CONFIG"));
    }
}
