use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

use securebot_core::gemini::GeminiClient;
use securebot_core::oracle::RewriteOracle;
use securebot_core::runlog::ScanLog;

use securebot_server::config::Config;
use securebot_server::github::GitHubClient;
use securebot_server::routes::api_router;
use securebot_server::workspace::WorkspaceManager;
use securebot_server::AppState;

/// Oracle calls plus multiple file fixes can run for minutes, so inbound
/// requests get a 10 minute timeout instead of the usual defaults.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "message": "SecureBot - Automated Security Analysis & Fixing",
        "description": "SecureBot integrates GitHub App authentication with automated security scanning and fixing capabilities",
        "version": env!("CARGO_PKG_VERSION"),
        "features": [
            "GitHub App Integration",
            "Automated Security Scanning",
            "AI-Powered Code Fixing",
            "Automated Pull Request Creation",
            "Repository Management",
        ],
        "endpoints": {
            "health": "GET /api/health",
            "installation_status": "GET /api/installation/status?username=<github_username>",
            "user_repositories": "GET /api/user/<username>/repositories",
            "scan_repository": "POST /api/scan",
            "fix_and_create_pr": "POST /api/fix",
            "cloned_repositories": "GET /api/repositories/cloned",
            "scan_logs": "GET /api/scan/logs",
        },
        "documentation": {
            "github_app_setup": "Create a GitHub App and set GITHUB_APP_ID and GITHUB_PRIVATE_KEY",
            "ai_setup": "Set GOOGLE_AI_API_KEY for automated fixing",
            "usage": "Install the GitHub App on your repositories, then use the API endpoints",
        },
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting SecureBot server");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let github = Arc::new(GitHubClient::new(
        config.github_app_id,
        config.github_private_key.clone(),
    ));

    let oracle: Option<Arc<dyn RewriteOracle>> = match &config.google_ai_api_key {
        Some(api_key) => {
            info!("AI oracle configured (model: {})", securebot_core::DEFAULT_MODEL);
            Some(Arc::new(GeminiClient::new(api_key.clone())))
        }
        None => {
            warn!("GOOGLE_AI_API_KEY is not set; /api/fix will report a configuration error");
            None
        }
    };

    let workspace = WorkspaceManager::new(github.clone(), config.workspace_dir.clone())
        .expect("Failed to initialize workspace directory");

    let app_state = Arc::new(AppState {
        github,
        workspace,
        oracle,
        scan_log: ScanLog::new(),
        install_url: config.install_url.clone(),
    });

    let app = Router::new()
        .route("/", get(root_handler))
        .merge(api_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
