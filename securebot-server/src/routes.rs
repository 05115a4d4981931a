//! HTTP surface of the pipeline service.
//!
//! Every response is JSON with a `success` flag; failures carry a short
//! `error` string plus, where actionable, `message`/`solution`/`install_url`
//! hints. Raw stack traces never leave the process.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use securebot_core::runlog::{RunContext, ScanStatus};

use crate::pipeline::{self, PipelineError};
use crate::AppState;

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/installation/status", get(installation_status))
        .route("/api/user/{username}/repositories", get(user_repositories))
        .route("/api/scan", post(scan))
        .route("/api/fix", post(fix))
        .route("/api/repositories/cloned", get(cloned_repositories))
        .route("/api/scan/logs", get(scan_logs))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "SecureBot API is running",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    username: Option<String>,
}

async fn installation_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let Some(username) = query.username.filter(|u| !u.is_empty()) else {
        return bad_request("Username is required");
    };

    let installed = match state.github.is_installed(&username).await {
        Ok(installed) => installed,
        Err(err) => {
            error!("Error checking installation status: {:#}", err);
            return internal_error("Failed to check installation status", &err);
        }
    };

    if !installed {
        return Json(json!({
            "success": false,
            "installed": false,
            "message": format!("SecureBot is not installed for {}", username),
            "install_url": state.install_url,
            "username": username,
        }))
        .into_response();
    }

    let result = async {
        let installation = state.github.installation_by_username(&username).await?;
        let repositories = state
            .github
            .repositories_for_installation(installation.id)
            .await?;
        anyhow::Ok((installation, repositories))
    }
    .await;

    match result {
        Ok((installation, repositories)) => Json(json!({
            "success": true,
            "installed": true,
            "installation": {
                "id": installation.id,
                "account": installation.account,
            },
            "repository_count": repositories.len(),
            "repositories": repositories,
        }))
        .into_response(),
        Err(err) => {
            error!("Error checking installation status: {:#}", err);
            internal_error("Failed to check installation status", &err)
        }
    }
}

async fn user_repositories(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Response {
    if username.is_empty() {
        return bad_request("Username is required");
    }

    let installed = match state.github.is_installed(&username).await {
        Ok(installed) => installed,
        Err(err) => {
            error!("Error getting user repositories: {:#}", err);
            return internal_error("Failed to get user repositories", &err);
        }
    };

    if !installed {
        return Json(json!({
            "success": false,
            "installed": false,
            "message": format!("SecureBot is not installed for {}", username),
            "install_url": state.install_url,
            "username": username,
            "repositories": [],
            "repository_count": 0,
        }))
        .into_response();
    }

    let result = async {
        let installation = state.github.installation_by_username(&username).await?;
        let repositories = state
            .github
            .repositories_for_installation(installation.id)
            .await?;
        anyhow::Ok((installation, repositories))
    }
    .await;

    match result {
        Ok((installation, repositories)) => {
            let formatted: Vec<serde_json::Value> = repositories
                .iter()
                .map(|repo| {
                    let mut value = serde_json::to_value(repo).unwrap_or_else(|_| json!({}));
                    value["security_status"] = security_status_stub();
                    value
                })
                .collect();

            Json(json!({
                "success": true,
                "installed": true,
                "username": username,
                "installation": {
                    "id": installation.id,
                    "account": installation.account,
                },
                "repository_count": formatted.len(),
                "repositories": formatted,
            }))
            .into_response()
        }
        Err(err) => {
            error!("Error getting user repositories: {:#}", err);
            internal_error("Failed to get user repositories", &err)
        }
    }
}

/// Placeholder per-repository security posture until scan history is
/// persisted anywhere.
fn security_status_stub() -> serde_json::Value {
    json!({
        "scanned": false,
        "last_scan": null,
        "issues_found": 0,
        "protection_enabled": true,
    })
}

#[derive(Debug, Deserialize)]
struct PipelineRequest {
    #[serde(rename = "repoId")]
    repo_id: Option<u64>,
    username: Option<String>,
}

/// Validate the scan/fix request body, recording the failure in a fresh run
/// log the way a real run would.
fn validate_pipeline_request(
    state: &AppState,
    request: &PipelineRequest,
) -> Result<(u64, String), Response> {
    match (request.repo_id, request.username.clone()) {
        (Some(repo_id), Some(username)) if !username.is_empty() => Ok((repo_id, username)),
        _ => {
            state.scan_log.clear();
            let ctx = RunContext::new(
                request.repo_id.unwrap_or_default(),
                request.username.clone().unwrap_or_default(),
                state.scan_log.clone(),
            );
            ctx.record(
                ScanStatus::Failed,
                "Repository ID and username are required",
            );
            Err(bad_request("Repository ID and username are required"))
        }
    }
}

async fn scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PipelineRequest>,
) -> Response {
    let (repo_id, username) = match validate_pipeline_request(&state, &request) {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    match pipeline::run_scan(&state, repo_id, &username).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "message": "Repository scanned successfully",
            "repository": {
                "id": outcome.repository.id,
                "name": outcome.repository.name,
                "full_name": outcome.repository.full_name,
                "local_path": outcome.local_path.display().to_string(),
            },
            "scan_results": outcome.scan,
            "clone_action": outcome.clone_action,
        }))
        .into_response(),
        Err(err) => pipeline_error_response(err, "Failed to scan repository"),
    }
}

async fn fix(State(state): State<Arc<AppState>>, Json(request): Json<PipelineRequest>) -> Response {
    let (repo_id, username) = match validate_pipeline_request(&state, &request) {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    match pipeline::run_fix(&state, repo_id, &username).await {
        Ok(outcome) => {
            let mut body = json!({
                "success": true,
                "message": outcome.message,
                "repository": {
                    "id": outcome.repository.id,
                    "name": outcome.repository.name,
                    "full_name": outcome.repository.full_name,
                },
                "scan_results": outcome.scan,
                "fix_results": outcome.fix,
                "pull_request": null,
            });

            if let (Some(pull_request), Some(branch)) =
                (&outcome.pull_request, &outcome.branch)
            {
                body["repository"]["local_path"] =
                    json!(outcome.local_path.display().to_string());
                body["pull_request"] = json!({
                    "id": pull_request.id,
                    "number": pull_request.number,
                    "title": pull_request.title,
                    "html_url": pull_request.html_url,
                    "branch": branch,
                    "state": pull_request.state,
                });
                if let Some(fix) = &outcome.fix {
                    body["summary"] = json!({
                        "issues_found": outcome.scan.issues.len(),
                        "fixes_applied": fix.applied_fixes.len(),
                        "success_rate": fix.summary.success_rate,
                        "pull_request_created": true,
                    });
                }
            }

            Json(body).into_response()
        }
        Err(err) => pipeline_error_response(err, "Failed to fix repository and create PR"),
    }
}

async fn cloned_repositories(State(state): State<Arc<AppState>>) -> Response {
    match state.workspace.cloned_repositories() {
        Ok(cloned) => Json(json!({
            "success": true,
            "count": cloned.len(),
            "cloned_repositories": cloned,
        }))
        .into_response(),
        Err(err) => {
            error!("Error getting cloned repositories: {:#}", err);
            internal_error("Failed to get cloned repositories", &err)
        }
    }
}

async fn scan_logs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let entries = state.scan_log.snapshot();
    Json(json!({
        "success": true,
        "count": entries.len(),
        "scan_logs": entries,
    }))
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "error": message,
        })),
    )
        .into_response()
}

fn internal_error(error_label: &str, err: &anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": error_label,
            "message": format!("{:#}", err),
        })),
    )
        .into_response()
}

/// Translate a pipeline failure into its HTTP shape.
fn pipeline_error_response(err: PipelineError, fallback_label: &str) -> Response {
    match err {
        PipelineError::NotInstalled { install_url } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "success": false,
                "error": "GitHub App not installed",
                "install_url": install_url,
            })),
        )
            .into_response(),
        PipelineError::OracleUnconfigured => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "AI service configuration error",
                "message": "Google AI API key is missing or invalid",
                "solution": "Please set GOOGLE_AI_API_KEY in your .env file",
            })),
        )
            .into_response(),
        PipelineError::RateLimited(message) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "error": "AI service rate limit exceeded",
                "message": message,
                "solution": "Please try again in a few minutes",
            })),
        )
            .into_response(),
        PipelineError::Internal(err) => internal_error(fallback_label, &err),
    }
}
