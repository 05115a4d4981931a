//! Pipeline orchestrator.
//!
//! Sequences directory -> workspace -> scanner -> autofix -> workspace ->
//! directory for one repository, appending a scan-log entry around every
//! component call. This is also the single place where failures are
//! converted into HTTP-facing semantics: everything below returns
//! `anyhow::Error`, and [`classify`] maps the result onto the typed
//! [`PipelineError`] the routes translate into status codes.

use anyhow::Error;
use tracing::{error, info};

use securebot_core::autofix::{FixEngine, FixReport};
use securebot_core::oracle::OracleError;
use securebot_core::runlog::{RunContext, ScanStatus};
use securebot_core::scanner::{scan_repository, ScanReport};

use crate::github::{PullRequest, Repository};
use crate::workspace::{fix_branch_name, CloneAction};
use crate::AppState;
use std::path::PathBuf;

/// Failure modes of a pipeline run, ordered by HTTP mapping.
#[derive(Debug)]
pub enum PipelineError {
    /// 403 with a self-service installation URL.
    NotInstalled { install_url: String },
    /// 500 with GOOGLE_AI_API_KEY guidance; the service still serves
    /// read-only endpoints.
    OracleUnconfigured,
    /// 429 with a try-again-later hint.
    RateLimited(String),
    /// Generic 500.
    Internal(Error),
}

pub struct ScanRunOutcome {
    pub repository: Repository,
    pub local_path: PathBuf,
    pub clone_action: CloneAction,
    pub scan: ScanReport,
}

pub struct FixRunOutcome {
    pub repository: Repository,
    pub local_path: PathBuf,
    pub scan: ScanReport,
    pub fix: Option<FixReport>,
    pub pull_request: Option<PullRequest>,
    pub branch: Option<String>,
    pub message: &'static str,
}

/// Clone (or update) and scan one repository.
pub async fn run_scan(
    state: &AppState,
    repo_id: u64,
    username: &str,
) -> Result<ScanRunOutcome, PipelineError> {
    state.scan_log.clear();
    let ctx = RunContext::new(repo_id, username, state.scan_log.clone());

    let installed = match state.github.is_installed(username).await {
        Ok(installed) => installed,
        Err(err) => return Err(fail(&ctx, err)),
    };
    if !installed {
        ctx.record(ScanStatus::Failed, "GitHub App not installed");
        return Err(PipelineError::NotInstalled {
            install_url: state.install_url.clone(),
        });
    }

    info!("Cloning repository with ID {}", repo_id);
    ctx.record(ScanStatus::Cloning, "Cloning repository");
    let clone = match state.workspace.clone_repository(repo_id, &ctx).await {
        Ok(clone) => clone,
        Err(err) => return Err(fail(&ctx, err)),
    };

    info!("Scanning repository: {}", clone.repository.name);
    ctx.record(ScanStatus::Scanning, "Starting security scan");
    let scan = match scan_repository(&clone.local_path, &ctx) {
        Ok(scan) => scan,
        Err(err) => return Err(fail(&ctx, err)),
    };

    Ok(ScanRunOutcome {
        repository: clone.repository,
        local_path: clone.local_path,
        clone_action: clone.action,
        scan,
    })
}

/// Clone, scan, fix, and (when anything changed) push a branch and open a
/// pull request. Short-circuits with `pull_request: None` when the scan is
/// clean, no fix applied, or the staged diff is empty.
pub async fn run_fix(
    state: &AppState,
    repo_id: u64,
    username: &str,
) -> Result<FixRunOutcome, PipelineError> {
    state.scan_log.clear();
    let ctx = RunContext::new(repo_id, username, state.scan_log.clone());

    let installed = match state.github.is_installed(username).await {
        Ok(installed) => installed,
        Err(err) => return Err(fail(&ctx, err)),
    };
    if !installed {
        ctx.record(ScanStatus::Failed, "GitHub App not installed");
        return Err(PipelineError::NotInstalled {
            install_url: state.install_url.clone(),
        });
    }

    info!("Preparing repository with ID {}", repo_id);
    ctx.record(ScanStatus::Cloning, "Cloning repository");
    let clone = match state.workspace.clone_repository(repo_id, &ctx).await {
        Ok(clone) => clone,
        Err(err) => return Err(fail(&ctx, err)),
    };

    info!("Scanning repository: {}", clone.repository.name);
    ctx.record(ScanStatus::Scanning, "Starting security scan");
    let scan = match scan_repository(&clone.local_path, &ctx) {
        Ok(scan) => scan,
        Err(err) => return Err(fail(&ctx, err)),
    };

    if scan.issues.is_empty() {
        ctx.record(ScanStatus::Completed, "No security issues found");
        return Ok(FixRunOutcome {
            repository: clone.repository,
            local_path: clone.local_path,
            scan,
            fix: None,
            pull_request: None,
            branch: None,
            message: "No security issues found",
        });
    }

    let Some(oracle) = state.oracle.clone() else {
        ctx.record(
            ScanStatus::Failed,
            "AI service configuration error: GOOGLE_AI_API_KEY is not set",
        );
        return Err(PipelineError::OracleUnconfigured);
    };

    info!("Fixing {} security issues", scan.issues.len());
    ctx.record(
        ScanStatus::Fixing,
        format!("Applying fixes for {} issues", scan.issues.len()),
    );
    let engine = FixEngine::new(oracle);
    let fix = match engine
        .fix_repository(&clone.local_path, &scan.issues, &ctx)
        .await
    {
        Ok(fix) => fix,
        Err(err) => return Err(fail(&ctx, err)),
    };

    if fix.applied_fixes.is_empty() {
        ctx.record(
            ScanStatus::Completed,
            "No fixes could be applied automatically",
        );
        return Ok(FixRunOutcome {
            repository: clone.repository,
            local_path: clone.local_path,
            scan,
            fix: Some(fix),
            pull_request: None,
            branch: None,
            message: "No fixes could be applied automatically",
        });
    }

    let branch_name = fix_branch_name();
    info!("Creating branch: {}", branch_name);
    ctx.record(
        ScanStatus::Fixing,
        format!("Creating branch {} for fixes", branch_name),
    );
    if let Err(err) = state
        .workspace
        .create_fix_branch(&clone.local_path, &branch_name)
        .await
    {
        return Err(fail(&ctx, err));
    }

    let commit = match state
        .workspace
        .commit_and_push(
            &clone.local_path,
            &branch_name,
            clone.installation.id,
            &clone.repository.full_name,
            &commit_message(&fix),
        )
        .await
    {
        Ok(commit) => commit,
        Err(err) => return Err(fail(&ctx, err)),
    };

    if !commit.has_changes {
        ctx.record(
            ScanStatus::Completed,
            "No changes to commit after applying fixes",
        );
        return Ok(FixRunOutcome {
            repository: clone.repository,
            local_path: clone.local_path,
            scan,
            fix: Some(fix),
            pull_request: None,
            branch: Some(branch_name),
            message: "No changes to commit",
        });
    }

    info!("Creating pull request for fixes");
    ctx.record(
        ScanStatus::CreatingPr,
        format!("Creating pull request for branch {}", branch_name),
    );
    let pull_request = match state
        .workspace
        .create_pull_request(&clone.repository, &clone.installation, &branch_name, &fix)
        .await
    {
        Ok(pull_request) => pull_request,
        Err(err) => return Err(fail(&ctx, err)),
    };

    ctx.record(
        ScanStatus::Completed,
        format!(
            "Pull request created successfully: {}",
            pull_request.html_url
        ),
    );

    Ok(FixRunOutcome {
        repository: clone.repository,
        local_path: clone.local_path,
        scan,
        fix: Some(fix),
        pull_request: Some(pull_request),
        branch: Some(branch_name),
        message: "Security fixes applied and pull request created successfully",
    })
}

/// Commit message summarizing one fix run.
pub fn commit_message(fix: &FixReport) -> String {
    let issues: Vec<&str> = fix
        .applied_fixes
        .iter()
        .map(|applied| applied.issue.as_str())
        .collect();

    format!(
        "SecureBot: Fix {} security vulnerabilities\n\n\
         - Fixed {} security issues\n\
         - Success rate: {}\n\
         - Issues addressed: {}\n\n\
         Automated security fixes by SecureBot",
        fix.applied_fixes.len(),
        fix.summary.successful,
        fix.summary.success_rate,
        issues.join(", ")
    )
}

/// Record the terminal failure entry and classify the error.
fn fail(ctx: &RunContext, err: Error) -> PipelineError {
    let message = format!("{:#}", err);
    error!("Pipeline run failed: {}", message);
    ctx.record(ScanStatus::Failed, message);
    classify(err)
}

/// Map an error chain onto the HTTP-facing failure taxonomy.
fn classify(err: Error) -> PipelineError {
    if let Some(oracle_err) = err.downcast_ref::<OracleError>() {
        if matches!(oracle_err, OracleError::RateLimited(_)) {
            return PipelineError::RateLimited(format!("{:#}", err));
        }
    }

    let message = format!("{:#}", err);
    let lower = message.to_lowercase();
    if lower.contains("quota") || lower.contains("rate limit") {
        PipelineError::RateLimited(message)
    } else if message.contains("GOOGLE_AI_API_KEY") {
        PipelineError::OracleUnconfigured
    } else {
        PipelineError::Internal(err)
    }
}
