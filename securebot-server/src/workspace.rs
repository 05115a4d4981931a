//! On-disk workspace manager.
//!
//! Maintains the local clone cache under the workspace root, keyed by the
//! full `owner/name` identity so two installations with same-named
//! repositories never share a directory. All git work happens through
//! subprocesses; installation tokens appear only in the argv of the single
//! clone or push invocation they were minted for.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

use securebot_core::autofix::FixReport;
use securebot_core::runlog::{RunContext, ScanStatus};

use crate::github::{
    CreatePullRequestParams, GitHubClient, Installation, PullRequest, Repository,
};

const BOT_NAME: &str = "SecureBot";
const BOT_EMAIL: &str = "securebot@automated.fix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneAction {
    Cloned,
    Updated,
}

#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub repository: Repository,
    pub installation: Installation,
    pub local_path: PathBuf,
    pub action: CloneAction,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub has_changes: bool,
    pub message: String,
}

/// Diagnostics entry for one cached clone.
#[derive(Debug, Clone, Serialize)]
pub struct ClonedRepo {
    pub name: String,
    pub path: String,
    pub modified: Option<DateTime<Utc>>,
}

pub struct WorkspaceManager {
    github: Arc<GitHubClient>,
    repos_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(github: Arc<GitHubClient>, repos_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&repos_dir).with_context(|| {
            format!("Failed to create workspace directory {}", repos_dir.display())
        })?;
        Ok(Self { github, repos_dir })
    }

    /// Directory for a repository, keyed by its full `owner/name` identity.
    fn workspace_path(&self, full_name: &str) -> PathBuf {
        let mut path = self.repos_dir.clone();
        for segment in full_name.split('/') {
            path.push(segment);
        }
        path
    }

    /// Resolve a repository and make a local checkout available.
    ///
    /// An existing directory is updated with a best-effort pull; a pull
    /// failure is logged and the stale checkout is used. Otherwise a fresh
    /// installation token is minted and inlined as an `x-access-token`
    /// credential for the one clone invocation.
    pub async fn clone_repository(&self, repo_id: u64, ctx: &RunContext) -> Result<CloneOutcome> {
        let found = self
            .github
            .find_repository_by_id(repo_id)
            .await
            .context("Failed to clone repository")?;

        let Some((repository, installation)) = found else {
            let message = format!(
                "Repository with ID {} not found in accessible repositories",
                repo_id
            );
            ctx.record(ScanStatus::Failed, message.clone());
            bail!(message);
        };

        let local_path = self.workspace_path(&repository.full_name);

        if local_path.exists() {
            info!(
                "Repository {} already exists, pulling latest changes",
                repository.full_name
            );
            ctx.record(
                ScanStatus::Cloning,
                format!(
                    "Repository {} already exists, pulling latest changes",
                    repository.full_name
                ),
            );
            self.pull_latest(&local_path).await;
            ctx.record(
                ScanStatus::Cloning,
                format!("Repository {} updated successfully", repository.full_name),
            );
            return Ok(CloneOutcome {
                repository,
                installation,
                local_path,
                action: CloneAction::Updated,
            });
        }

        let token = self
            .github
            .create_installation_token(installation.id)
            .await
            .context("Failed to clone repository")?;
        let authenticated_url = repository.clone_url.replacen(
            "https://",
            &format!("https://x-access-token:{}@", token.token),
            1,
        );

        info!("Cloning repository: {}", repository.full_name);
        ctx.record(
            ScanStatus::Cloning,
            format!("Started cloning repository: {}", repository.full_name),
        );

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to clone repository")?;
        }

        let output = Command::new("git")
            .args(["clone", &authenticated_url])
            .arg(&local_path)
            .output()
            .await
            .context("Failed to execute git clone")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Failed to clone repository: git clone failed: {}",
                stderr.trim()
            ));
        }

        ctx.record(
            ScanStatus::Cloning,
            format!("Successfully cloned repository: {}", repository.full_name),
        );

        Ok(CloneOutcome {
            repository,
            installation,
            local_path,
            action: CloneAction::Cloned,
        })
    }

    /// Best-effort update of an existing checkout. Failures degrade to the
    /// stale tree rather than aborting the run, but are logged loudly.
    async fn pull_latest(&self, path: &Path) {
        match run_git(path, &["pull", "origin"]).await {
            Ok(_) => info!("Updated repository at {}", path.display()),
            Err(err) => warn!(
                "Failed to pull latest changes for {}: {}; continuing with existing checkout",
                path.display(),
                err
            ),
        }
    }

    /// Check out the default branch and create the fix branch from it.
    pub async fn create_fix_branch(&self, path: &Path, branch_name: &str) -> Result<String> {
        if run_git(path, &["checkout", "main"]).await.is_err() {
            run_git(path, &["checkout", "master"]).await.context(
                "Failed to create fix branch: neither main nor master could be checked out",
            )?;
        }

        run_git(path, &["checkout", "-b", branch_name])
            .await
            .context("Failed to create fix branch")?;

        Ok(branch_name.to_string())
    }

    /// Stage everything, commit, and push over a token-authenticated URL.
    ///
    /// Returns `has_changes: false` without committing when the staged diff
    /// is empty; this is the sole point deciding whether a PR is worth
    /// opening.
    pub async fn commit_and_push(
        &self,
        path: &Path,
        branch_name: &str,
        installation_id: u64,
        repository_full_name: &str,
        commit_message: &str,
    ) -> Result<CommitOutcome> {
        // Bot identity; may already be configured, which is fine.
        if let Err(err) = run_git(path, &["config", "user.name", BOT_NAME]).await {
            warn!("git config user.name failed: {}", err);
        }
        if let Err(err) = run_git(path, &["config", "user.email", BOT_EMAIL]).await {
            warn!("git config user.email failed: {}", err);
        }

        run_git(path, &["add", "."])
            .await
            .context("Failed to commit and push changes")?;

        // Exit 0 means the staged diff is empty.
        let diff_status = Command::new("git")
            .args(["diff", "--staged", "--quiet"])
            .current_dir(path)
            .status()
            .await
            .context("Failed to execute git diff --staged")?;
        if diff_status.success() {
            return Ok(CommitOutcome {
                has_changes: false,
                message: "No changes to commit".to_string(),
            });
        }

        run_git(path, &["commit", "-m", commit_message])
            .await
            .context("Failed to commit and push changes")?;

        let token = self
            .github
            .create_installation_token(installation_id)
            .await
            .context("Failed to commit and push changes")?;
        let push_url = format!(
            "https://x-access-token:{}@github.com/{}.git",
            token.token, repository_full_name
        );

        // The push URL carries the token, so this invocation reports
        // failures without echoing its arguments.
        let output = Command::new("git")
            .args(["push", &push_url, branch_name])
            .current_dir(path)
            .output()
            .await
            .context("Failed to execute git push")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Failed to commit and push changes: git push failed: {}",
                stderr.trim()
            ));
        }

        Ok(CommitOutcome {
            has_changes: true,
            message: "Changes committed and pushed successfully".to_string(),
        })
    }

    /// Open the pull request that presents the fix summary.
    pub async fn create_pull_request(
        &self,
        repository: &Repository,
        installation: &Installation,
        branch_name: &str,
        fix_report: &FixReport,
    ) -> Result<PullRequest> {
        let (owner, repo) = repository
            .full_name
            .split_once('/')
            .ok_or_else(|| anyhow!("Malformed repository full name: {}", repository.full_name))?;

        let params = CreatePullRequestParams {
            title: "SecureBot: Automated Security Fixes".to_string(),
            head: branch_name.to_string(),
            base: repository
                .default_branch
                .clone()
                .unwrap_or_else(|| "main".to_string()),
            body: pull_request_body(fix_report),
        };

        self.github
            .create_pull_request(installation.id, owner, repo, &params)
            .await
            .context("Failed to create pull request")
    }

    /// Introspect the on-disk cache. Diagnostics only.
    pub fn cloned_repositories(&self) -> Result<Vec<ClonedRepo>> {
        let mut repos = Vec::new();
        if !self.repos_dir.exists() {
            return Ok(repos);
        }

        // Two levels deep: repos/<owner>/<name>.
        for owner_entry in std::fs::read_dir(&self.repos_dir)
            .context("Failed to get cloned repositories")?
        {
            let owner_entry = owner_entry.context("Failed to get cloned repositories")?;
            if !owner_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let owner_name = owner_entry.file_name().to_string_lossy().into_owned();

            for repo_entry in std::fs::read_dir(owner_entry.path())
                .context("Failed to get cloned repositories")?
            {
                let repo_entry = repo_entry.context("Failed to get cloned repositories")?;
                if !repo_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }

                let modified = repo_entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);

                repos.push(ClonedRepo {
                    name: format!("{}/{}", owner_name, repo_entry.file_name().to_string_lossy()),
                    path: repo_entry.path().display().to_string(),
                    modified,
                });
            }
        }

        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }
}

/// Branch name for one fix run.
pub fn fix_branch_name() -> String {
    format!("securebot-fixes-{}", Utc::now().timestamp_millis())
}

/// Run a git subcommand in `cwd`, returning stdout on success.
async fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Markdown body for the fix pull request.
pub fn pull_request_body(fix_report: &FixReport) -> String {
    let summary = &fix_report.summary;

    let mut body = String::from("## SecureBot Automated Security Fixes\n\n");
    body.push_str("This pull request contains automated security fixes generated by SecureBot.\n\n");

    body.push_str("### Summary\n");
    body.push_str(&format!("- **Total Issues Fixed**: {}\n", summary.successful));
    body.push_str(&format!("- **Failed Fixes**: {}\n", summary.failed));
    body.push_str(&format!("- **Skipped Files**: {}\n", summary.skipped));
    body.push_str(&format!("- **Success Rate**: {}\n\n", summary.success_rate));

    if !fix_report.applied_fixes.is_empty() {
        body.push_str("### Applied Fixes\n\n");
        for (index, fix) in fix_report.applied_fixes.iter().enumerate() {
            body.push_str(&format!("#### {}. {}\n", index + 1, fix.file_name));
            body.push_str(&format!("- **Issue**: {}\n", fix.issue));
            body.push_str("- **Status**: fixed_by_ai\n");
            body.push_str(&format!("- **Explanation**: {}\n", fix.explanation));
            body.push_str(&format!(
                "- **Size Change**: {} -> {} characters\n",
                fix.changes.original_size, fix.changes.fixed_size
            ));
            body.push('\n');
        }
    }

    body.push_str("### Important Notes\n");
    body.push_str("- All original files have been backed up with timestamps\n");
    body.push_str("- Please review all changes before merging\n");
    body.push_str("- Test your application thoroughly after applying these fixes\n");
    body.push_str("- Some fixes may require additional configuration or environment updates\n\n");

    body.push_str("### About SecureBot\n");
    body.push_str(
        "SecureBot is an automated security analysis and fixing tool that helps identify and \
         resolve common security vulnerabilities in your codebase.\n\n",
    );
    body.push_str("---\n");
    body.push_str("*This pull request was automatically generated by SecureBot*");

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use securebot_core::autofix::{AppliedFix, FixStatus, FixSummary, SizeChange};
    use tempfile::TempDir;

    fn sample_report() -> FixReport {
        FixReport {
            applied_fixes: vec![AppliedFix {
                file: "/repo/src/app.js".to_string(),
                file_name: "app.js".to_string(),
                issue: "eval() usage detected - potential code injection vulnerability"
                    .to_string(),
                status: FixStatus::FixedByAi,
                explanation: "Successfully fixed: eval() usage detected - potential code injection vulnerability".to_string(),
                backup_created: "/repo/src/app.js.backup_1700000000000".to_string(),
                changes: SizeChange {
                    original_size: 120,
                    fixed_size: 140,
                    size_difference: 20,
                },
            }],
            failed_fixes: Vec::new(),
            skipped_files: Vec::new(),
            summary: FixSummary {
                total_issues: 2,
                successful: 1,
                failed: 0,
                skipped: 1,
                success_rate: "50%".to_string(),
            },
        }
    }

    #[test]
    fn test_pull_request_body_includes_summary_and_fixes() {
        let body = pull_request_body(&sample_report());
        assert!(body.contains("## SecureBot Automated Security Fixes"));
        assert!(body.contains("- **Total Issues Fixed**: 1"));
        assert!(body.contains("- **Success Rate**: 50%"));
        assert!(body.contains("#### 1. app.js"));
        assert!(body.contains("120 -> 140 characters"));
        assert!(body.contains("Please review all changes before merging"));
    }

    #[test]
    fn test_pull_request_body_omits_fix_section_when_nothing_applied() {
        let mut report = sample_report();
        report.applied_fixes.clear();
        let body = pull_request_body(&report);
        assert!(!body.contains("### Applied Fixes"));
    }

    #[test]
    fn test_fix_branch_name_is_prefixed_and_unique_per_millisecond() {
        let name = fix_branch_name();
        assert!(name.starts_with("securebot-fixes-"));
        let suffix = &name["securebot-fixes-".len()..];
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_workspace_path_uses_full_repository_identity() {
        let dir = TempDir::new().expect("tempdir");
        let github = Arc::new(GitHubClient::new(1, "key".to_string()));
        let workspace =
            WorkspaceManager::new(github, dir.path().join("repos")).expect("workspace");

        let a = workspace.workspace_path("alice/widget");
        let b = workspace.workspace_path("bob/widget");
        assert_ne!(a, b);
        assert!(a.ends_with("alice/widget"));
        assert!(b.ends_with("bob/widget"));
    }

    #[test]
    fn test_cloned_repositories_lists_owner_scoped_checkouts() {
        let dir = TempDir::new().expect("tempdir");
        let repos_dir = dir.path().join("repos");
        std::fs::create_dir_all(repos_dir.join("alice/widget")).expect("mkdir");
        std::fs::create_dir_all(repos_dir.join("bob/gadget")).expect("mkdir");
        std::fs::write(repos_dir.join("stray-file"), "not a repo").expect("write");

        let github = Arc::new(GitHubClient::new(1, "key".to_string()));
        let workspace = WorkspaceManager::new(github, repos_dir).expect("workspace");

        let cloned = workspace.cloned_repositories().expect("list clones");
        let names: Vec<&str> = cloned.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alice/widget", "bob/gadget"]);
    }

    async fn init_repo_with_commit(repo: &std::path::Path) {
        std::fs::create_dir_all(repo).expect("mkdir repo");
        run_git(repo, &["init", "-b", "main"]).await.expect("git init");
        run_git(repo, &["config", "user.name", "Test"])
            .await
            .expect("git config name");
        run_git(repo, &["config", "user.email", "test@example.invalid"])
            .await
            .expect("git config email");
        std::fs::write(repo.join("app.js"), "const x = 1;\n").expect("write file");
        run_git(repo, &["add", "."]).await.expect("git add");
        run_git(repo, &["commit", "-m", "initial"])
            .await
            .expect("git commit");
    }

    #[tokio::test]
    async fn test_commit_and_push_short_circuits_on_empty_diff() {
        let dir = TempDir::new().expect("tempdir");
        let repo = dir.path().join("repo");
        init_repo_with_commit(&repo).await;

        let github = Arc::new(GitHubClient::new(1, "key".to_string()));
        let workspace =
            WorkspaceManager::new(github, dir.path().join("repos")).expect("workspace");

        // Nothing changed since the initial commit, so this must return
        // before any token is minted or push attempted.
        let outcome = workspace
            .commit_and_push(&repo, "securebot-fixes-1", 1, "octocat/repo", "message")
            .await
            .expect("empty diff is not an error");

        assert!(!outcome.has_changes);
        assert_eq!(outcome.message, "No changes to commit");
    }

    #[tokio::test]
    async fn test_create_fix_branch_switches_to_new_branch() {
        let dir = TempDir::new().expect("tempdir");
        let repo = dir.path().join("repo");
        init_repo_with_commit(&repo).await;

        let github = Arc::new(GitHubClient::new(1, "key".to_string()));
        let workspace =
            WorkspaceManager::new(github, dir.path().join("repos")).expect("workspace");

        let branch = workspace
            .create_fix_branch(&repo, "securebot-fixes-123")
            .await
            .expect("branch created");
        assert_eq!(branch, "securebot-fixes-123");

        let current = run_git(&repo, &["branch", "--show-current"])
            .await
            .expect("git branch");
        assert_eq!(current.trim(), "securebot-fixes-123");
    }

    #[test]
    fn test_cloned_repositories_empty_when_cache_missing() {
        let dir = TempDir::new().expect("tempdir");
        let github = Arc::new(GitHubClient::new(1, "key".to_string()));
        let workspace =
            WorkspaceManager::new(github, dir.path().join("repos")).expect("workspace");

        // Remove the directory the constructor created.
        std::fs::remove_dir_all(dir.path().join("repos")).expect("rmdir");
        assert!(workspace
            .cloned_repositories()
            .expect("list clones")
            .is_empty());
    }
}
