//! AI-powered autofix engine.
//!
//! Processes scanner findings in input order, asking the rewrite oracle for
//! a corrected version of each offending file and applying it behind a
//! timestamped backup. File-level problems (missing file, skip rules, bad
//! fixed content) are recorded per finding and never abort the run; an
//! oracle failure that survives the bounded retry propagates to the caller.

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::oracle::{rewrite_with_retry, RewriteOracle};
use crate::rules::{Finding, FindingType};
use crate::runlog::{RunContext, ScanStatus};

/// Files larger than this are never submitted to the oracle.
pub const MAX_FIX_FILE_SIZE: u64 = 200 * 1024;

const BINARY_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".pdf", ".zip", ".exe", ".dll", ".ico", ".svg",
];

const SKIP_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "composer.lock",
    "Pipfile.lock",
    "poetry.lock",
];

const SKIP_PATH_SEGMENTS: &[&str] = &[
    "/node_modules/",
    "/.git/",
    "/dist/",
    "/build/",
    "/coverage/",
    "/.next/",
    "/.nuxt/",
];

/// Boilerplate preambles the oracle sometimes prepends despite instructions.
const RESPONSE_PREFIXES: &[&str] = &[
    "Here is the fixed content:",
    "Fixed content:",
    "FIXED CONTENT:",
    "The corrected file content is:",
    "Here's the corrected version:",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    FixedByAi,
    FileNotFound,
    NoChanges,
    ValidationFailed,
    ProcessingError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeChange {
    pub original_size: usize,
    pub fixed_size: usize,
    pub size_difference: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFix {
    pub file: String,
    pub file_name: String,
    pub issue: String,
    pub status: FixStatus,
    pub explanation: String,
    pub backup_created: String,
    pub changes: SizeChange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFix {
    pub file: String,
    pub file_name: String,
    pub issue: String,
    pub status: FixStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub file: String,
    pub file_name: String,
    pub issue: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixSummary {
    pub total_issues: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixReport {
    pub applied_fixes: Vec<AppliedFix>,
    pub failed_fixes: Vec<FailedFix>,
    pub skipped_files: Vec<SkippedFile>,
    pub summary: FixSummary,
}

pub struct FixEngine {
    oracle: Arc<dyn RewriteOracle>,
    max_file_size: u64,
}

impl FixEngine {
    pub fn new(oracle: Arc<dyn RewriteOracle>) -> Self {
        Self::with_max_file_size(oracle, MAX_FIX_FILE_SIZE)
    }

    pub fn with_max_file_size(oracle: Arc<dyn RewriteOracle>, max_file_size: u64) -> Self {
        Self {
            oracle,
            max_file_size,
        }
    }

    /// Attempt to fix every finding, in input order.
    ///
    /// The displayed success rate divides by the total finding count, not by
    /// the number of findings actually submitted to the oracle; skipped and
    /// failed findings depress the rate. This matches the observable output
    /// of the summary consumers.
    pub async fn fix_repository(
        &self,
        repo_path: &Path,
        issues: &[Finding],
        ctx: &RunContext,
    ) -> Result<FixReport> {
        info!("AI fix requested for {}", repo_path.display());

        if issues.is_empty() {
            return Ok(FixReport {
                applied_fixes: Vec::new(),
                failed_fixes: Vec::new(),
                skipped_files: Vec::new(),
                summary: FixSummary {
                    total_issues: 0,
                    successful: 0,
                    failed: 0,
                    skipped: 0,
                    success_rate: "100%".to_string(),
                },
            });
        }

        ctx.record(
            ScanStatus::Fixing,
            format!("Starting to fix {} security issues", issues.len()),
        );

        let mut applied_fixes = Vec::new();
        let mut failed_fixes = Vec::new();
        let mut skipped_files = Vec::new();

        for (index, issue) in issues.iter().enumerate() {
            let file_path = Path::new(&issue.file);
            let file_name = issue.file_name.clone();

            info!(
                "Processing {}/{}: {} ({})",
                index + 1,
                issues.len(),
                file_name,
                issue.issue
            );
            ctx.record(
                ScanStatus::Fixing,
                format!(
                    "Processing {} ({}/{}) - {}",
                    file_name,
                    index + 1,
                    issues.len(),
                    issue.issue
                ),
            );

            if !file_path.exists() {
                warn!("File not found: {}", issue.file);
                failed_fixes.push(FailedFix {
                    file: issue.file.clone(),
                    file_name,
                    issue: issue.issue.clone(),
                    status: FixStatus::FileNotFound,
                    reason: "File does not exist in repository".to_string(),
                });
                continue;
            }

            if let Some(reason) = self.skip_reason(file_path, &issue.file).await {
                info!("Skipping {}: {}", file_name, reason);
                skipped_files.push(SkippedFile {
                    file: issue.file.clone(),
                    file_name,
                    issue: issue.issue.clone(),
                    reason,
                });
                continue;
            }

            let original_content = match tokio::fs::read_to_string(file_path).await {
                Ok(content) => content,
                Err(err) => {
                    warn!("Error reading {}: {}", file_name, err);
                    failed_fixes.push(FailedFix {
                        file: issue.file.clone(),
                        file_name,
                        issue: issue.issue.clone(),
                        status: FixStatus::ProcessingError,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let extension = file_extension(file_path);
            let prompt = build_fix_prompt(&original_content, issue, &file_name, &extension);

            // Oracle failures that survive the retry policy abort the run;
            // everything already fixed stays fixed (backups remain on disk).
            let raw_response = rewrite_with_retry(self.oracle.as_ref(), &prompt)
                .await
                .with_context(|| format!("AI fix failed for {}", file_name))?;

            let fixed_content = clean_oracle_response(&raw_response);

            if fixed_content == original_content {
                info!("No changes made by AI for {}", file_name);
                failed_fixes.push(FailedFix {
                    file: issue.file.clone(),
                    file_name,
                    issue: issue.issue.clone(),
                    status: FixStatus::NoChanges,
                    reason: "AI determined no changes were needed".to_string(),
                });
                continue;
            }

            if let Err(reason) = validate_fixed_content(&fixed_content, &extension) {
                failed_fixes.push(FailedFix {
                    file: issue.file.clone(),
                    file_name,
                    issue: issue.issue.clone(),
                    status: FixStatus::ValidationFailed,
                    reason,
                });
                continue;
            }

            match self
                .apply_fix(file_path, &original_content, &fixed_content)
                .await
            {
                Ok(backup_path) => {
                    info!(
                        "Fixed {} ({} -> {} chars)",
                        file_name,
                        original_content.len(),
                        fixed_content.len()
                    );
                    ctx.record(
                        ScanStatus::Fixing,
                        format!("Fixed {} - {}", file_name, issue.issue),
                    );
                    applied_fixes.push(AppliedFix {
                        file: issue.file.clone(),
                        file_name,
                        issue: issue.issue.clone(),
                        status: FixStatus::FixedByAi,
                        explanation: format!("Successfully fixed: {}", issue.issue),
                        backup_created: backup_path,
                        changes: SizeChange {
                            original_size: original_content.len(),
                            fixed_size: fixed_content.len(),
                            size_difference: fixed_content.len() as i64
                                - original_content.len() as i64,
                        },
                    });
                }
                Err(err) => {
                    warn!("Error applying fix to {}: {}", file_name, err);
                    failed_fixes.push(FailedFix {
                        file: issue.file.clone(),
                        file_name,
                        issue: issue.issue.clone(),
                        status: FixStatus::ProcessingError,
                        reason: format!("{:#}", err),
                    });
                }
            }
        }

        let summary = FixSummary {
            total_issues: issues.len(),
            successful: applied_fixes.len(),
            failed: failed_fixes.len(),
            skipped: skipped_files.len(),
            success_rate: success_rate(applied_fixes.len(), issues.len()),
        };

        info!(
            "Fix complete: {} fixed, {} failed, {} skipped ({})",
            summary.successful, summary.failed, summary.skipped, summary.success_rate
        );
        ctx.record(
            ScanStatus::Fixing,
            format!(
                "Fix complete: {} fixed, {} failed, {} skipped ({} success rate)",
                summary.successful, summary.failed, summary.skipped, summary.success_rate
            ),
        );

        Ok(FixReport {
            applied_fixes,
            failed_fixes,
            skipped_files,
            summary,
        })
    }

    /// Reason this file must not be submitted to the oracle, if any.
    async fn skip_reason(&self, path: &Path, path_str: &str) -> Option<String> {
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            if metadata.len() > self.max_file_size {
                return Some(format!(
                    "File too large ({}KB > {}KB)",
                    metadata.len() / 1024,
                    self.max_file_size / 1024
                ));
            }
        }

        let extension = file_extension(path);
        if BINARY_EXTENSIONS.contains(&extension.as_str()) {
            return Some("Binary file - cannot be processed".to_string());
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if should_skip_file(file_name, path_str) {
            return Some("Auto-generated or dependency file".to_string());
        }

        None
    }

    /// Back up the original, then overwrite with the fixed content.
    async fn apply_fix(
        &self,
        path: &Path,
        original_content: &str,
        fixed_content: &str,
    ) -> Result<String> {
        let backup_path = format!(
            "{}.backup_{}",
            path.display(),
            Utc::now().timestamp_millis()
        );

        tokio::fs::write(&backup_path, original_content)
            .await
            .with_context(|| format!("Failed to write backup {}", backup_path))?;
        info!("Created backup: {}", backup_path);

        tokio::fs::write(path, fixed_content)
            .await
            .with_context(|| format!("Failed to write fixed content to {}", path.display()))?;

        Ok(backup_path)
    }
}

/// Lowercase extension with leading dot, or empty string.
fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Lockfiles and generated trees are never candidates for rewriting.
pub fn should_skip_file(file_name: &str, file_path: &str) -> bool {
    SKIP_FILES.contains(&file_name)
        || SKIP_PATH_SEGMENTS
            .iter()
            .any(|segment| file_path.contains(segment))
}

/// Deterministic prompt for one finding.
pub fn build_fix_prompt(
    original_content: &str,
    issue: &Finding,
    file_name: &str,
    file_ext: &str,
) -> String {
    let type_label = match issue.kind {
        FindingType::UnsafeEval => "UNSAFE_EVAL",
        FindingType::HardcodedSecret => "HARDCODED_SECRET",
        FindingType::SqlInjection => "SQL_INJECTION",
        FindingType::InsecureHttp => "INSECURE_HTTP",
        FindingType::WeakCrypto => "WEAK_CRYPTO",
        FindingType::InputValidation => "INPUT_VALIDATION",
    };

    format!(
        "You are an expert code security fixer. Fix the following security issue and return ONLY the complete corrected file content.\n\
\n\
**IMPORTANT: Your response must contain ONLY the fixed file content. No explanations, no markdown formatting, no code blocks, no extra text.**\n\
\n\
File: {file_name}\n\
Issue: {issue_text}\n\
Issue Type: {type_label}\n\
File Extension: {file_ext}\n\
\n\
Security Fixing Instructions:\n\
- For UNSAFE_EVAL: Replace eval() with safer alternatives like JSON.parse() or remove if unnecessary\n\
- For HARDCODED_SECRET: Replace with environment variables or configuration placeholders\n\
- For SQL_INJECTION: Use parameterized queries or escape user input properly\n\
- For INSECURE_HTTP: Replace http:// with https:// for external requests\n\
- For WEAK_CRYPTO: Replace MD5/SHA1 with SHA-256 or stronger algorithms\n\
- For INPUT_VALIDATION: Add proper validation and sanitization\n\
\n\
Original Content:\n\
{original_content}\n\
\n\
FIXED CONTENT:",
        file_name = file_name,
        issue_text = issue.issue,
        type_label = type_label,
        file_ext = file_ext,
        original_content = original_content,
    )
}

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\w*\n?(.*?)\n?```").expect("code block pattern"));

/// Strip Markdown fencing and known preambles from an oracle response.
pub fn clean_oracle_response(response: &str) -> String {
    let mut cleaned = response.trim().to_string();

    if cleaned.contains("```") {
        if let Some(captures) = CODE_BLOCK_RE.captures(&cleaned) {
            cleaned = captures[1].to_string();
        }
    }

    for prefix in RESPONSE_PREFIXES {
        if let Some(head) = cleaned.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                cleaned = cleaned[prefix.len()..].trim().to_string();
            }
        }
    }

    cleaned
}

/// Structural validation of the fixed content before it is written.
///
/// Only JSON has a cheap well-formedness check today; other extensions pass
/// through.
pub fn validate_fixed_content(content: &str, file_ext: &str) -> Result<(), String> {
    if file_ext == ".json" {
        if let Err(err) = serde_json::from_str::<serde_json::Value>(content) {
            return Err(format!("Validation failed: {}", err));
        }
    }
    Ok(())
}

/// Integer-percent success rate over the total finding count.
fn success_rate(successful: usize, total_issues: usize) -> String {
    if total_issues == 0 {
        return "100%".to_string();
    }
    let rate = (successful as f64 / total_issues as f64) * 100.0;
    format!("{}%", rate.round() as i64)
}
