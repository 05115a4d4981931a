//! Repository tree scanner.
//!
//! Walks a checked-out repository, applies the rule catalogue to every
//! eligible source file, and aggregates the findings into a report. The
//! walk is read-only: scanning an unchanged tree twice yields an identical
//! finding list.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::rules::{scan_content, Finding, Severity};
use crate::runlog::{RunContext, ScanStatus};

/// Extensions eligible for scanning, lowercase with leading dot.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    ".js", ".ts", ".jsx", ".tsx", ".py", ".java", ".php", ".rb", ".go", ".cs",
];

/// Files larger than this are skipped by the scanner.
pub const MAX_SCAN_FILE_SIZE: u64 = 200 * 1024;

const MAX_SCAN_DEPTH: usize = 10;

/// Directory names excluded from the walk at any depth.
const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build", ".git", "repos"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    HighRisk,
    MediumRisk,
    LowRisk,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub total: usize,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub repo_path: String,
    pub total_files: usize,
    pub files_scanned: usize,
    pub summary: ScanSummary,
    pub issues: Vec<Finding>,
    pub recommendations: Vec<String>,
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let dotted = format!(".{}", ext.to_lowercase());
            SOURCE_EXTENSIONS.contains(&dotted.as_str())
        })
        .unwrap_or(false)
}

/// Scan every eligible file under `repo_path` and aggregate the findings.
pub fn scan_repository(repo_path: &Path, ctx: &RunContext) -> Result<ScanReport> {
    if !repo_path.exists() {
        bail!("Repository path does not exist: {}", repo_path.display());
    }

    info!("Security scan started for {}", repo_path.display());

    let mut files = Vec::new();
    let walker = WalkDir::new(repo_path)
        .max_depth(MAX_SCAN_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry));

    for entry in walker {
        let entry = entry.context("Failed to walk repository tree")?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    let total_files = files.len();
    info!("Found {} files under {}", total_files, repo_path.display());
    ctx.record(
        ScanStatus::Scanning,
        format!("Found {} files to scan", total_files),
    );

    let mut issues = Vec::new();
    let mut files_scanned = 0usize;

    for file in &files {
        if !has_source_extension(file) {
            continue;
        }

        let metadata = match std::fs::metadata(file) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Error scanning {}: {}", file.display(), err);
                continue;
            }
        };
        if metadata.len() > MAX_SCAN_FILE_SIZE {
            continue;
        }

        // Binary or non-UTF-8 files are skipped, not fatal.
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(err) => {
                warn!("Error scanning {}: {}", file.display(), err);
                continue;
            }
        };

        files_scanned += 1;
        issues.extend(scan_content(file, &content));
    }

    let critical = issues
        .iter()
        .filter(|i| i.severity == Severity::Critical)
        .count();
    let high = issues.iter().filter(|i| i.severity == Severity::High).count();
    let medium = issues
        .iter()
        .filter(|i| i.severity == Severity::Medium)
        .count();
    let total = issues.len();

    let risk_level = if critical > 0 {
        RiskLevel::HighRisk
    } else if high > 0 {
        RiskLevel::MediumRisk
    } else {
        RiskLevel::LowRisk
    };

    info!("Scan complete: {} issues found", total);
    ctx.record(
        ScanStatus::Scanned,
        format!(
            "Scan complete: {} issues found (Critical: {}, High: {}, Medium: {})",
            total, critical, high, medium
        ),
    );

    let recommendations = if total == 0 {
        vec!["No security issues found".to_string()]
    } else {
        vec![
            "Address security vulnerabilities".to_string(),
            "Review code security practices".to_string(),
        ]
    };

    Ok(ScanReport {
        repo_path: repo_path.display().to_string(),
        total_files,
        files_scanned,
        summary: ScanSummary {
            critical,
            high,
            medium,
            total,
            risk_level,
        },
        issues,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::FindingType;
    use crate::runlog::{RunContext, ScanLog};
    use std::fs;
    use tempfile::TempDir;

    fn test_ctx() -> (RunContext, ScanLog) {
        let log = ScanLog::new();
        (RunContext::new(1, "octocat", log.clone()), log)
    }

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, content).expect("write fixture");
    }

    #[test]
    fn test_scan_reports_findings_for_source_files() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "src/app.js", "const secret = \"abcdefghijklmnop\";\n");
        write(&dir, "README.md", "fetch http://totally.fine because markdown\n");

        let (ctx, _log) = test_ctx();
        let report = scan_repository(dir.path(), &ctx).expect("scan succeeds");

        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.issues[0].kind, FindingType::HardcodedSecret);
        assert_eq!(report.summary.risk_level, RiskLevel::HighRisk);
    }

    #[test]
    fn test_scan_excludes_dependency_directories() {
        let dir = TempDir::new().expect("tempdir");
        write(
            &dir,
            "node_modules/lib/index.js",
            "const password = \"abcdefghijklmnop\";\n",
        );
        write(&dir, "src/clean.js", "const x = 1;\n");

        let (ctx, _log) = test_ctx();
        let report = scan_repository(dir.path(), &ctx).expect("scan succeeds");

        assert_eq!(report.summary.total, 0);
        assert_eq!(report.files_scanned, 1);
    }

    #[test]
    fn test_scan_skips_oversized_files() {
        let dir = TempDir::new().expect("tempdir");
        let mut big = String::from("const digest = md5(input);\n");
        big.push_str(&"// padding\n".repeat(30_000));
        assert!(big.len() as u64 > MAX_SCAN_FILE_SIZE);
        write(&dir, "big.js", &big);

        let (ctx, _log) = test_ctx();
        let report = scan_repository(dir.path(), &ctx).expect("scan succeeds");

        assert_eq!(report.total_files, 1);
        assert_eq!(report.files_scanned, 0);
        assert_eq!(report.summary.total, 0);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "a.js", "const y = eval(input);\n");
        write(&dir, "b.py", "digest = md5(data)\n");

        let (ctx, _log) = test_ctx();
        let first = scan_repository(dir.path(), &ctx).expect("first scan");
        let second = scan_repository(dir.path(), &ctx).expect("second scan");

        assert_eq!(first.issues, second.issues);
        assert_eq!(first.summary.total, second.summary.total);
    }

    #[test]
    fn test_scan_missing_path_is_an_error() {
        let (ctx, _log) = test_ctx();
        let err = scan_repository(Path::new("/nonexistent/repo"), &ctx)
            .expect_err("missing path fails");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_scan_records_progress_entries() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "clean.js", "const x = 1;\n");

        let (ctx, log) = test_ctx();
        scan_repository(dir.path(), &ctx).expect("scan succeeds");

        let statuses: Vec<ScanStatus> = log.snapshot().iter().map(|e| e.status).collect();
        assert!(statuses.contains(&ScanStatus::Scanning));
        assert!(statuses.contains(&ScanStatus::Scanned));
    }

    #[test]
    fn test_zero_findings_yields_low_risk() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "clean.ts", "export const x = 1;\n");

        let (ctx, _log) = test_ctx();
        let report = scan_repository(dir.path(), &ctx).expect("scan succeeds");

        assert_eq!(report.summary.risk_level, RiskLevel::LowRisk);
        assert_eq!(
            report.recommendations,
            vec!["No security issues found".to_string()]
        );
    }
}
