//! The fixed vulnerability rule catalogue.
//!
//! Each rule is an independent pattern check over a single file's content;
//! any number of rules may fire for one file, and each firing produces one
//! [`Finding`]. The trigger and suppression conditions here are a versioned
//! contract: downstream fix prompts and tests assume this exact finding
//! shape, so the patterns must not be "improved" in place.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Severity of a finding, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

/// The kind of vulnerability a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingType {
    UnsafeEval,
    HardcodedSecret,
    SqlInjection,
    InsecureHttp,
    WeakCrypto,
    InputValidation,
}

/// One located, typed security issue surfaced by the scanner.
///
/// Immutable after creation; the scanner fully replaces the finding set on
/// every scan rather than merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub file: String,
    pub file_name: String,
    pub severity: Severity,
    pub issue: String,
    #[serde(rename = "type")]
    pub kind: FindingType,
    /// 1-based line of the first match.
    pub line: usize,
}

static EVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|[^/\*\s]).*eval\s*\(").expect("eval pattern"));

static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:password|apikey|secret|token)\s*[:=]\s*["'][^"']{8,}["']"#)
        .expect("secret pattern")
});

static SQL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:SELECT|INSERT|UPDATE|DELETE).*["']\s*\+"#).expect("sql pattern")
});

static HTTP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)http://").expect("http pattern"));

static WEAK_CRYPTO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)md5|sha1").expect("weak crypto pattern"));

static STRONG_CRYPTO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)sha256|sha512").expect("strong crypto pattern"));

static INPUT_ACCESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"req\.(?:query|params|body)\.[a-zA-Z]+").expect("input pattern"));

/// Substrings that mark a secret-looking literal as a deliberate placeholder.
const SECRET_SUPPRESSORS: &[&str] = &[
    "REMOVED_FOR_SECURITY",
    "YOUR_API_KEY",
    "PLACEHOLDER",
    "example.com",
];

/// 1-based line number of a byte offset.
fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

/// Case-insensitive ASCII prefix check without allocating.
fn has_ci_prefix(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Run every rule against one file's content.
///
/// `path` only feeds the `file`/`file_name` fields of the findings; no
/// filesystem access happens here, so scanning is side-effect free and
/// idempotent.
pub fn scan_content(path: &Path, content: &str) -> Vec<Finding> {
    let file = path.display().to_string();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.clone());

    let mut findings = Vec::new();
    let mut push = |severity, issue: &str, kind, line| {
        findings.push(Finding {
            file: file.clone(),
            file_name: file_name.clone(),
            severity,
            issue: issue.to_string(),
            kind,
            line,
        });
    };

    // eval() usage, unless the file is clearly doing safe parsing or input
    // rejection, or every match sits behind a line comment.
    let eval_matches: Vec<regex::Match> = EVAL_RE.find_iter(content).collect();
    if !eval_matches.is_empty()
        && !content.contains("ast.literal_eval")
        && !content.contains("status(400)")
        && !eval_matches.iter().all(|m| m.as_str().trim().starts_with("//"))
    {
        push(
            Severity::Critical,
            "eval() usage detected - potential code injection vulnerability",
            FindingType::UnsafeEval,
            line_of(content, eval_matches[0].start()),
        );
    }

    if let Some(m) = SECRET_RE.find(content) {
        if !SECRET_SUPPRESSORS.iter().any(|s| content.contains(s)) {
            push(
                Severity::Critical,
                "Hardcoded credentials found - security risk",
                FindingType::HardcodedSecret,
                line_of(content, m.start()),
            );
        }
    }

    if let Some(m) = SQL_RE.find(content) {
        push(
            Severity::High,
            "SQL injection risk - dynamic query construction",
            FindingType::SqlInjection,
            line_of(content, m.start()),
        );
    }

    // `regex` has no lookahead, so the localhost exclusion is a
    // match-then-check over each http:// occurrence.
    for m in HTTP_RE.find_iter(content) {
        let rest = &content[m.end()..];
        if !has_ci_prefix(rest, "localhost") && !has_ci_prefix(rest, "127.0.0.1") {
            push(
                Severity::Medium,
                "Insecure HTTP request detected",
                FindingType::InsecureHttp,
                line_of(content, m.start()),
            );
            break;
        }
    }

    if !STRONG_CRYPTO_RE.is_match(content) {
        if let Some(m) = WEAK_CRYPTO_RE.find(content) {
            push(
                Severity::Medium,
                "Weak cryptographic hash detected",
                FindingType::WeakCrypto,
                line_of(content, m.start()),
            );
        }
    }

    if let Some(m) = INPUT_ACCESS_RE.find(content) {
        if !content.contains("validator")
            && !content.contains("validate")
            && !content.contains("sanitize")
        {
            push(
                Severity::Medium,
                "Potential missing input validation",
                FindingType::InputValidation,
                line_of(content, m.start()),
            );
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scan(content: &str) -> Vec<Finding> {
        scan_content(&PathBuf::from("src/app.js"), content)
    }

    #[test]
    fn test_eval_on_non_comment_line_is_critical() {
        let findings = scan("const x = 1;\nconst y = eval(JSON.parse(x));\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingType::UnsafeEval);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].line, 2);
    }

    #[test]
    fn test_eval_suppressed_when_all_matches_are_comments() {
        let findings = scan("// eval(input) was removed\nconst x = 1;\n");
        assert!(findings.is_empty());
    }

    #[test]
    fn test_eval_suppressed_by_literal_eval_marker() {
        let findings = scan("value = ast.literal_eval(raw)\nresult = eval(raw)\n");
        assert!(findings.iter().all(|f| f.kind != FindingType::UnsafeEval));
    }

    #[test]
    fn test_eval_suppressed_by_status_400_marker() {
        let findings = scan("res.status(400).send();\nconst y = eval(x);\n");
        assert!(findings.iter().all(|f| f.kind != FindingType::UnsafeEval));
    }

    #[test]
    fn test_hardcoded_secret_detected() {
        let findings = scan(r#"const password = "hunter2hunter2";"#);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingType::HardcodedSecret);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_hardcoded_secret_requires_eight_chars() {
        let findings = scan(r#"const password = "short";"#);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_hardcoded_secret_suppressed_by_example_domain() {
        let content = r#"
const apikey = "abcdefghijklmnop";
const host = "example.com";
"#;
        let findings = scan(content);
        assert!(findings
            .iter()
            .all(|f| f.kind != FindingType::HardcodedSecret));
    }

    #[test]
    fn test_hardcoded_secret_suppressed_by_placeholder() {
        let content = r#"const token = "PLACEHOLDER_VALUE_HERE";"#;
        assert!(scan(content).is_empty());
    }

    #[test]
    fn test_sql_injection_detected() {
        let findings = scan(r#"db.run("SELECT * FROM users WHERE id = '" + id);"#);
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingType::SqlInjection && f.severity == Severity::High));
    }

    #[test]
    fn test_insecure_http_detected() {
        let findings = scan(r#"fetch("http://api.payments.io/charge");"#);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingType::InsecureHttp);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_insecure_http_ignores_localhost_and_loopback() {
        assert!(scan(r#"fetch("http://localhost:3000/health");"#).is_empty());
        assert!(scan(r#"fetch("http://127.0.0.1:3000/health");"#).is_empty());
    }

    #[test]
    fn test_insecure_http_reports_first_external_match() {
        let content = "a(\"http://localhost/x\");\nb(\"http://remote.example/x\");\n";
        let findings = scan(content);
        let http: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == FindingType::InsecureHttp)
            .collect();
        assert_eq!(http.len(), 1);
        assert_eq!(http[0].line, 2);
    }

    #[test]
    fn test_weak_crypto_detected() {
        let findings = scan("const digest = md5(input);");
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingType::WeakCrypto));
    }

    #[test]
    fn test_weak_crypto_suppressed_when_strong_hash_present() {
        let findings = scan("const a = md5(x);\nconst b = sha256(x);\n");
        assert!(findings.iter().all(|f| f.kind != FindingType::WeakCrypto));
    }

    #[test]
    fn test_input_validation_detected() {
        let findings = scan("const id = req.query.id;\ndb.lookup(id);\n");
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingType::InputValidation));
    }

    #[test]
    fn test_input_validation_suppressed_by_sanitize() {
        let findings = scan("const id = sanitize(req.query.id);\n");
        assert!(findings
            .iter()
            .all(|f| f.kind != FindingType::InputValidation));
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let findings = scan("const digest = md5(input);");
        assert_eq!(findings[0].line, 1);
    }

    #[test]
    fn test_multiple_rules_fire_independently() {
        let content = r#"
const password = "supersecretvalue";
fetch("http://api.remote.io/data");
const digest = md5(password);
"#;
        let findings = scan(content);
        assert_eq!(findings.len(), 3);
    }

    #[test]
    fn test_finding_serializes_with_wire_names() {
        let finding = Finding {
            file: "src/app.js".to_string(),
            file_name: "app.js".to_string(),
            severity: Severity::Critical,
            issue: "eval() usage detected - potential code injection vulnerability".to_string(),
            kind: FindingType::UnsafeEval,
            line: 3,
        };
        let value = serde_json::to_value(&finding).expect("serialize finding");
        assert_eq!(value["severity"], "CRITICAL");
        assert_eq!(value["type"], "UNSAFE_EVAL");
        assert_eq!(value["fileName"], "app.js");
        assert_eq!(value["line"], 3);
    }
}
