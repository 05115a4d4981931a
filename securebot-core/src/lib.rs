pub mod autofix;
pub mod gemini;
pub mod oracle;
pub mod rules;
pub mod runlog;
pub mod scanner;

pub use autofix::{FixEngine, FixReport, FixStatus, FixSummary};
pub use gemini::{GeminiClient, DEFAULT_MODEL};
pub use oracle::{rewrite_with_retry, OracleError, RewriteOracle};
pub use rules::{Finding, FindingType, Severity};
pub use runlog::{RunContext, ScanLog, ScanLogEntry, ScanStatus};
pub use scanner::{scan_repository, RiskLevel, ScanReport, ScanSummary};
