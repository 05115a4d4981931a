pub mod config;
pub mod github;
pub mod pipeline;
pub mod routes;
pub mod workspace;

use std::sync::Arc;

use securebot_core::oracle::RewriteOracle;
use securebot_core::runlog::ScanLog;

pub use config::Config;
pub use github::GitHubClient;
pub use workspace::WorkspaceManager;

pub struct AppState {
    pub github: Arc<GitHubClient>,
    pub workspace: WorkspaceManager,
    /// Absent when GOOGLE_AI_API_KEY is not configured; the fix endpoint
    /// then reports the misconfiguration per request while the read-only
    /// endpoints keep working.
    pub oracle: Option<Arc<dyn RewriteOracle>>,
    /// Event log of the most recent pipeline run, served by /api/scan/logs.
    pub scan_log: ScanLog,
    pub install_url: String,
}
