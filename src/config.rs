use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Run configuration, assembled from CLI flags and environment fallbacks.
/// Embedded verbatim in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Seconds paced between page actions.
    pub rate_limit: f64,
    /// Accepted but inert: the control loop drives a single page/tab.
    pub concurrency: usize,
    /// Target accepted-record count; the paging loop stops once reached.
    pub limit: u64,
    pub headless: bool,
    /// Shared by page navigation and the table-presence wait.
    pub timeout_seconds: u64,
    /// Navigation retry attempts.
    pub retries: u32,
    pub user_agent: Option<String>,
    pub output_dir: String,
    /// Suppresses all writes (records and summary); counters still run.
    pub dry_run: bool,
}

impl ScraperConfig {
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}
