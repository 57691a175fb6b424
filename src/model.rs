use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScraperConfig;

/// Closed-set classification of a tender's nature. Inferred from keywords,
/// never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TenderCategory {
    Goods,
    Works,
    Services,
    Unknown,
}

impl fmt::Display for TenderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TenderCategory::Goods => "Goods",
            TenderCategory::Works => "Works",
            TenderCategory::Services => "Services",
            TenderCategory::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One extracted tender listing. Immutable once built; one JSON line per
/// accepted record in the output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tender {
    /// Source-assigned tender id, stable across pages and runs. Dedup key.
    pub natural_key: String,
    pub category: TenderCategory,
    pub title: String,
    pub organization: String,
    pub description: String,
    /// Not present in the list view; kept in the schema for parity with
    /// the detail pages.
    pub publish_date: Option<NaiveDate>,
    pub closing_date: Option<NaiveDate>,
    pub source_url: String,
    pub attachment_urls: Vec<String>,
    /// Raw row excerpt kept for diagnostics, capped at 500 chars.
    pub debug_snippet: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

/// One entry in the ledger's error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub kind: String,
    pub message: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-run accounting, appended as one JSON line to the shared summary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scraper_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub config: ScraperConfig,
    pub pages_visited: u64,
    pub rows_seen: u64,
    pub saved: u64,
    pub deduped: u64,
    pub failures: u64,
    pub error_summary: BTreeMap<String, u64>,
    pub categories_observed: Vec<TenderCategory>,
}
