//! Dedup and run accounting. The pipeline owns the seen-key set, all
//! counters, and the error log; the controller and response listener only
//! ever touch shared state through it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::config::ScraperConfig;
use crate::error::ErrorKind;
use crate::model::{ErrorEntry, RunSummary, Tender, TenderCategory};
use crate::writer::JsonlWriter;

pub struct DataPipeline {
    run_id: String,
    writer: JsonlWriter,
    seen_keys: HashSet<String>,
    saved: u64,
    deduped: u64,
    failures: u64,
    pages_visited: u64,
    rows_seen: u64,
    categories: BTreeSet<TenderCategory>,
    error_log: Vec<ErrorEntry>,
    finalized: bool,
}

impl DataPipeline {
    pub fn new(writer: JsonlWriter, run_id: String) -> Self {
        DataPipeline {
            run_id,
            writer,
            seen_keys: HashSet::new(),
            saved: 0,
            deduped: 0,
            failures: 0,
            pages_visited: 0,
            rows_seen: 0,
            categories: BTreeSet::new(),
            error_log: Vec::new(),
            finalized: false,
        }
    }

    /// Pre-seed the dedup set from previously persisted output, so repeated
    /// runs against the same directory do not re-save the same tenders.
    pub fn seed_keys(&mut self, keys: HashSet<String>) {
        if !keys.is_empty() {
            info!("Seeded {} previously saved tender ids", keys.len());
        }
        self.seen_keys.extend(keys);
    }

    /// Persist one record unless its key was already seen. A duplicate is an
    /// idempotent skip, not an error. A persistence failure is logged and the
    /// key stays marked seen so the same record is not retried.
    pub fn submit(&mut self, tender: &Tender) -> bool {
        if self.seen_keys.contains(&tender.natural_key) {
            self.deduped += 1;
            debug!("Duplicate tender skipped: {}", tender.natural_key);
            return false;
        }
        self.seen_keys.insert(tender.natural_key.clone());

        if let Err(e) = self.writer.append_record(tender) {
            self.record_error(ErrorKind::Save, &e.to_string(), &tender.natural_key);
            return false;
        }
        self.saved += 1;
        self.categories.insert(tender.category);
        true
    }

    pub fn record_error(&mut self, kind: ErrorKind, message: &str, context: &str) {
        self.failures += 1;
        error!("{}: {} ({})", kind.as_str(), message, context);
        self.error_log.push(ErrorEntry {
            kind: kind.as_str().to_string(),
            message: message.to_string(),
            context: context.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn page_visited(&mut self) {
        self.pages_visited += 1;
    }

    pub fn add_rows_seen(&mut self, count: usize) {
        self.rows_seen += count as u64;
    }

    /// Assemble and persist the run summary. Called exactly once per run,
    /// on every termination path.
    pub fn finalize(
        &mut self,
        config: &ScraperConfig,
        started_at: DateTime<Utc>,
        duration_seconds: f64,
    ) -> Result<RunSummary> {
        if self.finalized {
            bail!("run {} already finalized", self.run_id);
        }
        self.finalized = true;

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            scraper_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            duration_seconds,
            config: config.clone(),
            pages_visited: self.pages_visited,
            rows_seen: self.rows_seen,
            saved: self.saved,
            deduped: self.deduped,
            failures: self.failures,
            error_summary: self.error_histogram(),
            categories_observed: self.categories.iter().copied().collect(),
        };
        self.writer.append_summary(&summary)?;
        info!("Summary saved for run {}", self.run_id);
        Ok(summary)
    }

    fn error_histogram(&self) -> BTreeMap<String, u64> {
        let mut histogram = BTreeMap::new();
        for entry in &self.error_log {
            *histogram.entry(entry.kind.clone()).or_insert(0) += 1;
        }
        histogram
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tender_pipeline_{}_{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pipeline(dir: &PathBuf) -> DataPipeline {
        let writer = JsonlWriter::new(dir, "test-run", false).unwrap();
        DataPipeline::new(writer, "test-run".to_string())
    }

    fn tender(key: &str, category: TenderCategory) -> Tender {
        Tender {
            natural_key: key.to_string(),
            category,
            title: "t".to_string(),
            organization: "o".to_string(),
            description: "d".to_string(),
            publish_date: None,
            closing_date: None,
            source_url: "https://tender.nprocure.com/".to_string(),
            attachment_urls: vec![],
            debug_snippet: None,
            ingested_at: Utc::now(),
        }
    }

    fn config() -> ScraperConfig {
        ScraperConfig {
            rate_limit: 0.0,
            concurrency: 1,
            limit: 10,
            headless: true,
            timeout_seconds: 30,
            retries: 3,
            user_agent: None,
            output_dir: "data".to_string(),
            dry_run: false,
        }
    }

    #[test]
    fn duplicate_key_accepted_once() {
        let dir = temp_dir("dedup");
        let mut p = pipeline(&dir);
        assert!(p.submit(&tender("A", TenderCategory::Goods)));
        assert!(!p.submit(&tender("A", TenderCategory::Goods)));
        assert_eq!(p.saved, 1);
        assert_eq!(p.deduped, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn seeded_key_treated_as_duplicate() {
        let dir = temp_dir("seed");
        let mut p = pipeline(&dir);
        p.seed_keys(["A".to_string()].into_iter().collect());
        assert!(!p.submit(&tender("A", TenderCategory::Works)));
        assert_eq!(p.saved, 0);
        assert_eq!(p.deduped, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_failure_keeps_key_seen() {
        let dir = temp_dir("savefail");
        // A directory squatting on the records path makes every append fail.
        std::fs::create_dir_all(dir.join("tenders_test-run.jsonl")).unwrap();
        let mut p = pipeline(&dir);

        assert!(!p.submit(&tender("A", TenderCategory::Goods)));
        assert_eq!(p.saved, 0);
        assert_eq!(p.failures, 1);

        // The key stays marked seen: the same record dedups instead of
        // retrying the write.
        assert!(!p.submit(&tender("A", TenderCategory::Goods)));
        assert_eq!(p.deduped, 1);
        assert_eq!(p.failures, 1);

        let summary = p.finalize(&config(), Utc::now(), 0.1).unwrap();
        assert_eq!(summary.error_summary.get("SaveError"), Some(&1));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn error_histogram_counts_by_kind() {
        let dir = temp_dir("hist");
        let mut p = pipeline(&dir);
        p.record_error(ErrorKind::Parse, "bad row", "A");
        p.record_error(ErrorKind::Parse, "bad row", "B");
        p.record_error(ErrorKind::ResponseParse, "bad body", "");
        let summary = p.finalize(&config(), Utc::now(), 1.0).unwrap();
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.error_summary.get("ParseError"), Some(&2));
        assert_eq!(summary.error_summary.get("ResponseParseError"), Some(&1));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn finalize_is_once_only() {
        let dir = temp_dir("once");
        let mut p = pipeline(&dir);
        p.finalize(&config(), Utc::now(), 0.1).unwrap();
        assert!(p.finalize(&config(), Utc::now(), 0.1).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn summary_reflects_counters_and_categories() {
        let dir = temp_dir("summary");
        let mut p = pipeline(&dir);
        p.page_visited();
        p.add_rows_seen(5);
        p.submit(&tender("A", TenderCategory::Goods));
        p.submit(&tender("B", TenderCategory::Works));
        let summary = p.finalize(&config(), Utc::now(), 2.0).unwrap();
        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.rows_seen, 5);
        assert_eq!(summary.saved, 2);
        assert_eq!(
            summary.categories_observed,
            vec![TenderCategory::Goods, TenderCategory::Works]
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
