//! Pagination/extraction controller. Drives one headless browser page over
//! the tender listing, intercepts the table's XHR responses via CDP, and
//! feeds every row through the parser into the pipeline until the target
//! count is reached or pagination is exhausted.
//!
//! The response listener runs as its own task and reports each processed
//! batch over a channel, so the paging loop advances on an explicit signal
//! instead of a blind settle sleep (the sleep remains only as a timeout
//! fallback for responses that never arrive).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ScraperConfig;
use crate::error::{ErrorKind, ScrapeError};
use crate::model::RunSummary;
use crate::normalize::BASE_URL;
use crate::parser::RowParser;
use crate::pipeline::DataPipeline;

/// Substring identifying the data-table endpoint among all page traffic.
const TABLE_ENDPOINT: &str = "beforeLoginTenderTableList";
const TABLE_SELECTOR: &str = "table.dataTable";
const NEXT_SELECTOR: &str = ".paginate_button.next";

const MIN_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 10;
/// Fallback wait for a page's response when the listener signal never comes.
const SETTLE_DELAY: Duration = Duration::from_secs(3);
const SELECTOR_POLL: Duration = Duration::from_millis(250);

const PAGE_SIZE_JS: &str = r#"
(() => {
  const select = document.querySelector("select[name*='length']");
  if (!select) return false;
  select.value = '100';
  select.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
})()
"#;

enum Outcome {
    Completed,
    Interrupted,
}

pub struct TenderScraper {
    config: ScraperConfig,
    pipeline: Arc<Mutex<DataPipeline>>,
    accepted: Arc<AtomicU64>,
}

impl TenderScraper {
    pub fn new(config: ScraperConfig, pipeline: DataPipeline) -> Self {
        TenderScraper {
            config,
            pipeline: Arc::new(Mutex::new(pipeline)),
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run the full scrape. The summary is finalized and persisted on every
    /// path out of here, including interrupt and fatal error.
    pub async fn run(self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let t0 = Instant::now();

        let outcome = self.drive().await;

        let mut pipeline = self.pipeline.lock().await;
        if let Err(e) = &outcome {
            let kind = match e.downcast_ref::<ScrapeError>() {
                Some(ScrapeError::NavigationExhausted { .. }) => ErrorKind::Navigation,
                Some(ScrapeError::TableWaitTimeout(_)) => ErrorKind::TableWaitTimeout,
                None => ErrorKind::Fatal,
            };
            pipeline.record_error(kind, &e.to_string(), "");
        }
        let finalized = pipeline.finalize(&self.config, started_at, t0.elapsed().as_secs_f64());
        drop(pipeline);

        match outcome {
            Ok(kind) => {
                let summary = finalized?;
                match kind {
                    Outcome::Completed => info!(
                        "Run complete: {} saved, {} deduped, {} failures",
                        summary.saved, summary.deduped, summary.failures
                    ),
                    Outcome::Interrupted => warn!(
                        "Interrupted by user; {} tenders saved before stopping",
                        summary.saved
                    ),
                }
                Ok(summary)
            }
            Err(e) => {
                // The scrape error is the cause the operator needs; a failed
                // summary write must not mask it.
                if let Err(fe) = finalized {
                    error!("Failed to persist run summary: {:#}", fe);
                }
                Err(e)
            }
        }
    }

    async fn drive(&self) -> Result<Outcome> {
        let mut builder = BrowserConfig::builder().args(vec![
            "--no-sandbox",
            "--disable-setuid-sandbox",
        ]);
        if !self.config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(|e| anyhow!(e))?;

        let (mut browser, mut handler) = Browser::launch(browser_config).await?;
        let driver = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let result = self.drive_page(&browser).await;

        browser.close().await.ok();
        browser.wait().await.ok();
        driver.abort();
        result
    }

    async fn drive_page(&self, browser: &Browser) -> Result<Outcome> {
        let page = browser.new_page("about:blank").await?;
        page.set_user_agent(self.config.user_agent()).await?;

        // Listener must be registered before the first navigation so the
        // initial table response cannot be missed.
        page.execute(EnableParams::default()).await?;
        let mut events = page.event_listener::<EventResponseReceived>().await?;
        let (batch_tx, mut batch_rx) = mpsc::channel::<usize>(8);

        let listener = {
            let page = page.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let accepted = Arc::clone(&self.accepted);
            let limit = self.config.limit;
            tokio::spawn(async move {
                let parser = RowParser::new();
                while let Some(event) = events.next().await {
                    if !is_table_response(&event.response.url, event.response.status) {
                        continue;
                    }
                    let rows = match fetch_rows(&page, &event).await {
                        Ok(rows) => rows,
                        Err(e) => {
                            pipeline.lock().await.record_error(
                                ErrorKind::ResponseParse,
                                &e.to_string(),
                                &event.response.url,
                            );
                            let _ = batch_tx.send(0).await;
                            continue;
                        }
                    };
                    let mut p = pipeline.lock().await;
                    process_batch(&mut p, &parser, &rows, limit, &accepted);
                    drop(p);
                    let _ = batch_tx.send(rows.len()).await;
                }
            })
        };

        // Ctrl-C must interrupt every phase, including the navigation retry
        // window, and still reach teardown and finalize.
        let outcome = tokio::select! {
            res = self.scrape_sequence(&page, &mut batch_rx) => res.map(|_| Outcome::Completed),
            _ = tokio::signal::ctrl_c() => Ok(Outcome::Interrupted),
        };

        listener.abort();
        outcome
    }

    async fn scrape_sequence(
        &self,
        page: &Page,
        batch_rx: &mut mpsc::Receiver<usize>,
    ) -> Result<()> {
        self.navigate_with_retry(page).await?;
        self.pipeline.lock().await.page_visited();

        info!("Waiting for tender table...");
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        wait_for_selector(page, TABLE_SELECTOR, timeout).await?;

        // Best-effort page-size bump; losing it only costs extra pagination.
        match bump_page_size(page).await {
            Ok(()) => await_batch(batch_rx, SETTLE_DELAY).await,
            Err(e) => warn!("Could not change page size: {}", e),
        }

        self.paging_loop(page, batch_rx).await
    }

    async fn paging_loop(&self, page: &Page, batch_rx: &mut mpsc::Receiver<usize>) -> Result<()> {
        let limit = self.config.limit;
        let pace = Duration::from_secs_f64(self.config.rate_limit.max(0.0));

        let pb = ProgressBar::new(limit);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} tenders")?
                .progress_chars("=> "),
        );

        loop {
            tokio::time::sleep(pace).await;

            let accepted = self.accepted.load(Ordering::SeqCst);
            pb.set_position(accepted.min(limit));
            if accepted >= limit {
                info!("Reached target of {} tenders", limit);
                break;
            }
            info!("Extracted {} / {} tenders, processing page...", accepted, limit);

            let next = match page.find_element(NEXT_SELECTOR).await {
                Ok(el) => el,
                Err(_) => {
                    info!("No next-page control; pagination exhausted");
                    break;
                }
            };
            let class = next.attribute("class").await.ok().flatten().unwrap_or_default();
            if class.contains("disabled") {
                info!("Next page disabled; last page reached");
                break;
            }

            // Stale signals from earlier responses must not satisfy the wait
            // for the page we are about to request.
            while batch_rx.try_recv().is_ok() {}

            debug!("Clicking next page");
            next.click().await?;
            self.pipeline.lock().await.page_visited();
            await_batch(batch_rx, SETTLE_DELAY).await;
        }

        pb.finish_and_clear();
        Ok(())
    }

    async fn navigate_with_retry(&self, page: &Page) -> Result<()> {
        let url = format!("{}/", BASE_URL);
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let attempts = self.config.retries.max(1);
        let mut last = String::new();

        for attempt in 0..attempts {
            info!("Navigating to {} (attempt {}/{})", url, attempt + 1, attempts);
            match tokio::time::timeout(timeout, page.goto(url.as_str())).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => last = e.to_string(),
                Err(_) => last = format!("navigation timed out after {:?}", timeout),
            }
            if attempt + 1 < attempts {
                let backoff = backoff_delay(attempt);
                warn!("Navigation failed: {}; retrying in {:?}", last, backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        Err(ScrapeError::NavigationExhausted { url, attempts, last }.into())
    }
}

/// Exponential backoff between navigation attempts, clamped to [MIN, MAX]
/// seconds.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = (1u64 << attempt.min(6)).clamp(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

fn is_table_response(url: &str, status: i64) -> bool {
    url.contains(TABLE_ENDPOINT) && status == 200
}

/// Pull the intercepted response body and decode it to the row array.
async fn fetch_rows(page: &Page, event: &EventResponseReceived) -> Result<Vec<Value>> {
    let resp = page
        .execute(GetResponseBodyParams::new(event.request_id.clone()))
        .await?;
    if resp.result.base64_encoded {
        bail!("table response body is base64-encoded");
    }
    parse_table_body(&resp.result.body)
}

fn parse_table_body(body: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(body)?;
    match value.get("data").and_then(|d| d.as_array()) {
        Some(rows) => Ok(rows.clone()),
        None => bail!("table response has no data array"),
    }
}

/// Parse and submit one page's rows. Row failures are contained here; the
/// limit is enforced mid-batch so no extra rows slip through once the target
/// count is reached.
fn process_batch(
    pipeline: &mut DataPipeline,
    parser: &RowParser,
    rows: &[Value],
    limit: u64,
    accepted: &AtomicU64,
) {
    pipeline.add_rows_seen(rows.len());
    for row in rows {
        if accepted.load(Ordering::SeqCst) >= limit {
            break;
        }
        match parser.parse(row) {
            Ok(tender) => {
                if pipeline.submit(&tender) {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(failure) => {
                pipeline.record_error(ErrorKind::Parse, &failure.error.to_string(), &failure.key);
            }
        }
    }
}

/// Wait for the listener's batch-processed signal, falling back to the
/// settle delay if no table response arrives for this page action.
async fn await_batch(batch_rx: &mut mpsc::Receiver<usize>, settle: Duration) {
    match tokio::time::timeout(settle, batch_rx.recv()).await {
        Ok(Some(rows)) => debug!("Page response processed ({} rows)", rows),
        Ok(None) => debug!("Response listener stopped"),
        Err(_) => debug!("No table response within {:?}; continuing", settle),
    }
}

async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(SELECTOR_POLL).await;
    }
    Err(ScrapeError::TableWaitTimeout(timeout).into())
}

/// Select the 100-row page size if the control exists.
async fn bump_page_size(page: &Page) -> Result<()> {
    info!("Attempting to increase page size...");
    let changed = page.evaluate(PAGE_SIZE_JS).await?.into_value::<bool>()?;
    if !changed {
        bail!("page length selector not found");
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TenderCategory;
    use crate::writer::JsonlWriter;
    use serde_json::json;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tender_ctrl_{}_{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pipeline(dir: &PathBuf) -> DataPipeline {
        let writer = JsonlWriter::new(dir, "ctrl-test", false).unwrap();
        DataPipeline::new(writer, "ctrl-test".to_string())
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

    fn row(key: &str, work: &str) -> Value {
        json!({
            "1": key,
            "2": format!(
                "Org Tender Id : 1 Name Of Work : {} Last Date Of Submission : 20-09-2026",
                work
            ),
            "3": "<a href='/view-nit-home?tenderid=1'>View</a>",
        })
    }

    #[test]
    fn backoff_is_exponential_and_clamped() {
        let secs: Vec<u64> = (0..5).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![2, 2, 4, 8, 10]);
    }

    #[test]
    fn response_filter() {
        assert!(is_table_response(
            "https://tender.nprocure.com/beforeLoginTenderTableList?draw=2",
            200
        ));
        assert!(!is_table_response(
            "https://tender.nprocure.com/beforeLoginTenderTableList",
            500
        ));
        assert!(!is_table_response("https://tender.nprocure.com/other", 200));
    }

    #[test]
    fn table_body_without_data_is_error() {
        assert!(parse_table_body(r#"{"recordsTotal": 0}"#).is_err());
        assert!(parse_table_body("not json").is_err());
        assert_eq!(parse_table_body(r#"{"data": []}"#).unwrap().len(), 0);
    }

    #[test]
    fn single_page_with_duplicate() {
        let dir = temp_dir("dup");
        let mut p = pipeline(&dir);
        let parser = RowParser::new();
        let accepted = AtomicU64::new(0);
        let rows = vec![
            row("A", "Supply of pipes"),
            row("B", "Construction of road bridge"),
            row("A", "Supply of pipes"),
        ];

        process_batch(&mut p, &parser, &rows, 10, &accepted);

        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        let summary = p.finalize(&config(), Utc::now(), 0.1).unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.deduped, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.rows_seen, 3);
        assert_eq!(
            summary.categories_observed,
            vec![TenderCategory::Goods, TenderCategory::Works]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn limit_stops_mid_batch() {
        let dir = temp_dir("limit");
        let mut p = pipeline(&dir);
        let parser = RowParser::new();
        let accepted = AtomicU64::new(0);
        let rows = vec![row("A", "a"), row("B", "b"), row("C", "c")];

        process_batch(&mut p, &parser, &rows, 2, &accepted);

        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        let summary = p.finalize(&config(), Utc::now(), 0.1).unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.rows_seen, 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_row_does_not_abort_batch() {
        let dir = temp_dir("isolate");
        let mut p = pipeline(&dir);
        let parser = RowParser::new();
        let accepted = AtomicU64::new(0);
        let rows = vec![row("A", "a"), json!({"2": "row without a key"}), row("B", "b")];

        process_batch(&mut p, &parser, &rows, 10, &accepted);

        let summary = p.finalize(&config(), Utc::now(), 0.1).unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.error_summary.get("ParseError"), Some(&1));
        std::fs::remove_dir_all(&dir).ok();
    }
}
