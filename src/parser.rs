//! Row parsing: one raw JSON row from the intercepted table response is
//! mapped to a [`Tender`] or a [`ParseFailure`]. The source keys rows by
//! small numeric column identifiers; the mapping is pinned here and
//! validated at this boundary so nothing malformed reaches the ledger.

use chrono::Utc;
use serde_json::Value;

use crate::error::{ParseFailure, RowError};
use crate::model::Tender;
use crate::normalize::{self, ExtractionStrategy, HeuristicStrategy};

// Source column layout of the listing table.
const COL_NATURAL_KEY: &str = "1";
const COL_BRIEF_HTML: &str = "2";
const COL_LINK_HTML: &str = "3";

const SNIPPET_MAX_CHARS: usize = 500;

pub struct RowParser<S: ExtractionStrategy = HeuristicStrategy> {
    strategy: S,
}

impl RowParser {
    pub fn new() -> Self {
        RowParser {
            strategy: HeuristicStrategy,
        }
    }
}

impl Default for RowParser {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ExtractionStrategy> RowParser<S> {
    pub fn with_strategy(strategy: S) -> Self {
        RowParser { strategy }
    }

    /// Parse one raw row. Failures carry the best-effort key (or "unknown")
    /// for the error log; nothing panics past this boundary.
    pub fn parse(&self, row: &Value) -> Result<Tender, ParseFailure> {
        let obj = match row.as_object() {
            Some(obj) => obj,
            None => {
                return Err(ParseFailure {
                    key: "unknown".to_string(),
                    error: RowError::NotAnObject,
                })
            }
        };

        let natural_key = match obj.get(COL_NATURAL_KEY) {
            Some(v) => cell_text(v).trim().to_string(),
            None => {
                return Err(ParseFailure {
                    key: "unknown".to_string(),
                    error: RowError::MissingNaturalKey,
                })
            }
        };
        if natural_key.is_empty() {
            return Err(ParseFailure {
                key: "unknown".to_string(),
                error: RowError::EmptyNaturalKey,
            });
        }

        let brief_html = obj.get(COL_BRIEF_HTML).map(cell_text).unwrap_or_default();
        let link_html = obj.get(COL_LINK_HTML).map(cell_text).unwrap_or_default();

        let description = normalize::strip_markup(&brief_html);
        let organization = self.strategy.organization(&description);
        let title = self.strategy.title(&description);
        let closing_date = self.strategy.closing_date(&description);
        let source_url = self
            .strategy
            .primary_url(&link_html)
            .unwrap_or_else(|| format!("{}/", normalize::BASE_URL));
        let attachment_urls = self.strategy.attachment_urls(&link_html);
        let category = self.strategy.category(&title, &description);

        Ok(Tender {
            natural_key,
            category,
            title,
            organization,
            description,
            publish_date: None,
            closing_date,
            source_url,
            attachment_urls,
            debug_snippet: Some(truncate_chars(&row.to_string(), SNIPPET_MAX_CHARS)),
            ingested_at: Utc::now(),
        })
    }
}

/// Cells are usually strings but the source occasionally emits bare numbers.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Tests ──
