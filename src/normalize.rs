//! Field normalization heuristics: raw markup fragments in, clean typed
//! fields out. Everything here is pure and total: a miss is `None` or a
//! sentinel value, never an error.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::model::TenderCategory;

pub const BASE_URL: &str = "https://tender.nprocure.com";

pub const UNKNOWN_ORGANIZATION: &str = "Unknown Organization";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static ORG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*?)Tender Id\s*:").unwrap());
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Name Of Work\s*:\s*(.*?)(?:Corrigendum|Estimated Contract Value|Last Date)")
        .unwrap()
});
static CLOSING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Last Date.*?(\d{2}-\d{2}-\d{4})").unwrap());
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href=["']([^"']*)["']"#).unwrap());
static TENDER_ID_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name=['"]tenderid['"].*?value=['"](\d+)['"]"#).unwrap());

// Checked in order; first matching set wins.
const GOODS_KEYWORDS: &[&str] = &["supply", "purchase", "procurement", "goods"];
const WORKS_KEYWORDS: &[&str] = &["construction", "civil work", "building", "works", "road"];
const SERVICES_KEYWORDS: &[&str] = &["consultancy", "service", "maintenance", "advisory", "hiring"];

/// Drop tag-like markup and collapse whitespace runs to single spaces.
pub fn strip_markup(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text preceding the "Tender Id :" label, e.g. the issuing body in
/// "DICDL-Dholera ... Tender Id : 12345".
pub fn extract_organization(text: &str) -> String {
    ORG_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| UNKNOWN_ORGANIZATION.to_string())
}

/// Text between "Name Of Work :" and the first terminating label. Falls back
/// to the full cleaned text, so callers always get something displayable.
pub fn extract_title(text: &str) -> String {
    TITLE_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| text.to_string())
}

/// "Last Date ... DD-MM-YYYY" somewhere in the brief text.
pub fn extract_closing_date(text: &str) -> Option<NaiveDate> {
    CLOSING_RE
        .captures(text)
        .and_then(|c| normalize_date(&c[1]))
}

/// Accepts `DD-Mon-YYYY` or `DD-MM-YYYY`; `None` on total mismatch. A bad
/// date is a recoverable heuristic miss, not a validation failure.
pub fn normalize_date(token: &str) -> Option<NaiveDate> {
    for fmt in ["%d-%b-%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(token, fmt) {
            return Some(date);
        }
    }
    None
}

/// First non-placeholder href, resolved to absolute form. When the link cell
/// has no href at all, the canonical view URL is reconstructed from an
/// embedded `tenderid` form field.
pub fn extract_primary_url(html: &str) -> Option<String> {
    if let Some(c) = HREF_RE.captures(html) {
        let url = &c[1];
        if !url.is_empty() && url != "#" {
            return Some(resolve_url(url));
        }
    }

    TENDER_ID_FIELD_RE
        .captures(html)
        .map(|c| format!("{}/view-nit-home?tenderid={}", BASE_URL, &c[1]))
}

/// All hrefs excluding placeholder anchors, each resolved like the primary.
pub fn extract_all_urls(html: &str) -> Vec<String> {
    HREF_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .filter(|u| !u.is_empty() && u != "#")
        .map(|u| resolve_url(&u))
        .collect()
}

fn resolve_url(url: &str) -> String {
    if url.starts_with('/') {
        format!("{}{}", BASE_URL, url)
    } else {
        url.to_string()
    }
}

/// Keyword-based category guess over title + description. Goods wins over
/// Works wins over Services; no match defaults to Services. Downstream
/// consumers rely on this exact tie-break.
pub fn infer_category(title: &str, description: &str) -> TenderCategory {
    let text = format!("{} {}", title, description).to_lowercase();
    if GOODS_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        TenderCategory::Goods
    } else if WORKS_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        TenderCategory::Works
    } else if SERVICES_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        TenderCategory::Services
    } else {
        // No keyword hit also lands on Services; the source skews heavily
        // toward service tenders.
        TenderCategory::Services
    }
}

/// Extraction seam: the parser only talks to this trait, so the regex
/// heuristics can be swapped for a structured-field source without touching
/// the controller or the ledger.
pub trait ExtractionStrategy: Send + Sync {
    fn organization(&self, text: &str) -> String;
    fn title(&self, text: &str) -> String;
    fn closing_date(&self, text: &str) -> Option<NaiveDate>;
    fn primary_url(&self, html: &str) -> Option<String>;
    fn attachment_urls(&self, html: &str) -> Vec<String>;
    fn category(&self, title: &str, description: &str) -> TenderCategory;
}

/// Default strategy: the regex heuristics above.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicStrategy;

impl ExtractionStrategy for HeuristicStrategy {
    fn organization(&self, text: &str) -> String {
        extract_organization(text)
    }
    fn title(&self, text: &str) -> String {
        extract_title(text)
    }
    fn closing_date(&self, text: &str) -> Option<NaiveDate> {
        extract_closing_date(text)
    }
    fn primary_url(&self, html: &str) -> Option<String> {
        extract_primary_url(html)
    }
    fn attachment_urls(&self, html: &str) -> Vec<String> {
        extract_all_urls(html)
    }
    fn category(&self, title: &str, description: &str) -> TenderCategory {
        infer_category(title, description)
    }
}

// ── Tests ──
