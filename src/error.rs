use std::time::Duration;

use thiserror::Error;

/// Run-level failures. Only these escalate past the control loop; everything
/// row- or response-scoped is contained and logged where it happens.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("navigation to {url} failed after {attempts} attempts: {last}")]
    NavigationExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("timed out after {0:?} waiting for the tender table")]
    TableWaitTimeout(Duration),
}

/// A single row that could not be turned into a record. The variants are the
/// full set of ways the fixed column mapping can fail.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row is not a JSON object")]
    NotAnObject,
    #[error("row has no tender id column")]
    MissingNaturalKey,
    #[error("tender id column is empty")]
    EmptyNaturalKey,
}

/// Parse failure with the best-effort key for the error log.
#[derive(Debug)]
pub struct ParseFailure {
    pub key: String,
    pub error: RowError,
}

/// Labels for the run summary's failure histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Navigation,
    TableWaitTimeout,
    ResponseParse,
    Parse,
    Save,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Navigation => "NavigationError",
            ErrorKind::TableWaitTimeout => "TableWaitTimeout",
            ErrorKind::ResponseParse => "ResponseParseError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Save => "SaveError",
            ErrorKind::Fatal => "FatalScraperError",
        }
    }
}
