//! Append-only JSONL persistence. One file of records per run plus a shared
//! summary file; prior record files in the same directory double as the
//! cross-run dedup seed.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::model::{RunSummary, Tender};

const SUMMARY_FILE: &str = "run_metadata.jsonl";
const RECORD_FILE_PREFIX: &str = "tenders_";

pub struct JsonlWriter {
    output_dir: PathBuf,
    records_path: PathBuf,
    summary_path: PathBuf,
    dry_run: bool,
}

impl JsonlWriter {
    pub fn new(output_dir: &Path, run_id: &str, dry_run: bool) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("creating output dir {}", output_dir.display()))?;
        Ok(JsonlWriter {
            output_dir: output_dir.to_path_buf(),
            records_path: output_dir.join(format!("{}{}.jsonl", RECORD_FILE_PREFIX, run_id)),
            summary_path: output_dir.join(SUMMARY_FILE),
            dry_run,
        })
    }

    pub fn append_record(&self, tender: &Tender) -> Result<()> {
        if self.dry_run {
            debug!("dry-run: skipping record write for {}", tender.natural_key);
            return Ok(());
        }
        append_line(&self.records_path, &serde_json::to_string(tender)?)
    }

    pub fn append_summary(&self, summary: &RunSummary) -> Result<()> {
        if self.dry_run {
            debug!("dry-run: skipping summary write for run {}", summary.run_id);
            return Ok(());
        }
        append_line(&self.summary_path, &serde_json::to_string(summary)?)
    }

    /// Natural keys from every record file already in the output directory.
    /// Unreadable lines are skipped; an absent directory yields an empty set.
    pub fn load_existing_keys(&self) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(keys),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(RECORD_FILE_PREFIX) || !name.ends_with(".jsonl") {
                continue;
            }
            let file = match fs::File::open(entry.path()) {
                Ok(f) => f,
                Err(_) => continue,
            };
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
                    if let Some(key) = value.get("natural_key").and_then(|k| k.as_str()) {
                        keys.insert(key.to_string());
                    }
                }
            }
        }
        Ok(keys)
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

// ── Tests ──
