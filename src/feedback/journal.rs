//! Daily append-only JSON-lines files

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ACTIONS: &str = "actions";
pub const FEEDBACK: &str = "feedback";
pub const REPORT: &str = "performance-report";
pub const INSIGHTS_FILE: &str = "learning-insights.json";

pub fn daily_path(dir: &Path, kind: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}-{}.jsonl", kind, date.format("%Y-%m-%d")))
}

pub fn report_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}-{}.md", REPORT, date.format("%Y-%m-%d")))
}

/// Date embedded in a daily file name of the given kind
fn file_date(name: &str, kind: &str) -> Option<NaiveDate> {
    let rest = name.strip_prefix(kind)?.strip_prefix('-')?;
    let stem = rest.strip_suffix(".jsonl").or_else(|| rest.strip_suffix(".md"))?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Append one entry as a JSON line
pub fn append<T: Serialize>(dir: &Path, kind: &str, date: NaiveDate, entry: &T) -> Result<()> {
    let path = daily_path(dir, kind, date);
    let line = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Load every entry of `kind` dated on or after `since`, oldest file first
pub fn load<T: DeserializeOwned>(dir: &Path, kind: &str, since: NaiveDate) -> Result<Vec<T>> {
    let mut files: Vec<(NaiveDate, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(".jsonl") {
            continue;
        }
        if let Some(date) = file_date(name, kind) {
            if date >= since {
                files.push((date, entry.path()));
            }
        }
    }
    files.sort();

    let mut entries = Vec::new();
    for (_, path) in files {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping {}:{}: {}", path.display(), lineno + 1, e),
            }
        }
    }
    Ok(entries)
}

/// Delete daily logs and reports dated before `before`
pub fn purge(dir: &Path, before: NaiveDate) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let date = [ACTIONS, FEEDBACK, REPORT]
            .iter()
            .find_map(|kind| file_date(name, kind));
        if matches!(date, Some(d) if d < before) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Replace a file's content via a temporary sibling
pub fn write_replace(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
