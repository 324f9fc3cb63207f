//! Feedback Store
//!
//! Single writer of action history. All mutation happens under one mutex so
//! concurrent `record_action` and `add_feedback` calls never lose writes.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::journal;
use super::report::{format_report, LearningInsights, Statistics};
use super::{ActionRecord, FeedbackEntry, FeedbackSource};
use crate::decision::ConfidenceAdjustments;
use crate::error::FeedbackError;

/// How far a feedback timestamp may be from the action it rates
pub const FEEDBACK_MATCH_TOLERANCE_MS: i64 = 1000;

struct StoreInner {
    records: Vec<ActionRecord>,
    /// Day the daily files were last purged
    last_file_purge: Option<NaiveDate>,
}

/// Durable action log with operator ratings
pub struct FeedbackStore {
    dir: Option<PathBuf>,
    retention_days: i64,
    inner: Mutex<StoreInner>,
}

impl FeedbackStore {
    /// Open (or create) a store backed by `dir`, reloading retained history
    pub fn open(dir: impl AsRef<Path>, retention_days: i64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create feedback dir {}", dir.display()))?;

        let since = retention_cutoff(Utc::now(), retention_days)
            .map(|cutoff| cutoff.date_naive())
            .unwrap_or(NaiveDate::MIN);
        let mut records: Vec<ActionRecord> = journal::load(&dir, journal::ACTIONS, since)?;
        let feedback: Vec<FeedbackEntry> = journal::load(&dir, journal::FEEDBACK, since)?;

        let index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let mut orphaned = 0;
        for entry in feedback {
            match index.get(&entry.action_id) {
                Some(&i) => records[i].feedback = Some(entry),
                None => orphaned += 1,
            }
        }
        if orphaned > 0 {
            warn!("{} feedback entries reference purged or unknown actions", orphaned);
        }

        info!(
            "Feedback store opened at {} ({} retained actions)",
            dir.display(),
            records.len()
        );

        Ok(Self {
            dir: Some(dir),
            retention_days,
            inner: Mutex::new(StoreInner {
                records,
                last_file_purge: None,
            }),
        })
    }

    /// Store that keeps history only for the life of the process
    pub fn in_memory(retention_days: i64) -> Self {
        Self {
            dir: None,
            retention_days,
            inner: Mutex::new(StoreInner {
                records: Vec::new(),
                last_file_purge: None,
            }),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Append an action record. Never fails; persistence problems are logged.
    pub fn record_action(&self, record: ActionRecord) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);

        if let Some(dir) = &self.dir {
            if let Err(e) = journal::append(dir, journal::ACTIONS, record.timestamp.date_naive(), &record) {
                warn!("Failed to persist action {}: {:#}", record.id, e);
            }
        }
        debug!("Recorded {}", record.summary());
        inner.records.push(record);
    }

    /// Rate the action recorded at `timestamp`
    pub fn add_feedback(
        &self,
        timestamp: DateTime<Utc>,
        rating: u8,
        comment: Option<String>,
        source: FeedbackSource,
    ) -> Result<FeedbackEntry, FeedbackError> {
        if !(1..=5).contains(&rating) {
            return Err(FeedbackError::InvalidRating(rating));
        }

        let now = Utc::now();
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);

        let tolerance = Duration::milliseconds(FEEDBACK_MATCH_TOLERANCE_MS);
        let mut matched_any = false;
        let mut best: Option<(usize, Duration)> = None;
        for (i, record) in inner.records.iter().enumerate() {
            let distance = (record.timestamp - timestamp).abs();
            if distance > tolerance {
                continue;
            }
            matched_any = true;
            if record.feedback.is_some() {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        let Some((index, _)) = best else {
            return Err(if matched_any {
                FeedbackError::AlreadyRated(timestamp)
            } else {
                FeedbackError::NotFound(timestamp)
            });
        };

        let record = &mut inner.records[index];
        let entry = FeedbackEntry {
            action_id: record.id.clone(),
            action_timestamp: record.timestamp,
            rating,
            comment,
            source,
            recorded_at: now,
        };
        record.feedback = Some(entry.clone());
        info!("Feedback {}/5 ({}) for {}", rating, source, record.summary());

        if let Some(dir) = &self.dir {
            if let Err(e) = journal::append(dir, journal::FEEDBACK, now.date_naive(), &entry) {
                warn!("Failed to persist feedback for {}: {:#}", entry.action_id, e);
            }
            let insights = LearningInsights::build(&inner.records, now);
            if let Err(e) = write_insights(dir, &insights) {
                warn!("Failed to write learning insights: {:#}", e);
            }
        }

        Ok(entry)
    }

    /// Statistics over every retained record
    pub fn statistics(&self) -> Statistics {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);
        Statistics::compute(&inner.records, now)
    }

    /// Statistics over retained records at or after `since`
    pub fn statistics_since(&self, since: DateTime<Utc>) -> Statistics {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);
        let window: Vec<ActionRecord> = inner
            .records
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        Statistics::compute(&window, now)
    }

    pub fn learning_insights(&self) -> LearningInsights {
        LearningInsights::build(&self.inner.lock().records, Utc::now())
    }

    pub fn confidence_adjustments(&self) -> ConfidenceAdjustments {
        self.learning_insights().adjustments()
    }

    /// Every retained record, oldest first
    pub fn records(&self) -> Vec<ActionRecord> {
        self.inner.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    pub fn performance_report(&self, now: DateTime<Utc>) -> String {
        let mut inner = self.inner.lock();
        self.purge_expired(&mut inner, now);
        format_report(&inner.records, now.date_naive(), now)
    }

    /// Render the report and write it to the day's report file.
    /// Returns the report text and the path written, if the store is durable.
    pub fn write_report(&self, now: DateTime<Utc>) -> Result<(String, Option<PathBuf>)> {
        let report = self.performance_report(now);
        let Some(dir) = &self.dir else {
            return Ok((report, None));
        };
        let path = journal::report_path(dir, now.date_naive());
        journal::write_replace(&path, &report)?;
        info!("Performance report written to {}", path.display());
        Ok((report, Some(path)))
    }

    fn purge_expired(&self, inner: &mut StoreInner, now: DateTime<Utc>) {
        // A window reaching past the calendar keeps everything
        let Some(cutoff) = retention_cutoff(now, self.retention_days) else {
            return;
        };
        let before = inner.records.len();
        inner.records.retain(|r| r.timestamp >= cutoff);
        let dropped = before - inner.records.len();
        if dropped > 0 {
            debug!("Purged {} records older than {} days", dropped, self.retention_days);
        }

        let Some(dir) = &self.dir else { return };
        let today = now.date_naive();
        if inner.last_file_purge == Some(today) {
            return;
        }
        inner.last_file_purge = Some(today);
        match journal::purge(dir, cutoff.date_naive()) {
            Ok(0) => {}
            Ok(n) => info!("Removed {} expired history files", n),
            Err(e) => warn!("Failed to purge history files: {:#}", e),
        }
    }
}

/// Oldest timestamp still retained, or `None` when the window is unrepresentable
fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(retention_days).and_then(|window| now.checked_sub_signed(window))
}

fn write_insights(dir: &Path, insights: &LearningInsights) -> Result<()> {
    let json = serde_json::to_string_pretty(insights)?;
    journal::write_replace(&dir.join(journal::INSIGHTS_FILE), &json)
}
