//! Action History & Operator Feedback
//!
//! Every attempted action becomes an [`ActionRecord`]. Operators rate records
//! afterwards; ratings feed back into decision confidence. History is kept as
//! daily append-only JSON-lines files so it survives restarts and stays
//! readable with ordinary tools.

mod journal;
mod report;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decision::Decision;
use crate::rules::{ActionKind, RuleCategory};

pub use report::{ActionBreakdown, ActionInsight, LearningInsights, Statistics};
pub use store::{FeedbackStore, FEEDBACK_MATCH_TOLERANCE_MS};

/// Whether the platform accepted the action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Where a rating came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Chat,
    Manual,
    Streamer,
}

impl FeedbackSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "manual" => Some(Self::Manual),
            "streamer" => Some(Self::Streamer),
            _ => None,
        }
    }
}

impl fmt::Display for FeedbackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Manual => write!(f, "manual"),
            Self::Streamer => write!(f, "streamer"),
        }
    }
}

/// Operator rating of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub action_id: String,
    pub action_timestamp: DateTime<Utc>,
    /// 1 (wrong call) to 5 (exactly right)
    pub rating: u8,
    pub comment: Option<String>,
    pub source: FeedbackSource,
    pub recorded_at: DateTime<Utc>,
}

/// One attempted action and what came of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub category: Option<RuleCategory>,
    pub target: Option<String>,
    pub reason: String,
    pub confidence: f64,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackEntry>,
}

impl ActionRecord {
    /// Successful record for a decision; mark failures with [`Self::failed`]
    pub fn new(decision: &Decision, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            action: decision.action,
            category: decision.category,
            target: decision.target.clone(),
            reason: decision.reason.clone(),
            confidence: decision.confidence,
            outcome: Outcome::Success,
            error_detail: None,
            result: None,
            feedback: None,
        }
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.outcome = Outcome::Failure;
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        if !result.is_null() {
            self.result = Some(result);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Short single-line description for logs and reports
    pub fn summary(&self) -> String {
        let target = self
            .target
            .as_deref()
            .map(|t| format!(" {}", t))
            .unwrap_or_default();
        let status = match self.outcome {
            Outcome::Success => "ok".to_string(),
            Outcome::Failure => format!(
                "failed: {}",
                self.error_detail.as_deref().unwrap_or("unknown error")
            ),
        };
        format!(
            "[{}] {}{} ({:.0}%) - {}",
            self.timestamp.format("%H:%M:%S"),
            self.action,
            target,
            self.confidence * 100.0,
            status
        )
    }
}
