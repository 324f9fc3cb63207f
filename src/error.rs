//! Error Types
//!
//! One enum per boundary. Errors travel as values: a failed action becomes a
//! failure record, a malformed analysis skips one category, and a missing
//! feedback match is returned to the caller so it can retry.

use chrono::{DateTime, Utc};

use crate::rules::ActionKind;

/// Invalid or missing settings, fatal before any cycle runs
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the monitor itself
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chat transport unavailable")]
    TransportUnavailable,

    #[error("An analysis cycle is already in progress")]
    CycleInProgress,
}

/// Analysis output that does not fit the category contract
#[derive(Debug, thiserror::Error)]
pub enum StrategyParseError {
    #[error("No JSON payload found in analysis output")]
    NoPayload,

    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

/// Failures while carrying out a decision
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("User not found: {0}")]
    IdentityNotFound(String),

    #[error("Identity lookup failed: {0}")]
    Lookup(String),

    #[error("{tool} failed: {detail}")]
    Rejected { tool: String, detail: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("'{0}' does not act on a user")]
    NotTargeted(ActionKind),
}

/// Feedback could not be attached
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedbackError {
    #[error("No action record found for timestamp {0}")]
    NotFound(DateTime<Utc>),

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Action at {0} already has feedback")]
    AlreadyRated(DateTime<Utc>),
}
