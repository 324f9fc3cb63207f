//! Chat Autopilot
//!
//! Autonomous live-chat monitor. Watches a bounded window of chat, decides
//! whether to intervene (timeout, ban, warn, engagement message, poll) and
//! learns from operator ratings of what it did.
//!
//! # Architecture
//!
//! ```text
//! transport ──► ChatIngest ──► ChatBuffer
//!                                  │ snapshot
//!                                  ▼
//!  Monitor ── timer ──► PatternDetector ──► AnalysisStrategy (heuristic / Claude)
//!     │                      │ patterns
//!     │                      ▼
//!     │                DecisionEngine ◄── cooldowns + feedback adjustments
//!     │                      │ decisions (confidence order)
//!     │                      ▼
//!     │                ActionExecutor ──► IdentityLookup / ActionCapability
//!     │                      │ records
//!     ▼                      ▼
//!  MonitorState ◄──── FeedbackStore (daily JSONL, insights, reports)
//! ```

pub mod actions;
pub mod analysis;
pub mod chat;
pub mod config;
pub mod decision;
pub mod detector;
pub mod error;
pub mod feedback;
pub mod monitor;
pub mod resolver;
pub mod rules;

pub use actions::{
    ActionCapability, ActionExecutor, ActionTool, DryRunCapability, IdentityLookup, PlatformUser,
    ToolResult,
};
pub use analysis::{AnalysisStrategy, ClaudeStrategy, HeuristicStrategy};
pub use chat::{ingest_channel, ChatBuffer, ChatIngest, ChatMessage};
pub use config::Config;
pub use decision::{CooldownTracker, Decision, DecisionEngine};
pub use detector::{Pattern, PatternDetector};
pub use error::{ActionError, ConfigError, FeedbackError, MonitorError, StrategyParseError};
pub use feedback::{ActionRecord, FeedbackEntry, FeedbackSource, FeedbackStore, Outcome, Statistics};
pub use monitor::{CycleReport, ModerationOutcome, Monitor, MonitorState};
pub use resolver::{Resolution, TargetResolver};
pub use rules::{ActionKind, PollTrigger, RuleCategory, RuleConfig, Rules};
