//! Analysis Strategies
//!
//! The monitor never inspects chat semantics itself. Each enabled category is
//! turned into a prompt, handed to an [`AnalysisStrategy`], and the returned
//! text is parsed against that category's JSON contract:
//!
//! ```text
//! toxicity   [{"username": str, "severity": 1-10, "evidence": str}]
//! spam       [{"username": str, "evidence": str}]
//! engagement {"message": str?}
//! poll       {"triggered": bool, "title": str?, "options": [str]?, "requests": int?}
//! ```
//!
//! Prompts end with a chat log section introduced by [`CHAT_LOG_MARKER`], one
//! `username: content` line per message, oldest first.

mod claude;
mod heuristic;

use anyhow::Result;
use async_trait::async_trait;

pub use claude::ClaudeStrategy;
pub use heuristic::HeuristicStrategy;

/// Line that opens the chat log section of every prompt
pub const CHAT_LOG_MARKER: &str = "--- CHAT LOG ---";

/// Prefix of the first prompt line, followed by the category name
pub const CATEGORY_PREFIX: &str = "category:";

/// Prompt in, structured text out
#[async_trait]
pub trait AnalysisStrategy: Send + Sync {
    /// Strategy identifier for logs and diagnostics
    fn name(&self) -> &str;

    /// Analyze a prompt and return the raw result text
    async fn analyze(&self, prompt: &str) -> Result<String>;
}
