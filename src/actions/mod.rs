//! Platform Action Boundary
//!
//! The monitor never talks to the streaming platform directly. It goes
//! through two seams:
//!
//! - [`ActionCapability`]: invoke a named tool with JSON parameters
//! - [`IdentityLookup`]: map a chat username to a platform account
//!
//! Both are async traits so a REST client, an RPC bridge or a test double
//! can stand behind them.

mod dry_run;
mod executor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ActionError;
use crate::rules::ActionKind;

pub use dry_run::DryRunCapability;
pub use executor::ActionExecutor;

/// Tool names understood by the action capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTool {
    SendChatMessage,
    TimeoutUser,
    BanUser,
    CreatePoll,
    CreatePrediction,
    CreateClip,
    UpdateTitle,
    UpdateCategory,
}

impl ActionTool {
    pub const ALL: [ActionTool; 8] = [
        Self::SendChatMessage,
        Self::TimeoutUser,
        Self::BanUser,
        Self::CreatePoll,
        Self::CreatePrediction,
        Self::CreateClip,
        Self::UpdateTitle,
        Self::UpdateCategory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendChatMessage => "send-chat-message",
            Self::TimeoutUser => "timeout-user",
            Self::BanUser => "ban-user",
            Self::CreatePoll => "create-poll",
            Self::CreatePrediction => "create-prediction",
            Self::CreateClip => "create-clip",
            Self::UpdateTitle => "update-title",
            Self::UpdateCategory => "update-category",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Tool that carries out a decided action
    pub fn for_action(action: ActionKind) -> Self {
        match action {
            ActionKind::Timeout => Self::TimeoutUser,
            ActionKind::Ban => Self::BanUser,
            ActionKind::Warn | ActionKind::Message => Self::SendChatMessage,
            ActionKind::Poll => Self::CreatePoll,
        }
    }
}

impl fmt::Display for ActionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured tool outcome; capabilities report failures here instead of erroring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::err(ActionError::UnknownTool(name.to_string()).to_string())
    }
}

/// Platform account behind a chat username
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    pub login: String,
}

/// Executes platform tools
#[async_trait]
pub trait ActionCapability: Send + Sync {
    /// Run `tool` with `params`. Unknown names yield [`ToolResult::unknown_tool`].
    async fn invoke(&self, tool: &str, params: Map<String, Value>) -> ToolResult;
}

/// Resolves usernames to platform accounts
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` when no such account exists
    async fn find_user(&self, username: &str) -> Result<Option<PlatformUser>, ActionError>;
}
