//! Capability that logs instead of acting

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{ActionCapability, ActionTool, IdentityLookup, PlatformUser, ToolResult};
use crate::error::ActionError;

/// Accepts every known tool, logs it and remembers the call.
/// Every username resolves to a synthetic account.
#[derive(Default)]
pub struct DryRunCapability {
    calls: Mutex<Vec<(ActionTool, Map<String, Value>)>>,
}

impl DryRunCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, oldest first
    pub fn calls(&self) -> Vec<(ActionTool, Map<String, Value>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActionCapability for DryRunCapability {
    async fn invoke(&self, tool: &str, params: Map<String, Value>) -> ToolResult {
        let Some(known) = ActionTool::from_name(tool) else {
            return ToolResult::unknown_tool(tool);
        };

        let shown = Value::Object(params.clone());
        info!("[dry-run] {} {}", known, shown);
        self.calls.lock().push((known, params));
        ToolResult::ok(json!({ "dry_run": true, "tool": known.as_str() }))
    }
}

#[async_trait]
impl IdentityLookup for DryRunCapability {
    async fn find_user(&self, username: &str) -> Result<Option<PlatformUser>, ActionError> {
        Ok(Some(PlatformUser {
            id: format!("dry-{}", username.to_lowercase()),
            login: username.to_lowercase(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_records_calls() {
        let dry = DryRunCapability::new();
        let mut params = Map::new();
        params.insert("message".into(), json!("hello chat"));

        let result = dry.invoke("send-chat-message", params).await;
        assert!(result.success);
        assert_eq!(dry.calls().len(), 1);
        assert_eq!(dry.calls()[0].0, ActionTool::SendChatMessage);

        let unknown = dry.invoke("raid-channel", Map::new()).await;
        assert!(!unknown.success);
        assert_eq!(dry.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_identity() {
        let dry = DryRunCapability::new();
        let user = dry.find_user("Alice").await.unwrap().unwrap();
        assert_eq!(user.id, "dry-alice");
    }
}
