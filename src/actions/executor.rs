//! Action Executor
//!
//! Carries out one decision at a time and always leaves a record behind,
//! whatever happened on the platform side.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ActionCapability, ActionTool, IdentityLookup, PlatformUser};
use crate::chat::ChatMessage;
use crate::decision::Decision;
use crate::error::ActionError;
use crate::feedback::{ActionRecord, FeedbackStore};
use crate::resolver::TargetResolver;
use crate::rules::ActionKind;

pub struct ActionExecutor {
    capability: Arc<dyn ActionCapability>,
    identity: Arc<dyn IdentityLookup>,
    store: Arc<FeedbackStore>,
}

impl ActionExecutor {
    pub fn new(
        capability: Arc<dyn ActionCapability>,
        identity: Arc<dyn IdentityLookup>,
        store: Arc<FeedbackStore>,
    ) -> Self {
        Self {
            capability,
            identity,
            store,
        }
    }

    /// Execute `decision` against the platform and record the attempt.
    /// `window` is the chat snapshot used to canonicalize the target's casing.
    /// Only an exact case-insensitive match is rewritten; any other target is used as given.
    pub async fn execute(&self, decision: &Decision, window: &[ChatMessage]) -> ActionRecord {
        let mut decision = decision.clone();
        if let Some(target) = decision.target.as_deref() {
            if let Some(exact) = TargetResolver::new(window).exact_username(target) {
                decision.target = Some(exact);
            }
        }

        let record = ActionRecord::new(&decision, Utc::now());
        let record = match self.run(&decision).await {
            Ok(result) => {
                info!("Action {}", record.summary());
                record.with_result(result)
            }
            Err(e) => {
                let record = record.failed(e.to_string());
                warn!("Action {}", record.summary());
                record
            }
        };

        self.store.record_action(record.clone());
        record
    }

    async fn run(&self, decision: &Decision) -> Result<Value, ActionError> {
        let user = match decision.target.as_deref() {
            Some(target) => Some(self.lookup(target).await?),
            None => None,
        };

        let tool = ActionTool::for_action(decision.action);
        let params = build_params(decision, user.as_ref());
        let outcome = self.capability.invoke(tool.as_str(), params).await;

        if outcome.success {
            Ok(outcome.result)
        } else {
            Err(ActionError::Rejected {
                tool: tool.to_string(),
                detail: outcome.error.unwrap_or_else(|| "no detail".to_string()),
            })
        }
    }

    async fn lookup(&self, username: &str) -> Result<PlatformUser, ActionError> {
        self.identity
            .find_user(username)
            .await?
            .ok_or_else(|| ActionError::IdentityNotFound(username.to_string()))
    }
}

/// Tool parameters for a decision
fn build_params(decision: &Decision, user: Option<&PlatformUser>) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(user) = user {
        params.insert("user_id".into(), json!(user.id));
        params.insert("username".into(), json!(user.login));
    }

    match decision.action {
        ActionKind::Timeout => {
            params.insert("duration".into(), json!(decision.effective_duration()));
            params.insert("reason".into(), json!(decision.reason));
        }
        ActionKind::Ban => {
            params.insert("reason".into(), json!(decision.reason));
        }
        ActionKind::Warn | ActionKind::Message => {
            let text = decision.message.as_deref().unwrap_or(&decision.reason);
            params.insert("message".into(), json!(text));
        }
        ActionKind::Poll => {
            if let Some(poll) = &decision.poll {
                params.insert("title".into(), json!(poll.title));
                params.insert("options".into(), json!(poll.options));
                params.insert("duration".into(), json!(poll.duration_secs));
            }
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{DryRunCapability, ToolResult};
    use crate::decision::PollRequest;
    use crate::feedback::Outcome;
    use async_trait::async_trait;

    struct Rejecting;

    #[async_trait]
    impl ActionCapability for Rejecting {
        async fn invoke(&self, _tool: &str, _params: Map<String, Value>) -> ToolResult {
            ToolResult::err("moderator rate limit")
        }
    }

    struct NobodyHome;

    #[async_trait]
    impl IdentityLookup for NobodyHome {
        async fn find_user(&self, _username: &str) -> Result<Option<PlatformUser>, ActionError> {
            Ok(None)
        }
    }

    fn window() -> Vec<ChatMessage> {
        vec![ChatMessage::now("SpamLord", "buy followers")]
    }

    #[tokio::test]
    async fn test_success_canonicalizes_target() {
        let dry = Arc::new(DryRunCapability::new());
        let store = Arc::new(FeedbackStore::in_memory(30));
        let executor = ActionExecutor::new(dry.clone(), dry.clone(), store.clone());

        let decision = Decision::manual(ActionKind::Timeout, "spamlord", "spam", None);
        let record = executor.execute(&decision, &window()).await;

        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.target.as_deref(), Some("SpamLord"));
        assert_eq!(store.len(), 1);

        let calls = dry.calls();
        assert_eq!(calls[0].0, ActionTool::TimeoutUser);
        assert_eq!(calls[0].1["duration"], json!(60));
        assert_eq!(calls[0].1["user_id"], json!("dry-spamlord"));
    }

    #[tokio::test]
    async fn test_partial_name_is_not_retargeted() {
        let dry = Arc::new(DryRunCapability::new());
        let store = Arc::new(FeedbackStore::in_memory(30));
        let executor = ActionExecutor::new(dry.clone(), dry.clone(), store.clone());
        let window = vec![ChatMessage::now("maxwell_fan", "great stream")];

        let decision = Decision::manual(ActionKind::Ban, "max", "ban evasion", None);
        let record = executor.execute(&decision, &window).await;

        assert!(record.is_success());
        assert_eq!(record.target.as_deref(), Some("max"));
        let calls = dry.calls();
        assert_eq!(calls[0].0, ActionTool::BanUser);
        assert_eq!(calls[0].1["username"], json!("max"));
        assert_eq!(store.records()[0].target.as_deref(), Some("max"));
    }

    #[tokio::test]
    async fn test_rejection_is_recorded() {
        let store = Arc::new(FeedbackStore::in_memory(30));
        let executor = ActionExecutor::new(
            Arc::new(Rejecting),
            Arc::new(DryRunCapability::new()),
            store.clone(),
        );

        let decision = Decision::manual(ActionKind::Ban, "SpamLord", "bot account", None);
        let record = executor.execute(&decision, &window()).await;

        assert_eq!(record.outcome, Outcome::Failure);
        assert!(record.error_detail.unwrap().contains("moderator rate limit"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_identity_fails_soft() {
        let dry = Arc::new(DryRunCapability::new());
        let store = Arc::new(FeedbackStore::in_memory(30));
        let executor = ActionExecutor::new(dry.clone(), Arc::new(NobodyHome), store.clone());

        let decision = Decision::manual(ActionKind::Timeout, "ghost", "spam", Some(30));
        let record = executor.execute(&decision, &[]).await;

        assert!(!record.is_success());
        assert_eq!(record.error_detail.as_deref(), Some("User not found: ghost"));
        assert!(dry.calls().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_params() {
        let dry = Arc::new(DryRunCapability::new());
        let store = Arc::new(FeedbackStore::in_memory(30));
        let executor = ActionExecutor::new(dry.clone(), dry.clone(), store);

        let decision = Decision {
            action: ActionKind::Poll,
            category: None,
            target: None,
            reason: "viewers asked".into(),
            confidence: 0.9,
            duration: None,
            message: None,
            poll: Some(PollRequest {
                title: "Next map?".into(),
                options: vec!["Dust".into(), "Mirage".into()],
                duration_secs: 120,
            }),
        };
        let record = executor.execute(&decision, &[]).await;
        assert!(record.is_success());

        let calls = dry.calls();
        assert_eq!(calls[0].0, ActionTool::CreatePoll);
        assert_eq!(calls[0].1["options"], json!(["Dust", "Mirage"]));
        assert!(!calls[0].1.contains_key("user_id"));
    }
}
