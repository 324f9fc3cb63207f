//! Monitor lifecycle and cycle integration tests

use async_trait::async_trait;
use chat_autopilot::{
    ActionCapability, ActionKind, AnalysisStrategy, ChatMessage, Config, DryRunCapability,
    FeedbackStore, Monitor, MonitorError, Outcome, PollTrigger, ToolResult,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{watch, Notify};

const TOXIC_ALICE_BOB: &str = r#"[
    {"username": "alice", "severity": 9, "evidence": "you idiot"},
    {"username": "bob", "severity": 8, "evidence": "so dumb"}
]"#;

/// Answers each category with a fixed payload
struct Scripted {
    toxicity: &'static str,
}

#[async_trait]
impl AnalysisStrategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, prompt: &str) -> anyhow::Result<String> {
        if prompt.starts_with("category: toxicity") {
            Ok(self.toxicity.to_string())
        } else if prompt.starts_with("category: engagement") {
            Ok("{}".to_string())
        } else {
            Ok("[]".to_string())
        }
    }
}

/// Blocks every analysis call until the gate opens
struct Gated {
    entered: Arc<Notify>,
    gate: watch::Receiver<bool>,
}

#[async_trait]
impl AnalysisStrategy for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(&self, prompt: &str) -> anyhow::Result<String> {
        self.entered.notify_one();
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open).await?;
        if prompt.starts_with("category: toxicity") {
            Ok(TOXIC_ALICE_BOB.to_string())
        } else {
            Ok("[]".to_string())
        }
    }
}

/// Rejects every action against one user
struct RejectUser(&'static str);

#[async_trait]
impl ActionCapability for RejectUser {
    async fn invoke(&self, tool: &str, params: Map<String, Value>) -> ToolResult {
        if params.get("username").and_then(Value::as_str) == Some(self.0) {
            ToolResult::err(format!("{} refused by platform", tool))
        } else {
            ToolResult::ok(Value::Null)
        }
    }
}

fn config(dir: &TempDir) -> Config {
    Config {
        interval: Duration::from_millis(40),
        feedback_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

fn build(config: Config, strategy: Arc<dyn AnalysisStrategy>) -> Arc<Monitor> {
    let store = Arc::new(FeedbackStore::open(&config.feedback_dir, config.retention_days).unwrap());
    let dry = Arc::new(DryRunCapability::new());
    Arc::new(Monitor::new(config, strategy, dry.clone(), dry, store).unwrap())
}

fn toxic_chat() -> Vec<ChatMessage> {
    vec![
        ChatMessage::now("alice", "you idiot"),
        ChatMessage::now("bob", "so dumb"),
        ChatMessage::now("carol", "gg"),
    ]
}

#[tokio::test]
async fn test_start_twice_arms_one_timer() {
    let temp = TempDir::new().unwrap();
    let monitor = build(config(&temp), Arc::new(Scripted { toxicity: "[]" }));

    assert!(monitor.start());
    assert!(!monitor.start());
    assert!(monitor.get_state().is_active);
    assert_eq!(monitor.timer_count(), 1);

    let report = monitor.stop();
    assert!(report.is_some());
    assert!(!monitor.is_active());
    assert_eq!(monitor.timer_count(), 0);
    assert!(monitor.stop().is_none());
}

#[tokio::test]
async fn test_stop_lets_in_flight_cycle_finish() {
    let temp = TempDir::new().unwrap();
    let entered = Arc::new(Notify::new());
    let (open, gate) = watch::channel(false);
    let monitor = build(
        config(&temp),
        Arc::new(Gated {
            entered: Arc::clone(&entered),
            gate,
        }),
    );
    monitor.ingest(toxic_chat());

    let running = Arc::clone(&monitor);
    let cycle = tokio::spawn(async move { running.force_analysis().await });
    entered.notified().await;
    assert!(monitor.is_cycle_in_flight());

    // Ticks while the cycle is blocked are dropped
    assert!(monitor.start());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(
        monitor.force_analysis().await,
        Err(MonitorError::CycleInProgress)
    ));

    assert!(monitor.stop().is_some());
    assert!(monitor.is_cycle_in_flight());

    open.send(true).unwrap();
    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.records.len(), 2);
    assert!(!monitor.is_cycle_in_flight());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let info = monitor.get_debug_info();
    assert_eq!(info["cycles_run"], 1);
    assert!(info["ticks_skipped"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_one_action_per_target_in_confidence_order() {
    let temp = TempDir::new().unwrap();
    let monitor = build(config(&temp), Arc::new(Scripted { toxicity: TOXIC_ALICE_BOB }));
    monitor.ingest(toxic_chat());

    let report = monitor.force_analysis().await.unwrap();
    let targets: Vec<_> = report
        .decisions
        .iter()
        .map(|d| d.target.as_deref().unwrap())
        .collect();
    assert_eq!(targets, vec!["alice", "bob"]);
    assert!(report.decisions.iter().all(|d| d.action == ActionKind::Timeout));
}

#[tokio::test]
async fn test_failed_action_does_not_abort_cycle() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let store = Arc::new(FeedbackStore::open(&config.feedback_dir, 30).unwrap());
    let monitor = Monitor::new(
        config,
        Arc::new(Scripted { toxicity: TOXIC_ALICE_BOB }),
        Arc::new(RejectUser("alice")),
        Arc::new(DryRunCapability::new()),
        Arc::clone(&store),
    )
    .unwrap();
    monitor.ingest(toxic_chat());

    let report = monitor.force_analysis().await.unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].outcome, Outcome::Failure);
    assert!(report.records[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("refused"));
    assert_eq!(report.records[1].outcome, Outcome::Success);

    let stats = store.statistics();
    assert_eq!(stats.total_actions, 2);
    assert!((stats.success_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_scheduled_poll_respects_cooldown() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.rules.poll.enabled = true;
    config.rules.poll.trigger = Some(PollTrigger::Scheduled);
    config.rules.poll.cooldown = Some(15);
    let monitor = build(config, Arc::new(Scripted { toxicity: "[]" }));

    let first = monitor.force_analysis().await.unwrap();
    let second = monitor.force_analysis().await.unwrap();

    assert_eq!(first.patterns.len(), 1);
    assert_eq!(second.patterns.len(), 1);
    let polls = first
        .records
        .iter()
        .chain(second.records.iter())
        .filter(|r| r.action == ActionKind::Poll)
        .count();
    assert_eq!(polls, 1);
}

#[tokio::test]
async fn test_game_event_drives_poll() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.rules.poll.enabled = true;
    config.rules.poll.trigger = Some(PollTrigger::GameEvent);
    let monitor = build(config, Arc::new(Scripted { toxicity: "[]" }));

    assert!(monitor.signal_game_event(
        "Boss defeated - next zone?",
        vec!["Swamp".into(), "Castle".into()]
    ));
    let report = monitor.force_analysis().await.unwrap();
    assert_eq!(report.decisions.len(), 1);
    let poll = report.decisions[0].poll.as_ref().unwrap();
    assert_eq!(poll.title, "Boss defeated - next zone?");
    assert_eq!(poll.options, vec!["Swamp", "Castle"]);

    // Consumed
    let again = monitor.force_analysis().await.unwrap();
    assert!(again.patterns.is_empty());
}

#[tokio::test]
async fn test_cooldowns_survive_restart() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.rules.toxicity.cooldown = Some(10);

    let first = build(config.clone(), Arc::new(Scripted { toxicity: TOXIC_ALICE_BOB }));
    first.ingest(toxic_chat());
    assert_eq!(first.force_analysis().await.unwrap().records.len(), 2);
    drop(first);

    let second = build(config, Arc::new(Scripted { toxicity: TOXIC_ALICE_BOB }));
    assert_eq!(second.get_state().recent_actions.len(), 2);
    second.ingest(toxic_chat());
    let report = second.force_analysis().await.unwrap();
    assert_eq!(report.patterns.len(), 2);
    assert!(report.decisions.is_empty());
}

#[tokio::test]
async fn test_moderate_by_descriptor() {
    let temp = TempDir::new().unwrap();
    let monitor = build(config(&temp), Arc::new(Scripted { toxicity: "[]" }));
    monitor.ingest(vec![
        ChatMessage::now("Alice", "you're an idiot"),
        ChatMessage::now("bob", "idiot much?"),
        ChatMessage::now("Alice", "so dumb"),
    ]);

    match monitor
        .moderate("toxic", ActionKind::Timeout, "being rude", None)
        .await
    {
        chat_autopilot::ModerationOutcome::Executed(record) => {
            assert_eq!(record.target.as_deref(), Some("Alice"));
            assert!(record.is_success());
        }
        other => panic!("expected execution, got {:?}", other),
    }
}
