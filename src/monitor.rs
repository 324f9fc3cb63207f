//! Monitor (Scheduler)
//!
//! Owns the Active/Inactive lifecycle and composes the pipeline:
//!
//! ```text
//! ChatBuffer ──► PatternDetector ──► DecisionEngine ──► ActionExecutor ──► FeedbackStore
//!   (snapshot)     (strategy calls)    (cooldowns,         (sequential)       (history,
//!                                       adjustments)                           statistics)
//! ```
//!
//! At most one cycle runs at a time. Timer ticks that land while a cycle is in
//! flight are dropped, never queued. `stop()` disarms the timer without
//! interrupting a running cycle.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::actions::{ActionCapability, ActionExecutor, IdentityLookup};
use crate::analysis::AnalysisStrategy;
use crate::chat::{self, ChatBuffer, ChatIngest, ChatMessage};
use crate::config::Config;
use crate::decision::{CooldownTracker, Decision, DecisionEngine};
use crate::detector::{GameEvent, Pattern, PatternDetector, SkippedCategory};
use crate::error::{ActionError, FeedbackError, MonitorError};
use crate::feedback::{ActionRecord, FeedbackEntry, FeedbackSource, FeedbackStore, Statistics};
use crate::resolver::{Resolution, TargetResolver};
use crate::rules::{ActionKind, PollTrigger, RuleCategory, Rules};

/// Actions kept in the state view
pub const RECENT_ACTIONS_LIMIT: usize = 50;

/// Chat lines returned when a moderation target cannot be resolved
pub const MODERATION_LOG_LIMIT: usize = 20;

/// Operator-facing view of the monitor
#[derive(Debug, Clone, Serialize)]
pub struct MonitorState {
    pub is_active: bool,
    pub last_analysis: Option<DateTime<Utc>>,
    pub recent_actions: Vec<ActionRecord>,
    pub statistics: Statistics,
}

/// Everything one cycle saw and did
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub patterns: Vec<Pattern>,
    pub decisions: Vec<Decision>,
    pub records: Vec<ActionRecord>,
    pub skipped: Vec<SkippedCategory>,
}

/// Result of an operator moderation request
#[derive(Debug, Clone)]
pub enum ModerationOutcome {
    Executed(ActionRecord),
    /// No participant matched; here is the log to decide by hand
    Unresolved { recent_log: Vec<ChatMessage> },
    /// Refused before any lookup; nothing was executed or recorded
    Rejected(ActionError),
}

/// Marks a cycle in flight for as long as it lives
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Timer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Monitor {
    config: Config,
    rules: Arc<Rules>,
    buffer: Arc<ChatBuffer>,
    detector: PatternDetector,
    engine: DecisionEngine,
    executor: ActionExecutor,
    store: Arc<FeedbackStore>,
    cooldowns: Mutex<CooldownTracker>,
    active: AtomicBool,
    cycle_in_flight: AtomicBool,
    timer: Mutex<Option<Timer>>,
    last_analysis: Mutex<Option<DateTime<Utc>>>,
    recent_actions: Mutex<VecDeque<ActionRecord>>,
    pending_events: Mutex<Vec<GameEvent>>,
    last_skipped: Mutex<Vec<SkippedCategory>>,
    cycles_run: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl Monitor {
    /// Build a monitor. Cooldowns are restored from the store's history.
    pub fn new(
        config: Config,
        strategy: Arc<dyn AnalysisStrategy>,
        capability: Arc<dyn ActionCapability>,
        identity: Arc<dyn IdentityLookup>,
        store: Arc<FeedbackStore>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        let rules = Arc::new(config.rules.clone());
        let buffer = Arc::new(ChatBuffer::with_capacity(config.buffer_capacity));
        let history = store.records();
        let cooldowns = CooldownTracker::from_records(&history);
        let recent: VecDeque<ActionRecord> = history
            .into_iter()
            .rev()
            .take(RECENT_ACTIONS_LIMIT)
            .rev()
            .collect();

        info!(
            "Monitor ready: strategy={}, interval={}s, rules={:?}, restored cooldowns={}",
            strategy.name(),
            config.interval.as_secs(),
            rules.enabled(),
            cooldowns.len()
        );

        Ok(Self {
            detector: PatternDetector::new(strategy, Arc::clone(&rules)),
            engine: DecisionEngine::new(Arc::clone(&rules)),
            executor: ActionExecutor::new(capability, identity, Arc::clone(&store)),
            config,
            rules,
            buffer,
            store,
            cooldowns: Mutex::new(cooldowns),
            active: AtomicBool::new(false),
            cycle_in_flight: AtomicBool::new(false),
            timer: Mutex::new(None),
            last_analysis: Mutex::new(None),
            recent_actions: Mutex::new(recent),
            pending_events: Mutex::new(Vec::new()),
            last_skipped: Mutex::new(Vec::new()),
            cycles_run: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_cycle_in_flight(&self) -> bool {
        self.cycle_in_flight.load(Ordering::SeqCst)
    }

    pub fn buffer(&self) -> &Arc<ChatBuffer> {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<FeedbackStore> {
        &self.store
    }

    /// Go Active and arm the timer. Returns false if already Active or disabled.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            info!("Monitor disabled by configuration");
            return false;
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Monitor already active");
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run_timer(Arc::downgrade(self), self.config.interval, rx));
        *self.timer.lock() = Some(Timer { shutdown, task });

        info!("Monitor started (every {}s)", self.config.interval.as_secs());
        true
    }

    /// Go Inactive, disarm the timer and write the final report.
    ///
    /// A cycle already running finishes normally. Returns the report, or
    /// `None` if the monitor was not active.
    pub fn stop(&self) -> Option<String> {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Monitor already inactive");
            return None;
        }

        if let Some(timer) = self.timer.lock().take() {
            let _ = timer.shutdown.send(true);
            // Not aborted: an in-flight cycle must complete
            drop(timer.task);
        }

        info!("Monitor stopped");
        Some(self.generate_performance_report())
    }

    /// Number of armed timers (0 or 1)
    pub fn timer_count(&self) -> usize {
        self.timer
            .lock()
            .as_ref()
            .map_or(0, |t| usize::from(!t.task.is_finished()))
    }

    /// Run one cycle now, outside the timer
    pub async fn force_analysis(&self) -> Result<CycleReport, MonitorError> {
        self.run_cycle().await
    }

    async fn tick(&self) {
        match self.run_cycle().await {
            Ok(_) => {}
            Err(MonitorError::CycleInProgress) => {
                self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                debug!("Tick skipped: cycle in flight");
            }
            Err(e) => warn!("Cycle failed: {}", e),
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport, MonitorError> {
        let _guard =
            CycleGuard::try_acquire(&self.cycle_in_flight).ok_or(MonitorError::CycleInProgress)?;

        let started_at = Utc::now();
        let snapshot = self.buffer.snapshot();
        let events = std::mem::take(&mut *self.pending_events.lock());

        let detection = self.detector.detect(&snapshot, started_at, events).await;

        let adjustments = self.store.confidence_adjustments();
        let decisions = {
            let cooldowns = self.cooldowns.lock();
            self.engine
                .decide(&detection.patterns, &cooldowns, &adjustments, started_at)
        };

        let mut records = Vec::with_capacity(decisions.len());
        for decision in &decisions {
            self.cooldowns.lock().mark_decision(decision, Utc::now());
            let record = self.executor.execute(decision, &snapshot).await;
            self.push_recent(record.clone());
            records.push(record);
        }

        *self.last_analysis.lock() = Some(started_at);
        *self.last_skipped.lock() = detection.skipped.clone();
        self.cycles_run.fetch_add(1, Ordering::Relaxed);

        info!(
            "Cycle done: {} messages, {} patterns, {} decisions, {} failed, {} skipped categories",
            snapshot.len(),
            detection.patterns.len(),
            decisions.len(),
            records.iter().filter(|r| !r.is_success()).count(),
            detection.skipped.len()
        );

        Ok(CycleReport {
            started_at,
            patterns: detection.patterns,
            decisions,
            records,
            skipped: detection.skipped,
        })
    }

    fn push_recent(&self, record: ActionRecord) {
        let mut recent = self.recent_actions.lock();
        recent.push_back(record);
        while recent.len() > RECENT_ACTIONS_LIMIT {
            recent.pop_front();
        }
    }

    /// Append messages from the transport, in order
    pub fn ingest(&self, messages: Vec<ChatMessage>) {
        self.buffer.extend(messages);
    }

    /// Channel the transport can push into from any task
    pub fn ingest_channel(&self) -> (ChatIngest, JoinHandle<u64>) {
        chat::ingest_channel(Arc::clone(&self.buffer))
    }

    /// Queue an out-of-band game event for the next poll detection.
    /// Returns false when polls are not driven by game events.
    pub fn signal_game_event(&self, title: &str, options: Vec<String>) -> bool {
        let poll = self.rules.get(RuleCategory::Poll);
        if !poll.enabled || poll.effective_trigger() != PollTrigger::GameEvent {
            debug!("Ignoring game event '{}': polls not event driven", title);
            return false;
        }
        self.pending_events.lock().push(GameEvent {
            title: title.to_string(),
            options,
            received_at: Utc::now(),
        });
        true
    }

    pub fn resolve_target(&self, input: &str) -> Resolution {
        let snapshot = self.buffer.snapshot();
        TargetResolver::new(&snapshot).resolve_or_log(input, MODERATION_LOG_LIMIT)
    }

    /// Operator action against a username or descriptor
    pub async fn moderate(
        &self,
        target_input: &str,
        action: ActionKind,
        reason: &str,
        duration: Option<u64>,
    ) -> ModerationOutcome {
        if !action.needs_target() {
            warn!("Refusing to moderate '{}' with {}", target_input, action);
            return ModerationOutcome::Rejected(ActionError::NotTargeted(action));
        }

        let snapshot = self.buffer.snapshot();
        match TargetResolver::new(&snapshot).resolve_or_log(target_input, MODERATION_LOG_LIMIT) {
            Resolution::Resolved(username) => {
                let decision = Decision::manual(action, &username, reason, duration);
                let record = self.executor.execute(&decision, &snapshot).await;
                self.push_recent(record.clone());
                ModerationOutcome::Executed(record)
            }
            Resolution::Unresolved { recent_log } => {
                info!("Could not resolve '{}'; returning chat log", target_input);
                ModerationOutcome::Unresolved { recent_log }
            }
        }
    }

    pub fn add_feedback(
        &self,
        timestamp: DateTime<Utc>,
        rating: u8,
        comment: Option<String>,
        source: FeedbackSource,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let entry = self.store.add_feedback(timestamp, rating, comment, source)?;
        let mut recent = self.recent_actions.lock();
        if let Some(record) = recent.iter_mut().find(|r| r.id == entry.action_id) {
            record.feedback = Some(entry.clone());
        }
        Ok(entry)
    }

    pub fn get_state(&self) -> MonitorState {
        MonitorState {
            is_active: self.is_active(),
            last_analysis: *self.last_analysis.lock(),
            recent_actions: self.recent_actions.lock().iter().cloned().collect(),
            statistics: self.store.statistics(),
        }
    }

    /// Render the report and write today's report file
    pub fn generate_performance_report(&self) -> String {
        let now = Utc::now();
        match self.store.write_report(now) {
            Ok((report, _)) => report,
            Err(e) => {
                warn!("Failed to write performance report: {:#}", e);
                self.store.performance_report(now)
            }
        }
    }

    pub fn get_debug_info(&self) -> serde_json::Value {
        let cooldowns: serde_json::Map<String, serde_json::Value> = self
            .cooldowns
            .lock()
            .entries()
            .into_iter()
            .map(|(key, at)| (key, json!(at)))
            .collect();

        json!({
            "active": self.is_active(),
            "enabled": self.config.enabled,
            "strategy": self.detector.strategy_name(),
            "interval_secs": self.config.interval.as_secs(),
            "cycle_in_flight": self.is_cycle_in_flight(),
            "cycles_run": self.cycles_run.load(Ordering::Relaxed),
            "ticks_skipped": self.ticks_skipped.load(Ordering::Relaxed),
            "last_analysis": *self.last_analysis.lock(),
            "buffer": {
                "len": self.buffer.len(),
                "capacity": self.buffer.capacity(),
                "newest": self.buffer.newest_timestamp(),
            },
            "rules": self.rules.enabled(),
            "cooldowns": cooldowns,
            "pending_game_events": self.pending_events.lock().len(),
            "last_skipped": *self.last_skipped.lock(),
            "feedback_dir": self.store.dir().map(|d| d.display().to_string()),
            "retained_actions": self.store.len(),
        })
    }
}

/// Timer loop; holds only a weak reference so a dropped monitor ends it
async fn run_timer(
    monitor: Weak<Monitor>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Monitor timer shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(monitor) = monitor.upgrade() else { break };
                if !monitor.is_active() {
                    break;
                }
                monitor.tick().await;
            }
        }
    }
}
