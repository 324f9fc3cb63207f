//! Decision Arbitration
//!
//! Turns one cycle's patterns into at most one action per target:
//! 1. Gate each pattern by its rule (severity / count thresholds)
//! 2. Drop categories still cooling down
//! 3. Score confidence, apply feedback adjustments, drop below the floor
//! 4. Keep the most severe candidate per target, one per targetless category
//! 5. Order by descending confidence

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::detector::{Pattern, PatternDetail};
use crate::feedback::ActionRecord;
use crate::rules::{ActionKind, PollTrigger, RuleCategory, RuleConfig, Rules};

/// Timeout lengths (seconds) chosen from the reason text
pub const SHORT_TIMEOUT_SECS: u64 = 60;
pub const MEDIUM_TIMEOUT_SECS: u64 = 600;
pub const LONG_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const DEFAULT_POLL_SECS: u64 = 120;
const DEFAULT_POLL_TITLE: &str = "What should we do next?";

/// Confidence adjustment per action kind, learned from operator ratings
pub type ConfidenceAdjustments = HashMap<ActionKind, f64>;

/// Poll parameters carried by a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    pub title: String,
    pub options: Vec<String>,
    pub duration_secs: u64,
}

/// One action the monitor intends to take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionKind,
    /// Rule that produced it; `None` for operator-initiated actions
    pub category: Option<RuleCategory>,
    pub target: Option<String>,
    pub reason: String,
    pub confidence: f64,
    /// Timeout length in seconds
    pub duration: Option<u64>,
    /// Chat text for message and warn actions
    pub message: Option<String>,
    pub poll: Option<PollRequest>,
}

impl Decision {
    /// Operator-initiated action against a resolved target
    pub fn manual(action: ActionKind, target: &str, reason: &str, duration: Option<u64>) -> Self {
        let message = (action == ActionKind::Warn)
            .then(|| format!("@{} {}", target, reason));
        Self {
            action,
            category: None,
            target: Some(target.to_string()),
            reason: reason.to_string(),
            confidence: 1.0,
            duration,
            message,
            poll: None,
        }
    }

    /// Explicit duration, or one classified from the reason
    pub fn effective_duration(&self) -> u64 {
        self.duration
            .unwrap_or_else(|| fallback_duration(&self.reason))
    }
}

/// Classify a free-text reason into a proportionate timeout length
pub fn fallback_duration(reason: &str) -> u64 {
    let lower = reason.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has(&["severe", "serious", "threat", "slur", "doxx"]) {
        LONG_TIMEOUT_SECS
    } else if has(&["toxic", "rude", "mean", "insult", "harass"]) {
        MEDIUM_TIMEOUT_SECS
    } else if has(&["spam", "caps", "emote", "flood", "repeat"]) {
        SHORT_TIMEOUT_SECS
    } else {
        DEFAULT_TIMEOUT_SECS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CooldownKey {
    category: RuleCategory,
    target: Option<String>,
}

impl CooldownKey {
    fn new(category: RuleCategory, target: Option<&str>) -> Self {
        // Targetless categories cool down as a whole
        let target = if category.is_targeted() {
            target.map(str::to_lowercase)
        } else {
            None
        };
        Self { category, target }
    }
}

/// Last-acted timestamps per category (and target for targeted categories)
#[derive(Debug, Default, Clone)]
pub struct CooldownTracker {
    last: HashMap<CooldownKey, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from action history
    pub fn from_records(records: &[ActionRecord]) -> Self {
        let mut tracker = Self::new();
        for record in records {
            if let Some(category) = record.category {
                tracker.mark(category, record.target.as_deref(), record.timestamp);
            }
        }
        tracker
    }

    pub fn mark(&mut self, category: RuleCategory, target: Option<&str>, at: DateTime<Utc>) {
        let slot = self.last.entry(CooldownKey::new(category, target)).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }

    /// Record an attempted decision
    pub fn mark_decision(&mut self, decision: &Decision, at: DateTime<Utc>) {
        if let Some(category) = decision.category {
            self.mark(category, decision.target.as_deref(), at);
        }
    }

    pub fn last(&self, category: RuleCategory, target: Option<&str>) -> Option<DateTime<Utc>> {
        self.last.get(&CooldownKey::new(category, target)).copied()
    }

    pub fn is_cooling(
        &self,
        category: RuleCategory,
        target: Option<&str>,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.last(category, target)
            .map(|last| now - last < window)
            .unwrap_or(false)
    }

    /// Diagnostic view: "category[:target]" -> last timestamp
    pub fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<(String, DateTime<Utc>)> = self
            .last
            .iter()
            .map(|(key, at)| {
                let name = match &key.target {
                    Some(t) => format!("{}:{}", key.category, t),
                    None => key.category.to_string(),
                };
                (name, *at)
            })
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

struct Candidate {
    decision: Decision,
    order: usize,
}

/// Rule-driven arbitration over a cycle's patterns
pub struct DecisionEngine {
    rules: Arc<Rules>,
    response_cursor: AtomicUsize,
}

impl DecisionEngine {
    pub fn new(rules: Arc<Rules>) -> Self {
        Self {
            rules,
            response_cursor: AtomicUsize::new(0),
        }
    }

    pub fn decide(
        &self,
        patterns: &[Pattern],
        cooldowns: &CooldownTracker,
        adjustments: &ConfidenceAdjustments,
        now: DateTime<Utc>,
    ) -> Vec<Decision> {
        let mut targeted: Vec<(String, Candidate)> = Vec::new();
        let mut targetless: Vec<Candidate> = Vec::new();

        for (order, pattern) in patterns.iter().enumerate() {
            let rule = self.rules.get(pattern.category);
            if !rule.enabled || !passes_gate(pattern, rule) {
                continue;
            }

            if let Some(window) = cooldown_window(pattern.category, rule) {
                if cooldowns.is_cooling(pattern.category, pattern.subject.as_deref(), window, now) {
                    debug!(
                        "{} for {:?} still cooling down",
                        pattern.category, pattern.subject
                    );
                    continue;
                }
            }

            let action = rule.effective_action(pattern.category);
            let adjustment = adjustments.get(&action).copied().unwrap_or(0.0);
            let confidence = (base_confidence(pattern, rule) + adjustment).clamp(0.0, 1.0);
            if confidence < rule.confidence_floor() {
                debug!(
                    "{} for {:?} below confidence floor ({:.2} < {:.2})",
                    pattern.category,
                    pattern.subject,
                    confidence,
                    rule.confidence_floor()
                );
                continue;
            }

            let Some(decision) = self.build(pattern, rule, action, confidence) else {
                continue;
            };
            let candidate = Candidate { decision, order };

            match pattern.subject.as_deref() {
                Some(subject) if action.needs_target() => {
                    let key = subject.to_lowercase();
                    match targeted.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, best)) => {
                            if outranks(&candidate, best) {
                                *best = candidate;
                            }
                        }
                        None => targeted.push((key, candidate)),
                    }
                }
                _ => {
                    let category = pattern.category;
                    match targetless
                        .iter_mut()
                        .find(|c| c.decision.category == Some(category))
                    {
                        Some(best) => {
                            if outranks(&candidate, best) {
                                *best = candidate;
                            }
                        }
                        None => targetless.push(candidate),
                    }
                }
            }
        }

        let mut survivors: Vec<Candidate> = targeted
            .into_iter()
            .map(|(_, c)| c)
            .chain(targetless)
            .collect();
        survivors.sort_by(|a, b| {
            b.decision
                .confidence
                .total_cmp(&a.decision.confidence)
                .then(a.order.cmp(&b.order))
        });
        survivors.into_iter().map(|c| c.decision).collect()
    }

    fn build(
        &self,
        pattern: &Pattern,
        rule: &RuleConfig,
        action: ActionKind,
        confidence: f64,
    ) -> Option<Decision> {
        let mut decision = Decision {
            action,
            category: Some(pattern.category),
            target: pattern.subject.clone(),
            reason: reason_for(pattern),
            confidence,
            duration: None,
            message: None,
            poll: None,
        };

        match action {
            ActionKind::Timeout => {
                decision.target.as_ref()?;
                decision.duration = Some(rule.duration.unwrap_or_else(|| fallback_duration(&decision.reason)));
            }
            ActionKind::Ban => {
                decision.target.as_ref()?;
            }
            ActionKind::Warn => {
                let target = decision.target.as_ref()?;
                decision.message = Some(format!(
                    "@{} please keep chat friendly ({})",
                    target, pattern.category
                ));
            }
            ActionKind::Message => {
                decision.target = None;
                let suggested = match &pattern.detail {
                    PatternDetail::Engagement { message, .. } => message.clone(),
                    _ => None,
                };
                decision.message = suggested.or_else(|| self.next_response(rule));
                decision.message.as_ref()?;
            }
            ActionKind::Poll => {
                decision.target = None;
                let (title, options) = match &pattern.detail {
                    PatternDetail::Poll { title, options, .. } => (title.clone(), options.clone()),
                    _ => (None, Vec::new()),
                };
                let options = if (2..=5).contains(&options.len()) {
                    options
                } else {
                    rule.options.clone()
                };
                if options.len() < 2 {
                    return None;
                }
                decision.poll = Some(PollRequest {
                    title: title
                        .or_else(|| rule.title.clone())
                        .unwrap_or_else(|| DEFAULT_POLL_TITLE.to_string()),
                    options,
                    duration_secs: rule.duration.unwrap_or(DEFAULT_POLL_SECS),
                });
            }
        }
        Some(decision)
    }

    /// Rotate through configured responses
    fn next_response(&self, rule: &RuleConfig) -> Option<String> {
        let responses: Vec<&String> = rule
            .responses
            .iter()
            .filter(|r| !r.trim().is_empty())
            .collect();
        if responses.is_empty() {
            return None;
        }
        let idx = self.response_cursor.fetch_add(1, Ordering::Relaxed) % responses.len();
        Some(responses[idx].clone())
    }
}

fn passes_gate(pattern: &Pattern, rule: &RuleConfig) -> bool {
    match pattern.category {
        RuleCategory::Toxicity => pattern.score >= rule.severity_threshold.unwrap_or(7.0),
        RuleCategory::Spam => pattern.score >= rule.threshold.unwrap_or(3.0),
        RuleCategory::Engagement | RuleCategory::Poll => true,
    }
}

/// Minimum spacing between two actions of a category
/// Windows too large to represent saturate to `Duration::MAX`.
fn cooldown_window(category: RuleCategory, rule: &RuleConfig) -> Option<Duration> {
    if let Some(minutes) = rule.cooldown {
        return Some(saturating_window(minutes, Duration::try_minutes));
    }
    match category {
        RuleCategory::Engagement => rule
            .quiet_period_threshold
            .map(|secs| saturating_window(secs, Duration::try_seconds)),
        _ => None,
    }
}

fn saturating_window(amount: u64, make: fn(i64) -> Option<Duration>) -> Duration {
    i64::try_from(amount)
        .ok()
        .and_then(make)
        .unwrap_or(Duration::MAX)
}

/// Deterministic confidence in [0, 1] from the pattern score
fn base_confidence(pattern: &Pattern, rule: &RuleConfig) -> f64 {
    let confidence = match pattern.category {
        RuleCategory::Toxicity => pattern.score / 10.0,
        RuleCategory::Spam => {
            let threshold = rule.threshold.unwrap_or(3.0);
            pattern.score / (threshold + 1.0)
        }
        RuleCategory::Engagement => {
            let threshold = rule.quiet_period_threshold.unwrap_or(300).max(1) as f64;
            let excess = ((pattern.score - threshold) / threshold).clamp(0.0, 1.0);
            0.5 + 0.5 * excess
        }
        RuleCategory::Poll => match &pattern.detail {
            PatternDetail::Poll { trigger, .. } if *trigger != PollTrigger::ViewerRequest => 1.0,
            _ => 0.5 + 0.1 * pattern.score,
        },
    };
    confidence.clamp(0.0, 1.0)
}

fn reason_for(pattern: &Pattern) -> String {
    let evidence: String = pattern.evidence.chars().take(120).collect();
    match pattern.category {
        RuleCategory::Toxicity => format!("toxic message (severity {}): {}", pattern.score, evidence),
        RuleCategory::Spam => format!("spam ({} flagged messages): {}", pattern.score, evidence),
        RuleCategory::Engagement | RuleCategory::Poll => evidence,
    }
}

/// Higher severity wins, then confidence, then earlier pattern
fn outranks(challenger: &Candidate, incumbent: &Candidate) -> bool {
    let c = &challenger.decision;
    let i = &incumbent.decision;
    c.action
        .severity_rank()
        .cmp(&i.action.severity_rank())
        .then(c.confidence.total_cmp(&i.confidence))
        .then(incumbent.order.cmp(&challenger.order))
        .is_gt()
}
