//! Pattern Detection
//!
//! Builds one prompt per enabled category from the chat snapshot, asks the
//! analysis strategy, and parses the answer into typed [`Pattern`]s. A
//! category whose answer cannot be parsed is skipped for the cycle; the
//! others still report.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analysis::{AnalysisStrategy, CATEGORY_PREFIX, CHAT_LOG_MARKER};
use crate::chat::ChatMessage;
use crate::error::StrategyParseError;
use crate::rules::{PollTrigger, RuleCategory, Rules};

/// Messages included in a prompt
pub const MAX_CONTEXT_MESSAGES: usize = 50;

/// Characters kept per message in a prompt
const MAX_LINE_CHARS: usize = 300;

static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

/// Extra data a pattern carries for the decision it may become
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternDetail {
    None,
    Engagement {
        message: Option<String>,
        quiet_secs: i64,
    },
    Poll {
        trigger: PollTrigger,
        title: Option<String>,
        options: Vec<String>,
    },
}

/// A typed signal from one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub category: RuleCategory,
    pub subject: Option<String>,
    /// Severity (toxicity), flagged message count (spam), quiet seconds
    /// (engagement) or request count (poll)
    pub score: f64,
    pub evidence: String,
    pub detail: PatternDetail,
}

/// Game event delivered outside the chat stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub title: String,
    pub options: Vec<String>,
    pub received_at: DateTime<Utc>,
}

/// A category that produced no patterns because its analysis failed
#[derive(Debug, Clone, Serialize)]
pub struct SkippedCategory {
    pub category: RuleCategory,
    pub reason: String,
}

/// Result of one detection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    pub patterns: Vec<Pattern>,
    pub skipped: Vec<SkippedCategory>,
}

#[derive(Debug, Deserialize)]
struct ToxicityFinding {
    #[serde(alias = "subject", alias = "user")]
    username: String,
    severity: f64,
    #[serde(default)]
    evidence: String,
}

#[derive(Debug, Deserialize)]
struct SpamFinding {
    #[serde(alias = "subject", alias = "user")]
    username: String,
    #[serde(default)]
    evidence: String,
}

#[derive(Debug, Deserialize)]
struct EngagementSuggestion {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollSignal {
    #[serde(default)]
    triggered: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    requests: u32,
}

/// Runs the analysis strategy per enabled category
pub struct PatternDetector {
    strategy: Arc<dyn AnalysisStrategy>,
    rules: Arc<Rules>,
}

impl PatternDetector {
    pub fn new(strategy: Arc<dyn AnalysisStrategy>, rules: Arc<Rules>) -> Self {
        Self { strategy, rules }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Detect patterns in a snapshot.
    ///
    /// Strategy calls for different categories run concurrently.
    pub async fn detect(
        &self,
        messages: &[ChatMessage],
        now: DateTime<Utc>,
        game_events: Vec<GameEvent>,
    ) -> Detection {
        let context = build_context(messages);
        let mut game_events = Some(game_events);

        let runs = self.rules.enabled().into_iter().map(|category| {
            let events = if category == RuleCategory::Poll {
                game_events.take().unwrap_or_default()
            } else {
                Vec::new()
            };
            let context = context.as_str();
            async move {
                let result = self.detect_category(category, context, messages, now, events).await;
                (category, result)
            }
        });

        let mut detection = Detection::default();
        for (category, result) in join_all(runs).await {
            match result {
                Ok(mut patterns) => {
                    debug!("{}: {} pattern(s)", category, patterns.len());
                    detection.patterns.append(&mut patterns);
                }
                Err(reason) => {
                    warn!("Skipping {} this cycle: {}", category, reason);
                    detection.skipped.push(SkippedCategory { category, reason });
                }
            }
        }
        detection
    }

    async fn detect_category(
        &self,
        category: RuleCategory,
        context: &str,
        messages: &[ChatMessage],
        now: DateTime<Utc>,
        game_events: Vec<GameEvent>,
    ) -> Result<Vec<Pattern>, String> {
        let rule = self.rules.get(category);

        match category {
            RuleCategory::Toxicity | RuleCategory::Spam => {
                if messages.is_empty() {
                    return Ok(Vec::new());
                }
                let output = self.ask(category, context).await?;
                let parsed = if category == RuleCategory::Toxicity {
                    parse_toxicity(&output)
                } else {
                    parse_spam(&output)
                };
                parsed.map_err(|e| e.to_string())
            }
            RuleCategory::Engagement => {
                let Some(newest) = messages.last().map(|m| m.timestamp) else {
                    return Ok(Vec::new());
                };
                let quiet_secs = (now - newest).num_seconds();
                let threshold = i64::try_from(rule.quiet_period_threshold.unwrap_or(300))
                    .unwrap_or(i64::MAX);
                if quiet_secs < threshold {
                    return Ok(Vec::new());
                }
                let output = self.ask(category, context).await?;
                let suggestion = parse_engagement(&output).map_err(|e| e.to_string())?;
                Ok(vec![Pattern {
                    category,
                    subject: None,
                    score: quiet_secs as f64,
                    evidence: format!("No chat for {}s", quiet_secs),
                    detail: PatternDetail::Engagement {
                        message: suggestion.message.filter(|m| !m.trim().is_empty()),
                        quiet_secs,
                    },
                }])
            }
            RuleCategory::Poll => match rule.effective_trigger() {
                PollTrigger::ViewerRequest => {
                    if messages.is_empty() {
                        return Ok(Vec::new());
                    }
                    let output = self.ask(category, context).await?;
                    let signal = parse_poll(&output).map_err(|e| e.to_string())?;
                    if !signal.triggered {
                        return Ok(Vec::new());
                    }
                    Ok(vec![Pattern {
                        category,
                        subject: None,
                        score: signal.requests as f64,
                        evidence: format!("{} viewer poll request(s)", signal.requests),
                        detail: PatternDetail::Poll {
                            trigger: PollTrigger::ViewerRequest,
                            title: signal.title,
                            options: signal.options,
                        },
                    }])
                }
                PollTrigger::Scheduled => Ok(vec![Pattern {
                    category,
                    subject: None,
                    score: 1.0,
                    evidence: "Scheduled poll".to_string(),
                    detail: PatternDetail::Poll {
                        trigger: PollTrigger::Scheduled,
                        title: None,
                        options: Vec::new(),
                    },
                }]),
                PollTrigger::GameEvent => Ok(game_events
                    .into_iter()
                    .map(|event| Pattern {
                        category,
                        subject: None,
                        score: 1.0,
                        evidence: format!("Game event: {}", event.title),
                        detail: PatternDetail::Poll {
                            trigger: PollTrigger::GameEvent,
                            title: Some(event.title),
                            options: event.options,
                        },
                    })
                    .collect()),
            },
        }
    }

    async fn ask(&self, category: RuleCategory, context: &str) -> Result<String, String> {
        let prompt = build_prompt(category, context);
        self.strategy
            .analyze(&prompt)
            .await
            .map_err(|e| format!("analysis failed: {}", e))
    }
}

/// Bounded chat log, one `username: content` line per message
pub fn build_context(messages: &[ChatMessage]) -> String {
    let skip = messages.len().saturating_sub(MAX_CONTEXT_MESSAGES);
    messages[skip..]
        .iter()
        .map(|m| {
            let content: String = m
                .content
                .chars()
                .take(MAX_LINE_CHARS)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            format!("{}: {}", m.username, content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full prompt for one category
pub fn build_prompt(category: RuleCategory, context: &str) -> String {
    let instructions = match category {
        RuleCategory::Toxicity => {
            "Find toxic, harassing or hateful messages. Respond with a JSON array: \
             [{\"username\": string, \"severity\": 1-10, \"evidence\": string}]. \
             Use [] when chat is clean."
        }
        RuleCategory::Spam => {
            "Find spam: repeated messages, links, caps or emote floods, self-promotion. \
             Respond with a JSON array: [{\"username\": string, \"evidence\": string}], \
             one entry per offending message. Use [] when there is none."
        }
        RuleCategory::Engagement => {
            "Chat has gone quiet. Suggest one short, friendly message that invites viewers \
             to talk, based on the recent topics. Respond with JSON: {\"message\": string}."
        }
        RuleCategory::Poll => {
            "Decide whether viewers are asking for a poll or vote. Respond with JSON: \
             {\"triggered\": bool, \"title\": string, \"options\": [string], \"requests\": int}."
        }
    };
    format!(
        "{} {}\n{}\n{}\n{}",
        CATEGORY_PREFIX,
        category.as_str(),
        instructions,
        CHAT_LOG_MARKER,
        context
    )
}

/// Pull the JSON payload out of model output
fn extract_json(output: &str) -> Result<&str, StrategyParseError> {
    if let Some(cap) = RE_CODE_FENCE.captures(output) {
        if let Some(body) = cap.get(1) {
            let body = body.as_str().trim();
            if !body.is_empty() {
                return Ok(body);
            }
        }
    }

    let start = output.find(['[', '{']).ok_or(StrategyParseError::NoPayload)?;
    let end = output
        .rfind([']', '}'])
        .filter(|&end| end >= start)
        .ok_or(StrategyParseError::NoPayload)?;
    Ok(&output[start..=end])
}

fn parse_toxicity(output: &str) -> Result<Vec<Pattern>, StrategyParseError> {
    let findings: Vec<ToxicityFinding> = serde_json::from_str(extract_json(output)?)?;
    findings
        .into_iter()
        .map(|f| {
            let username = f.username.trim().trim_start_matches('@').to_string();
            if username.is_empty() {
                return Err(StrategyParseError::UnexpectedShape("empty username".into()));
            }
            if !f.severity.is_finite() {
                return Err(StrategyParseError::UnexpectedShape("severity is not a number".into()));
            }
            Ok(Pattern {
                category: RuleCategory::Toxicity,
                subject: Some(username),
                score: f.severity.clamp(0.0, 10.0),
                evidence: f.evidence,
                detail: PatternDetail::None,
            })
        })
        .collect()
}

/// One pattern per user, scored by flagged message count
fn parse_spam(output: &str) -> Result<Vec<Pattern>, StrategyParseError> {
    let findings: Vec<SpamFinding> = serde_json::from_str(extract_json(output)?)?;

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, (u32, Vec<String>)> = HashMap::new();
    for f in findings {
        let username = f.username.trim().trim_start_matches('@').to_string();
        if username.is_empty() {
            return Err(StrategyParseError::UnexpectedShape("empty username".into()));
        }
        let entry = grouped.entry(username.clone()).or_insert_with(|| {
            order.push(username);
            (0, Vec::new())
        });
        entry.0 += 1;
        if entry.1.len() < 3 && !f.evidence.is_empty() {
            entry.1.push(f.evidence);
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|username| {
            let (count, evidence) = grouped.remove(&username)?;
            Some(Pattern {
                category: RuleCategory::Spam,
                subject: Some(username),
                score: count as f64,
                evidence: evidence.join(" | "),
                detail: PatternDetail::None,
            })
        })
        .collect())
}

fn parse_engagement(output: &str) -> Result<EngagementSuggestion, StrategyParseError> {
    let payload = extract_json(output)?;
    if !payload.starts_with('{') {
        return Err(StrategyParseError::UnexpectedShape("expected an object".into()));
    }
    Ok(serde_json::from_str(payload)?)
}

fn parse_poll(output: &str) -> Result<PollSignal, StrategyParseError> {
    let payload = extract_json(output)?;
    if !payload.starts_with('{') {
        return Err(StrategyParseError::UnexpectedShape("expected an object".into()));
    }
    Ok(serde_json::from_str(payload)?)
}
