//! Rule Configuration
//!
//! Per-category settings that drive detection and decisions. Loaded once,
//! validated, then shared read-only by the detector and the decision engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Longest cooldown a rule may configure (one week)
pub const MAX_COOLDOWN_MINUTES: u64 = 7 * 24 * 60;

/// Longest engagement quiet period (one day)
pub const MAX_QUIET_PERIOD_SECS: u64 = 24 * 60 * 60;

/// Confidence floor used when a rule does not set `min_confidence`
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.5;

/// Detection categories, one analysis call each per cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Spam,
    Toxicity,
    Engagement,
    Poll,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 4] = [
        RuleCategory::Spam,
        RuleCategory::Toxicity,
        RuleCategory::Engagement,
        RuleCategory::Poll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Toxicity => "toxicity",
            Self::Engagement => "engagement",
            Self::Poll => "poll",
        }
    }

    /// Whether patterns of this category name a chat participant
    pub fn is_targeted(&self) -> bool {
        matches!(self, Self::Spam | Self::Toxicity)
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the monitor can do about a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Timeout,
    Ban,
    Warn,
    Message,
    Poll,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Ban => "ban",
            Self::Warn => "warn",
            Self::Message => "message",
            Self::Poll => "poll",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "timeout" | "timeout-user" => Some(Self::Timeout),
            "ban" | "ban-user" => Some(Self::Ban),
            "warn" | "warning" => Some(Self::Warn),
            "message" | "send-chat-message" => Some(Self::Message),
            "poll" | "create-poll" => Some(Self::Poll),
            _ => None,
        }
    }

    /// Ranking used when one target has several candidates in a cycle
    pub fn severity_rank(&self) -> u8 {
        match self {
            Self::Ban => 4,
            Self::Timeout => 3,
            Self::Warn => 2,
            Self::Message => 1,
            Self::Poll => 0,
        }
    }

    /// Actions that must name a chat participant
    pub fn needs_target(&self) -> bool {
        matches!(self, Self::Timeout | Self::Ban | Self::Warn)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What starts a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTrigger {
    /// Viewers asking for a vote in chat
    ViewerRequest,
    /// Whenever the cooldown allows
    Scheduled,
    /// Out-of-band game event signal
    GameEvent,
}

impl PollTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewerRequest => "viewer_request",
            Self::Scheduled => "scheduled",
            Self::GameEvent => "game_event",
        }
    }
}

/// Settings for one category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub enabled: bool,
    /// Spam: flagged messages per user before acting
    pub threshold: Option<f64>,
    /// Toxicity: minimum severity on a 1-10 scale
    pub severity_threshold: Option<f64>,
    pub action: Option<ActionKind>,
    /// Timeout or poll length in seconds
    pub duration: Option<u64>,
    /// Engagement: seconds of silence before prompting chat
    pub quiet_period_threshold: Option<u64>,
    pub responses: Vec<String>,
    pub trigger: Option<PollTrigger>,
    /// Minutes between two actions of this category
    pub cooldown: Option<u64>,
    pub min_confidence: Option<f64>,
    /// Poll title used when the analysis does not suggest one
    pub title: Option<String>,
    /// Poll choices
    pub options: Vec<String>,
}

impl RuleConfig {
    pub fn default_spam() -> Self {
        Self {
            enabled: true,
            threshold: Some(3.0),
            action: Some(ActionKind::Timeout),
            duration: Some(60),
            ..Default::default()
        }
    }

    pub fn default_toxicity() -> Self {
        Self {
            enabled: true,
            severity_threshold: Some(7.0),
            action: Some(ActionKind::Timeout),
            duration: Some(600),
            ..Default::default()
        }
    }

    pub fn default_engagement() -> Self {
        Self {
            enabled: true,
            action: Some(ActionKind::Message),
            quiet_period_threshold: Some(300),
            responses: vec![
                "How is everyone doing tonight?".to_string(),
                "What should we try next? Drop your ideas in chat!".to_string(),
                "Quiet in here... who's still watching?".to_string(),
            ],
            ..Default::default()
        }
    }

    pub fn default_poll() -> Self {
        Self {
            enabled: false,
            action: Some(ActionKind::Poll),
            duration: Some(120),
            trigger: Some(PollTrigger::ViewerRequest),
            cooldown: Some(15),
            title: Some("What should we do next?".to_string()),
            options: vec!["Keep going".to_string(), "Switch it up".to_string()],
            ..Default::default()
        }
    }

    /// Configured action, or the natural one for the category
    pub fn effective_action(&self, category: RuleCategory) -> ActionKind {
        self.action.unwrap_or(match category {
            RuleCategory::Spam | RuleCategory::Toxicity => ActionKind::Timeout,
            RuleCategory::Engagement => ActionKind::Message,
            RuleCategory::Poll => ActionKind::Poll,
        })
    }

    pub fn confidence_floor(&self) -> f64 {
        self.min_confidence.unwrap_or(DEFAULT_CONFIDENCE_FLOOR)
    }

    pub fn effective_trigger(&self) -> PollTrigger {
        self.trigger.unwrap_or(PollTrigger::ViewerRequest)
    }
}

/// Rules for every category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default = "RuleConfig::default_spam")]
    pub spam: RuleConfig,
    #[serde(default = "RuleConfig::default_toxicity")]
    pub toxicity: RuleConfig,
    #[serde(default = "RuleConfig::default_engagement")]
    pub engagement: RuleConfig,
    #[serde(default = "RuleConfig::default_poll")]
    pub poll: RuleConfig,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            spam: RuleConfig::default_spam(),
            toxicity: RuleConfig::default_toxicity(),
            engagement: RuleConfig::default_engagement(),
            poll: RuleConfig::default_poll(),
        }
    }
}

impl Rules {
    /// Parse a TOML rules document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let rules: Rules = toml::from_str(content)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn get(&self, category: RuleCategory) -> &RuleConfig {
        match category {
            RuleCategory::Spam => &self.spam,
            RuleCategory::Toxicity => &self.toxicity,
            RuleCategory::Engagement => &self.engagement,
            RuleCategory::Poll => &self.poll,
        }
    }

    /// Enabled categories in a fixed order
    pub fn enabled(&self) -> Vec<RuleCategory> {
        RuleCategory::ALL
            .into_iter()
            .filter(|c| self.get(*c).enabled)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in RuleCategory::ALL {
            let rule = self.get(category);
            if !rule.enabled {
                continue;
            }
            let field = |name: &str| format!("{}.{}", category, name);

            let action = rule.effective_action(category);
            if category.is_targeted() != action.needs_target() {
                return Err(ConfigError::invalid(
                    &field("action"),
                    format!("'{}' is not valid for {}", action, category),
                ));
            }
            if category == RuleCategory::Poll && action != ActionKind::Poll {
                return Err(ConfigError::invalid(&field("action"), "poll rules must use 'poll'"));
            }
            if category == RuleCategory::Engagement && action != ActionKind::Message {
                return Err(ConfigError::invalid(
                    &field("action"),
                    "engagement rules must use 'message'",
                ));
            }

            if let Some(minutes) = rule.cooldown {
                if minutes > MAX_COOLDOWN_MINUTES {
                    return Err(ConfigError::invalid(
                        &field("cooldown"),
                        format!("must be at most {} minutes", MAX_COOLDOWN_MINUTES),
                    ));
                }
            }

            if let Some(floor) = rule.min_confidence {
                if !(0.0..=1.0).contains(&floor) {
                    return Err(ConfigError::invalid(&field("min_confidence"), "must be within 0..1"));
                }
            }

            match category {
                RuleCategory::Spam => {
                    let threshold = rule
                        .threshold
                        .ok_or_else(|| ConfigError::Missing(field("threshold")))?;
                    if threshold < 1.0 {
                        return Err(ConfigError::invalid(&field("threshold"), "must be at least 1"));
                    }
                }
                RuleCategory::Toxicity => {
                    let threshold = rule
                        .severity_threshold
                        .ok_or_else(|| ConfigError::Missing(field("severity_threshold")))?;
                    if !(1.0..=10.0).contains(&threshold) {
                        return Err(ConfigError::invalid(
                            &field("severity_threshold"),
                            "must be within 1..10",
                        ));
                    }
                }
                RuleCategory::Engagement => {
                    match rule.quiet_period_threshold {
                        Some(secs) if (1..=MAX_QUIET_PERIOD_SECS).contains(&secs) => {}
                        Some(_) => {
                            return Err(ConfigError::invalid(
                                &field("quiet_period_threshold"),
                                format!("must be within 1..{} seconds", MAX_QUIET_PERIOD_SECS),
                            ))
                        }
                        None => return Err(ConfigError::Missing(field("quiet_period_threshold"))),
                    }
                    if rule.responses.iter().all(|r| r.trim().is_empty()) {
                        return Err(ConfigError::Missing(field("responses")));
                    }
                }
                RuleCategory::Poll => {
                    if rule.options.len() < 2 || rule.options.len() > 5 {
                        return Err(ConfigError::invalid(
                            &field("options"),
                            "polls need between 2 and 5 options",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let rules = Rules::default();
        assert!(rules.validate().is_ok());
        assert_eq!(
            rules.enabled(),
            vec![RuleCategory::Spam, RuleCategory::Toxicity, RuleCategory::Engagement]
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let rules = Rules::from_toml(
            r#"
            [poll]
            enabled = true
            trigger = "scheduled"
            cooldown = 15
            options = ["Left", "Right", "Straight"]

            [toxicity]
            enabled = true
            severity_threshold = 5
            action = "ban"
            "#,
        )
        .unwrap();

        assert!(rules.poll.enabled);
        assert_eq!(rules.poll.effective_trigger(), PollTrigger::Scheduled);
        assert_eq!(rules.poll.effective_action(RuleCategory::Poll), ActionKind::Poll);
        assert_eq!(rules.toxicity.action, Some(ActionKind::Ban));
        assert_eq!(rules.toxicity.severity_threshold, Some(5.0));
        // Untouched sections keep their defaults
        assert_eq!(rules.spam.threshold, Some(3.0));
    }

    #[test]
    fn test_rejects_mismatched_action() {
        let err = Rules::from_toml(
            r#"
            [spam]
            enabled = true
            threshold = 2
            action = "poll"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_severity() {
        let mut rules = Rules::default();
        rules.toxicity.severity_threshold = Some(11.0);
        assert!(rules.validate().is_err());

        rules.toxicity.enabled = false;
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_cooldown() {
        let err = Rules::from_toml(
            r#"
            [toxicity]
            enabled = true
            severity_threshold = 7
            cooldown = 9000000000000000000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "toxicity.cooldown"));

        let mut rules = Rules::default();
        rules.poll.cooldown = Some(MAX_COOLDOWN_MINUTES + 1);
        // Disabled rules are never evaluated
        assert!(rules.validate().is_ok());
        rules.poll.enabled = true;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_quiet_period() {
        let mut rules = Rules::default();
        rules.engagement.quiet_period_threshold = Some(u64::MAX);
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "engagement.quiet_period_threshold"
        ));

        rules.engagement.quiet_period_threshold = Some(MAX_QUIET_PERIOD_SECS);
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_action_parse_and_rank() {
        assert_eq!(ActionKind::parse("Ban-User"), Some(ActionKind::Ban));
        assert_eq!(ActionKind::parse("unknown"), None);
        assert!(ActionKind::Ban.severity_rank() > ActionKind::Timeout.severity_rank());
        assert!(ActionKind::Timeout.severity_rank() > ActionKind::Warn.severity_rank());
    }
}
