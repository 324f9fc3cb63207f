//! Target Resolution
//!
//! Maps an operator's target specifier to a chat participant. A literal
//! username is canonicalised against the chat window; a descriptor such as
//! "toxic" or "spammer" is resolved by keyword scoring over buffered messages.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::chat::ChatMessage;

static RE_LITERAL_USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?([A-Za-z0-9_]{3,25})$").unwrap());

static RE_NAMED_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\buser\s+(?:named|called)\s+@?([A-Za-z0-9_]{3,25})\b").unwrap());

/// Descriptor keyword families
static DESCRIPTORS: &[(&[&str], &[&str])] = &[
    (
        &["toxic", "toxicity", "rude", "mean", "offensive", "abusive", "hater"],
        &[
            "idiot", "stupid", "dumb", "hate", "trash", "loser", "shut up", "moron", "pathetic",
            "garbage", "ugly", "kys",
        ],
    ),
    (
        &["spam", "spammer", "spamming", "flood", "flooder"],
        &["http://", "https://", "www.", "buy", "follow me", "free", "subscribe", "promo"],
    ),
    (
        &["caps", "shouting", "yelling", "loud"],
        &["!!!", "???"],
    ),
    (
        &["troll", "trolling", "baiting"],
        &["cope", "seethe", "ratio", "l + ", "skill issue", "cry"],
    ),
];

/// Outcome of a resolution attempt with the fallback evidence attached
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(String),
    /// Nothing matched; present the raw log for a manual call
    Unresolved { recent_log: Vec<ChatMessage> },
}

/// Resolves usernames or descriptors against a chat snapshot
pub struct TargetResolver<'a> {
    messages: &'a [ChatMessage],
}

impl<'a> TargetResolver<'a> {
    pub fn new(messages: &'a [ChatMessage]) -> Self {
        Self { messages }
    }

    /// Resolve `input` to a username, or `None` when no participant fits
    pub fn resolve(&self, input: &str) -> Option<String> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let lower = input.to_lowercase();
        if let Some(keywords) = Self::descriptor_keywords(&lower) {
            return self.score_descriptor(keywords);
        }

        if let Some(candidate) = Self::literal_candidate(input) {
            return Some(self.canonical_username(&candidate));
        }

        self.score_descriptor(&[lower.as_str()])
    }

    /// Resolve, keeping the recent log when nothing matched
    pub fn resolve_or_log(&self, input: &str, log_limit: usize) -> Resolution {
        match self.resolve(input) {
            Some(username) => Resolution::Resolved(username),
            None => {
                let skip = self.messages.len().saturating_sub(log_limit);
                Resolution::Unresolved {
                    recent_log: self.messages[skip..].to_vec(),
                }
            }
        }
    }

    fn descriptor_keywords(lower: &str) -> Option<&'static [&'static str]> {
        let word = lower.trim_start_matches("the ").trim_end_matches(" user").trim();
        DESCRIPTORS
            .iter()
            .find(|(names, _)| names.contains(&word))
            .map(|(_, keywords)| *keywords)
    }

    fn literal_candidate(input: &str) -> Option<String> {
        if let Some(cap) = RE_NAMED_USER.captures(input) {
            return Some(cap[1].to_string());
        }
        RE_LITERAL_USERNAME
            .captures(input)
            .map(|cap| cap[1].to_string())
    }

    /// Window spelling of `candidate`, matched case-insensitively and never partially
    pub fn exact_username(&self, candidate: &str) -> Option<String> {
        let needle = candidate.to_lowercase();
        self.messages
            .iter()
            .find(|m| m.username.to_lowercase() == needle)
            .map(|m| m.username.clone())
    }

    /// Exact username from the window when one contains the candidate
    fn canonical_username(&self, candidate: &str) -> String {
        if let Some(exact) = self.exact_username(candidate) {
            return exact;
        }

        let needle = candidate.to_lowercase();
        self.messages
            .iter()
            .find(|m| m.username.to_lowercase().contains(&needle))
            .map(|m| m.username.clone())
            .unwrap_or_else(|| candidate.to_string())
    }

    /// Highest keyword score wins; ties go to the earliest qualifying message
    fn score_descriptor(&self, keywords: &[&str]) -> Option<String> {
        // (username, score, index of first qualifying message)
        let mut scores: Vec<(&str, u32, usize)> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();

        for (idx, msg) in self.messages.iter().enumerate() {
            let content = msg.content.to_lowercase();
            if !keywords.iter().any(|k| content.contains(k)) {
                continue;
            }
            match slots.get(msg.username.as_str()) {
                Some(&slot) => scores[slot].1 += 1,
                None => {
                    slots.insert(msg.username.as_str(), scores.len());
                    scores.push((msg.username.as_str(), 1, idx));
                }
            }
        }

        scores
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
            .map(|(username, _, _)| username.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(lines: &[(&str, &str)]) -> Vec<ChatMessage> {
        lines.iter().map(|(u, c)| ChatMessage::now(u, c)).collect()
    }

    #[test]
    fn test_descriptor_highest_score_wins() {
        let messages = msgs(&[
            ("alice", "you're an idiot"),
            ("bob", "idiot much?"),
            ("alice", "so dumb"),
        ]);
        let resolver = TargetResolver::new(&messages);
        assert_eq!(resolver.resolve("toxic"), Some("alice".to_string()));
    }

    #[test]
    fn test_tie_goes_to_earliest_qualifying_message() {
        let messages = msgs(&[
            ("carol", "nice play"),
            ("zed", "what an idiot"),
            ("amy", "so stupid"),
            ("zed", "gg"),
            ("amy", "hello"),
        ]);
        let resolver = TargetResolver::new(&messages);
        for _ in 0..20 {
            assert_eq!(resolver.resolve("rude"), Some("zed".to_string()));
        }

        let reversed = msgs(&[("amy", "so stupid"), ("zed", "what an idiot")]);
        assert_eq!(
            TargetResolver::new(&reversed).resolve("toxic"),
            Some("amy".to_string())
        );
    }

    #[test]
    fn test_literal_username_uses_canonical_casing() {
        let messages = msgs(&[("CoolGamer99", "hi"), ("other", "yo")]);
        let resolver = TargetResolver::new(&messages);

        assert_eq!(resolver.resolve("coolgamer99"), Some("CoolGamer99".to_string()));
        assert_eq!(resolver.resolve("@coolgamer"), Some("CoolGamer99".to_string()));
        assert_eq!(resolver.resolve("nobody_here"), Some("nobody_here".to_string()));
    }

    #[test]
    fn test_exact_username_ignores_partial_names() {
        let messages = msgs(&[("maxwell_fan", "hi"), ("Max", "yo")]);
        let resolver = TargetResolver::new(&messages);

        assert_eq!(resolver.exact_username("MAX"), Some("Max".to_string()));
        assert_eq!(resolver.exact_username("maxwell"), None);
        assert_eq!(TargetResolver::new(&messages[..1]).exact_username("max"), None);
    }

    #[test]
    fn test_named_user_phrase() {
        let messages = msgs(&[("Troublemaker_1", "hey")]);
        let resolver = TargetResolver::new(&messages);
        assert_eq!(
            resolver.resolve("timeout the user named troublemaker_1 please"),
            Some("Troublemaker_1".to_string())
        );
    }

    #[test]
    fn test_unknown_descriptor_uses_itself_as_keyword() {
        let messages = msgs(&[
            ("dan", "pineapple on pizza is great"),
            ("eve", "no pineapple pizza is a crime"),
        ]);
        let resolver = TargetResolver::new(&messages);
        assert_eq!(resolver.resolve("pineapple pizza"), Some("eve".to_string()));
    }

    #[test]
    fn test_no_match_falls_back_to_log() {
        let messages = msgs(&[("a", "hello"), ("b", "good game"), ("c", "nice")]);
        let resolver = TargetResolver::new(&messages);

        assert_eq!(resolver.resolve("spammer"), None);
        match resolver.resolve_or_log("spammer", 2) {
            Resolution::Unresolved { recent_log } => {
                assert_eq!(recent_log.len(), 2);
                assert_eq!(recent_log[0].username, "b");
            }
            other => panic!("expected unresolved, got {:?}", other),
        }
    }
}
