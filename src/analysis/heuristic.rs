//! Keyword Heuristic Strategy
//!
//! Offline stand-in for a hosted model. Reads the chat log section of the
//! prompt and answers in the same JSON contract a model would.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{AnalysisStrategy, CATEGORY_PREFIX, CHAT_LOG_MARKER};

/// (phrase, severity on a 1-10 scale)
const TOXIC_PHRASES: &[(&str, u8)] = &[
    ("kill yourself", 10),
    ("kys", 10),
    ("go die", 9),
    ("idiot", 7),
    ("moron", 7),
    ("loser", 7),
    ("pathetic", 7),
    ("trash", 6),
    ("garbage", 6),
    ("stupid", 5),
    ("dumb", 5),
    ("shut up", 5),
    ("hate you", 6),
];

const POLL_REQUEST_PHRASES: &[&str] = &["poll", "vote", "let chat decide", "chat decides"];

/// Identical messages from one user before repeats count as spam
const REPEAT_LIMIT: usize = 3;

/// Keyword and message-shape analysis
#[derive(Debug, Default, Clone)]
pub struct HeuristicStrategy;

impl HeuristicStrategy {
    pub fn new() -> Self {
        Self
    }

    fn category(prompt: &str) -> Option<&str> {
        prompt
            .lines()
            .next()
            .and_then(|line| line.strip_prefix(CATEGORY_PREFIX))
            .map(str::trim)
    }

    /// (username, content) pairs from the chat log section
    fn chat_lines(prompt: &str) -> Vec<(&str, &str)> {
        let Some((_, log)) = prompt.split_once(CHAT_LOG_MARKER) else {
            return Vec::new();
        };
        log.lines()
            .filter_map(|line| line.split_once(": "))
            .map(|(user, content)| (user.trim(), content.trim()))
            .filter(|(user, _)| !user.is_empty())
            .collect()
    }

    fn toxicity(lines: &[(&str, &str)]) -> Value {
        let findings: Vec<Value> = lines
            .iter()
            .filter_map(|(user, content)| {
                let lower = content.to_lowercase();
                TOXIC_PHRASES
                    .iter()
                    .filter(|(phrase, _)| lower.contains(phrase))
                    .map(|(_, severity)| *severity)
                    .max()
                    .map(|severity| {
                        json!({
                            "username": user,
                            "severity": severity,
                            "evidence": content,
                        })
                    })
            })
            .collect();
        Value::Array(findings)
    }

    fn spam(lines: &[(&str, &str)]) -> Value {
        let mut repeats: HashMap<(&str, String), usize> = HashMap::new();
        let mut findings = Vec::new();

        for (user, content) in lines {
            let normalized = content.to_lowercase();
            let seen = repeats.entry((*user, normalized)).or_insert(0);
            *seen += 1;

            let reason = if *seen >= REPEAT_LIMIT {
                Some("repeated message")
            } else if has_link(content) {
                Some("link")
            } else if is_shouting(content) {
                Some("excessive caps")
            } else if is_flood(content) {
                Some("emote flood")
            } else {
                None
            };

            if let Some(reason) = reason {
                findings.push(json!({
                    "username": user,
                    "evidence": format!("{} ({})", content, reason),
                }));
            }
        }
        Value::Array(findings)
    }

    fn poll(lines: &[(&str, &str)]) -> Value {
        let requests = lines
            .iter()
            .filter(|(_, content)| {
                let lower = content.to_lowercase();
                POLL_REQUEST_PHRASES.iter().any(|p| lower.contains(p))
            })
            .count();
        json!({
            "triggered": requests >= 2,
            "requests": requests,
        })
    }
}

fn has_link(content: &str) -> bool {
    let lower = content.to_lowercase();
    lower.contains("http://") || lower.contains("https://") || lower.contains("www.")
}

fn is_shouting(content: &str) -> bool {
    let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 10 {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64 > 0.7
}

fn is_flood(content: &str) -> bool {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in content.split_whitespace() {
        *counts.entry(word).or_insert(0) += 1;
    }
    if counts.values().any(|&n| n >= 6) {
        return true;
    }

    // Long runs of one character ("aaaaaaaaaaaa")
    let mut run = 0;
    let mut prev = None;
    for c in content.chars() {
        if Some(c) == prev {
            run += 1;
            if run >= 10 {
                return true;
            }
        } else {
            run = 1;
            prev = Some(c);
        }
    }
    false
}

#[async_trait]
impl AnalysisStrategy for HeuristicStrategy {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze(&self, prompt: &str) -> Result<String> {
        let lines = Self::chat_lines(prompt);
        let payload = match Self::category(prompt) {
            Some("toxicity") => Self::toxicity(&lines),
            Some("spam") => Self::spam(&lines),
            Some("poll") => Self::poll(&lines),
            // Engagement copy comes from configured responses
            Some("engagement") => json!({}),
            other => anyhow::bail!("Unsupported analysis category: {:?}", other),
        };
        Ok(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(category: &str, log: &[&str]) -> String {
        format!(
            "{} {}\nRespond with JSON.\n{}\n{}",
            CATEGORY_PREFIX,
            category,
            CHAT_LOG_MARKER,
            log.join("\n")
        )
    }

    #[tokio::test]
    async fn test_toxicity_severity() {
        let strategy = HeuristicStrategy::new();
        let out = strategy
            .analyze(&prompt("toxicity", &["alice: you're an idiot", "bob: nice stream"]))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();

        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["username"], "alice");
        assert_eq!(items[0]["severity"], 7);
    }

    #[tokio::test]
    async fn test_spam_repeats_and_links() {
        let strategy = HeuristicStrategy::new();
        let out = strategy
            .analyze(&prompt(
                "spam",
                &[
                    "bot1: buy followers",
                    "bot1: buy followers",
                    "bot1: buy followers",
                    "carl: check https://example.com",
                    "dana: THIS IS SO LOUD RIGHT NOW",
                    "erin: hello",
                ],
            ))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let users: Vec<&str> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["username"].as_str().unwrap())
            .collect();
        assert_eq!(users, vec!["bot1", "carl", "dana"]);
    }

    #[tokio::test]
    async fn test_poll_requests() {
        let strategy = HeuristicStrategy::new();
        let out = strategy
            .analyze(&prompt("poll", &["a: can we do a poll?", "b: let us vote on it", "c: hi"]))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["triggered"], true);
        assert_eq!(parsed["requests"], 2);
    }

    #[tokio::test]
    async fn test_unknown_category_is_error() {
        let strategy = HeuristicStrategy::new();
        assert!(strategy.analyze("category: weather\n").await.is_err());
    }

    #[test]
    fn test_flood_detection() {
        assert!(is_flood("LUL LUL LUL LUL LUL LUL"));
        assert!(is_flood("wooooooooooooo"));
        assert!(!is_flood("good game everyone"));
    }
}
