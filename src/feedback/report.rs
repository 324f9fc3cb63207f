//! Statistics, learning insights and the performance report.
//!
//! All of these are pure functions of the retained records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ActionRecord;
use crate::decision::ConfidenceAdjustments;
use crate::rules::ActionKind;

/// Ratings needed before an action kind's confidence is adjusted
pub const MIN_RATINGS_FOR_ADJUSTMENT: usize = 3;

/// Largest confidence shift feedback can apply
pub const MAX_ADJUSTMENT: f64 = 0.1;

/// Ratings at or above this count as approval
const APPROVAL_RATING: u8 = 4;

/// Per-action slice of the statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionBreakdown {
    pub count: usize,
    pub successes: usize,
    pub rated: usize,
    pub average_rating: Option<f64>,
}

/// Aggregate view over retained records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_actions: usize,
    pub actions_today: usize,
    /// Fraction of records with a successful outcome
    pub success_rate: f64,
    pub average_confidence: f64,
    pub most_common_action: Option<ActionKind>,
    pub rated_actions: usize,
    pub average_rating: Option<f64>,
    /// Fraction of rated records rated 4 or 5
    pub approval_rate: Option<f64>,
    pub by_action: BTreeMap<ActionKind, ActionBreakdown>,
}

impl Statistics {
    pub fn compute(records: &[ActionRecord], now: DateTime<Utc>) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let today = now.date_naive();
        let total = records.len();
        let successes = records.iter().filter(|r| r.is_success()).count();
        let confidence_sum: f64 = records.iter().map(|r| r.confidence).sum();

        let mut by_action: BTreeMap<ActionKind, ActionBreakdown> = BTreeMap::new();
        let mut rating_sums: BTreeMap<ActionKind, u32> = BTreeMap::new();
        // Insertion order breaks ties for the most common action
        let mut first_seen: Vec<ActionKind> = Vec::new();

        for record in records {
            if !first_seen.contains(&record.action) {
                first_seen.push(record.action);
            }
            let slot = by_action.entry(record.action).or_default();
            slot.count += 1;
            if record.is_success() {
                slot.successes += 1;
            }
            if let Some(feedback) = &record.feedback {
                slot.rated += 1;
                *rating_sums.entry(record.action).or_default() += feedback.rating as u32;
            }
        }
        for (action, slot) in by_action.iter_mut() {
            if slot.rated > 0 {
                let sum = rating_sums.get(action).copied().unwrap_or(0);
                slot.average_rating = Some(sum as f64 / slot.rated as f64);
            }
        }

        let most_common_action = first_seen
            .iter()
            .copied()
            .fold(None::<(ActionKind, usize)>, |best, action| {
                let count = by_action[&action].count;
                match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((action, count)),
                }
            })
            .map(|(action, _)| action);

        let ratings: Vec<u8> = records
            .iter()
            .filter_map(|r| r.feedback.as_ref().map(|f| f.rating))
            .collect();
        let (average_rating, approval_rate) = if ratings.is_empty() {
            (None, None)
        } else {
            let n = ratings.len() as f64;
            let sum: u32 = ratings.iter().map(|&r| r as u32).sum();
            let approved = ratings.iter().filter(|&&r| r >= APPROVAL_RATING).count();
            (Some(sum as f64 / n), Some(approved as f64 / n))
        };

        Self {
            total_actions: total,
            actions_today: records
                .iter()
                .filter(|r| r.timestamp.date_naive() == today)
                .count(),
            success_rate: successes as f64 / total as f64,
            average_confidence: confidence_sum / total as f64,
            most_common_action,
            rated_actions: ratings.len(),
            average_rating,
            approval_rate,
            by_action,
        }
    }
}

/// What the ratings say about one action kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInsight {
    pub action: ActionKind,
    pub rated: usize,
    pub average_rating: f64,
    /// Shift applied to this action's confidence
    pub adjustment: f64,
}

/// Derived artifact rewritten after every rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub generated_at: DateTime<Utc>,
    pub actions: Vec<ActionInsight>,
    /// Reasons behind actions rated 1 or 2
    pub low_rated_reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

impl LearningInsights {
    pub fn build(records: &[ActionRecord], now: DateTime<Utc>) -> Self {
        let stats = Statistics::compute(records, now);

        let actions: Vec<ActionInsight> = stats
            .by_action
            .iter()
            .filter_map(|(action, slot)| {
                let average = slot.average_rating?;
                let adjustment = if slot.rated >= MIN_RATINGS_FOR_ADJUSTMENT {
                    ((average - 3.0) / 2.0 * MAX_ADJUSTMENT).clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT)
                } else {
                    0.0
                };
                Some(ActionInsight {
                    action: *action,
                    rated: slot.rated,
                    average_rating: average,
                    adjustment,
                })
            })
            .collect();

        let low_rated_reasons = records
            .iter()
            .filter(|r| r.feedback.as_ref().is_some_and(|f| f.rating <= 2))
            .map(|r| r.reason.clone())
            .collect();

        let recommendations = actions
            .iter()
            .filter(|a| a.adjustment != 0.0)
            .map(|a| {
                if a.adjustment < 0.0 {
                    format!(
                        "{} actions average {:.1}/5; confidence lowered by {:.3}",
                        a.action, a.average_rating, -a.adjustment
                    )
                } else {
                    format!(
                        "{} actions average {:.1}/5; confidence raised by {:.3}",
                        a.action, a.average_rating, a.adjustment
                    )
                }
            })
            .collect();

        Self {
            generated_at: now,
            actions,
            low_rated_reasons,
            recommendations,
        }
    }

    pub fn adjustments(&self) -> ConfidenceAdjustments {
        self.actions
            .iter()
            .filter(|a| a.adjustment != 0.0)
            .map(|a| (a.action, a.adjustment))
            .collect()
    }
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Render the daily performance report
pub fn format_report(records: &[ActionRecord], date: NaiveDate, now: DateTime<Utc>) -> String {
    let stats = Statistics::compute(records, now);
    let mut msg = String::new();

    msg.push_str(&format!("# Chat Autopilot Performance Report - {}\n\n", date));

    if stats.total_actions == 0 {
        msg.push_str("No actions recorded in the retention window.\n");
        return msg;
    }

    msg.push_str("## Summary\n");
    msg.push_str(&format!("- Total actions: {}\n", stats.total_actions));
    msg.push_str(&format!("- Actions today: {}\n", stats.actions_today));
    msg.push_str(&format!("- Success rate: {}\n", percent(stats.success_rate)));
    msg.push_str(&format!(
        "- Average confidence: {}\n",
        percent(stats.average_confidence)
    ));
    if let Some(action) = stats.most_common_action {
        msg.push_str(&format!("- Most common action: {}\n", action));
    }
    match (stats.average_rating, stats.approval_rate) {
        (Some(avg), Some(approval)) => msg.push_str(&format!(
            "- Feedback: {} rated, average {:.1}/5, approval {}\n",
            stats.rated_actions,
            avg,
            percent(approval)
        )),
        _ => msg.push_str("- Feedback: none yet\n"),
    }
    msg.push('\n');

    msg.push_str("## By action\n");
    for (action, slot) in &stats.by_action {
        let rating = slot
            .average_rating
            .map(|r| format!(", avg rating {:.1}", r))
            .unwrap_or_default();
        msg.push_str(&format!(
            "- {}: {} ({} succeeded{})\n",
            action, slot.count, slot.successes, rating
        ));
    }

    let mut rated: Vec<&ActionRecord> = records.iter().filter(|r| r.feedback.is_some()).collect();
    rated.sort_by_key(|r| r.feedback.as_ref().map(|f| f.rating).unwrap_or(u8::MAX));
    let lowest: Vec<&ActionRecord> = rated
        .into_iter()
        .filter(|r| r.feedback.as_ref().is_some_and(|f| f.rating <= 3))
        .take(3)
        .collect();
    if !lowest.is_empty() {
        msg.push_str("\n## Lowest rated\n");
        for record in lowest {
            let feedback = record.feedback.as_ref();
            msg.push_str(&format!(
                "- {}/5 {}: {}{}\n",
                feedback.map(|f| f.rating).unwrap_or_default(),
                record.summary(),
                truncate(&record.reason, 80),
                feedback
                    .and_then(|f| f.comment.as_deref())
                    .map(|c| format!(" (\"{}\")", truncate(c, 60)))
                    .unwrap_or_default()
            ));
        }
    }

    let failures: Vec<&ActionRecord> = records.iter().filter(|r| !r.is_success()).collect();
    if !failures.is_empty() {
        msg.push_str(&format!("\n## Failures ({})\n", failures.len()));
        for record in failures.iter().rev().take(5) {
            msg.push_str(&format!("- {}\n", record.summary()));
        }
    }

    let insights = LearningInsights::build(records, now);
    if !insights.recommendations.is_empty() {
        msg.push_str("\n## Learning\n");
        for line in &insights.recommendations {
            msg.push_str(&format!("- {}\n", line));
        }
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::feedback::{FeedbackEntry, FeedbackSource};

    fn record(action: ActionKind, confidence: f64, rating: Option<u8>) -> ActionRecord {
        let mut decision = Decision::manual(action, "someone", "spam links", Some(60));
        decision.confidence = confidence;
        let mut record = ActionRecord::new(&decision, Utc::now());
        record.feedback = rating.map(|rating| FeedbackEntry {
            action_id: record.id.clone(),
            action_timestamp: record.timestamp,
            rating,
            comment: None,
            source: FeedbackSource::Manual,
            recorded_at: Utc::now(),
        });
        record
    }

    #[test]
    fn test_empty_statistics() {
        let stats = Statistics::compute(&[], Utc::now());
        assert_eq!(stats.total_actions, 0);
        assert_eq!(stats.most_common_action, None);
    }

    #[test]
    fn test_statistics_fields() {
        let records = vec![
            record(ActionKind::Timeout, 0.8, Some(5)),
            record(ActionKind::Ban, 0.9, None).failed("nope"),
            record(ActionKind::Timeout, 0.7, Some(2)),
            record(ActionKind::Ban, 0.6, None),
        ];
        let stats = Statistics::compute(&records, Utc::now());

        assert_eq!(stats.total_actions, 4);
        assert_eq!(stats.actions_today, 4);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert!((stats.average_confidence - 0.75).abs() < 1e-9);
        // Tie between timeout and ban goes to the first seen
        assert_eq!(stats.most_common_action, Some(ActionKind::Timeout));
        assert_eq!(stats.rated_actions, 2);
        assert_eq!(stats.average_rating, Some(3.5));
        assert_eq!(stats.approval_rate, Some(0.5));
        assert_eq!(stats.by_action[&ActionKind::Ban].successes, 1);
    }

    #[test]
    fn test_adjustment_needs_enough_ratings() {
        let two = vec![
            record(ActionKind::Timeout, 0.8, Some(1)),
            record(ActionKind::Timeout, 0.8, Some(1)),
        ];
        assert!(LearningInsights::build(&two, Utc::now()).adjustments().is_empty());

        let mut three = two.clone();
        three.push(record(ActionKind::Timeout, 0.8, Some(1)));
        let insights = LearningInsights::build(&three, Utc::now());
        let adjustments = insights.adjustments();
        assert!((adjustments[&ActionKind::Timeout] + MAX_ADJUSTMENT).abs() < 1e-9);
        assert_eq!(insights.low_rated_reasons.len(), 3);
        assert_eq!(insights.recommendations.len(), 1);
    }

    #[test]
    fn test_report_sections() {
        let records = vec![
            record(ActionKind::Timeout, 0.8, Some(2)),
            record(ActionKind::Message, 0.6, None).failed("chat offline"),
        ];
        let today = Utc::now().date_naive();
        let report = format_report(&records, today, Utc::now());

        assert!(report.contains("Performance Report"));
        assert!(report.contains("Total actions: 2"));
        assert!(report.contains("## Lowest rated"));
        assert!(report.contains("chat offline"));

        let empty = format_report(&[], today, Utc::now());
        assert!(empty.contains("No actions recorded"));
    }
}
