//! Priority-based context compression
//!
//! The last [`RECENT_WINDOW`] messages are always kept. Older messages are
//! classified into retention tiers; a large run of low-priority turns is
//! folded into one summary message, and if the result still exceeds the token
//! budget, older non-critical messages are dropped lowest tier first.

use crate::error::{ControllerError, Result};
use crate::models::{Message, Priority, Role};
use crate::observability::ControllerMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Messages at the tail that are never touched
const RECENT_WINDOW: usize = 20;

/// Low-priority messages are summarised only when there are more than this
const SUMMARY_THRESHOLD: usize = 10;

/// Lowercase substrings that mark a message as reporting an error
const ERROR_MARKERS: &[&str] = &[
    "error:",
    "[error]",
    "exception",
    "traceback",
    "panicked at",
    "fatal:",
    "failed with",
];

/// Normalised turns that carry no information of their own
const FILLER_TURNS: &[&str] = &[
    "", "ok", "okay", "k", "thanks", "thank you", "thx", "sure", "got it", "yes", "no", "yep",
    "nope", "cool", "great", "nice", "hi", "hello", "hmm", "alright", "sounds good",
];

/// Metrics for one compression call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub original_count: usize,
    pub final_count: usize,
    /// `1 - final / original`, never negative
    pub compression_ratio: f64,
    /// Priority-weighted share of the original content that survived
    pub quality_score: f64,
    pub processing_time: Duration,
    pub summarized_count: usize,
    pub dropped_count: usize,
    pub estimated_tokens: usize,
}

/// Older message kept in the output
#[derive(Debug)]
struct Retained {
    message: Message,
    /// Weight of the original content this entry stands for
    weight: f64,
}

/// Stateless context compressor
#[derive(Debug, Clone, Default)]
pub struct ContextCompressor {
    metrics: ControllerMetrics,
}

impl ContextCompressor {
    pub fn new(metrics: ControllerMetrics) -> Self {
        Self { metrics }
    }

    /// Retention tier for an older message
    ///
    /// `seen` holds normalised content of earlier messages and is updated.
    pub fn classify(message: &Message, seen: &mut HashSet<String>) -> Priority {
        let normalized = normalize(&message.content);
        let duplicate = !seen.insert(normalized.clone());

        if message.role == Role::System || is_error(&message.content) {
            Priority::Critical
        } else if message.role == Role::Tool || message.is_summary {
            Priority::High
        } else if duplicate || FILLER_TURNS.contains(&normalized.as_str()) {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    /// Compress `messages` towards `token_budget`
    pub fn compress(
        &self,
        messages: &[Message],
        token_budget: usize,
    ) -> Result<(Vec<Message>, CompressionResult)> {
        if token_budget == 0 {
            return Err(ControllerError::InvalidInput(
                "token budget must be greater than zero".to_string(),
            ));
        }

        let start = Instant::now();
        let original_count = messages.len();

        if original_count <= RECENT_WINDOW {
            let result = CompressionResult {
                original_count,
                final_count: original_count,
                compression_ratio: 0.0,
                quality_score: 1.0,
                processing_time: start.elapsed(),
                summarized_count: 0,
                dropped_count: 0,
                estimated_tokens: estimate_tokens(messages.iter()),
            };
            return Ok((messages.to_vec(), result));
        }

        let (older, recent) = messages.split_at(original_count - RECENT_WINDOW);

        let mut seen = HashSet::new();
        let classified: Vec<(Priority, &Message)> = older
            .iter()
            .map(|m| (Self::classify(m, &mut seen), m))
            .collect();

        let recent_weight: f64 = recent
            .iter()
            .map(|m| weight(Self::classify(m, &mut seen)))
            .sum();
        let total_weight =
            classified.iter().map(|(p, _)| weight(*p)).sum::<f64>() + recent_weight;

        let low: Vec<&Message> = classified
            .iter()
            .filter(|(p, _)| *p == Priority::Low)
            .map(|(_, m)| *m)
            .collect();
        let summarize = low.len() > SUMMARY_THRESHOLD;

        let mut retained: Vec<Retained> = Vec::with_capacity(classified.len());
        let mut summary_placed = false;
        for (priority, message) in &classified {
            if *priority == Priority::Low && summarize {
                if !summary_placed {
                    retained.push(Retained {
                        message: summary_message(&low),
                        weight: low.len() as f64 * weight(Priority::Low) / 2.0,
                    });
                    summary_placed = true;
                }
                continue;
            }

            let mut message = (*message).clone();
            message.priority = *priority;
            retained.push(Retained {
                message,
                weight: weight(*priority),
            });
        }

        let recent_tokens = estimate_tokens(recent.iter());
        let mut tokens = recent_tokens + estimate_tokens(retained.iter().map(|r| &r.message));
        let mut dropped_count = 0;

        if tokens > token_budget {
            // Lowest tier first, oldest first within a tier
            let mut candidates: Vec<usize> = (0..retained.len())
                .filter(|&i| retained[i].message.priority != Priority::Critical)
                .collect();
            candidates.sort_by_key(|&i| (retained[i].message.priority, i));

            let mut dropped = vec![false; retained.len()];
            for i in candidates {
                if tokens <= token_budget {
                    break;
                }
                tokens -= retained[i].message.estimated_tokens();
                dropped[i] = true;
                dropped_count += 1;
            }

            let mut index = 0;
            retained.retain(|_| {
                let keep = !dropped[index];
                index += 1;
                keep
            });

            if tokens > token_budget {
                debug!(
                    tokens = tokens,
                    budget = token_budget,
                    "Token budget still exceeded by critical and recent messages"
                );
            }
        }

        let retained_weight = retained.iter().map(|r| r.weight).sum::<f64>() + recent_weight;

        let mut output: Vec<Message> = retained.into_iter().map(|r| r.message).collect();
        output.extend_from_slice(recent);

        let final_count = output.len();
        let compression_ratio = (1.0 - final_count as f64 / original_count as f64).max(0.0);
        let quality_score = if total_weight > 0.0 {
            (retained_weight / total_weight).clamp(0.0, 1.0)
        } else {
            1.0
        };

        self.metrics.observe_compression_ratio(compression_ratio);

        let result = CompressionResult {
            original_count,
            final_count,
            compression_ratio,
            quality_score,
            processing_time: start.elapsed(),
            summarized_count: if summarize { low.len() } else { 0 },
            dropped_count,
            estimated_tokens: tokens,
        };
        Ok((output, result))
    }
}

fn weight(priority: Priority) -> f64 {
    match priority {
        Priority::Critical => 4.0,
        Priority::High => 3.0,
        Priority::Medium => 2.0,
        Priority::Low => 1.0,
    }
}

fn estimate_tokens<'a>(messages: impl Iterator<Item = &'a Message>) -> usize {
    messages.map(Message::estimated_tokens).sum()
}

fn is_error(content: &str) -> bool {
    let lower = content.to_lowercase();
    lower.starts_with("error") || ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Lowercase, punctuation-free, single-spaced content
fn normalize(content: &str) -> String {
    content
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One message standing in for a run of low-priority turns
fn summary_message(covered: &[&Message]) -> Message {
    let first = covered.first().map(|m| m.timestamp);
    let last = covered.last().map(|m| m.timestamp);
    let (from, to) = match (first, last) {
        (Some(from), Some(to)) => (from, to),
        _ => (chrono::Utc::now(), chrono::Utc::now()),
    };

    let content = format!(
        "[Summary of {} earlier low-priority messages from {} to {}]",
        covered.len(),
        from.format("%Y-%m-%d %H:%M:%S"),
        to.format("%Y-%m-%d %H:%M:%S"),
    );

    Message {
        role: Role::Assistant,
        content,
        timestamp: from,
        priority: Priority::Medium,
        is_summary: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn at(minute: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    fn user(i: i64, content: impl Into<String>) -> Message {
        Message::new(Role::User, content, at(i))
    }

    fn recent(start: i64) -> Vec<Message> {
        (0..20)
            .map(|i| user(start + i, format!("recent question number {i} about the rollout")))
            .collect()
    }

    fn compressor() -> ContextCompressor {
        ContextCompressor::new(ControllerMetrics::new())
    }

    #[test]
    fn test_short_conversation_unchanged() {
        let messages: Vec<Message> = (0..20).map(|i| user(i, "ok")).collect();
        let (output, result) = compressor().compress(&messages, 8000).unwrap();

        assert_eq!(output, messages);
        assert_eq!(result.compression_ratio, 0.0);
        assert_eq!(result.quality_score, 1.0);
    }

    #[test]
    fn test_medium_older_messages_kept() {
        let mut messages: Vec<Message> = (0..5)
            .map(|i| user(i, format!("distinct design question {i} about caching")))
            .collect();
        messages.extend(recent(10));

        let (output, result) = compressor().compress(&messages, 8000).unwrap();

        assert_eq!(output.len(), 25);
        assert_eq!(output, messages);
        assert_eq!(result.final_count, 25);
        assert_eq!(result.compression_ratio, 0.0);
        assert_eq!(result.summarized_count, 0);
    }

    #[test]
    fn test_low_priority_run_is_summarised() {
        let mut messages: Vec<Message> = (0..20).map(|i| user(i, "ok")).collect();
        messages.extend(recent(100));
        assert_eq!(messages.len(), 40);

        let (output, result) = compressor().compress(&messages, 8000).unwrap();

        assert_eq!(output.len(), 21);
        assert_eq!(result.final_count, 21);
        assert!((result.compression_ratio - 0.475).abs() < 1e-9);
        assert_eq!(result.summarized_count, 20);

        let summary = &output[0];
        assert!(summary.is_summary);
        assert_eq!(summary.priority, Priority::Medium);
        assert!(summary.content.contains("20 earlier"));
        assert_eq!(summary.timestamp, at(0));
        assert_eq!(&output[1..], &messages[20..]);
    }

    #[test]
    fn test_summary_placed_at_first_low_position() {
        let mut messages = vec![
            Message::new(Role::System, "You are a deployment assistant", at(0)),
            user(1, "what regions do we deploy to"),
        ];
        messages.extend((2..14).map(|i| user(i, "thanks")));
        messages.push(Message::new(Role::Tool, "regions: eu-west-1, us-east-1", at(14)));
        messages.extend(recent(100));

        let (output, _) = compressor().compress(&messages, 8000).unwrap();

        assert_eq!(output.len(), 4 + 20);
        assert_eq!(output[0].priority, Priority::Critical);
        assert_eq!(output[1].priority, Priority::Medium);
        assert!(output[2].is_summary);
        assert_eq!(output[3].priority, Priority::High);
    }

    #[test]
    fn test_few_low_messages_kept() {
        let mut messages: Vec<Message> = (0..5).map(|i| user(i, "ok")).collect();
        messages.extend(recent(100));

        let (output, result) = compressor().compress(&messages, 8000).unwrap();

        assert_eq!(output.len(), 25);
        assert!(output[..5].iter().all(|m| m.priority == Priority::Low));
        assert_eq!(result.summarized_count, 0);
    }

    #[test]
    fn test_classification_rules() {
        let mut seen = HashSet::new();

        let system = Message::new(Role::System, "rules", at(0));
        let error = user(1, "Error: connection refused by upstream");
        let tool = Message::new(Role::Tool, "{\"rows\": 3}", at(2));
        let mut summary = Message::assistant("[Summary of 12 earlier messages]");
        summary.is_summary = true;
        let question = user(3, "How do I rotate the keys?");
        let repeat = user(4, "how do I rotate the keys");
        let filler = user(5, "Thanks!");

        assert_eq!(ContextCompressor::classify(&system, &mut seen), Priority::Critical);
        assert_eq!(ContextCompressor::classify(&error, &mut seen), Priority::Critical);
        assert_eq!(ContextCompressor::classify(&tool, &mut seen), Priority::High);
        assert_eq!(ContextCompressor::classify(&summary, &mut seen), Priority::High);
        assert_eq!(ContextCompressor::classify(&question, &mut seen), Priority::Medium);
        assert_eq!(ContextCompressor::classify(&repeat, &mut seen), Priority::Low);
        assert_eq!(ContextCompressor::classify(&filler, &mut seen), Priority::Low);
    }

    #[test]
    fn test_budget_drops_lowest_priority_oldest_first() {
        let long = |tag: &str| format!("{tag} {}", "x".repeat(400));
        let mut messages = vec![
            Message::new(Role::System, long("system prompt"), at(0)),
            user(1, long("first design question")),
            Message::new(Role::Tool, long("tool output"), at(2)),
            user(3, long("second design question")),
        ];
        messages.extend(recent(100));

        // Each long message is ~100 tokens; leave room for recent + two older
        let recent_tokens: usize = messages[4..].iter().map(Message::estimated_tokens).sum();
        let budget = recent_tokens + 210;

        let (output, result) = compressor().compress(&messages, budget).unwrap();

        assert_eq!(result.dropped_count, 2);
        assert_eq!(output.len(), 22);
        assert!(output[0].content.starts_with("system prompt"));
        assert!(output[1].content.starts_with("tool output"));
        assert!(result.estimated_tokens <= budget);
    }

    #[test]
    fn test_critical_and_recent_never_dropped() {
        let mut messages: Vec<Message> = (0..10)
            .map(|i| Message::new(Role::System, format!("policy {i} {}", "y".repeat(200)), at(i)))
            .collect();
        messages.push(user(10, "an ordinary question about quotas"));
        messages.extend(recent(100));

        let (output, result) = compressor().compress(&messages, 1).unwrap();

        assert_eq!(output.len(), 30);
        assert_eq!(result.dropped_count, 1);
        assert!(output[..10].iter().all(|m| m.priority == Priority::Critical));
        assert_eq!(&output[10..], &messages[11..]);
        assert!(result.estimated_tokens > 1);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let err = compressor().compress(&[], 0).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidInput(_)));
    }

    #[test]
    fn test_ratio_and_quality_bounds() {
        let contents = ["ok", "Error: disk full", "deploy plan", "ok", "thanks"];
        for older in [0usize, 1, 11, 35, 80] {
            let mut messages: Vec<Message> = (0..older)
                .map(|i| user(i as i64, contents[i % contents.len()]))
                .collect();
            messages.extend(recent(1000));

            for budget in [1, 50, 8000] {
                let (output, result) = compressor().compress(&messages, budget).unwrap();
                assert!(result.final_count <= result.original_count);
                assert_eq!(output.len(), result.final_count);
                assert!((0.0..1.0).contains(&result.compression_ratio));
                assert!((0.0..=1.0).contains(&result.quality_score));

                let critical_in = messages
                    .iter()
                    .filter(|m| is_error(&m.content))
                    .count();
                let critical_out = output.iter().filter(|m| is_error(&m.content)).count();
                assert_eq!(critical_in, critical_out);
            }
        }
    }
}
