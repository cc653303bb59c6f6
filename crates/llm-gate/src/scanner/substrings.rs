//! Substring and topic matchers

use super::{unavailable, Scanner, ScannerKind, ScannerOutcome};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

/// Blocks text containing any banned substring (case-insensitive)
pub struct BanSubstrings {
    substrings: Vec<String>,
}

impl BanSubstrings {
    pub fn new(substrings: &[String]) -> Result<Self> {
        let substrings: Vec<String> = substrings
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if substrings.is_empty() {
            return Err(unavailable(
                ScannerKind::BanSubstrings,
                "no substrings configured",
            ));
        }
        Ok(Self { substrings })
    }

    /// Banned substrings present in `text`
    pub fn matches(&self, text: &str) -> Vec<&str> {
        let text_lower = text.to_lowercase();
        self.substrings
            .iter()
            .filter(|s| text_lower.contains(s.as_str()))
            .map(|s| s.as_str())
            .collect()
    }
}

#[async_trait]
impl Scanner for BanSubstrings {
    fn name(&self) -> &'static str {
        "BanSubstrings"
    }

    async fn scan(&self, text: &str, _prompt: Option<&str>) -> Result<ScannerOutcome> {
        let matched = self.matches(text);
        let found = !matched.is_empty();
        let matched: Vec<Value> = matched.into_iter().map(Value::from).collect();

        Ok(ScannerOutcome::new(text, !found, if found { 1.0 } else { 0.0 })
            .with_detail("matched", matched))
    }
}

/// Keywords for the topics the high level bans
fn lexicon(topic: &str) -> Vec<&str> {
    match topic {
        "violence" => vec![
            "kill", "murder", "assault", "weapon", "shoot", "stab", "bomb", "torture", "massacre",
        ],
        "hate" => vec![
            "hate speech", "racist", "racism", "slur", "bigot", "supremacist", "genocide",
            "ethnic cleansing",
        ],
        "self-harm" => vec![
            "self-harm", "self harm", "cut myself", "hurt myself", "harm myself", "starve myself",
        ],
        "suicide" => vec![
            "suicide", "suicidal", "kill myself", "end my life", "take my own life",
        ],
        other => vec![other],
    }
}

struct TopicMatcher {
    topic: String,
    pattern: Regex,
}

/// Blocks prompts about banned topics, scored by keyword hits
pub struct BanTopics {
    topics: Vec<TopicMatcher>,
    threshold: f64,
}

impl BanTopics {
    pub fn new(topics: &[String], threshold: f64) -> Result<Self> {
        if topics.is_empty() {
            return Err(unavailable(ScannerKind::BanTopics, "no topics configured"));
        }

        let mut matchers = Vec::with_capacity(topics.len());
        for topic in topics {
            let topic = topic.trim().to_lowercase();
            let alternatives: Vec<String> = lexicon(&topic).into_iter().map(regex::escape).collect();
            let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
                .map_err(|e| unavailable(ScannerKind::BanTopics, e.to_string()))?;
            matchers.push(TopicMatcher { topic, pattern });
        }

        Ok(Self {
            topics: matchers,
            threshold,
        })
    }

    /// Score per topic: half a point per keyword hit, capped at 1.0
    pub fn scores(&self, text: &str) -> Vec<(&str, f64)> {
        self.topics
            .iter()
            .map(|m| {
                let hits = m.pattern.find_iter(text).count() as f64;
                (m.topic.as_str(), (hits * 0.5).min(1.0))
            })
            .collect()
    }
}

#[async_trait]
impl Scanner for BanTopics {
    fn name(&self) -> &'static str {
        "BanTopics"
    }

    async fn scan(&self, text: &str, _prompt: Option<&str>) -> Result<ScannerOutcome> {
        let scores = self.scores(text);
        let max = scores.iter().map(|(_, s)| *s).fold(0.0, f64::max);

        let mut by_topic = Map::new();
        for (topic, score) in scores {
            by_topic.insert(topic.to_string(), Value::from(score));
        }

        Ok(ScannerOutcome::new(text, max < self.threshold, max)
            .with_detail("topics", Value::Object(by_topic)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{DEFAULT_BANNED_SUBSTRINGS, DEFAULT_BANNED_TOPICS};

    fn substrings() -> BanSubstrings {
        let list: Vec<String> = DEFAULT_BANNED_SUBSTRINGS.iter().map(|s| s.to_string()).collect();
        BanSubstrings::new(&list).unwrap()
    }

    fn topics() -> BanTopics {
        let list: Vec<String> = DEFAULT_BANNED_TOPICS.iter().map(|s| s.to_string()).collect();
        BanTopics::new(&list, 0.5).unwrap()
    }

    #[tokio::test]
    async fn test_banned_substring_blocks() {
        let outcome = substrings()
            .scan("Here is my PASSWORD for the server", None)
            .await
            .unwrap();

        assert!(!outcome.is_valid);
        assert_eq!(outcome.risk_score, 1.0);
        assert_eq!(outcome.details["matched"], Value::from(vec!["password"]));
    }

    #[tokio::test]
    async fn test_clean_text_passes_substrings() {
        let outcome = substrings()
            .scan("Summarize this article about gardening", None)
            .await
            .unwrap();

        assert!(outcome.is_valid);
        assert_eq!(outcome.risk_score, 0.0);
    }

    #[test]
    fn test_substrings_match_inside_words() {
        assert_eq!(substrings().matches("a monkey"), vec!["key"]);
    }

    #[tokio::test]
    async fn test_banned_topic_blocks() {
        let outcome = topics()
            .scan("I want to end my life, I feel suicidal", None)
            .await
            .unwrap();

        assert!(!outcome.is_valid);
        assert_eq!(outcome.risk_score, 1.0);
        assert_eq!(outcome.details["topics"]["suicide"], Value::from(1.0));
    }

    #[tokio::test]
    async fn test_topic_words_need_boundaries() {
        let outcome = topics()
            .scan("The skill tree in this game is great", None)
            .await
            .unwrap();

        assert!(outcome.is_valid);
        assert_eq!(outcome.risk_score, 0.0);
    }

    #[test]
    fn test_unknown_topic_matches_its_name() {
        let scanner = BanTopics::new(&["gambling".to_string()], 0.5).unwrap();
        let scores = scanner.scores("Tips for gambling online");

        assert_eq!(scores, vec![("gambling", 0.5)]);
    }
}
