//! Analytic reflection over stored memories.
//!
//! Every report is recomputed from the store on each call and never mutates
//! anything (reflection does not count as an access).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::store::MemoryFilter;
use crate::time_range::{TimeRange, resolve_period, streaks};
use crate::types::{Importance, Memory, Sentiment, TopicCount};

use super::MemoryEngine;
use super::conversation::rank_counts;

const MAX_TOPICS: usize = 10;
const RARELY_ACCESSED: u32 = 1;

/// Which analysis to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    Topics,
    Importance,
    Sentiment,
    Frequency,
    Timeline,
    All,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topics => "topics",
            Self::Importance => "importance",
            Self::Sentiment => "sentiment",
            Self::Frequency => "frequency",
            Self::Timeline => "timeline",
            Self::All => "all",
        }
    }

    fn includes(self, other: Aspect) -> bool {
        self == Aspect::All || self == other
    }
}

impl FromStr for Aspect {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "topics" => Ok(Self::Topics),
            "importance" => Ok(Self::Importance),
            "sentiment" => Ok(Self::Sentiment),
            "frequency" => Ok(Self::Frequency),
            "timeline" => Ok(Self::Timeline),
            "all" => Ok(Self::All),
            other => Err(MemoryError::validation(
                "aspect",
                format!(
                    "unknown aspect '{}' (expected topics, importance, sentiment, frequency, timeline, all)",
                    other
                ),
            )),
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceStats {
    pub mean: f64,
    pub min: Importance,
    pub max: Importance,
    /// Memories at or above [`Importance::HIGH`].
    pub high_importance_count: usize,
    /// Count per importance value, every value 1..=10 present.
    pub histogram: BTreeMap<u8, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SentimentStats {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    pub other: usize,
    pub unspecified: usize,
}

impl SentimentStats {
    /// Share of negative memories among those carrying a sentiment.
    pub fn negative_share(&self) -> f64 {
        let labelled = self.positive + self.neutral + self.negative + self.other;
        if labelled == 0 {
            0.0
        } else {
            self.negative as f64 / labelled as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessStats {
    pub mean_access_count: f64,
    pub max_access_count: u32,
    /// Memories accessed at most once.
    pub rarely_accessed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyStats {
    pub per_day: BTreeMap<NaiveDate, usize>,
    pub active_days: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub access: AccessStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineStats {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub span_days: i64,
}

/// Result of [`MemoryEngine::reflect`]. Sections not requested, or with no
/// data to summarize, are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionReport {
    pub aspect: Aspect,
    /// Period token, or `None` for all time.
    pub period: Option<String>,
    pub range: Option<TimeRange>,
    pub total_memories: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_topics: Option<Vec<TopicCount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<ImportanceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<FrequencyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<TimelineStats>,
    pub recommendations: Vec<String>,
}

impl MemoryEngine {
    /// Analyse live memories in `period` (all time when `None`).
    pub fn reflect_on_memories(
        &self,
        aspect: &str,
        period: Option<&str>,
    ) -> Result<ReflectionReport> {
        let aspect: Aspect = aspect.parse()?;
        let now = self.now();
        let period = period.map(str::trim).filter(|p| !p.is_empty());
        let range = period.map(|p| resolve_period(p, now)).transpose()?;

        let memories = self.store().query_memories(&MemoryFilter::in_range(range))?;
        let report = build_report(aspect, period, range, &memories, now.date_naive());

        debug!(
            aspect = %aspect,
            total = report.total_memories,
            "Reflection computed"
        );
        Ok(report)
    }
}

fn build_report(
    aspect: Aspect,
    period: Option<&str>,
    range: Option<TimeRange>,
    memories: &[Memory],
    today: NaiveDate,
) -> ReflectionReport {
    let mut report = ReflectionReport {
        aspect,
        period: period.map(str::to_string),
        range,
        total_memories: memories.len(),
        top_topics: None,
        importance: None,
        sentiment: None,
        frequency: None,
        timeline: None,
        recommendations: Vec::new(),
    };

    if aspect.includes(Aspect::Topics) {
        report.top_topics = Some(topic_counts(memories));
    }
    if aspect.includes(Aspect::Importance) {
        report.importance = importance_stats(memories);
    }
    if aspect.includes(Aspect::Sentiment) {
        report.sentiment = Some(sentiment_stats(memories));
    }
    if aspect.includes(Aspect::Frequency) {
        report.frequency = frequency_stats(memories, today);
    }
    if aspect.includes(Aspect::Timeline) {
        report.timeline = timeline_stats(memories);
    }

    report.recommendations = recommendations(&report);
    report
}

fn topic_counts(memories: &[Memory]) -> Vec<TopicCount> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for memory in memories {
        for topic in &memory.topics {
            *counts.entry(topic.clone()).or_default() += 1;
        }
    }
    rank_counts(counts, MAX_TOPICS)
}

fn importance_stats(memories: &[Memory]) -> Option<ImportanceStats> {
    let min = memories.iter().map(|m| m.importance).min()?;
    let max = memories.iter().map(|m| m.importance).max()?;

    let mut histogram: BTreeMap<u8, usize> =
        (Importance::MIN..=Importance::MAX).map(|v| (v, 0)).collect();
    let mut sum = 0u64;
    for memory in memories {
        *histogram.entry(memory.importance.get()).or_default() += 1;
        sum += u64::from(memory.importance.get());
    }

    Some(ImportanceStats {
        mean: sum as f64 / memories.len() as f64,
        min,
        max,
        high_importance_count: memories
            .iter()
            .filter(|m| m.importance.get() >= Importance::HIGH)
            .count(),
        histogram,
    })
}

fn sentiment_stats(memories: &[Memory]) -> SentimentStats {
    let mut stats = SentimentStats::default();
    for memory in memories {
        match &memory.sentiment {
            Some(Sentiment::Positive) => stats.positive += 1,
            Some(Sentiment::Neutral) => stats.neutral += 1,
            Some(Sentiment::Negative) => stats.negative += 1,
            Some(Sentiment::Other(_)) => stats.other += 1,
            None => stats.unspecified += 1,
        }
    }
    stats
}

fn frequency_stats(memories: &[Memory], today: NaiveDate) -> Option<FrequencyStats> {
    if memories.is_empty() {
        return None;
    }

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for memory in memories {
        *per_day.entry(memory.timestamp.date_naive()).or_default() += 1;
    }
    let days: BTreeSet<NaiveDate> = per_day.keys().copied().collect();
    let streak = streaks(&days, today);

    let total_access: u64 = memories.iter().map(|m| u64::from(m.access_count)).sum();
    let access = AccessStats {
        mean_access_count: total_access as f64 / memories.len() as f64,
        max_access_count: memories.iter().map(|m| m.access_count).max().unwrap_or(0),
        rarely_accessed: memories
            .iter()
            .filter(|m| m.access_count <= RARELY_ACCESSED)
            .count(),
    };

    Some(FrequencyStats {
        active_days: per_day.len(),
        per_day,
        current_streak: streak.current,
        longest_streak: streak.longest,
        access,
    })
}

fn timeline_stats(memories: &[Memory]) -> Option<TimelineStats> {
    let earliest = memories.iter().map(|m| m.timestamp).min()?;
    let latest = memories.iter().map(|m| m.timestamp).max()?;
    Some(TimelineStats {
        earliest,
        latest,
        span_days: (latest - earliest).num_days(),
    })
}

fn recommendations(report: &ReflectionReport) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(top) = report.top_topics.as_ref().and_then(|t| t.first()) {
        out.push(format!(
            "Your most frequent topic is '{}' - consider consolidating related memories",
            top.topic
        ));
    }
    if report
        .importance
        .as_ref()
        .is_some_and(|s| s.high_importance_count > 5)
    {
        out.push(
            "You have many high-importance memories - consider reviewing and organizing them"
                .to_string(),
        );
    }
    if let Some(freq) = &report.frequency {
        if freq.access.rarely_accessed > 10 {
            out.push(
                "Many memories are rarely accessed - consider reviewing their relevance"
                    .to_string(),
            );
        }
        if freq.current_streak >= 7 {
            out.push(format!(
                "You've recorded memories {} days in a row - keep the streak going",
                freq.current_streak
            ));
        }
    }
    if report
        .sentiment
        .as_ref()
        .is_some_and(|s| s.negative_share() > 0.5)
    {
        out.push(
            "Most memories in this period are negative - it may help to note what is driving that"
                .to_string(),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::super::test_support::engine;
    use super::*;
    use crate::types::NewMemory;

    #[test]
    fn test_aspect_parse() {
        assert_eq!("Topics".parse::<Aspect>().unwrap(), Aspect::Topics);
        assert_eq!(" all ".parse::<Aspect>().unwrap(), Aspect::All);
        assert!("mood".parse::<Aspect>().unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_reflect_all_sections() {
        let engine = engine();
        let now = Utc::now();
        for (i, (topic, importance, sentiment)) in [
            ("python", 9, "positive"),
            ("python", 8, "negative"),
            ("rust", 3, "neutral"),
        ]
        .into_iter()
        .enumerate()
        {
            engine
                .store_memory(
                    NewMemory::new(format!("memory {}", i))
                        .with_topics([topic])
                        .with_importance(importance)
                        .with_sentiment(sentiment)
                        .with_timestamp(now - Duration::days(i as i64)),
                )
                .await
                .unwrap();
        }
        engine.store_memory(NewMemory::new("no labels")).await.unwrap();

        let report = engine.reflect_on_memories("all", None).unwrap();
        assert_eq!(report.total_memories, 4);

        let topics = report.top_topics.unwrap();
        assert_eq!(topics[0], TopicCount { topic: "python".into(), count: 2 });

        let importance = report.importance.unwrap();
        assert_eq!(importance.high_importance_count, 2);
        assert_eq!(importance.min.get(), 3);
        assert_eq!(importance.max.get(), 9);
        assert_eq!(importance.histogram.len(), 10);
        assert!((importance.mean - 6.25).abs() < 1e-9);

        let sentiment = report.sentiment.unwrap();
        assert_eq!(sentiment.unspecified, 1);
        assert_eq!(sentiment.negative, 1);

        let frequency = report.frequency.unwrap();
        assert_eq!(frequency.active_days, 3);
        assert_eq!(frequency.current_streak, 3);
        assert_eq!(frequency.access.rarely_accessed, 4);

        assert!(report.timeline.unwrap().span_days >= 2);
        assert!(report.recommendations[0].contains("'python'"));
    }

    #[tokio::test]
    async fn test_reflect_is_read_only_and_windowed() {
        let engine = engine();
        let now = Utc::now();
        let old = engine
            .store_memory(NewMemory::new("old").with_timestamp(now - Duration::days(20)))
            .await
            .unwrap()
            .value;
        engine.store_memory(NewMemory::new("new")).await.unwrap();

        let report = engine.reflect_on_memories("frequency", Some("today")).unwrap();
        assert_eq!(report.total_memories, 1);
        assert!(report.top_topics.is_none());
        assert_eq!(engine.get_memory(old.id).unwrap().access_count, 0);

        assert!(matches!(
            engine.reflect_on_memories("topics", Some("someday")),
            Err(MemoryError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_empty_store_report() {
        let report = build_report(Aspect::All, None, None, &[], Utc::now().date_naive());
        assert_eq!(report.total_memories, 0);
        assert!(report.importance.is_none());
        assert!(report.frequency.is_none());
        assert!(report.recommendations.is_empty());
    }
}
