//! Incremental learning: capture, expand, reinforce, track, plan.
//!
//! A capture is expanded at most once. A learning can be reinforced any
//! number of times; each reinforcement raises importance along a saturating
//! curve computed from the importance it had at expansion:
//!
//! ```text
//! bonus(n) = floor(4n / (n + 3))        0, 1, 1, 2, 2, 2, 2, 2, 2, 3, ...
//! new      = min(10, max(old, base + bonus(n)))
//! ```
//!
//! The bonus never reaches 4, so reinforcement alone lifts a learning by at
//! most three points.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MemoryError, Result};
use crate::store::EmbeddingKind;
use crate::time_range::{TimeRange, resolve_period, streaks};
use crate::types::{
    CaptureId, ExpandRequest, ExpandedLearning, IncrementalCapture, LearningId,
    LearningPath, Milestone, PathId, Reinforcement, SkillLevel, TopicCount, tag_set,
};
use crate::validation::{resolve_importance, validate_mastery, validate_text};

use super::conversation::rank_counts;
use super::{MemoryEngine, WithWarnings};

const STALE_SAMPLE: usize = 5;
const MAX_ACTIVE_TOPICS: usize = 10;
const PENDING_REVIEW_THRESHOLD: usize = 5;
const STREAK_PRAISE_DAYS: u32 = 7;

/// Importance bonus after `n` reinforcements.
pub fn reinforcement_bonus(n: u32) -> u8 {
    let n = u64::from(n);
    ((4 * n) / (n + 3)) as u8
}

/// Input for [`MemoryEngine::quick_capture`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureRequest {
    pub content: String,
    pub context: Option<String>,
    pub tags: Vec<String>,
    pub expand_later: bool,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            content: String::new(),
            context: None,
            tags: Vec::new(),
            expand_later: true,
        }
    }
}

impl CaptureRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn expand_later(mut self, expand_later: bool) -> Self {
        self.expand_later = expand_later;
        self
    }
}

/// Input for [`MemoryEngine::create_learning_path`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathRequest {
    pub goal: String,
    pub current_level: String,
    pub related_topics: Vec<String>,
    pub save: bool,
}

/// A learning overdue for reinforcement.
#[derive(Debug, Clone, Serialize)]
pub struct StaleLearning {
    pub id: LearningId,
    pub excerpt: String,
    pub reinforcement_count: u32,
    pub last_used: DateTime<Utc>,
    pub days_idle: i64,
}

/// Captures and learnings touched on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayActivity {
    pub captures: usize,
    pub expansions: usize,
}

/// Result of [`MemoryEngine::track_learning_progress`].
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub period: String,
    pub range: TimeRange,
    pub captures: usize,
    pub expansions: usize,
    /// Captures in the window still waiting to be expanded.
    pub pending_expansion: Vec<CaptureId>,
    /// Learnings (any age) not used within the staleness window.
    pub needs_reinforcement: usize,
    /// The stalest of those, oldest use first.
    pub stalest: Vec<StaleLearning>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub top_topics: Vec<TopicCount>,
    pub daily_activity: BTreeMap<NaiveDate, DayActivity>,
    pub recommendations: Vec<String>,
}

impl MemoryEngine {
    /// Record a quick note for later expansion.
    pub async fn quick_capture(
        &self,
        request: CaptureRequest,
    ) -> Result<WithWarnings<IncrementalCapture>> {
        validate_text("content", &request.content)?;

        let capture = IncrementalCapture {
            id: CaptureId::new(),
            content: request.content,
            context: request.context.filter(|c| !c.trim().is_empty()),
            tags: tag_set(&request.tags),
            expand_later: request.expand_later,
            expanded: false,
            expanded_to: None,
            timestamp: self.now(),
        };
        self.store().insert_capture(&capture)?;

        let warning = self
            .index_record(
                "quick_capture",
                EmbeddingKind::Capture,
                &capture.id.to_string(),
                &capture.content,
            )
            .await;

        info!(id = %capture.id, "Captured");
        Ok(WithWarnings::new(capture, warning))
    }

    /// Develop a capture into a learning. Each capture expands exactly once.
    pub async fn expand_learning(
        &self,
        capture_id: CaptureId,
        request: ExpandRequest,
    ) -> Result<WithWarnings<ExpandedLearning>> {
        validate_text("expanded_content", &request.expanded_content)?;
        let importance = resolve_importance(request.importance, self.settings().expand_importance)?;

        let capture = self
            .store()
            .get_capture(capture_id)?
            .ok_or_else(|| MemoryError::not_found("capture", capture_id))?;
        if capture.expanded {
            return Err(MemoryError::AlreadyExpanded(capture_id));
        }

        let topics = match &request.topics {
            Some(topics) => tag_set(topics),
            None => capture.tags.clone(),
        };

        let learning = ExpandedLearning {
            id: LearningId::new(),
            capture_id,
            expanded_content: request.expanded_content,
            importance,
            base_importance: importance,
            topics,
            related_to: tag_set(&request.related_to),
            key_insight: request.key_insight.filter(|k| !k.trim().is_empty()),
            reinforcement_count: 0,
            mastery_level: 1,
            created_at: self.now(),
            last_reinforced: None,
            reinforcements: Vec::new(),
        };

        // Guards against a concurrent expansion that passed the check above.
        self.store().expand_capture(&learning)?;

        let warning = self
            .index_record(
                "expand_learning",
                EmbeddingKind::Learning,
                &learning.id.to_string(),
                &learning.expanded_content,
            )
            .await;

        info!(capture = %capture_id, learning = %learning.id, "Capture expanded");
        Ok(WithWarnings::new(learning, warning))
    }

    /// Record a use of a learning and raise its importance.
    pub fn reinforce_learning(
        &self,
        id: LearningId,
        usage_context: Option<&str>,
        mastery_level: Option<i64>,
    ) -> Result<ExpandedLearning> {
        let mastery = mastery_level.map(validate_mastery).transpose()?;
        let at = self.now();
        let usage_context = usage_context
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let learning = self.store().reinforce(id, |learning| {
            learning.reinforcement_count += 1;
            learning.last_reinforced = Some(at);
            if let Some(level) = mastery {
                learning.mastery_level = level;
            }

            let bonus = reinforcement_bonus(learning.reinforcement_count);
            let target = learning.base_importance.saturating_add(bonus);
            learning.importance = learning.importance.max(target);

            Ok(Reinforcement {
                usage_context,
                reinforced_at: at,
            })
        })?;

        info!(
            %id,
            count = learning.reinforcement_count,
            importance = %learning.importance,
            "Learning reinforced"
        );
        Ok(learning)
    }

    /// Summarize capture and expansion activity in `period`.
    pub fn track_learning_progress(&self, period: &str) -> Result<ProgressReport> {
        let now = self.now();
        let range = resolve_period(period, now)?;

        let captures = self.store().list_captures(Some(range))?;
        let expansions = self.store().list_learnings(Some(range))?;

        let pending_expansion: Vec<CaptureId> = captures
            .iter()
            .filter(|c| c.expand_later && !c.expanded)
            .map(|c| c.id)
            .collect();

        let staleness = self.settings().staleness;
        let mut stale: Vec<ExpandedLearning> = self
            .store()
            .list_learnings(None)?
            .into_iter()
            .filter(|l| now - l.last_used() > staleness)
            .collect();
        stale.sort_by_key(|l| l.last_used());
        let needs_reinforcement = stale.len();
        let stalest = stale
            .iter()
            .take(STALE_SAMPLE)
            .map(|l| StaleLearning {
                id: l.id,
                excerpt: l.expanded_content.chars().take(100).collect(),
                reinforcement_count: l.reinforcement_count,
                last_used: l.last_used(),
                days_idle: (now - l.last_used()).num_days(),
            })
            .collect();

        let capture_days: BTreeSet<NaiveDate> = self
            .store()
            .list_captures(None)?
            .iter()
            .map(|c| c.timestamp.date_naive())
            .collect();
        let streak = streaks(&capture_days, now.date_naive());

        let mut topic_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut daily_activity: BTreeMap<NaiveDate, DayActivity> = BTreeMap::new();
        for capture in &captures {
            for tag in &capture.tags {
                *topic_counts.entry(tag.clone()).or_default() += 1;
            }
            daily_activity
                .entry(capture.timestamp.date_naive())
                .or_default()
                .captures += 1;
        }
        for learning in &expansions {
            for topic in &learning.topics {
                *topic_counts.entry(topic.clone()).or_default() += 1;
            }
            daily_activity
                .entry(learning.created_at.date_naive())
                .or_default()
                .expansions += 1;
        }
        let top_topics = rank_counts(topic_counts, MAX_ACTIVE_TOPICS);

        let mut report = ProgressReport {
            period: period.trim().to_string(),
            range,
            captures: captures.len(),
            expansions: expansions.len(),
            pending_expansion,
            needs_reinforcement,
            stalest,
            current_streak: streak.current,
            longest_streak: streak.longest,
            top_topics,
            daily_activity,
            recommendations: Vec::new(),
        };
        report.recommendations = progress_recommendations(&report);

        Ok(report)
    }

    /// Generate a templated learning path for `goal` at the given level.
    pub fn create_learning_path(&self, request: PathRequest) -> Result<LearningPath> {
        validate_text("goal", &request.goal)?;
        let level = if request.current_level.trim().is_empty() {
            SkillLevel::Beginner
        } else {
            SkillLevel::parse(&request.current_level)?
        };
        let goal = request.goal.trim().to_string();

        let path = LearningPath {
            id: PathId::new(),
            milestones: milestones(level, &goal),
            goal,
            level,
            known_topics: tag_set(&request.related_topics),
            created_at: self.now(),
            saved: request.save,
        };

        if request.save {
            self.store().insert_path(&path)?;
            info!(id = %path.id, "Learning path saved");
        }

        Ok(path)
    }
}

fn progress_recommendations(report: &ProgressReport) -> Vec<String> {
    let mut out = Vec::new();

    let pending = report.pending_expansion.len();
    if pending > PENDING_REVIEW_THRESHOLD {
        out.push(format!(
            "You have {} quick captures waiting to be expanded. Consider a review session!",
            pending
        ));
    }
    if report.needs_reinforcement > 0 {
        out.push(format!(
            "{} learnings need reinforcement for better retention.",
            report.needs_reinforcement
        ));
    }
    if report.current_streak >= STREAK_PRAISE_DAYS {
        out.push(format!(
            "Excellent! You're on a {}-day learning streak!",
            report.current_streak
        ));
    } else if report.current_streak == 0 {
        out.push("Start a new learning streak today!".to_string());
    }
    if let Some(top) = report.top_topics.first() {
        out.push(format!(
            "Your focus area is '{}' - consider consolidating this knowledge.",
            top.topic
        ));
    }

    out
}

fn milestone(phase: &str, description: String, tasks: [&str; 3]) -> Milestone {
    Milestone {
        phase: phase.to_string(),
        description,
        tasks: tasks.iter().map(|t| t.to_string()).collect(),
    }
}

fn milestones(level: SkillLevel, goal: &str) -> Vec<Milestone> {
    match level {
        SkillLevel::Beginner => vec![
            milestone(
                "Foundation",
                format!("Build foundational understanding of {}", goal),
                [
                    "Quick capture key concepts as you encounter them",
                    "Expand captures into detailed learnings",
                    "Reinforce basics through practice",
                ],
            ),
            milestone(
                "Practice",
                "Apply knowledge in real scenarios".to_string(),
                [
                    "Use knowledge in projects",
                    "Track reinforcement as you apply concepts",
                    "Identify gaps through practical experience",
                ],
            ),
            milestone(
                "Mastery",
                "Achieve deep understanding".to_string(),
                [
                    "Connect learnings with related concepts",
                    "Teach or explain to others",
                    "Regular reinforcement to maintain mastery",
                ],
            ),
        ],
        SkillLevel::Intermediate => vec![
            milestone(
                "Consolidation",
                format!("Close the gaps in your working knowledge of {}", goal),
                [
                    "Review existing learnings and reinforce the weakest",
                    "Capture the questions you cannot yet answer",
                    "Expand those captures once resolved",
                ],
            ),
            milestone(
                "Application",
                "Use the knowledge on harder, less familiar problems".to_string(),
                [
                    "Take on a project slightly beyond your comfort zone",
                    "Record each use as a reinforcement",
                    "Consolidate overlapping learnings",
                ],
            ),
            milestone(
                "Mastery",
                "Achieve deep understanding".to_string(),
                [
                    "Connect learnings with related concepts",
                    "Teach or explain to others",
                    "Regular reinforcement to maintain mastery",
                ],
            ),
        ],
        SkillLevel::Advanced => vec![
            milestone(
                "Advanced Topics",
                format!("Explore advanced aspects of {}", goal),
                [
                    "Quick capture advanced patterns and techniques",
                    "Connect with existing knowledge",
                    "Reinforce through real-world application",
                ],
            ),
            milestone(
                "Expert",
                "Achieve expertise".to_string(),
                [
                    "Contribute to knowledge base",
                    "Mentor others",
                    "Stay updated with latest developments",
                ],
            ),
        ],
    }
}
