//! Domain types shared between the grading invoker and the pipeline.
//!
//! [`AnalysisResult`] is the canonical, already-validated shape of a graded
//! submission. Whatever schema variant the completion service answered with,
//! callers only ever see this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ExerciseBrief
// ============================================================================

/// The exercise a submission responds to.
///
/// Briefs are produced by a separate content pipeline and are read-only here.
/// The free-text fields form the grading context embedded in the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseBrief {
    /// Unique identifier of the brief.
    pub id: String,
    /// Category tag of the writing task (e.g. "sales email").
    pub task: String,
    /// Market niche the task is set in.
    pub niche: String,
    /// Short title of the exercise.
    #[serde(default)]
    pub title: String,
    /// Description of the scenario.
    #[serde(default)]
    pub description: String,
    /// What the client in the scenario needs.
    #[serde(default)]
    pub needs: String,
    /// Additional details about the product or audience.
    #[serde(default)]
    pub details: String,
    /// Extra notes for the writer.
    #[serde(default)]
    pub notes: String,
}

// ============================================================================
// Dimension
// ============================================================================

/// One of the ten fixed rubric dimensions, each scored from 0 to 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// How easy the copy is to understand.
    Clarity,
    /// How well the copy speaks to the intended audience.
    AudienceRelevance,
    /// How convincing the argument is.
    Persuasiveness,
    /// Logical flow and organisation.
    Structure,
    /// Spelling, grammar and punctuation.
    Grammar,
    /// Fit of the voice to brand and audience.
    Tone,
    /// Strength of the opening hook.
    AttentionGrabbing,
    /// Consistency of message and style.
    Consistency,
    /// Emotional resonance.
    EmotionalAppeal,
    /// Effectiveness of the call to action.
    CallToAction,
}

impl Dimension {
    /// All dimensions in their canonical order.
    pub const ALL: [Self; 10] = [
        Self::Clarity,
        Self::AudienceRelevance,
        Self::Persuasiveness,
        Self::Structure,
        Self::Grammar,
        Self::Tone,
        Self::AttentionGrabbing,
        Self::Consistency,
        Self::EmotionalAppeal,
        Self::CallToAction,
    ];

    /// The JSON key used for this dimension in the result schema.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Clarity => "clarity",
            Self::AudienceRelevance => "audienceRelevance",
            Self::Persuasiveness => "persuasiveness",
            Self::Structure => "structure",
            Self::Grammar => "grammar",
            Self::Tone => "tone",
            Self::AttentionGrabbing => "attentionGrabbing",
            Self::Consistency => "consistency",
            Self::EmotionalAppeal => "emotionalAppeal",
            Self::CallToAction => "callToAction",
        }
    }

    /// Human-readable label used in the grading prompt.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Clarity => "Clarity",
            Self::AudienceRelevance => "Audience relevance",
            Self::Persuasiveness => "Persuasiveness",
            Self::Structure => "Structure",
            Self::Grammar => "Grammar",
            Self::Tone => "Tone",
            Self::AttentionGrabbing => "Attention-grabbing",
            Self::Consistency => "Consistency",
            Self::EmotionalAppeal => "Emotional appeal",
            Self::CallToAction => "Call-to-action effectiveness",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ============================================================================
// Scores
// ============================================================================

/// Validated scores: ten dimensions in `[0, 10]` plus the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    /// Clarity score.
    pub clarity: f64,
    /// Audience relevance score.
    pub audience_relevance: f64,
    /// Persuasiveness score.
    pub persuasiveness: f64,
    /// Structure score.
    pub structure: f64,
    /// Grammar score.
    pub grammar: f64,
    /// Tone score.
    pub tone: f64,
    /// Attention-grabbing score.
    pub attention_grabbing: f64,
    /// Consistency score.
    pub consistency: f64,
    /// Emotional appeal score.
    pub emotional_appeal: f64,
    /// Call-to-action effectiveness score.
    pub call_to_action: f64,
    /// Aggregate score, supplied by the service or derived as the mean.
    pub overall_score: f64,
}

impl Scores {
    /// Builds scores from dimension values in [`Dimension::ALL`] order.
    #[must_use]
    pub const fn from_dimensions(values: [f64; 10], overall_score: f64) -> Self {
        Self {
            clarity: values[0],
            audience_relevance: values[1],
            persuasiveness: values[2],
            structure: values[3],
            grammar: values[4],
            tone: values[5],
            attention_grabbing: values[6],
            consistency: values[7],
            emotional_appeal: values[8],
            call_to_action: values[9],
            overall_score,
        }
    }

    /// Returns the score for a single dimension.
    #[must_use]
    pub const fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Clarity => self.clarity,
            Dimension::AudienceRelevance => self.audience_relevance,
            Dimension::Persuasiveness => self.persuasiveness,
            Dimension::Structure => self.structure,
            Dimension::Grammar => self.grammar,
            Dimension::Tone => self.tone,
            Dimension::AttentionGrabbing => self.attention_grabbing,
            Dimension::Consistency => self.consistency,
            Dimension::EmotionalAppeal => self.emotional_appeal,
            Dimension::CallToAction => self.call_to_action,
        }
    }
}

/// Arithmetic mean of the ten dimension scores.
#[must_use]
pub fn mean_score(values: &[f64; 10]) -> f64 {
    values.iter().sum::<f64>() / 10.0
}

// ============================================================================
// Improvement
// ============================================================================

/// A single improvement tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    /// Short headline of the tip.
    pub title: String,
    /// The advice itself.
    pub advice: String,
}

/// Ordered tips plus a rewritten version of the submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    /// Tips in the order the service produced them.
    pub tips: Vec<Tip>,
    /// Rewritten submission, restricted to the allowed markup subset.
    pub rewritten_version: String,
}

// ============================================================================
// AnalysisResult
// ============================================================================

/// The graded outcome of one submission.
///
/// Created once per grading call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Unique identifier of this analysis record.
    pub id: String,
    /// The submission this analysis grades.
    pub submission_id: String,
    /// Validated scores.
    pub scores: Scores,
    /// Tips and rewritten version.
    pub improvement: Improvement,
    /// When the analysis was produced.
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Creates a new result with a fresh identifier and the current timestamp.
    #[must_use]
    pub fn new(submission_id: impl Into<String>, scores: Scores, improvement: Improvement) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission_id.into(),
            scores,
            improvement,
            created_at: Utc::now(),
        }
    }

    /// The aggregate score of this analysis.
    #[must_use]
    pub const fn overall_score(&self) -> f64 {
        self.scores.overall_score
    }
}
