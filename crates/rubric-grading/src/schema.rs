//! Result schema: what we ask the completion service for, and how its answer
//! is validated and normalised.
//!
//! Two schema shapes exist. The `supplied` shape carries an `overallScore`
//! next to the ten dimensions; the `derived` shape omits it and the aggregate
//! is computed as the arithmetic mean. Both are folded into a single
//! [`ScoreSheet`] and normalised into [`Scores`] straight after parsing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{GradingError, Result};
use crate::markup::sanitize_markup;
use crate::types::{mean_score, Dimension, Improvement, Scores, Tip};

/// Lowest valid score.
pub const MIN_SCORE: f64 = 0.0;

/// Highest valid score.
pub const MAX_SCORE: f64 = 10.0;

/// Which result schema to request from the completion service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    /// The service supplies `overallScore` itself.
    #[default]
    Supplied,
    /// The service omits `overallScore`; it is derived as the mean.
    Derived,
}

impl SchemaVariant {
    /// Name sent with the JSON schema in the completion request.
    #[must_use]
    pub const fn schema_name(self) -> &'static str {
        match self {
            Self::Supplied => "analysis_result",
            Self::Derived => "analysis_result_derived",
        }
    }
}

/// Builds the JSON schema sent to the completion service.
#[must_use]
pub fn response_schema(variant: SchemaVariant) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();
    for dimension in Dimension::ALL {
        properties.insert(
            dimension.key().to_string(),
            json!({ "type": "number", "minimum": MIN_SCORE, "maximum": MAX_SCORE }),
        );
        required.push(Value::String(dimension.key().to_string()));
    }
    if variant == SchemaVariant::Supplied {
        properties.insert(
            "overallScore".to_string(),
            json!({ "type": "number", "minimum": MIN_SCORE, "maximum": MAX_SCORE }),
        );
        required.push(Value::String("overallScore".to_string()));
    }

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["scores", "improvement"],
        "properties": {
            "scores": {
                "type": "object",
                "additionalProperties": false,
                "required": required,
                "properties": properties,
            },
            "improvement": {
                "type": "object",
                "additionalProperties": false,
                "required": ["tips", "rewrittenVersion"],
                "properties": {
                    "tips": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["title", "advice"],
                            "properties": {
                                "title": { "type": "string" },
                                "advice": { "type": "string" },
                            },
                        },
                    },
                    "rewrittenVersion": { "type": "string" },
                },
            },
        },
    })
}

/// Dimension scores as returned by the service, tagged by schema shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreSheet {
    /// Aggregate supplied by the service.
    Supplied {
        /// Dimension scores in [`Dimension::ALL`] order.
        dimensions: [f64; 10],
        /// The supplied aggregate.
        overall: f64,
    },
    /// Aggregate left to us.
    Derived {
        /// Dimension scores in [`Dimension::ALL`] order.
        dimensions: [f64; 10],
    },
}

impl ScoreSheet {
    /// Normalises into canonical [`Scores`], deriving the mean when needed.
    #[must_use]
    pub fn normalize(self) -> Scores {
        match self {
            Self::Supplied {
                dimensions,
                overall,
            } => Scores::from_dimensions(dimensions, overall),
            Self::Derived { dimensions } => {
                Scores::from_dimensions(dimensions, mean_score(&dimensions))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawImprovement {
    tips: Vec<Tip>,
    rewritten_version: String,
}

/// Parses and validates raw completion output.
///
/// The output may be wrapped in a fenced code block. Every one of the ten
/// dimensions must be present, numeric and within `[0, 10]`; a partial result
/// is never returned.
pub fn parse_output(output: &str) -> Result<(Scores, Improvement)> {
    let body = strip_code_fence(output);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GradingError::schema(format!("output is not valid JSON: {e}")))?;

    let Value::Object(root) = value else {
        return Err(GradingError::schema("output is not a JSON object"));
    };

    let scores = root
        .get("scores")
        .and_then(Value::as_object)
        .ok_or_else(|| GradingError::schema("missing 'scores' object"))?;
    let sheet = read_score_sheet(scores)?;

    let improvement = root
        .get("improvement")
        .cloned()
        .ok_or_else(|| GradingError::schema("missing 'improvement' object"))?;
    let improvement: RawImprovement = serde_json::from_value(improvement)
        .map_err(|e| GradingError::schema(format!("invalid 'improvement': {e}")))?;

    Ok((
        sheet.normalize(),
        Improvement {
            tips: improvement.tips,
            rewritten_version: sanitize_markup(&improvement.rewritten_version),
        },
    ))
}

fn read_score_sheet(scores: &Map<String, Value>) -> Result<ScoreSheet> {
    let mut dimensions = [0.0; 10];
    for (slot, dimension) in dimensions.iter_mut().zip(Dimension::ALL) {
        let value = scores
            .get(dimension.key())
            .ok_or_else(|| GradingError::schema(format!("missing score '{dimension}'")))?;
        *slot = read_score(dimension.key(), value)?;
    }

    match scores.get("overallScore") {
        None | Some(Value::Null) => Ok(ScoreSheet::Derived { dimensions }),
        Some(value) => Ok(ScoreSheet::Supplied {
            dimensions,
            overall: read_score("overallScore", value)?,
        }),
    }
}

fn read_score(key: &str, value: &Value) -> Result<f64> {
    let score = value
        .as_f64()
        .ok_or_else(|| GradingError::schema(format!("score '{key}' is not a number")))?;
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(GradingError::schema(format!(
            "score '{key}' is out of range: {score}"
        )));
    }
    Ok(score)
}

fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
