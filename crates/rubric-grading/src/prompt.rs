//! Rubric prompt construction.

use std::fmt::Write;

use crate::markup::ALLOWED_TAGS;
use crate::schema::SchemaVariant;
use crate::types::{Dimension, ExerciseBrief};

/// System instruction sent with every grading request.
pub const SYSTEM_PROMPT: &str = "You are an experienced copywriting coach. \
You grade a student's copy against the brief they were given and answer only \
with JSON matching the provided schema.";

/// Builds the user prompt for grading `response` against `brief`.
///
/// The submission text is embedded verbatim between fixed delimiters. Empty
/// brief fields are left out.
#[must_use]
pub fn build_prompt(brief: &ExerciseBrief, response: &str, variant: SchemaVariant) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "# Exercise brief");
    let _ = writeln!(prompt, "Task: {}", brief.task);
    let _ = writeln!(prompt, "Niche: {}", brief.niche);
    for (label, value) in [
        ("Title", &brief.title),
        ("Description", &brief.description),
        ("Client needs", &brief.needs),
        ("Details", &brief.details),
        ("Notes", &brief.notes),
    ] {
        if !value.trim().is_empty() {
            let _ = writeln!(prompt, "{label}: {}", value.trim());
        }
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "# Student submission");
    let _ = writeln!(prompt, "<<<SUBMISSION");
    let _ = writeln!(prompt, "{response}");
    let _ = writeln!(prompt, "SUBMISSION>>>");

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "# Rubric");
    let _ = writeln!(
        prompt,
        "Score each dimension from 0 to 10 (decimals allowed) under `scores`, using these keys:"
    );
    for dimension in Dimension::ALL {
        let _ = writeln!(prompt, "- `{}`: {}", dimension.key(), dimension.label());
    }
    if variant == SchemaVariant::Supplied {
        let _ = writeln!(
            prompt,
            "Also give `overallScore`, your overall judgement from 0 to 10."
        );
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "# Improvement");
    let _ = writeln!(
        prompt,
        "Under `improvement.tips`, list concrete tips as objects with `title` and `advice`, most important first."
    );
    let _ = writeln!(
        prompt,
        "Under `improvement.rewrittenVersion`, rewrite the submission applying your tips. \
         Use only these HTML tags: {}.",
        ALLOWED_TAGS.join(", ")
    );

    prompt
}
