//! Prompt validation and the printability enhancement applied before a
//! preview task is submitted.

use crate::error::CoreError;

/// Qualifiers appended to every preview prompt, in order.
pub const PRINTABILITY_QUALIFIERS: &[&str] = &[
    "solid base for stability",
    "no thin overhanging parts",
    "minimum wall thickness 2mm",
    "suitable for FDM 3D printing",
];

pub const STYLE_REALISTIC: &str = "realistic";
pub const STYLE_CARTOON: &str = "cartoon";
pub const STYLE_SCULPTURE: &str = "sculpture";

/// All styles the provider accepts.
pub const VALID_STYLES: &[&str] = &[STYLE_REALISTIC, STYLE_CARTOON, STYLE_SCULPTURE];

pub const DEFAULT_STYLE: &str = STYLE_CARTOON;

/// Prompt words that mark a figure, which prints better in an A-pose.
const FIGURE_WORDS: &[&str] = &["character", "figure", "person", "animal"];

/// Trim and reject an empty prompt.
pub fn validate_prompt(prompt: &str) -> Result<&str, CoreError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".into()));
    }
    Ok(trimmed)
}

/// Resolve the requested style, falling back to [`DEFAULT_STYLE`].
pub fn validate_style(style: Option<&str>) -> Result<&'static str, CoreError> {
    let Some(style) = style.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_STYLE);
    };
    VALID_STYLES
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(style))
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "Invalid style '{style}'. Must be one of: {}",
                VALID_STYLES.join(", ")
            ))
        })
}

/// Append the fixed printability qualifiers. Deterministic.
pub fn enhance_prompt(prompt: &str) -> String {
    format!("{prompt}, {}", PRINTABILITY_QUALIFIERS.join(", "))
}

/// Whether the prompt describes a character-like subject.
pub fn wants_a_pose(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    FIGURE_WORDS.iter().any(|w| lower.contains(w))
}
