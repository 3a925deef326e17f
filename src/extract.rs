//! Turns the free-form text of a finished generation into a structured recipe.
//!
//! Every field has its own rule and its own default, so a missing or mangled
//! section only degrades that one field. Nothing here fails: the validity gate
//! lives in [`ExtractedRecipe::validate`], which callers run before saving.

use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, RequiredField};

pub const DEFAULT_TITLE: &str = "AI 추천 레시피";
pub const DEFAULT_DIFFICULTY: &str = "보통";
pub const DEFAULT_COOK_TIME_MINUTES: u32 = 30;
pub const DEFAULT_SERVINGS: u32 = 2;

const TITLE_LABELS: &[&str] = &["요리명", "레시피명"];
const INGREDIENT_LABELS: &[&str] = &["재료"];
const INSTRUCTION_LABELS: &[&str] = &["조리법", "만드는법", "조리순서"];
const COOK_TIME_LABELS: &[&str] = &["조리시간"];
const DIFFICULTY_LABELS: &[&str] = &["난이도"];
const SERVINGS_SUFFIX: &str = "인분";

/// Structured recipe produced from one completed generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecipe {
    pub title: String,
    pub description: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    /// Minutes
    pub cook_time: u32,
    pub servings: u32,
    pub difficulty: String,
}

impl ExtractedRecipe {
    /// Required fields that came out empty, in a stable order
    pub fn missing_fields(&self) -> Vec<RequiredField> {
        let mut missing = Vec::new();
        if self.ingredients.is_empty() {
            missing.push(RequiredField::Ingredients);
        }
        if self.instructions.is_empty() {
            missing.push(RequiredField::Instructions);
        }
        missing
    }

    pub fn is_valid(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Gate applied before the recipe is handed to storage
    pub fn validate(&self) -> Result<(), ExtractionError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExtractionError::MissingFields(missing))
        }
    }
}

/// How a rule captures its value once the label has been found
#[derive(Debug, Clone, Copy)]
enum Capture {
    /// Rest of the line after the label (leading blank lines skipped)
    Line,
    /// Everything up to the first of these bare labels, or end of text
    Until(&'static [&'static str]),
}

/// A label set plus the way its value is captured
#[derive(Debug, Clone, Copy)]
struct FieldRule {
    labels: &'static [&'static str],
    capture: Capture,
}

const TITLE: FieldRule = FieldRule {
    labels: TITLE_LABELS,
    capture: Capture::Line,
};

const INGREDIENTS: FieldRule = FieldRule {
    labels: INGREDIENT_LABELS,
    capture: Capture::Until(INSTRUCTION_LABELS),
};

const INSTRUCTIONS: FieldRule = FieldRule {
    labels: INSTRUCTION_LABELS,
    capture: Capture::Until(&["조리시간", "난이도"]),
};

const COOK_TIME: FieldRule = FieldRule {
    labels: COOK_TIME_LABELS,
    capture: Capture::Line,
};

const DIFFICULTY: FieldRule = FieldRule {
    labels: DIFFICULTY_LABELS,
    capture: Capture::Line,
};

impl FieldRule {
    fn apply<'a>(&self, text: &'a str) -> Option<&'a str> {
        let value_start = find_labelled(text, self.labels)?;
        let rest = &text[value_start..];

        match self.capture {
            Capture::Line => {
                let line = rest.trim_start().lines().next()?;
                let line = line.trim_matches(|c: char| c == '*' || c.is_whitespace());
                (!line.is_empty()).then_some(line)
            }
            Capture::Until(stops) => {
                let end = find_bare(rest, stops).unwrap_or(rest.len());
                Some(&rest[..end])
            }
        }
    }
}

/// Extract a recipe from generated text. Pure and total: absent fields fall
/// back to their defaults.
pub fn extract(text: &str) -> ExtractedRecipe {
    let title = TITLE
        .apply(text)
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let description = format!("{}를 만들어보세요", title);

    let ingredients = INGREDIENTS
        .apply(text)
        .map(split_ingredients)
        .unwrap_or_default();

    let instructions = INSTRUCTIONS
        .apply(text)
        .map(split_instructions)
        .unwrap_or_default();

    let cook_time = COOK_TIME
        .apply(text)
        .and_then(parse_minutes)
        .unwrap_or(DEFAULT_COOK_TIME_MINUTES);

    let difficulty = DIFFICULTY
        .apply(text)
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string());

    let servings = find_servings(text).unwrap_or(DEFAULT_SERVINGS);

    ExtractedRecipe {
        title,
        description,
        ingredients,
        instructions,
        cook_time,
        servings,
        difficulty,
    }
}

/// Byte offset just past `label:` for the leftmost label that is followed by a
/// colon. Spaces and markdown emphasis may sit between label and colon.
fn find_labelled(text: &str, labels: &[&str]) -> Option<usize> {
    labels
        .iter()
        .filter_map(|label| {
            text.match_indices(label).find_map(|(start, matched)| {
                let after_label = &text[start + matched.len()..];
                let after_colon = after_label
                    .trim_start_matches(|c: char| c == ' ' || c == '\t' || c == '*')
                    .strip_prefix(|c: char| c == ':' || c == '：')?;
                Some((start, text.len() - after_colon.len()))
            })
        })
        .min_by_key(|(start, _)| *start)
        .map(|(_, value_start)| value_start)
}

/// Offset of the earliest occurrence of any label, colon or not
fn find_bare(text: &str, labels: &[&str]) -> Option<usize> {
    labels.iter().filter_map(|label| text.find(label)).min()
}

fn split_ingredients(section: &str) -> Vec<String> {
    section
        .lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty())
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_instructions(section: &str) -> Vec<String> {
    section
        .lines()
        .map(strip_ordinal)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_bullet(c: char) -> bool {
    matches!(c, '-' | '*' | '•' | '·')
}

fn strip_bullet(line: &str) -> &str {
    line.trim_start_matches(|c: char| c.is_whitespace() || is_bullet(c))
        .trim()
}

/// Strip leading bullets and ordinals such as `1.` or `2)`. Digits that are
/// not an ordinal (`200g`, `1.5컵`) are part of the step.
///
/// A bare number followed by a space (`1 김치를 볶는다`) is kept as well: it
/// reads the same as a quantity with a spaced unit (`2 큰술`), and only the
/// `.` or `)` marks it as a step number.
fn strip_ordinal(line: &str) -> &str {
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix(is_bullet) {
            rest = after;
            continue;
        }

        let after_digits = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
        if after_digits.len() < trimmed.len() {
            if let Some(after) = after_digits.strip_prefix(|c: char| c == '.' || c == ')') {
                if !after.starts_with(|c: char| c.is_ascii_digit()) {
                    rest = after;
                    continue;
                }
            }
        }

        return trimmed.trim_end();
    }
}

/// First duration on the line in minutes; `1시간 30분` counts as 90.
fn parse_minutes(value: &str) -> Option<u32> {
    let mut total: Option<u32> = None;
    let mut rest = value;

    while let Some(start) = rest.find(|c: char| c.is_ascii_digit()) {
        let digits = &rest[start..];
        let len = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        let amount: u32 = digits[..len].parse().ok()?;
        let unit = digits[len..].trim_start();

        if unit.starts_with("시간") {
            total = Some(total.unwrap_or(0).saturating_add(amount.saturating_mul(60)));
            rest = &digits[len..];
        } else {
            return Some(total.unwrap_or(0).saturating_add(amount));
        }
    }

    total
}

/// Integer written directly before `인분` anywhere in the text
fn find_servings(text: &str) -> Option<u32> {
    text.match_indices(SERVINGS_SUFFIX).find_map(|(idx, _)| {
        let before = &text[..idx];
        let digits_start = before
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .len();
        if digits_start == idx {
            return None;
        }
        before[digits_start..].parse().ok()
    })
}
