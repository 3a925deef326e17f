//! Input screening applied before a request reaches a provider.
//!
//! Ingredients are reduced to plain words, preferences are cleaned and then
//! screened for prompt-injection and harmful requests.

use log::warn;

use crate::error::GenerationError;
use crate::model::GenerationRequest;

pub const MAX_INGREDIENTS: usize = 20;
pub const MAX_INGREDIENT_CHARS: usize = 50;
pub const MAX_PREFERENCE_CHARS: usize = 200;
const MAX_SCREENED_CHARS: usize = 500;

/// Each entry is a sequence of term groups that must appear in order
const BLOCKED_SEQUENCES: &[&[&[&str]]] = &[
    // attempts to override the instructions
    &[&["ignore", "forget", "disregard"], &["previous", "above", "instruction", "prompt", "system"]],
    &[&["you are now", "you are a new", "you are a different"]],
    &[&["act as", "pretend you", "pretend to be", "roleplay"]],
    &[&["이전", "위", "앞"], &["지시", "명령", "프롬프트", "시스템", "내용"], &["무시", "잊", "버려", "삭제"]],
    &[&["무시", "잊어버려", "잊고"], &["이전", "위", "앞", "모든"], &["지시", "명령", "instruction"]],
    &[&["너는 이제", "너는 지금부터", "너는 앞으로"], &["새로운", "다른", "해커", "범죄자"]],
    &[&["역할극", "롤플레이", "인 척"]],
    // attempts to extract the system prompt
    &[&["show", "tell", "give"], &["system", "prompt", "instruction"]],
    &[&["what is your", "what are your"], &["instruction", "prompt", "rule"]],
    &[&["repeat"], &["above", "previous"]],
    &[&["보여줘", "알려줘", "출력", "반복"], &["시스템", "프롬프트", "지시", "명령"]],
    &[&["시스템", "프롬프트"], &["뭐야", "무엇", "어떻게"]],
    &[&["이전", "위"], &["대화", "내용", "말"], &["반복", "다시"]],
    // harmful content
    &[&["bomb", "weapon", "drug", "hack", "exploit"]],
    &[&["kill", "murder", "suicide", "harm"]],
    &[&["sexual", "porn", "nude"]],
    &[&["폭탄", "무기", "마약", "해킹", "크랙"]],
    &[&["죽이", "살인", "자살", "해치", "상해"]],
    &[&["성적", "음란", "야동", "포르노", "누드"]],
    // personal or sensitive data
    &[&["password", "credit card", "ssn", "personal"]],
    &[&["bank", "account", "private key"]],
    &[&["비밀번호", "패스워드", "주민번호", "카드번호"]],
    &[&["계좌", "은행", "개인키", "private"]],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Korean,
    English,
    /// Chinese or Japanese
    Cjk,
    Unknown,
}

fn is_hangul(c: char) -> bool {
    ('가'..='힣').contains(&c)
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3040}'..='\u{309f}' | '\u{30a0}'..='\u{30ff}')
}

/// Dominant script of the text
pub fn detect_language(text: &str) -> Language {
    let (mut korean, mut english, mut cjk) = (0usize, 0usize, 0usize);
    for c in text.chars() {
        if is_hangul(c) {
            korean += 1;
        } else if c.is_ascii_alphabetic() {
            english += 1;
        } else if is_cjk(c) {
            cjk += 1;
        }
    }

    let total = (korean + english + cjk) as f64;
    if total == 0.0 {
        return Language::Unknown;
    }

    if cjk as f64 / total > 0.3 {
        Language::Cjk
    } else if korean as f64 / total > 0.3 {
        Language::Korean
    } else if english as f64 / total > 0.5 {
        Language::English
    } else {
        Language::Unknown
    }
}

fn contains_in_order(text: &str, groups: &[&[&str]]) -> bool {
    let mut from = 0;
    for group in groups {
        let next = group
            .iter()
            .filter_map(|term| text[from..].find(term).map(|pos| from + pos + term.len()))
            .min();
        match next {
            Some(end) => from = end,
            None => return false,
        }
    }
    true
}

/// Screen free text; the error is the reason shown to the user
pub fn screen_text(text: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Ok(());
    }

    if detect_language(text) == Language::Cjk {
        return Err("Chinese and Japanese input is not supported".to_string());
    }

    let lowered = text.to_lowercase();
    if BLOCKED_SEQUENCES
        .iter()
        .any(|groups| contains_in_order(&lowered, groups))
    {
        return Err("harmful content detected".to_string());
    }

    let length = text.chars().count();
    if length > MAX_SCREENED_CHARS {
        return Err(format!(
            "input is too long (max {} characters)",
            MAX_SCREENED_CHARS
        ));
    }

    let special = text
        .chars()
        .filter(|c| {
            !(c.is_ascii_alphanumeric() || is_hangul(*c) || c.is_whitespace() || *c == ',' || *c == '.')
        })
        .count();
    if special as f64 > length as f64 * 0.3 {
        return Err("too many special characters".to_string());
    }

    Ok(())
}

/// Trim, shorten and reduce each ingredient to letters, digits and spaces
pub fn sanitize_ingredients(ingredients: &[String]) -> Vec<String> {
    ingredients
        .iter()
        .map(|ingredient| {
            ingredient
                .trim()
                .chars()
                .take(MAX_INGREDIENT_CHARS)
                .filter(|c| c.is_ascii_alphanumeric() || is_hangul(*c) || c.is_whitespace())
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|ingredient| !ingredient.is_empty())
        .collect()
}

pub fn sanitize_preferences(preferences: &str) -> String {
    preferences
        .chars()
        .take(MAX_PREFERENCE_CHARS)
        .filter(|c| !matches!(c, '<' | '>' | '{' | '}' | '[' | ']' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize a request and reject it when nothing usable or something unsafe remains
pub fn screen_request(request: &GenerationRequest) -> Result<GenerationRequest, GenerationError> {
    let ingredients = sanitize_ingredients(request.ingredients());
    if ingredients.is_empty() {
        return Err(GenerationError::invalid("No valid ingredients"));
    }
    if ingredients.len() > MAX_INGREDIENTS {
        return Err(GenerationError::invalid(format!(
            "At most {} ingredients are allowed",
            MAX_INGREDIENTS
        )));
    }

    let preferences = request
        .preferences()
        .map(sanitize_preferences)
        .filter(|p| !p.is_empty());

    if let Some(preferences) = &preferences {
        screen_text(preferences).map_err(|reason| {
            warn!("Rejected preferences: {}", reason);
            GenerationError::invalid(format!("Unsafe input: {}", reason))
        })?;
    }

    // Sanitizing can make two ingredients identical
    let mut unique: Vec<String> = Vec::with_capacity(ingredients.len());
    for ingredient in ingredients {
        if !unique.contains(&ingredient) {
            unique.push(ingredient);
        }
    }

    Ok(request.with_inputs(unique, preferences))
}
