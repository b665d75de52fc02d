//! Pure detection of interactive prompts in assistant output text.
//!
//! Pattern families are tried in fixed priority order: tool-usage
//! confirmation, permission question, multiple choice, file selection.
//! Malformed or partial matches yield `None` rather than a
//! partially-populated prompt.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::LazyLock,
};

use regex::Regex;

use crate::{Prompt, PromptContext, PromptKind, PromptOption, PromptStatus};

static NUMBERED_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:>\s*)?(\d+)[.)]\s+(.+?)\s*$").expect("valid option regex")
});

static PERMISSION_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^(?:Can|May|Should) I\b.*\?\s*$").expect("valid permission regex")
});

static TOOL_USE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*Tool use(?::\s*(?P<tool>\S[^\n]*))?\s*$").expect("valid header regex")
});

static FILE_SELECTION_LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^.*(?:select|choose|pick)\b.*\bfile\b.*[:?]\s*$").expect("valid lead regex")
});

static MULTI_CHOICE_LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^.*(?:select|choose|pick|which|option)\b.*[:?]\s*$")
        .expect("valid lead regex")
});

static PATH_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w./~-]+\.[A-Za-z0-9]{1,8}$|^[\w./~-]*/[\w./~-]+$").expect("valid path regex")
});

const PROCEED_QUESTION: &str = "Do you want to proceed?";

/// Scans assistant output text for an interactive prompt.
///
/// First matching pattern family wins; returns `None` when nothing
/// matches. Deterministic, no side effects.
pub fn detect_prompt(text: &str) -> Option<Prompt> {
    detect_tool_usage_prompt(text)
        .or_else(|| detect_permission_prompt(text))
        .or_else(|| detect_multiple_choice_prompt(text))
        .or_else(|| detect_file_selection_prompt(text))
}

fn detect_tool_usage_prompt(text: &str) -> Option<Prompt> {
    let header = TOOL_USE_HEADER.captures(text)?;
    if !text.contains(PROCEED_QUESTION) {
        return None;
    }
    let options = parse_numbered_options(text);
    // The canonical confirmation carries exactly three numbered options; a
    // partial render must not produce a prompt.
    if options.len() != 3 {
        return None;
    }

    let tool_name = header
        .name("tool")
        .map(|value| value.as_str().trim().to_string())
        .filter(|value| !value.is_empty());

    Some(build_prompt(
        PromptKind::ToolUsage,
        "Tool use",
        PROCEED_QUESTION,
        options,
        PromptContext {
            tool_name,
            ..PromptContext::default()
        },
    ))
}

fn detect_permission_prompt(text: &str) -> Option<Prompt> {
    let question = PERMISSION_QUESTION.find(text)?.as_str().trim().to_string();
    let mut yes = PromptOption::new("1", "Yes", "yes");
    yes.is_default = true;
    let no = PromptOption::new("2", "No", "no");

    Some(build_prompt(
        PromptKind::Permission,
        "Permission request",
        &question,
        vec![yes, no],
        PromptContext::default(),
    ))
}

fn detect_multiple_choice_prompt(text: &str) -> Option<Prompt> {
    let lead = MULTI_CHOICE_LEAD.find(text)?;
    let options = parse_numbered_options(&text[lead.end()..]);
    if options.len() < 2 {
        return None;
    }

    Some(build_prompt(
        PromptKind::MultipleChoice,
        "Choose an option",
        lead.as_str().trim(),
        options,
        PromptContext::default(),
    ))
}

fn detect_file_selection_prompt(text: &str) -> Option<Prompt> {
    let lead = FILE_SELECTION_LEAD.find(text)?;
    let candidates: Vec<String> = text[lead.end()..]
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches('>')
                .trim_start_matches('-')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty() && PATH_LIKE.is_match(line))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let options = candidates
        .into_iter()
        .enumerate()
        .map(|(index, path)| PromptOption::new((index + 1).to_string(), path.clone(), path))
        .collect();

    Some(build_prompt(
        PromptKind::FileSelection,
        "Select a file",
        lead.as_str().trim(),
        options,
        PromptContext::default(),
    ))
}

fn parse_numbered_options(text: &str) -> Vec<PromptOption> {
    NUMBERED_OPTION
        .captures_iter(text)
        .map(|capture| {
            let id = capture[1].to_string();
            let label = strip_option_annotations(&capture[2]);
            let value = classify_option_value(&label, &id);
            let mut option = PromptOption::new(id, label, value);
            option.is_default = option.value == "yes";
            option.is_recommended = option.value == "yes";
            option
        })
        .collect()
}

/// Strips trailing key-hint annotations such as `(esc)` from option labels.
fn strip_option_annotations(label: &str) -> String {
    let trimmed = label.trim();
    let without_hint = match trimmed.rfind('(') {
        Some(index) if trimmed.ends_with(')') => trimmed[..index].trim_end(),
        _ => trimmed,
    };
    without_hint.to_string()
}

fn classify_option_value(label: &str, fallback_id: &str) -> String {
    let lower = label.to_lowercase();
    if lower.starts_with("yes") {
        if lower.contains("don't ask") || lower.contains("dont ask") {
            return "yes_dont_ask".to_string();
        }
        return "yes".to_string();
    }
    if lower.starts_with("no") {
        if lower.contains("differently") || lower.contains("tell") {
            return "no_explain".to_string();
        }
        return "no".to_string();
    }
    format!("option_{fallback_id}")
}

fn build_prompt(
    kind: PromptKind,
    title: &str,
    message: &str,
    options: Vec<PromptOption>,
    context: PromptContext,
) -> Prompt {
    // Detection is pure: the id is derived from the prompt text so the
    // same input always yields the same prompt. The engine re-keys it
    // before persisting.
    let mut hasher = DefaultHasher::new();
    title.hash(&mut hasher);
    message.hash(&mut hasher);
    for option in &options {
        option.label.hash(&mut hasher);
    }

    Prompt {
        id: format!("prompt_{:016x}", hasher.finish()),
        conversation_id: String::new(),
        session_id: None,
        kind,
        title: title.to_string(),
        message: message.to_string(),
        options,
        context,
        status: PromptStatus::Pending,
        timeout_at_unix_ms: None,
        selected_option: None,
        request_id: None,
    }
}
