//! Deterministic prompt construction for summary requests.
//!
//! Language, length and style each pick one phrase from a fixed table. An
//! unknown option selects that table's default phrase.

use crate::models::internal::{Message, SummaryOptions, TIME_FORMAT};

pub const DEFAULT_LANGUAGE: &str = "zh";
pub const DEFAULT_LENGTH: &str = "medium";
pub const DEFAULT_STYLE: &str = "bullet";

const LANGUAGE_PHRASES: &[(&str, &str)] = &[
    ("zh", "Write the summary in Simplified Chinese (请用中文总结)"),
    ("en", "Write the summary in English"),
    ("ja", "Write the summary in Japanese (日本語で要約してください)"),
];

const LENGTH_PHRASES: &[(&str, &str)] = &[
    ("short", "Keep it short (100-200 words)"),
    ("medium", "Use a medium length (200-500 words)"),
    ("long", "Write a detailed summary (500-1000 words)"),
];

const STYLE_PHRASES: &[(&str, &str)] = &[
    ("bullet", "Use a bullet-point list"),
    ("paragraph", "Use prose paragraphs"),
    (
        "structured",
        "Use a structured layout with sections for main topics, key decisions and action items",
    ),
];

fn lookup(table: &[(&str, &'static str)], option: &str, default: &str) -> &'static str {
    let find = |key: &str| table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
    find(option.trim())
        .or_else(|| find(default))
        .unwrap_or_default()
}

pub fn language_phrase(option: &str) -> &'static str {
    lookup(LANGUAGE_PHRASES, option, DEFAULT_LANGUAGE)
}

pub fn length_phrase(option: &str) -> &'static str {
    lookup(LENGTH_PHRASES, option, DEFAULT_LENGTH)
}

pub fn style_phrase(option: &str) -> &'static str {
    lookup(STYLE_PHRASES, option, DEFAULT_STYLE)
}

/// `[2024-01-01 10:00:00] Ann (@ann): hello`
pub fn format_message_line(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.format(TIME_FORMAT),
        message.author_label(),
        message.text
    )
}

pub fn build_prompt(messages: &[Message], conversation_title: &str, options: &SummaryOptions) -> String {
    let transcript = messages
        .iter()
        .map(format_message_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an assistant that summarizes meetings and chat logs. \
         Analyze the following messages from the group chat \"{title}\" and write a summary.\n\
         \n\
         Requirements:\n\
         - {language}\n\
         - {length}\n\
         - {style}\n\
         - Stay objective and accurate\n\
         - Highlight important information and key decisions\n\
         - List any action items or to-dos separately\n\
         \n\
         Chat log:\n\
         {transcript}\n\
         \n\
         Summary:",
        title = conversation_title,
        language = language_phrase(&options.language),
        length = length_phrase(&options.length),
        style = style_phrase(&options.style),
        transcript = transcript,
    )
}
