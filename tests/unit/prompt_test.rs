use super::message;
use chat_digest::models::internal::SummaryOptions;
use chat_digest::services::prompt::{
    build_prompt, format_message_line, language_phrase, length_phrase, style_phrase,
};

fn options(language: &str, length: &str, style: &str) -> SummaryOptions {
    SummaryOptions {
        provider: "openai".to_string(),
        model: "gpt-4o-mini".to_string(),
        language: language.to_string(),
        length: length.to_string(),
        style: style.to_string(),
    }
}

#[test]
fn test_message_line_format() {
    let mut msg = message(1, 1, "2024-01-01 10:00:00", "hello");
    msg.display_name = "Ann".to_string();
    msg.username = Some("ann".to_string());
    assert_eq!(format_message_line(&msg), "[2024-01-01 10:00:00] Ann (@ann): hello");

    msg.username = None;
    assert_eq!(format_message_line(&msg), "[2024-01-01 10:00:00] Ann: hello");
}

#[test]
fn test_prompt_contains_title_options_and_transcript() {
    let messages = vec![
        message(1, 1, "2024-01-01 10:00:00", "ship it"),
        message(1, 2, "2024-01-01 10:05:00", "agreed"),
    ];
    let prompt = build_prompt(&messages, "Release Room", &options("en", "short", "structured"));

    assert!(prompt.contains("\"Release Room\""));
    assert!(prompt.contains(language_phrase("en")));
    assert!(prompt.contains(length_phrase("short")));
    assert!(prompt.contains(style_phrase("structured")));

    let first = prompt.find("ship it").unwrap();
    let second = prompt.find("agreed").unwrap();
    assert!(first < second);
    assert!(prompt.trim_end().ends_with("Summary:"));
}

#[test]
fn test_prompt_is_deterministic() {
    let messages = vec![message(1, 1, "2024-01-01 10:00:00", "same input")];
    let opts = options("ja", "long", "paragraph");
    assert_eq!(
        build_prompt(&messages, "Chat 1", &opts),
        build_prompt(&messages, "Chat 1", &opts)
    );
}

#[test]
fn test_unknown_options_use_defaults() {
    let messages = vec![message(1, 1, "2024-01-01 10:00:00", "hi")];
    let unknown = build_prompt(&messages, "t", &options("xx", "huge", "emoji"));
    let defaults = build_prompt(&messages, "t", &options("zh", "medium", "bullet"));
    assert_eq!(unknown, defaults);
}
