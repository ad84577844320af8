//! Fallback tool-call parsing for backends without native tool calling.
//!
//! Some models encode tool use as plain-text JSON in the message content
//! instead of structured tool calls. When a response carries no native
//! calls, the loop hands the content to [`parse_tool_calls`], which
//! synthesizes tool-call records from any `{name, parameters|arguments}`
//! objects it finds.

use serde_json::Value;

use crate::llm::types::ToolCall;

/// Extracts tool calls from free-form response content.
///
/// Accepts a single JSON object, a JSON array of objects, or objects
/// embedded in surrounding prose. Returns an empty vec when nothing in the
/// content describes a tool call.
pub fn parse_tool_calls(content: &str) -> Vec<ToolCall> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    // Whole-content parse first: handles clean `{...}` and `[{...}, ...]`
    // responses without scanning.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let calls = calls_from_value(&value);
        if !calls.is_empty() {
            return number_calls(calls);
        }
    }

    // Otherwise scan for balanced JSON objects embedded in prose.
    let mut calls = Vec::new();
    for candidate in scan_json_objects(content) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            calls.extend(calls_from_value(&value));
        }
    }
    number_calls(calls)
}

/// Interprets one JSON value as zero or more tool calls.
fn calls_from_value(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Array(items) => items.iter().flat_map(calls_from_value).collect(),
        Value::Object(_) => call_from_object(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn call_from_object(value: &Value) -> Option<(String, Value)> {
    // `{"tool": ..., "arguments": ...}` and `{"name": ..., "parameters"|
    // "arguments"|"args": ...}` both count; missing arguments default to an
    // empty object.
    let name = value
        .get("tool")
        .or_else(|| value.get("name"))
        .and_then(|v| v.as_str())?;

    let arguments = value
        .get("parameters")
        .or_else(|| value.get("arguments"))
        .or_else(|| value.get("args"))
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));

    // A non-object argument value means this is data that happens to have
    // a "name" key, not a call.
    if !arguments.is_object() && !arguments.is_null() {
        return None;
    }

    Some((name.to_string(), arguments))
}

/// Finds balanced top-level `{...}` spans in the content.
fn scan_json_objects(content: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0i32;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in content.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&content[s..=i]);
                    }
                } else if depth < 0 {
                    depth = 0;
                }
            }
            _ => {}
        }
    }

    spans
}

fn number_calls(calls: Vec<(String, Value)>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, arguments))| {
            let raw = serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".to_string());
            ToolCall::new(format!("fallback-{i}"), name, raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_object_with_arguments() {
        let calls = parse_tool_calls(r#"{"name":"read_file","arguments":{"path":"a.txt"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        let args = calls[0].parsed_arguments().unwrap();
        assert_eq!(args["path"], "a.txt");
    }

    #[test]
    fn test_parameters_key_accepted() {
        let calls = parse_tool_calls(r#"{"name":"run_command","parameters":{"command":"ls"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "run_command");
    }

    #[test]
    fn test_tool_key_accepted() {
        let calls = parse_tool_calls(r#"{"tool":"write_file","arguments":{"path":"b.txt"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "write_file");
    }

    #[test]
    fn test_array_of_calls() {
        let content = r#"[
            {"name":"read_file","arguments":{"path":"a.txt"}},
            {"name":"list_files","arguments":{}}
        ]"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "list_files");
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let content = concat!(
            "I'll read the file first.\n",
            r#"{"name":"read_file","arguments":{"path":"src/main.rs"}}"#,
            "\nThen I'll report back."
        );
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        assert!(parse_tool_calls("The task is complete. All tests pass.").is_empty());
        assert!(parse_tool_calls("").is_empty());
    }

    #[test]
    fn test_json_without_tool_shape_yields_nothing() {
        assert!(parse_tool_calls(r#"{"status":"done","files":3}"#).is_empty());
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_scan() {
        let content = concat!(
            r#"Note: use "{}" as a placeholder. "#,
            r#"{"name":"run_command","arguments":{"command":"echo {}"}}"#
        );
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "run_command");
    }

    #[test]
    fn test_missing_arguments_defaults_to_empty_object() {
        let calls = parse_tool_calls(r#"{"name":"list_files"}"#);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].parsed_arguments().unwrap().is_object());
    }
}
