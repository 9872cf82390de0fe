use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::{Codec, ParsedToolCall, ToolSchema};

static TOOL_CALL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("valid regex"));

/// Tag-delimited JSON dialect: `<tool_call>{"name":...,"arguments":{...}}</tool_call>`.
///
/// Used for both the primary dialect and its alternate-instructions variant,
/// which is wire-identical and differs only in the prompt text that teaches
/// a model to use it.
pub struct TagDelimitedCodec {
    alt_instructions: bool,
}

impl TagDelimitedCodec {
    pub fn new(alt_instructions: bool) -> Self {
        Self { alt_instructions }
    }
}

impl Codec for TagDelimitedCodec {
    fn format_tools_for_prompt(&self, tools: &[ToolSchema]) -> String {
        if tools.is_empty() {
            return String::new();
        }

        let mut out = String::new();

        if self.alt_instructions {
            out.push_str(
                "You have access to the following tools. When you need to use one, respond with a \
                 <tool_call> block containing a JSON object with \"name\" and \"arguments\" keys. You \
                 may emit more than one <tool_call> block, or a single block wrapping a JSON array of \
                 call objects, to invoke several tools at once.\n\n",
            );
        } else {
            out.push_str(
                "You can call the following tools by responding with one or more \
                 <tool_call>{\"name\": \"...\", \"arguments\": {...}}</tool_call> blocks.\n\n",
            );
        }

        out.push_str("Available tools:\n");

        for tool in tools {
            out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }

        out
    }

    fn has_tool_calls(&self, text: &str) -> bool {
        TOOL_CALL_BLOCK.is_match(text)
    }

    fn parse_tool_calls(&self, text: &str) -> Vec<ParsedToolCall> {
        let mut calls = Vec::new();

        for capture in TOOL_CALL_BLOCK.captures_iter(text) {
            let body = capture[1].trim();

            let Ok(value) = serde_json::from_str::<Value>(body) else {
                continue;
            };

            match value {
                Value::Array(entries) => {
                    for entry in entries {
                        if let Some(call) = parse_call_object(&entry) {
                            calls.push(call);
                        }
                    }
                }
                other => {
                    if let Some(call) = parse_call_object(&other) {
                        calls.push(call);
                    }
                }
            }
        }

        calls
    }

    fn format_tool_result(&self, name: &str, result: &str) -> String {
        let payload = serde_json::json!({ "name": name, "result": result });
        format!("<tool_response>{payload}</tool_response>")
    }

    fn get_text_content(&self, text: &str) -> String {
        TOOL_CALL_BLOCK.replace_all(text, "").trim().to_string()
    }
}

fn parse_call_object(value: &Value) -> Option<ParsedToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

    Some(ParsedToolCall { name, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TagDelimitedCodec {
        TagDelimitedCodec::new(false)
    }

    #[test]
    fn empty_tools_format_to_empty_string() {
        assert_eq!(codec().format_tools_for_prompt(&[]), "");
    }

    #[test]
    fn no_tool_calls_in_plain_text() {
        assert!(!codec().has_tool_calls("just a normal reply"));
        assert!(codec().parse_tool_calls("just a normal reply").is_empty());
    }

    #[test]
    fn parses_single_call_defaulting_arguments() {
        let text = r#"<tool_call>{"name": "get_weather"}</tool_call>"#;
        let calls = codec().parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn parses_multiple_blocks() {
        let text = r#"
            <tool_call>{"name": "a", "arguments": {"x": 1}}</tool_call>
            some prose in between
            <tool_call>{"name": "b", "arguments": {"y": 2}}</tool_call>
        "#;

        let calls = codec().parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn parses_single_array_block() {
        let text = r#"<tool_call>[{"name": "a"}, {"name": "b", "arguments": {"z": true}}]</tool_call>"#;
        let calls = codec().parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments, serde_json::json!({"z": true}));
    }

    #[test]
    fn skips_nameless_entries() {
        let text = r#"<tool_call>{"arguments": {"x": 1}}</tool_call>"#;
        assert!(codec().parse_tool_calls(text).is_empty());
    }

    #[test]
    fn skips_malformed_json() {
        let text = "<tool_call>{not json</tool_call>";
        assert!(codec().parse_tool_calls(text).is_empty());
    }

    #[test]
    fn text_content_strips_tool_call_markup() {
        let text = "Sure, let me check.\n<tool_call>{\"name\": \"a\"}</tool_call>";
        assert_eq!(codec().get_text_content(text), "Sure, let me check.");
    }

    #[test]
    fn text_content_is_idempotent_on_plain_text() {
        assert_eq!(codec().get_text_content("no calls here"), "no calls here");
    }

    #[test]
    fn formats_tool_result() {
        let result = codec().format_tool_result("get_weather", "sunny, 72F");
        assert!(!codec().has_tool_calls(&result));
        assert!(result.starts_with("<tool_response>"));
        assert!(result.contains("get_weather"));
        assert!(result.contains("sunny, 72F"));
    }

    #[test]
    fn alt_instructions_wire_format_is_identical() {
        let alt = TagDelimitedCodec::new(true);
        let text = r#"<tool_call>{"name": "a"}</tool_call>"#;
        assert_eq!(alt.parse_tool_calls(text), codec().parse_tool_calls(text));
        assert_ne!(
            alt.format_tools_for_prompt(&[ToolSchema {
                name: "a".into(),
                description: "d".into(),
                input_schema: Default::default(),
            }]),
            codec().format_tools_for_prompt(&[ToolSchema {
                name: "a".into(),
                description: "d".into(),
                input_schema: Default::default(),
            }])
        );
    }
}
