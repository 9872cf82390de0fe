//! Per-dialect tool-call codecs.
//!
//! A [`Codec`] knows, for one tool-call dialect, how to offer tools to a model
//! in its system prompt, how to recognize and parse a tool call the model
//! emitted, how to format a tool's result back into the dialect, and how to
//! strip tool-call markup out of a response to recover its plain text.

mod square_bracket;
mod tag_delimited;
mod tools;

use serde_json::Value;

pub use tools::{ToolParameterSchema, ToolSchema};

/// A dialect-neutral tool call recovered from a model's raw text output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// The tool name exactly as the model wrote it (plain or provider-qualified).
    pub name: String,
    /// Parsed arguments. Defaults to an empty object if the model omitted them.
    pub arguments: Value,
}

/// Formats tool offers and tool calls for one dialect, and parses calls back out.
///
/// Implementations must be pure: no I/O, no hidden state between calls. This
/// lets the tool-execution loop hold a codec as `Box<dyn Codec>` per loaded
/// model without worrying about shared mutable state.
pub trait Codec: Send + Sync {
    /// Render the tool list into the block of system-prompt text that teaches
    /// the model how to call them. Returns an empty string for an empty or
    /// absent tool list.
    fn format_tools_for_prompt(&self, tools: &[ToolSchema]) -> String;

    /// Whether `text` contains at least one tool call in this dialect.
    fn has_tool_calls(&self, text: &str) -> bool;

    /// Parse every tool call out of `text`. Malformed or nameless entries are
    /// silently skipped rather than causing the whole parse to fail.
    fn parse_tool_calls(&self, text: &str) -> Vec<ParsedToolCall>;

    /// Format a single tool's result for inclusion in the next turn's prompt.
    fn format_tool_result(&self, name: &str, result: &str) -> String;

    /// Strip tool-call markup from `text`, leaving the plain prose content.
    /// Idempotent: calling it on text with no tool calls returns it unchanged
    /// (aside from whitespace trimming).
    fn get_text_content(&self, text: &str) -> String;

    /// Build a chat message object of the given role and content.
    fn build_message(&self, role: &str, content: &str) -> Value {
        serde_json::json!({ "role": role, "content": content })
    }
}

/// Returns true if a tool result should be treated as empty for the purpose
/// of appending parameter-guidance text: whitespace only, or a JSON value
/// that itself carries no information (`null`, `[]`, `{}` — including
/// variants with interior whitespace like `"[ ]"`).
pub fn is_empty_tool_result(result: &str) -> bool {
    let trimmed = result.trim();

    if trimmed.is_empty() {
        return true;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Null) => true,
        Ok(Value::Array(items)) => items.is_empty(),
        Ok(Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod empty_result_tests {
    use super::is_empty_tool_result;

    #[test]
    fn recognizes_empty_variants() {
        assert!(is_empty_tool_result(""));
        assert!(is_empty_tool_result("   "));
        assert!(is_empty_tool_result("null"));
        assert!(is_empty_tool_result("[]"));
        assert!(is_empty_tool_result("{}"));
        assert!(is_empty_tool_result("[ ]"));
        assert!(is_empty_tool_result("{ }"));
        assert!(is_empty_tool_result("  {\n}  "));
    }

    #[test]
    fn does_not_flag_real_content() {
        assert!(!is_empty_tool_result("42"));
        assert!(!is_empty_tool_result("[1, 2]"));
        assert!(!is_empty_tool_result("no results found but this is text"));
    }
}

pub use square_bracket::SquareBracketCodec;
pub use tag_delimited::TagDelimitedCodec;

/// The three required dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Tag-delimited JSON: `<tool_call>{...}</tool_call>`.
    TagDelimited,
    /// Square-bracket function call: `[func(a=1, b='x')]`.
    SquareBracket,
    /// Wire-identical to [`Dialect::TagDelimited`], different prompt instructions.
    TagDelimitedAlt,
}

/// Construct the codec for a given dialect.
pub fn for_dialect(dialect: Dialect) -> Box<dyn Codec> {
    match dialect {
        Dialect::TagDelimited => Box::new(TagDelimitedCodec::new(false)),
        Dialect::TagDelimitedAlt => Box::new(TagDelimitedCodec::new(true)),
        Dialect::SquareBracket => Box::new(SquareBracketCodec),
    }
}
