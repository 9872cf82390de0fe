use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::{Codec, ParsedToolCall, ToolSchema};

static BRACKET_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]").expect("valid regex"));
static CALL_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$").expect("valid regex"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid regex"));

/// Square-bracket function-call dialect: `[func(param='value', other=123)]`,
/// with multiple calls comma-separated inside the same bracket pair.
///
/// A bracketed block with no `name(...)` segments (e.g. `[some aside]`) is not
/// a tool call at all and is left untouched.
pub struct SquareBracketCodec;

impl Codec for SquareBracketCodec {
    fn format_tools_for_prompt(&self, tools: &[ToolSchema]) -> String {
        if tools.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        out.push_str(
            "You can call the following tools by writing `[tool_name(param=value, other='text')]`. \
             Separate multiple calls with a comma inside the same brackets: \
             `[first(a=1), second(b='x')]`.\n\n",
        );
        out.push_str("Available tools:\n");

        for tool in tools {
            out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }

        out
    }

    fn has_tool_calls(&self, text: &str) -> bool {
        !self.parse_tool_calls(text).is_empty()
    }

    fn parse_tool_calls(&self, text: &str) -> Vec<ParsedToolCall> {
        let mut calls = Vec::new();

        for capture in BRACKET_BLOCK.captures_iter(text) {
            calls.extend(parse_bracket_body(&capture[1]));
        }

        calls
    }

    fn format_tool_result(&self, name: &str, result: &str) -> String {
        format!("Function {name} returned: {result}")
    }

    fn get_text_content(&self, text: &str) -> String {
        BRACKET_BLOCK
            .replace_all(text, |caps: &regex::Captures<'_>| {
                if parse_bracket_body(&caps[1]).is_empty() {
                    caps[0].to_string()
                } else {
                    String::new()
                }
            })
            .trim()
            .to_string()
    }
}

fn parse_bracket_body(body: &str) -> Vec<ParsedToolCall> {
    let segments = split_top_level(body, ',');
    let mut calls = Vec::new();

    for segment in &segments {
        let Some(captures) = CALL_HEAD.captures(segment) else {
            continue;
        };

        let name = captures[1].to_string();
        let arguments = parse_arguments(&captures[2]);
        calls.push(ParsedToolCall { name, arguments });
    }

    calls
}

fn parse_arguments(args: &str) -> Value {
    let mut object = serde_json::Map::new();

    if args.trim().is_empty() {
        return Value::Object(object);
    }

    for pair in split_top_level(args, ',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };

        object.insert(key.trim().to_string(), discriminate_value(value.trim()));
    }

    Value::Object(object)
}

fn discriminate_value(raw: &str) -> Value {
    if raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\'')) || (raw.starts_with('"') && raw.ends_with('"')))
    {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }

    match raw {
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        "None" => return Value::Null,
        _ => {}
    }

    if NUMBER.is_match(raw) {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::from(i);
        }

        if let Ok(f) = raw.parse::<f64>() {
            return Value::from(f);
        }
    }

    Value::String(raw.to_string())
}

/// Split `input` on `sep` occurrences that are not inside `(...)` or a quoted string.
fn split_top_level(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' => {
                    depth -= 1;
                    current.push(ch);
                }
                c if c == sep && depth == 0 => {
                    parts.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}
