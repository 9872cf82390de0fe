//! Frame and envelope shapes for the two wire formats: the native chat API
//! (NDJSON, modeled on a well-known local-inference HTTP surface) and the
//! OpenAI-style chat-completions API.

use core_engine::tool_loop::ToolCallRecord;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct NativeToolCallFunction {
    name: String,
    arguments: Value,
}

#[derive(Serialize)]
struct NativeToolCall {
    function: NativeToolCallFunction,
}

#[derive(Serialize)]
struct NativeMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<NativeToolCall>>,
}

#[derive(Serialize)]
struct NativeFrame<'a> {
    model: &'a str,
    created_at: String,
    message: NativeMessage<'a>,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    done_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    load_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_eval_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eval_duration: Option<u64>,
}

fn native_tool_calls(records: &[ToolCallRecord]) -> Option<Vec<NativeToolCall>> {
    if records.is_empty() {
        return None;
    }

    Some(
        records
            .iter()
            .map(|r| NativeToolCall {
                function: NativeToolCallFunction { name: r.name.clone(), arguments: r.arguments.clone() },
            })
            .collect(),
    )
}

/// One non-terminal streaming frame: `done: false`, no timing fields.
pub fn native_chunk_line(model: &str, content: &str) -> String {
    let frame = NativeFrame {
        model,
        created_at: jiff::Timestamp::now().to_string(),
        message: NativeMessage { role: "assistant", content, tool_calls: None },
        done: false,
        done_reason: None,
        total_duration: None,
        load_duration: None,
        prompt_eval_count: None,
        prompt_eval_duration: None,
        eval_count: None,
        eval_duration: None,
    };
    format!("{}\n", serde_json::to_string(&frame).unwrap_or_default())
}

/// The terminal streaming frame: `done: true`, `done_reason: "stop"`,
/// zero-valued timing fields, empty content (words were already streamed).
pub fn native_done_line(model: &str) -> String {
    format!("{}\n", serde_json::to_string(&native_terminal_frame(model, "", &[])).unwrap_or_default())
}

/// The full non-streaming envelope: same shape as the terminal frame, but
/// carrying the complete content and any accumulated tool calls.
pub fn native_envelope(model: &str, content: &str, tool_calls: &[ToolCallRecord]) -> String {
    serde_json::to_string(&native_terminal_frame(model, content, tool_calls)).unwrap_or_default()
}

fn native_terminal_frame<'a>(model: &'a str, content: &'a str, tool_calls: &[ToolCallRecord]) -> NativeFrame<'a> {
    NativeFrame {
        model,
        created_at: jiff::Timestamp::now().to_string(),
        message: NativeMessage { role: "assistant", content, tool_calls: native_tool_calls(tool_calls) },
        done: true,
        done_reason: Some("stop"),
        total_duration: Some(0),
        load_duration: Some(0),
        prompt_eval_count: Some(0),
        prompt_eval_duration: Some(0),
        eval_count: Some(0),
        eval_duration: Some(0),
    }
}

#[derive(Serialize)]
struct OpenAiDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct OpenAiChoiceChunk {
    index: u32,
    delta: OpenAiDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct OpenAiChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<OpenAiChoiceChunk>,
}

/// SSE line carrying one content delta.
pub fn openai_chunk_line(id: &str, model: &str, created: i64, content: &str) -> String {
    let chunk = OpenAiChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![OpenAiChoiceChunk { index: 0, delta: OpenAiDelta { content: Some(content.to_string()) }, finish_reason: None }],
    };
    format!("data: {}\n\n", serde_json::to_string(&chunk).unwrap_or_default())
}

/// SSE line carrying the terminal `finish_reason: "stop"` chunk. Callers
/// still need to follow this with [`OPENAI_STREAM_TERMINATOR`].
pub fn openai_done_chunk_line(id: &str, model: &str, created: i64) -> String {
    let chunk = OpenAiChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![OpenAiChoiceChunk { index: 0, delta: OpenAiDelta { content: None }, finish_reason: Some("stop") }],
    };
    format!("data: {}\n\n", serde_json::to_string(&chunk).unwrap_or_default())
}

pub const OPENAI_STREAM_TERMINATOR: &str = "data: [DONE]\n\n";

#[derive(Serialize)]
struct OpenAiToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiToolCallFunction,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Serialize)]
struct OpenAiChoice {
    index: u32,
    message: OpenAiMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Serialize)]
pub struct OpenAiResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

/// The full non-streaming OpenAI-style response.
pub fn openai_response(id: String, model: String, created: i64, content: String, tool_calls: &[ToolCallRecord]) -> OpenAiResponse {
    let tool_calls = tool_calls
        .iter()
        .enumerate()
        .map(|(i, r)| OpenAiToolCall {
            id: format!("call_{i}_{}", uuid::Uuid::new_v4().simple()),
            kind: "function",
            function: OpenAiToolCallFunction { name: r.name.clone(), arguments: serde_json::to_string(&r.arguments).unwrap_or_default() },
        })
        .collect();

    OpenAiResponse {
        id,
        object: "chat.completion",
        created,
        model,
        choices: vec![OpenAiChoice { index: 0, message: OpenAiMessage { role: "assistant", content, tool_calls }, finish_reason: "stop" }],
        usage: OpenAiUsage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_line_is_ndjson_with_done_false() {
        let line = native_chunk_line("llama", "hi");
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["done"], false);
        assert_eq!(value["message"]["content"], "hi");
        assert!(value.get("done_reason").is_none());
    }

    #[test]
    fn done_line_carries_zeroed_timings() {
        let line = native_done_line("llama");
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["done"], true);
        assert_eq!(value["done_reason"], "stop");
        assert_eq!(value["eval_count"], 0);
    }

    #[test]
    fn envelope_includes_tool_calls_when_present() {
        let records = vec![ToolCallRecord { name: "x".to_string(), arguments: serde_json::json!({"a":1}), result: "ok".to_string(), success: true }];
        let json = native_envelope("llama", "done", &records);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["message"]["tool_calls"][0]["function"]["name"], "x");
    }

    #[test]
    fn openai_chunk_is_sse_framed() {
        let line = openai_chunk_line("abc", "llama", 0, "hi");
        assert!(line.starts_with("data: "));
        assert!(line.ends_with("\n\n"));
    }

    #[test]
    fn openai_response_stringifies_tool_call_arguments() {
        let records = vec![ToolCallRecord { name: "x".to_string(), arguments: serde_json::json!({"a":1}), result: "ok".to_string(), success: true }];
        let response = openai_response("id".to_string(), "llama".to_string(), 0, "hi".to_string(), &records);
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"].as_str().unwrap().contains("\"a\":1"));
    }
}
