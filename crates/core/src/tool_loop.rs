//! Drives model <-> tool round-trips for a single chat request: builds the
//! effective system prompt, replays prior turns into a fresh context, and
//! repeatedly executes whatever tool calls the model emits until it produces
//! a final answer, a loop is detected, or the iteration cap is reached.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use codecs::{ParsedToolCall, ToolSchema};
use generator::Generator;
use serde_json::Value;
use tools::ToolDescriptor;

use crate::error::CoreError;
use crate::lifecycle::LoadedModel;

/// Upper bound on model <-> tool round-trips within a single chat request.
pub const MAX_TOOL_ITERATIONS: usize = 10;
/// Number of times the same call-list signature may repeat before the loop
/// is considered stuck and aborted.
pub const LOOP_DETECTION_THRESHOLD: usize = 3;

/// One turn of conversation fed into the loop. Only `role == "user"` entries
/// among all but the last are replayed; the last must be `"user"`; any
/// `role == "system"` entries are folded into the effective system prompt.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One tool call made during the loop, kept for the non-streaming response's
/// `tool_calls` accounting.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    pub result: String,
    pub success: bool,
}

/// The loop's outcome: the final text and every tool call made along the way.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Receives whitespace-split words as the final answer is produced, for
/// streaming responses. Non-streaming callers simply pass `None`.
///
/// Terminal framing (the NDJSON `done` frame, the SSE `[DONE]` line) is the
/// HTTP dispatch layer's job, since it differs per wire format; this trait
/// only carries content chunks.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn write_chunk(&self, content: &str) -> anyhow::Result<()>;
}

/// Run the tool-execution loop against `record`, using `generator` to create
/// the context/session this single request needs.
///
/// Fails with [`CoreError::BadRequest`] if `messages` is empty or its last
/// entry isn't `role == "user"`. The inference context created for this call
/// is disposed on every exit path, success or failure.
pub async fn run<G: Generator>(
    generator: &G,
    record: &Arc<LoadedModel>,
    messages: &[ChatMessage],
    tool_overrides: Option<&[Value]>,
    chunk_sink: Option<&dyn ChunkSink>,
) -> Result<ChatOutcome, CoreError> {
    let last = messages
        .last()
        .ok_or_else(|| CoreError::BadRequest("messages must not be empty".to_string()))?;

    if last.role != "user" {
        return Err(CoreError::BadRequest(
            "the last message in a chat request must have role 'user'".to_string(),
        ));
    }

    let system_prompt = build_effective_system_prompt(record, messages, tool_overrides);

    let context = generator
        .create_context(record.model_handle, record.context_size)
        .await
        .map_err(|err| CoreError::Internal(err.into()))?;

    let outcome = run_within_context(generator, record, context, &system_prompt, messages, &last.content, chunk_sink).await;

    if let Err(err) = generator.dispose_context(context).await {
        log::warn!("failed to dispose inference context for model '{}': {err}", record.name);
    }

    outcome
}

async fn run_within_context<G: Generator>(
    generator: &G,
    record: &Arc<LoadedModel>,
    context: generator::ContextHandle,
    system_prompt: &str,
    messages: &[ChatMessage],
    last_user_content: &str,
    chunk_sink: Option<&dyn ChunkSink>,
) -> Result<ChatOutcome, CoreError> {
    let session = generator
        .create_session(context, system_prompt)
        .await
        .map_err(|err| CoreError::Internal(err.into()))?;

    // Replay every prior `user` turn (not the last one) to rebuild this
    // request's conversation state in the fresh session; no history
    // persists across requests, so this must happen every time.
    for message in &messages[..messages.len().saturating_sub(1)] {
        if message.role == "user" {
            generator
                .prompt(session, &message.content)
                .await
                .map_err(|err| CoreError::Internal(err.into()))?;
        }
    }

    drive_loop(generator, record, session, last_user_content, chunk_sink).await
}

async fn drive_loop<G: Generator>(
    generator: &G,
    record: &Arc<LoadedModel>,
    session: generator::SessionHandle,
    last_user_content: &str,
    chunk_sink: Option<&dyn ChunkSink>,
) -> Result<ChatOutcome, CoreError> {
    let mut current_input = last_user_content.to_string();
    let mut signature_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut tool_calls_made = Vec::new();
    let mut final_content: Option<String> = None;

    for _round in 0..MAX_TOOL_ITERATIONS {
        let response = generator
            .prompt(session, &current_input)
            .await
            .map_err(|err| CoreError::Internal(err.into()))?;

        if !record.codec.has_tool_calls(&response) {
            final_content = Some(record.codec.get_text_content(&response));
            break;
        }

        let calls = record.codec.parse_tool_calls(&response);
        if calls.is_empty() {
            final_content = Some(record.codec.get_text_content(&response));
            break;
        }

        let signature = call_list_signature(&calls);
        let count = signature_counts.entry(signature).or_insert(0);
        *count += 1;

        if *count >= LOOP_DETECTION_THRESHOLD {
            let names = calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
            final_content = Some(format!(
                "I wasn't able to get the right information — I kept trying to call {names} with the same arguments without success."
            ));
            break;
        }

        let mut formatted_parts = Vec::with_capacity(calls.len());

        for call in &calls {
            let (result_str, success) = execute_tool_call(record, call).await;

            let mut formatted = record.codec.format_tool_result(&call.name, &result_str);

            if !success || codecs::is_empty_tool_result(&result_str) {
                if let Some(descriptor) = record.tools.find_tool(&call.name).await {
                    formatted.push_str("\n\n");
                    formatted.push_str(&parameter_guidance(&descriptor));
                }
            }

            formatted_parts.push(formatted);

            tool_calls_made.push(ToolCallRecord {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: result_str,
                success,
            });
        }

        current_input = formatted_parts.join("\n\n");
    }

    let content = final_content
        .unwrap_or_else(|| "I was unable to complete this request — too many tool calls were needed.".to_string());

    if let Some(sink) = chunk_sink {
        stream_words(&content, sink).await.map_err(CoreError::Internal)?;
    }

    Ok(ChatOutcome {
        content,
        tool_calls: tool_calls_made,
    })
}

async fn execute_tool_call(record: &Arc<LoadedModel>, call: &ParsedToolCall) -> (String, bool) {
    match record.tools.call_tool(&call.name, call.arguments.clone()).await {
        Ok(result) => (result, true),
        Err(err) => (err.to_string(), false),
    }
}

async fn stream_words(content: &str, sink: &dyn ChunkSink) -> anyhow::Result<()> {
    for (index, word) in content.split_whitespace().enumerate() {
        let chunk = if index == 0 { word.to_string() } else { format!(" {word}") };
        sink.write_chunk(&chunk).await?;
    }

    Ok(())
}

/// Deterministic serialization of a round's call list, used for loop
/// detection: each call's arguments are sorted into a `BTreeMap` so key
/// ordering in the model's output can't defeat the signature.
fn call_list_signature(calls: &[ParsedToolCall]) -> String {
    calls
        .iter()
        .map(|call| {
            let sorted: BTreeMap<String, &Value> = match &call.arguments {
                Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
                _ => BTreeMap::new(),
            };

            format!("{}:{}", call.name, serde_json::to_string(&sorted).unwrap_or_default())
        })
        .collect::<Vec<_>>()
        .join("\x1f")
}

fn parameter_guidance(descriptor: &ToolDescriptor) -> String {
    let mut lines = vec![format!("Parameters for `{}`:", descriptor.plain_name)];

    for (name, schema) in &descriptor.parameters.properties {
        let ty = schema.get("type").and_then(Value::as_str).unwrap_or("any");
        let description = schema.get("description").and_then(Value::as_str).unwrap_or("");
        let marker = if descriptor.parameters.required.iter().any(|r| r == name) {
            "required"
        } else {
            "optional"
        };

        lines.push(format!("- {name} ({ty}, {marker}): {description}"));
    }

    lines.push("Do not retry this call with the same arguments; adjust them first.".to_string());
    lines.join("\n")
}

fn build_effective_system_prompt(record: &LoadedModel, messages: &[ChatMessage], tool_overrides: Option<&[Value]>) -> String {
    let tools: Vec<ToolSchema> = match tool_overrides {
        Some(raw) => raw.iter().filter_map(ToolSchema::from_value).collect(),
        None => record.tool_list.clone(),
    };

    let tools_block = record.codec.format_tools_for_prompt(&tools);
    let now = jiff::Timestamp::now();

    let mut prompt = format!("{}\n\nCurrent date and time: {now}", record.base_system_prompt);

    if !tools_block.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&tools_block);
    }

    let system_prefix = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if !system_prefix.is_empty() {
        prompt = format!("{system_prefix}\n{prompt}");
    }

    prompt
}
