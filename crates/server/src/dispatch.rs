//! The route table: two API dialects over one scheduler. Every handler
//! follows the same validation order — model-exists, model-allowed, then
//! schedule — with the strict-mode gate and authentication already applied
//! by [`crate::access_gate`] before a request reaches here.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use config::Config;
use core_engine::access::AuthOutcome;
use core_engine::error::CoreError;
use core_engine::scheduler::{Scheduler, Work};
use core_engine::tool_loop::{self, ChatMessage};
use core_engine::{ModelLifecycleManager, lifecycle::ModelSummary};
use generator::Generator;
use serde::Deserialize;
use serde_json::Value;

use crate::sink::{NativeStreamSink, OpenAiStreamSink};
use crate::wire;

pub struct AppState<G: Generator> {
    pub lifecycle: Arc<ModelLifecycleManager<G>>,
    pub scheduler: Arc<Scheduler<G>>,
    pub generator: Arc<G>,
    pub config: Config,
    pub version: String,
}

pub fn router<G: Generator + 'static>(state: Arc<AppState<G>>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/version", get(get_version))
        .route("/api/tags", get(get_tags))
        .route("/api/ps", get(get_ps))
        .route("/api/show", post(post_show))
        .route("/api/chat", post(post_chat))
        .route("/api/generate", post(post_generate))
        .route("/v1/chat/completions", post(post_openai_chat))
        .route("/v1/models", get(get_openai_models))
        .fallback(not_found)
        .layer(middleware::from_fn(normalize_trailing_slash))
        .with_state(state)
}

async fn normalize_trailing_slash(mut req: Request, next: Next) -> Response {
    let path = req.uri().path();

    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        let rebuilt = match req.uri().query() {
            Some(q) => format!("{trimmed}?{q}"),
            None => trimmed,
        };

        if let Ok(new_uri) = rebuilt.parse() {
            *req.uri_mut() = new_uri;
        }
    }

    next.run(req).await
}

async fn not_found() -> Response {
    error_json(StatusCode::NOT_FOUND, "Not found")
}

async fn root() -> &'static str {
    "Ollama is running"
}

async fn get_version<G: Generator>(State(state): State<Arc<AppState<G>>>) -> Response {
    Json(serde_json::json!({ "version": state.version })).into_response()
}

#[derive(serde::Serialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(serde::Serialize)]
struct TagEntry {
    name: String,
    loaded: bool,
}

async fn get_tags<G: Generator>(State(state): State<Arc<AppState<G>>>, Extension(outcome): Extension<AuthOutcome>) -> Response {
    let allowed = allowed_models(&outcome);
    let models = state.lifecycle.get_all_model_info(allowed.as_deref()).await;

    Json(TagsResponse { models: models.into_iter().map(|m: ModelSummary| TagEntry { name: m.name, loaded: m.loaded }).collect() }).into_response()
}

#[derive(serde::Serialize)]
struct PsResponse {
    models: Vec<PsEntry>,
}

#[derive(serde::Serialize)]
struct PsEntry {
    name: String,
    loaded_at: String,
    active_contexts: i64,
}

async fn get_ps<G: Generator>(State(state): State<Arc<AppState<G>>>, Extension(outcome): Extension<AuthOutcome>) -> Response {
    let allowed = allowed_models(&outcome);
    let running = state.lifecycle.get_running_model_info(allowed.as_deref()).await;

    Json(PsResponse {
        models: running.into_iter().map(|r| PsEntry { name: r.name, loaded_at: r.loaded_at.to_string(), active_contexts: r.active_contexts }).collect(),
    })
    .into_response()
}

#[derive(Deserialize, Default)]
struct ShowBody {
    name: Option<String>,
    model: Option<String>,
}

async fn post_show<G: Generator>(
    State(state): State<Arc<AppState<G>>>,
    Extension(outcome): Extension<AuthOutcome>,
    body: Result<Json<ShowBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let Some(model) = body.name.or(body.model) else {
        return error_json(StatusCode::BAD_REQUEST, "`name` or `model` is required");
    };

    if let Err(resp) = check_model_access(&state.lifecycle, &outcome, &model) {
        return resp;
    }

    match state.lifecycle.get_model_details(&model, None).await {
        Some(details) => Json(serde_json::json!({
            "name": details.name,
            "dialect": dialect_label(details.dialect),
            "context_size": details.context_size,
            "tools": details.tool_names,
        }))
        .into_response(),
        None => error_json(StatusCode::NOT_FOUND, "model not found"),
    }
}

fn dialect_label(dialect: config::Dialect) -> &'static str {
    match dialect {
        config::Dialect::TagDelimited => "tag-delimited",
        config::Dialect::SquareBracket => "square-bracket",
        config::Dialect::TagDelimitedAlt => "tag-delimited-alt",
    }
}

#[derive(Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct NativeChatBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    tools: Option<Vec<Value>>,
    #[serde(default = "default_true")]
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateBody {
    model: String,
    prompt: String,
    #[serde(default = "default_true")]
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiChatBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    tools: Option<Vec<Value>>,
    #[serde(default)]
    stream: bool,
}

fn default_true() -> bool {
    true
}

async fn post_chat<G: Generator + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Extension(outcome): Extension<AuthOutcome>,
    body: Result<Json<NativeChatBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error_json(StatusCode::BAD_REQUEST, "invalid request body");
    };

    if let Err(resp) = check_model_access(&state.lifecycle, &outcome, &body.model) {
        return resp;
    }

    let messages = to_chat_messages(body.messages);
    run_native_chat(state, body.model, messages, body.tools, body.stream).await
}

async fn post_generate<G: Generator + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Extension(outcome): Extension<AuthOutcome>,
    body: Result<Json<GenerateBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error_json(StatusCode::BAD_REQUEST, "invalid request body");
    };

    if let Err(resp) = check_model_access(&state.lifecycle, &outcome, &body.model) {
        return resp;
    }

    let messages = vec![ChatMessage { role: "user".to_string(), content: body.prompt }];
    run_native_chat(state, body.model, messages, None, body.stream).await
}

async fn run_native_chat<G: Generator + 'static>(
    state: Arc<AppState<G>>,
    model: String,
    messages: Vec<ChatMessage>,
    tools: Option<Vec<Value>>,
    stream: bool,
) -> Response {
    let generator = state.generator.clone();
    let messages = Arc::new(messages);
    let tools = Arc::new(tools);

    if stream {
        let (sink, body) = NativeStreamSink::new(model.clone());
        let work_sink = sink.clone();
        let work: Work = Box::new(move |record| {
            Box::pin(async move {
                let result = tool_loop::run(generator.as_ref(), &record, &messages, tools.as_deref(), Some(work_sink.as_ref())).await;
                match result {
                    Ok(_) => {
                        let _ = work_sink.write_done().await;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            })
        });

        state.scheduler.submit(model, work, sink, true).await;

        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .unwrap_or_else(|_| error_json(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response"))
    } else {
        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();
        let sink: Arc<NonStreamingSink> = Arc::new(NonStreamingSink::default());
        let response_sink = sink.clone();

        let work: Work = Box::new(move |record| {
            Box::pin(async move {
                let result = tool_loop::run(generator.as_ref(), &record, &messages, tools.as_deref(), None).await?;
                let _ = outcome_tx.send(result);
                Ok(())
            })
        });

        let rx = state.scheduler.submit(model.clone(), work, response_sink, false).await;

        match rx.await {
            Ok(Ok(())) => match outcome_rx.await {
                Ok(outcome) => Json(serde_json::from_str::<Value>(&wire::native_envelope(&model, &outcome.content, &outcome.tool_calls)).unwrap_or_default())
                    .into_response(),
                Err(_) => error_json(StatusCode::INTERNAL_SERVER_ERROR, "request completed without a result"),
            },
            Ok(Err(err)) => core_error_response(err),
            Err(_) => error_json(StatusCode::INTERNAL_SERVER_ERROR, "scheduler dropped the request"),
        }
    }
}

async fn post_openai_chat<G: Generator + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Extension(outcome): Extension<AuthOutcome>,
    body: Result<Json<OpenAiChatBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error_json(StatusCode::BAD_REQUEST, "invalid request body");
    };

    if let Err(resp) = check_model_access(&state.lifecycle, &outcome, &body.model) {
        return resp;
    }

    let model = body.model;
    let messages = to_chat_messages(body.messages);
    let generator = state.generator.clone();
    let messages = Arc::new(messages);
    let tools = Arc::new(body.tools);

    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = jiff::Timestamp::now().as_second();

    if body.stream {
        let (sink, response_body) = OpenAiStreamSink::new(id, model.clone(), created);
        let work_sink = sink.clone();

        let work: Work = Box::new(move |record| {
            Box::pin(async move {
                let result = tool_loop::run(generator.as_ref(), &record, &messages, tools.as_deref(), Some(work_sink.as_ref())).await;
                match result {
                    Ok(_) => {
                        let _ = work_sink.write_done().await;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            })
        });

        state.scheduler.submit(model, work, sink, false).await;

        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .body(response_body)
            .unwrap_or_else(|_| error_json(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response"))
    } else {
        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();
        let sink: Arc<NonStreamingSink> = Arc::new(NonStreamingSink::default());
        let response_sink = sink.clone();

        let work: Work = Box::new(move |record| {
            Box::pin(async move {
                let result = tool_loop::run(generator.as_ref(), &record, &messages, tools.as_deref(), None).await?;
                let _ = outcome_tx.send(result);
                Ok(())
            })
        });

        let rx = state.scheduler.submit(model.clone(), work, response_sink, false).await;

        match rx.await {
            Ok(Ok(())) => match outcome_rx.await {
                Ok(outcome) => Json(wire::openai_response(id, model, created, outcome.content, &outcome.tool_calls)).into_response(),
                Err(_) => error_json(StatusCode::INTERNAL_SERVER_ERROR, "request completed without a result"),
            },
            Ok(Err(err)) => core_error_response(err),
            Err(_) => error_json(StatusCode::INTERNAL_SERVER_ERROR, "scheduler dropped the request"),
        }
    }
}

async fn get_openai_models<G: Generator>(State(state): State<Arc<AppState<G>>>, Extension(outcome): Extension<AuthOutcome>) -> Response {
    let allowed = allowed_models(&outcome);
    let models = state.lifecycle.get_all_model_info(allowed.as_deref()).await;

    let data: Vec<Value> = models
        .into_iter()
        .map(|m| serde_json::json!({ "id": m.name, "object": "model", "created": 0, "owned_by": "kiln" }))
        .collect();

    Json(serde_json::json!({ "object": "list", "data": data })).into_response()
}

fn allowed_models(outcome: &AuthOutcome) -> Option<Vec<String>> {
    match outcome {
        AuthOutcome::Allowed(models) => Some(models.clone()),
        _ => None,
    }
}

fn to_chat_messages(messages: Vec<WireMessage>) -> Vec<ChatMessage> {
    messages.into_iter().map(|m| ChatMessage { role: m.role, content: m.content }).collect()
}

fn check_model_access<G: Generator>(lifecycle: &ModelLifecycleManager<G>, outcome: &AuthOutcome, model: &str) -> Result<(), Response> {
    if !lifecycle.has_model(model) {
        return Err(error_json(StatusCode::NOT_FOUND, "model not found"));
    }

    if let AuthOutcome::Allowed(models) = outcome {
        if !models.iter().any(|m| m == model) {
            return Err(error_json(StatusCode::FORBIDDEN, "Forbidden: token does not grant access to this model"));
        }
    }

    Ok(())
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn core_error_response(err: CoreError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_json(status, err.to_string())
}

/// A [`core_engine::scheduler::ResponseSink`] for non-streaming requests: no
/// real connection-drop signal is available once a single JSON body is the
/// whole response, so this just reports "connected" and ignores heartbeats
/// (non-streaming requests never set `wants_heartbeat`).
#[derive(Default)]
struct NonStreamingSink;

#[async_trait::async_trait]
impl core_engine::scheduler::ResponseSink for NonStreamingSink {
    fn is_disconnected(&self) -> bool {
        false
    }

    async fn write_heartbeat(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
