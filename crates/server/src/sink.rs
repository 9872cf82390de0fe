//! Channel-fed streaming response bodies. `StreamChannel` lets a handler
//! return response headers immediately while a background job keeps
//! writing frames; `tx.is_closed()` becomes the disconnect signal once the
//! client drops the connection and axum stops polling the body.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use core_engine::scheduler::ResponseSink;
use core_engine::tool_loop::ChunkSink;
use futures::stream;
use tokio::sync::mpsc;

use crate::wire;

struct StreamChannel {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl StreamChannel {
    fn new() -> (Self, Body) {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (Ok::<_, std::io::Error>(frame), rx)) });
        (Self { tx }, Body::from_stream(stream))
    }

    fn send(&self, frame: String) -> anyhow::Result<()> {
        self.tx.send(Bytes::from(frame)).map_err(|_| anyhow::anyhow!("client disconnected"))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Sink for `/api/chat` and `/api/generate` streaming responses: NDJSON
/// frames, heartbeats written by the scheduler while the request is queued.
pub struct NativeStreamSink {
    channel: StreamChannel,
    model: String,
}

impl NativeStreamSink {
    pub fn new(model: String) -> (Arc<Self>, Body) {
        let (channel, body) = StreamChannel::new();
        (Arc::new(Self { channel, model }), body)
    }

    pub async fn write_done(&self) -> anyhow::Result<()> {
        self.channel.send(wire::native_done_line(&self.model))
    }
}

#[async_trait]
impl ResponseSink for NativeStreamSink {
    fn is_disconnected(&self) -> bool {
        self.channel.is_closed()
    }

    async fn write_heartbeat(&self) -> anyhow::Result<()> {
        self.channel.send(wire::native_chunk_line(&self.model, ""))
    }
}

#[async_trait]
impl ChunkSink for NativeStreamSink {
    async fn write_chunk(&self, content: &str) -> anyhow::Result<()> {
        self.channel.send(wire::native_chunk_line(&self.model, content))
    }
}

/// Sink for `/v1/chat/completions` streaming responses: SSE frames, no
/// heartbeat ticker (the scheduler only starts one when `wants_heartbeat`).
pub struct OpenAiStreamSink {
    channel: StreamChannel,
    id: String,
    model: String,
    created: i64,
}

impl OpenAiStreamSink {
    pub fn new(id: String, model: String, created: i64) -> (Arc<Self>, Body) {
        let (channel, body) = StreamChannel::new();
        (Arc::new(Self { channel, id, model, created }), body)
    }

    pub async fn write_done(&self) -> anyhow::Result<()> {
        self.channel.send(wire::openai_done_chunk_line(&self.id, &self.model, self.created))?;
        self.channel.send(wire::OPENAI_STREAM_TERMINATOR.to_string())
    }
}

#[async_trait]
impl ResponseSink for OpenAiStreamSink {
    fn is_disconnected(&self) -> bool {
        self.channel.is_closed()
    }

    async fn write_heartbeat(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for OpenAiStreamSink {
    async fn write_chunk(&self, content: &str) -> anyhow::Result<()> {
        self.channel.send(wire::openai_chunk_line(&self.id, &self.model, self.created, content))
    }
}
