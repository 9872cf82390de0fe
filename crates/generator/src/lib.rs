//! Abstraction over the inference runtime ("the generator") that actually
//! loads model weights and runs text completion.
//!
//! The generator itself -- reading model files, running inference, managing
//! device memory -- is out of scope for this crate; a real implementation
//! lives elsewhere and is wired in behind the [`Generator`] trait. This crate
//! only defines the seam and ships [`MockGenerator`], an in-memory stand-in
//! used by tests and by default when no native backend is compiled in.

mod mock;

use async_trait::async_trait;
use config::ModelEntry;

pub use mock::MockGenerator;

/// Errors a generator implementation may report. All of these propagate to
/// the caller (the model lifecycle manager), which logs-and-continues for
/// disposal failures and propagates everything else.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("failed to open model artifact: {0}")]
    OpenFailed(String),
    #[error("failed to query device memory: {0}")]
    VramQueryFailed(String),
    #[error("failed to create inference context: {0}")]
    ContextFailed(String),
    #[error("inference failed: {0}")]
    PromptFailed(String),
}

/// Opaque handle to an opened model. Only meaningful to the [`Generator`]
/// implementation that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub u64);

/// Opaque handle to an inference context created against a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque handle to a chat session created within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Memory-sizing insights for a model, used by the eviction policy to decide
/// whether a candidate model fits in the currently free device memory.
#[derive(Debug, Clone, Copy)]
pub struct ModelInsights {
    /// Number of transformer layers, informational.
    pub layers: u32,
    /// On-disk size of the model artifact, in bytes.
    pub size_bytes: u64,
    /// Estimated device memory required to hold the model's weights, in bytes.
    pub model_vram_bytes: u64,
    /// Estimated device memory required per token of context, in bytes. Used
    /// to estimate the additional VRAM a given context window size will need.
    pub vram_bytes_per_context_token: u64,
}

impl ModelInsights {
    /// Estimated VRAM required for a context window of `context_size` tokens.
    pub fn context_vram_bytes(&self, context_size: u32) -> u64 {
        self.vram_bytes_per_context_token * u64::from(context_size)
    }
}

/// The inference runtime seam. Every method is a suspension point: callers
/// must assume control can be yielded to other tasks during the call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Open a model's weights, optionally applying a hardware-offload hint.
    /// Does not create any inference context yet.
    async fn open_model(&self, entry: &ModelEntry) -> Result<ModelHandle, GeneratorError>;

    /// Dispose of a previously opened model. Idempotent-ish: implementations
    /// should tolerate being called once per successful `open_model`.
    async fn dispose_model(&self, handle: ModelHandle) -> Result<(), GeneratorError>;

    /// Compute memory-sizing insights for a model entry without opening it.
    /// Failure here is logged-and-continued by the lifecycle manager; the
    /// model still loads, just without memory-aware eviction for it.
    fn model_insights(&self, entry: &ModelEntry) -> Result<ModelInsights, GeneratorError>;

    /// Currently free device memory, in bytes. A query failure means the
    /// lifecycle manager skips memory-based eviction for this pass and
    /// relies on the capacity-based policy alone.
    async fn free_vram_bytes(&self) -> Result<u64, GeneratorError>;

    /// Create an inference context bound to a loaded model, sized to
    /// `context_size` tokens.
    async fn create_context(&self, model: ModelHandle, context_size: u32) -> Result<ContextHandle, GeneratorError>;

    /// Dispose of a context created by `create_context`.
    async fn dispose_context(&self, context: ContextHandle) -> Result<(), GeneratorError>;

    /// Create a chat session within a context, seeded with the effective
    /// system prompt.
    async fn create_session(&self, context: ContextHandle, system_prompt: &str) -> Result<SessionHandle, GeneratorError>;

    /// Append a user turn to the session and run completion to produce the
    /// assistant's full response text. Non-streaming: the full text is
    /// returned at once; any presentation-layer streaming is done by
    /// splitting this text, not by the generator.
    async fn prompt(&self, session: SessionHandle, input: &str) -> Result<String, GeneratorError>;
}
