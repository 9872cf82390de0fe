use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use config::ModelEntry;
use tokio::sync::Mutex;

use crate::{ContextHandle, Generator, GeneratorError, ModelHandle, ModelInsights, SessionHandle};

/// An in-memory stand-in for the real inference runtime.
///
/// Useful both in tests and as the default backend when no native generator
/// feature is compiled in: every "model" is free to load, every prompt
/// echoes a deterministic canned reply (or, if `script` was configured for
/// that session, the next scripted reply), so tool-loop and scheduler
/// behavior can be exercised without a real model on disk.
pub struct MockGenerator {
    next_handle: AtomicU64,
    sessions: Mutex<HashMap<u64, SessionState>>,
    /// Bytes reported as free by `free_vram_bytes`. Tests can shrink this to
    /// force eviction to kick in.
    free_vram: Mutex<u64>,
    /// Script queued for whichever session is created next, since callers
    /// generally don't know a session's handle until after it's created.
    pending_script: Mutex<Vec<String>>,
}

struct SessionState {
    system_prompt: String,
    turns: Vec<String>,
    /// Pre-scripted replies returned in order, one per `prompt` call, falling
    /// back to an echo once exhausted.
    script: Vec<String>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl MockGenerator {
    /// Create a mock generator reporting `free_vram_bytes` as currently free.
    pub fn new(free_vram_bytes: u64) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            free_vram: Mutex::new(free_vram_bytes),
            pending_script: Mutex::new(Vec::new()),
        }
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Pre-load scripted replies for the next session created. Intended for
    /// tests that need to drive the tool-execution loop through specific
    /// tool-call / final-text sequences.
    pub async fn script_next_session(&self, session: SessionHandle, replies: Vec<String>) {
        if let Some(state) = self.sessions.lock().await.get_mut(&session.0) {
            state.script = replies;
        }
    }

    /// Adjust the free-VRAM figure this mock reports, to exercise the memory
    /// eviction path deterministically.
    pub async fn set_free_vram_bytes(&self, bytes: u64) {
        *self.free_vram.lock().await = bytes;
    }

    /// Queue scripted replies for whichever session gets created next. Useful
    /// for callers (like the tool-execution loop) that create their own
    /// session internally, so the handle isn't known ahead of time.
    pub async fn queue_script(&self, replies: Vec<String>) {
        *self.pending_script.lock().await = replies;
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn open_model(&self, _entry: &ModelEntry) -> Result<ModelHandle, GeneratorError> {
        Ok(ModelHandle(self.next()))
    }

    async fn dispose_model(&self, _handle: ModelHandle) -> Result<(), GeneratorError> {
        Ok(())
    }

    fn model_insights(&self, entry: &ModelEntry) -> Result<ModelInsights, GeneratorError> {
        let size_bytes = std::fs::metadata(&entry.path).map(|m| m.len()).unwrap_or(0);

        Ok(ModelInsights {
            layers: 32,
            size_bytes,
            model_vram_bytes: size_bytes.max(1),
            vram_bytes_per_context_token: 64 * 1024,
        })
    }

    async fn free_vram_bytes(&self) -> Result<u64, GeneratorError> {
        Ok(*self.free_vram.lock().await)
    }

    async fn create_context(&self, _model: ModelHandle, _context_size: u32) -> Result<ContextHandle, GeneratorError> {
        Ok(ContextHandle(self.next()))
    }

    async fn dispose_context(&self, _context: ContextHandle) -> Result<(), GeneratorError> {
        Ok(())
    }

    async fn create_session(&self, _context: ContextHandle, system_prompt: &str) -> Result<SessionHandle, GeneratorError> {
        let handle = SessionHandle(self.next());
        let script = std::mem::take(&mut *self.pending_script.lock().await);

        self.sessions.lock().await.insert(
            handle.0,
            SessionState {
                system_prompt: system_prompt.to_string(),
                turns: Vec::new(),
                script,
            },
        );

        Ok(handle)
    }

    async fn prompt(&self, session: SessionHandle, input: &str) -> Result<String, GeneratorError> {
        let mut sessions = self.sessions.lock().await;

        let state = sessions
            .get_mut(&session.0)
            .ok_or_else(|| GeneratorError::PromptFailed("unknown session".to_string()))?;

        state.turns.push(input.to_string());

        if !state.script.is_empty() {
            return Ok(state.script.remove(0));
        }

        Ok(format!("[mock reply to: {input}] (system: {})", state.system_prompt))
    }
}
