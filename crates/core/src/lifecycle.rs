//! Model lifecycle manager: loads, unloads, and tracks resident models with
//! capacity- and VRAM-aware eviction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use codecs::{Codec, ToolSchema};
use config::{Dialect, ModelEntry};
use generator::{Generator, ModelHandle};
use jiff::Timestamp;
use tools::ToolProviderManager;

use crate::error::CoreError;

/// Upper bound on simultaneously resident models.
pub const MAX_LOADED: usize = 3;
/// Device memory held back from loading decisions, in bytes.
pub const MEMORY_RESERVE_BYTES: u64 = 512 * 1024 * 1024;

/// A model currently resident in the generator, with its own tool-provider
/// connections and dialect codec.
pub struct LoadedModel {
    pub name: String,
    pub model_handle: ModelHandle,
    pub dialect: Dialect,
    pub context_size: u32,
    pub base_system_prompt: String,
    pub codec: Arc<dyn Codec>,
    pub tools: Arc<ToolProviderManager>,
    pub tool_list: Vec<ToolSchema>,
    pub loaded_at: Timestamp,
    last_used_at: std::sync::Mutex<Timestamp>,
    active_contexts: AtomicI64,
}

impl LoadedModel {
    pub fn last_used_at(&self) -> Timestamp {
        *self.last_used_at.lock().expect("last_used_at mutex poisoned")
    }

    pub fn active_contexts(&self) -> i64 {
        self.active_contexts.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *self.last_used_at.lock().expect("last_used_at mutex poisoned") = Timestamp::now();
    }

    pub fn acquire_context(&self) {
        self.active_contexts.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    pub fn release_context(&self) {
        self.active_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pure read-only summary of a configured model, for `/api/tags`-style listings.
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub name: String,
    pub loaded: bool,
}

/// Summary of a resident model, for `/api/ps`-style listings.
#[derive(Debug, Clone)]
pub struct RunningModelInfo {
    pub name: String,
    pub loaded_at: Timestamp,
    pub active_contexts: i64,
}

/// Full detail for one model, for `/api/show`-style responses.
#[derive(Debug, Clone)]
pub struct ModelDetails {
    pub name: String,
    pub dialect: Dialect,
    pub context_size: u32,
    pub tool_names: Vec<String>,
}

/// Owns every resident model and the single load lock that serializes
/// `ensure_loaded` globally.
pub struct ModelLifecycleManager<G: Generator> {
    generator: Arc<G>,
    configs: BTreeMap<String, ModelEntry>,
    insights: HashMap<String, generator::ModelInsights>,
    load_lock: tokio::sync::Mutex<()>,
    loaded: tokio::sync::Mutex<HashMap<String, Arc<LoadedModel>>>,
}

impl<G: Generator> ModelLifecycleManager<G> {
    /// Compute memory insights for every configured model up front, logging
    /// (not failing) any individual model whose insights can't be computed.
    pub fn new(generator: Arc<G>, configs: BTreeMap<String, ModelEntry>) -> Self {
        let mut insights = HashMap::new();

        for (name, entry) in &configs {
            match generator.model_insights(entry) {
                Ok(i) => {
                    insights.insert(name.clone(), i);
                }
                Err(err) => log::warn!("failed to compute memory insights for model '{name}': {err}"),
            }
        }

        Self {
            generator,
            configs,
            insights,
            load_lock: tokio::sync::Mutex::new(()),
            loaded: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn get_model_names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn get_model_config(&self, name: &str) -> Option<&ModelEntry> {
        self.configs.get(name)
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().await.contains_key(name)
    }

    pub async fn loaded_names(&self) -> HashSet<String> {
        self.loaded.lock().await.keys().cloned().collect()
    }

    pub async fn get_all_model_info(&self, allowed: Option<&[String]>) -> Vec<ModelSummary> {
        let loaded = self.loaded_names().await;

        self.configs
            .keys()
            .filter(|name| is_allowed(allowed, name))
            .map(|name| ModelSummary {
                name: name.clone(),
                loaded: loaded.contains(name),
            })
            .collect()
    }

    pub async fn get_running_model_info(&self, allowed: Option<&[String]>) -> Vec<RunningModelInfo> {
        self.loaded
            .lock()
            .await
            .values()
            .filter(|record| is_allowed(allowed, &record.name))
            .map(|record| RunningModelInfo {
                name: record.name.clone(),
                loaded_at: record.loaded_at,
                active_contexts: record.active_contexts(),
            })
            .collect()
    }

    pub async fn get_model_details(&self, name: &str, allowed: Option<&[String]>) -> Option<ModelDetails> {
        if !is_allowed(allowed, name) {
            return None;
        }

        let entry = self.configs.get(name)?;

        let tool_names = self
            .loaded
            .lock()
            .await
            .get(name)
            .map(|record| record.tool_list.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default();

        Some(ModelDetails {
            name: name.to_string(),
            dialect: entry.dialect,
            context_size: entry.context_size,
            tool_names,
        })
    }

    /// Return the resident record for `name`, loading it first if necessary.
    /// Concurrent callers are serialized through a single load lock with a
    /// re-check-after-acquire so only one actually performs the load.
    pub async fn ensure_loaded(&self, name: &str) -> Result<Arc<LoadedModel>, CoreError> {
        let entry = self.configs.get(name).ok_or(CoreError::NotFound)?;

        if let Some(record) = self.loaded.lock().await.get(name) {
            return Ok(record.clone());
        }

        let _load_guard = self.load_lock.lock().await;

        if let Some(record) = self.loaded.lock().await.get(name) {
            return Ok(record.clone());
        }

        self.ensure_capacity(entry).await;

        let record = self.load(entry).await?;
        self.loaded.lock().await.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn ensure_capacity(&self, entry: &ModelEntry) {
        loop {
            let count = self.loaded.lock().await.len();
            if count + 1 <= MAX_LOADED {
                break;
            }
            if !self.evict_one().await {
                break;
            }
        }

        let Some(insights) = self.insights.get(&entry.name) else {
            return;
        };

        loop {
            let free = match self.generator.free_vram_bytes().await {
                Ok(free) => free,
                Err(err) => {
                    log::warn!("failed to query free VRAM, skipping memory-based eviction: {err}");
                    return;
                }
            };

            let needed = insights.model_vram_bytes + insights.context_vram_bytes(entry.context_size);
            let available = free.saturating_sub(MEMORY_RESERVE_BYTES);

            if needed <= available {
                break;
            }
            if !self.evict_one().await {
                break;
            }
        }
    }

    /// Evict the resident model with `active_contexts == 0` and the oldest
    /// `last_used_at`. Returns `false` (abort) if every resident model is
    /// currently active.
    async fn evict_one(&self) -> bool {
        let victim = {
            let loaded = self.loaded.lock().await;
            loaded
                .values()
                .filter(|r| r.active_contexts() == 0)
                .min_by_key(|r| r.last_used_at())
                .map(|r| r.name.clone())
        };

        let Some(victim) = victim else { return false };
        self.unload(&victim).await;
        true
    }

    async fn load(&self, entry: &ModelEntry) -> Result<Arc<LoadedModel>, CoreError> {
        let handle = self
            .generator
            .open_model(entry)
            .await
            .map_err(|err| CoreError::Internal(err.into()))?;

        let base_system_prompt = match std::fs::read_to_string(&entry.system_prompt_file) {
            Ok(text) => text,
            Err(err) => {
                if let Err(dispose_err) = self.generator.dispose_model(handle).await {
                    log::warn!(
                        "failed to dispose model '{}' after system prompt read failure: {dispose_err}",
                        entry.name
                    );
                }
                return Err(CoreError::Internal(anyhow::anyhow!(
                    "failed to read system prompt for '{}': {err}",
                    entry.name
                )));
            }
        };

        let tools = Arc::new(ToolProviderManager::new());
        tools.connect_all(&entry.tool_providers).await;
        let tool_list = tools.get_all_tools().await;
        let codec: Arc<dyn Codec> = Arc::from(codecs::for_dialect(to_codec_dialect(entry.dialect)));

        Ok(Arc::new(LoadedModel {
            name: entry.name.clone(),
            model_handle: handle,
            dialect: entry.dialect,
            context_size: entry.context_size,
            base_system_prompt,
            codec,
            tools,
            tool_list,
            loaded_at: Timestamp::now(),
            last_used_at: std::sync::Mutex::new(Timestamp::now()),
            active_contexts: AtomicI64::new(0),
        }))
    }

    /// Remove the record from the map before disposing anything, so a lookup
    /// racing the teardown fails fast rather than reaching a half-torn-down
    /// model.
    async fn unload(&self, name: &str) {
        let record = self.loaded.lock().await.remove(name);
        let Some(record) = record else { return };

        if let Err(err) = self.generator.dispose_model(record.model_handle).await {
            log::warn!("failed to dispose model '{name}': {err}");
        }
        record.tools.disconnect_all().await;
    }

    pub async fn acquire_context(&self, name: &str) {
        if let Some(record) = self.loaded.lock().await.get(name) {
            record.acquire_context();
        }
    }

    pub async fn release_context(&self, name: &str) {
        if let Some(record) = self.loaded.lock().await.get(name) {
            record.release_context();
        }
    }

    /// Unload every resident model, serially, logging (not failing) on
    /// individual disposal errors.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.loaded.lock().await.keys().cloned().collect();
        for name in names {
            self.unload(&name).await;
        }
    }
}

fn is_allowed(allowed: Option<&[String]>, name: &str) -> bool {
    match allowed {
        Some(list) => list.iter().any(|m| m == name),
        None => true,
    }
}

fn to_codec_dialect(dialect: Dialect) -> codecs::Dialect {
    match dialect {
        Dialect::TagDelimited => codecs::Dialect::TagDelimited,
        Dialect::SquareBracket => codecs::Dialect::SquareBracket,
        Dialect::TagDelimitedAlt => codecs::Dialect::TagDelimitedAlt,
    }
}

#[cfg(test)]
mod tests {
    use generator::MockGenerator;

    use super::*;

    fn entry(name: &str, prompt_path: &std::path::Path) -> ModelEntry {
        let mut entry: ModelEntry = serde_json::from_value(serde_json::json!({
            "path": "/nonexistent/model.gguf",
            "dialect": "tag-delimited",
            "system_prompt_file": prompt_path,
            "context_size": 4096
        }))
        .unwrap();
        entry.name = name.to_string();
        entry
    }

    fn configs(names: &[&str], prompt_path: &std::path::Path) -> BTreeMap<String, ModelEntry> {
        names
            .iter()
            .map(|name| (name.to_string(), entry(name, prompt_path)))
            .collect()
    }

    #[tokio::test]
    async fn ensure_loaded_creates_and_reuses_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let manager = ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs(&["a"], &prompt));

        let first = manager.ensure_loaded("a").await.unwrap();
        let second = manager.ensure_loaded("a").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(manager.is_loaded("a").await);
    }

    #[tokio::test]
    async fn ensure_loaded_unknown_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let manager = ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs(&["a"], &prompt));

        let err = manager.ensure_loaded("missing").await.unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn cap_eviction_picks_the_oldest_idle_model() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let manager = ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs(&["a", "b", "c", "d"], &prompt));

        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();
        manager.ensure_loaded("c").await.unwrap();
        assert_eq!(manager.loaded_names().await.len(), 3);

        manager.ensure_loaded("d").await.unwrap();

        let loaded = manager.loaded_names().await;
        assert_eq!(loaded.len(), 3);
        assert!(!loaded.contains("a"));
        assert!(loaded.contains("d"));
    }

    #[tokio::test]
    async fn eviction_does_not_touch_active_models() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let manager = ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs(&["a", "b", "c", "d"], &prompt));

        let a = manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();
        manager.ensure_loaded("c").await.unwrap();
        a.acquire_context();

        manager.ensure_loaded("d").await.unwrap();

        let loaded = manager.loaded_names().await;
        assert!(loaded.contains("a"), "active model must not be evicted");
    }

    #[tokio::test]
    async fn memory_eviction_kicks_in_when_free_vram_is_tight() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let gen = Arc::new(MockGenerator::new(600 * 1024 * 1024));
        let manager = ModelLifecycleManager::new(gen.clone(), configs(&["a", "b"], &prompt));

        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();

        let loaded = manager.loaded_names().await;
        assert_eq!(loaded.len(), 1, "second model should have evicted the first to fit in tight VRAM");
    }

    #[tokio::test]
    async fn acquire_and_release_context_adjust_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let manager = ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs(&["a"], &prompt));
        let record = manager.ensure_loaded("a").await.unwrap();

        manager.acquire_context("a").await;
        assert_eq!(record.active_contexts(), 1);
        manager.release_context("a").await;
        assert_eq!(record.active_contexts(), 0);
    }
}
