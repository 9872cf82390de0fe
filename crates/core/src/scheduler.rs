//! Fair-batching request scheduler. One cooperative processor loop drains a
//! shared queue; a request never runs against a model until that model is
//! resident, and no two jobs ever execute concurrently.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use generator::Generator;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::lifecycle::{LoadedModel, ModelLifecycleManager};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Abstracts the connection a pending request is writing its response to, so
/// the scheduler never depends on `axum`/`hyper` body types directly.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Whether the underlying connection has already ended or been torn down.
    fn is_disconnected(&self) -> bool;

    /// Write one heartbeat frame. An error means the client is gone; the
    /// ticker stops and the request is left for the next pass's pruning.
    async fn write_heartbeat(&self) -> anyhow::Result<()>;
}

/// A unit of work executed once its model is resident. Takes the resident
/// record so it can reach the generator, codec, and tool-provider manager.
pub type Work = Box<dyn FnOnce(Arc<LoadedModel>) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>> + Send>;

struct PendingRequest {
    model: String,
    work: Option<Work>,
    sink: Arc<dyn ResponseSink>,
    queued_at: Instant,
    heartbeat: Option<JoinHandle<()>>,
    completion: Option<oneshot::Sender<Result<(), CoreError>>>,
}

impl PendingRequest {
    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct QueueState {
    queue: Vec<PendingRequest>,
}

/// Owns the pending-request queue and the `is_processing` discipline.
pub struct Scheduler<G: Generator> {
    lifecycle: Arc<ModelLifecycleManager<G>>,
    state: Mutex<QueueState>,
    processing: Mutex<()>,
}

impl<G: Generator + 'static> Scheduler<G> {
    pub fn new(lifecycle: Arc<ModelLifecycleManager<G>>) -> Arc<Self> {
        Arc::new(Self {
            lifecycle,
            state: Mutex::new(QueueState::default()),
            processing: Mutex::new(()),
        })
    }

    /// Queue a job for `model` and kick the processor. `wants_heartbeat`
    /// should be set for streaming requests using the native wire format;
    /// a heartbeat ticker is only started if the processor is already busy,
    /// since an idle processor will pick the request up immediately.
    pub async fn submit(
        self: &Arc<Self>,
        model: String,
        work: Work,
        sink: Arc<dyn ResponseSink>,
        wants_heartbeat: bool,
    ) -> oneshot::Receiver<Result<(), CoreError>> {
        let (tx, rx) = oneshot::channel();
        let processor_busy = self.processing.try_lock().is_err();

        let heartbeat = if wants_heartbeat && processor_busy {
            Some(start_heartbeat(sink.clone()))
        } else {
            None
        };

        {
            let mut state = self.state.lock().await;
            state.queue.push(PendingRequest {
                model,
                work: Some(work),
                sink,
                queued_at: Instant::now(),
                heartbeat,
                completion: Some(tx),
            });
        }

        let this = self.clone();
        tokio::spawn(async move { this.process().await });

        rx
    }

    /// The cooperative processor loop. `try_lock` ensures at most one pass
    /// runs at a time; a `submit` call that finds the processor already busy
    /// just returns, trusting the in-progress pass to pick up its request.
    async fn process(self: Arc<Self>) {
        let Ok(_guard) = self.processing.try_lock() else {
            return;
        };

        loop {
            self.prune_disconnected().await;

            let Some(model) = self.pick_next_model().await else {
                break;
            };

            match self.lifecycle.ensure_loaded(&model).await {
                Ok(record) => loop {
                    let batch = self.drain_batch(&model).await;
                    if batch.is_empty() {
                        break;
                    }

                    for mut req in batch {
                        req.stop_heartbeat();
                        record.acquire_context();
                        let work = req.work.take().expect("work taken exactly once");
                        let result = work(record.clone()).await;
                        record.release_context();

                        if let Some(tx) = req.completion.take() {
                            let _ = tx.send(result);
                        }
                    }
                },
                Err(err) => {
                    let rejected = self.drain_batch(&model).await;
                    for mut req in rejected {
                        req.stop_heartbeat();
                        if let Some(tx) = req.completion.take() {
                            let _ = tx.send(Err(err.clone_for_reject()));
                        }
                    }
                }
            }
        }
    }

    async fn prune_disconnected(&self) {
        let mut state = self.state.lock().await;
        let mut kept = Vec::with_capacity(state.queue.len());

        for mut req in state.queue.drain(..) {
            if req.sink.is_disconnected() {
                req.stop_heartbeat();
                if let Some(tx) = req.completion.take() {
                    let _ = tx.send(Ok(()));
                }
            } else {
                kept.push(req);
            }
        }

        state.queue = kept;
    }

    /// Prefer the best-scoring *loaded* model; fall back to the best
    /// *unloaded* one. Within a group, highest pending count wins, ties
    /// broken by earliest `queued_at`.
    async fn pick_next_model(&self) -> Option<String> {
        let tally = {
            let state = self.state.lock().await;
            if state.queue.is_empty() {
                return None;
            }

            let mut tally: HashMap<String, (usize, Instant)> = HashMap::new();
            for req in &state.queue {
                tally
                    .entry(req.model.clone())
                    .and_modify(|(count, earliest)| {
                        *count += 1;
                        if req.queued_at < *earliest {
                            *earliest = req.queued_at;
                        }
                    })
                    .or_insert((1, req.queued_at));
            }
            tally
        };

        let loaded: HashSet<String> = self.lifecycle.loaded_names().await;
        let (loaded_candidates, unloaded_candidates): (Vec<_>, Vec<_>) =
            tally.into_iter().partition(|(name, _)| loaded.contains(name));

        pick_best(loaded_candidates).or_else(|| pick_best(unloaded_candidates))
    }

    async fn drain_batch(&self, model: &str) -> Vec<PendingRequest> {
        let mut state = self.state.lock().await;
        let (matching, rest): (Vec<_>, Vec<_>) = state.queue.drain(..).partition(|req| req.model == model);
        state.queue = rest;
        matching
    }
}

fn pick_best(candidates: Vec<(String, (usize, Instant))>) -> Option<String> {
    candidates
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then_with(|| b.1.1.cmp(&a.1.1)))
        .map(|(name, _)| name)
}

fn start_heartbeat(sink: Arc<dyn ResponseSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            if sink.write_heartbeat().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    use config::ModelEntry;
    use generator::MockGenerator;

    use super::*;

    struct FakeSink {
        disconnected: bool,
    }

    #[async_trait]
    impl ResponseSink for FakeSink {
        fn is_disconnected(&self) -> bool {
            self.disconnected
        }

        async fn write_heartbeat(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn sink() -> Arc<dyn ResponseSink> {
        Arc::new(FakeSink { disconnected: false })
    }

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

    fn record_work(order: Arc<StdMutex<Vec<&'static str>>>, label: &'static str) -> Work {
        Box::new(move |_record| {
            Box::pin(async move {
                order.lock().unwrap().push(label);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn fair_batching_serves_loaded_model_requests_first() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let configs: BTreeMap<String, ModelEntry> =
            [("a".to_string(), entry("a", &prompt)), ("b".to_string(), entry("b", &prompt))]
                .into_iter()
                .collect();

        let lifecycle = Arc::new(ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs));
        lifecycle.ensure_loaded("b").await.unwrap();

        let scheduler = Scheduler::new(lifecycle);
        let order = Arc::new(StdMutex::new(Vec::new()));

        let a1 = scheduler
            .submit("a".to_string(), record_work(order.clone(), "a1"), sink(), false)
            .await;
        let b1 = scheduler
            .submit("b".to_string(), record_work(order.clone(), "b1"), sink(), false)
            .await;
        let b2 = scheduler
            .submit("b".to_string(), record_work(order.clone(), "b2"), sink(), false)
            .await;
        let a2 = scheduler
            .submit("a".to_string(), record_work(order.clone(), "a2"), sink(), false)
            .await;

        a1.await.unwrap().unwrap();
        b1.await.unwrap().unwrap();
        b2.await.unwrap().unwrap();
        a2.await.unwrap().unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["b1", "b2", "a1", "a2"]);
    }

    #[tokio::test]
    async fn disconnected_requests_are_pruned_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let configs: BTreeMap<String, ModelEntry> = [("a".to_string(), entry("a", &prompt))].into_iter().collect();
        let lifecycle = Arc::new(ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs));
        let scheduler = Scheduler::new(lifecycle);

        let ran = Arc::new(StdMutex::new(false));
        let ran_clone = ran.clone();
        let work: Work = Box::new(move |_record| {
            Box::pin(async move {
                *ran_clone.lock().unwrap() = true;
                Ok(())
            })
        });

        let disconnected_sink: Arc<dyn ResponseSink> = Arc::new(FakeSink { disconnected: true });
        let rx = scheduler.submit("a".to_string(), work, disconnected_sink, false).await;

        rx.await.unwrap().unwrap();
        assert!(!*ran.lock().unwrap(), "pruned request must never run its work closure");
    }

    #[tokio::test]
    async fn unknown_model_rejects_every_queued_request_for_it() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        std::fs::write(&prompt, "be helpful").unwrap();

        let configs: BTreeMap<String, ModelEntry> = BTreeMap::new();
        let lifecycle = Arc::new(ModelLifecycleManager::new(Arc::new(MockGenerator::default()), configs));
        let scheduler = Scheduler::new(lifecycle);

        let work: Work = Box::new(|_record| Box::pin(async { Ok(()) }));
        let rx = scheduler.submit("missing".to_string(), work, sink(), false).await;

        let result = rx.await.unwrap();
        assert_eq!(result.unwrap_err().status(), 404);
    }
}
