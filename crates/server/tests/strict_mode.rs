//! End-to-end coverage of the strict-mode access filter (spec scenario 6):
//! a token scoped to one model must see only that model in listings and be
//! refused access to any other, and an unauthenticated request must be
//! refused outright once `--require-token` is on.

use std::collections::BTreeMap;
use std::sync::Arc;

use config::{Config, Dialect, ModelEntry, TokenRecord, TokenStore};
use generator::MockGenerator;
use jiff::Timestamp;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

async fn model_entry(dir: &std::path::Path, name: &str) -> ModelEntry {
    let prompt_path = dir.join(format!("{name}.txt"));
    tokio::fs::write(&prompt_path, "be helpful").await.unwrap();

    ModelEntry {
        name: name.to_string(),
        path: dir.join(format!("{name}.gguf")),
        dialect: Dialect::TagDelimited,
        system_prompt_file: prompt_path,
        offload_hint: None,
        context_size: 4096,
        tool_providers: Vec::new(),
    }
}

struct RunningServer {
    base_url: String,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    async fn start(models: BTreeMap<String, ModelEntry>, tokens: TokenStore, require_token: bool) -> Self {
        let shutdown = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let serve_config = ServeConfig {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            config: Config { models },
            tokens,
            require_token,
            generator: Arc::new(MockGenerator::default()),
            shutdown_signal: shutdown.clone(),
            log_filter: "off".to_string(),
            version: "test".to_string(),
            bound_addr_sender: Some(tx),
        };

        let handle = tokio::spawn(async move {
            server::serve(serve_config).await.unwrap();
        });

        let addr = rx.await.unwrap();

        Self {
            base_url: format!("http://{addr}"),
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

fn two_model_config(dir: &std::path::Path) -> impl std::future::Future<Output = BTreeMap<String, ModelEntry>> {
    let dir = dir.to_path_buf();
    async move {
        let mut models = BTreeMap::new();
        models.insert("baseball".to_string(), model_entry(&dir, "baseball").await);
        models.insert("assistant".to_string(), model_entry(&dir, "assistant").await);
        models
    }
}

fn token_store_with(token: &str, models: &[&str]) -> TokenStore {
    let mut store = TokenStore::default();
    store.upsert(
        token,
        TokenRecord {
            note: "test token".to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            created_at: Timestamp::constant(0, 0),
        },
    );
    store
}

#[tokio::test]
async fn strict_mode_scopes_listings_and_rejects_other_models() {
    let dir = tempfile::tempdir().unwrap();
    let models = two_model_config(dir.path()).await;
    let tokens = token_store_with("t1", &["baseball"]);

    let server = RunningServer::start(models, tokens, true).await;
    let client = reqwest::Client::new();

    let tags: serde_json::Value = client
        .get(format!("{}/api/tags", server.base_url))
        .bearer_auth("t1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let names: Vec<&str> = tags["models"].as_array().unwrap().iter().map(|m| m["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["baseball"]);

    let forbidden = client
        .post(format!("{}/api/chat", server.base_url))
        .bearer_auth("t1")
        .json(&serde_json::json!({
            "model": "assistant",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let no_token = client
        .get(format!("{}/api/tags", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(no_token.status(), 403);

    server.stop().await;
}

#[tokio::test]
async fn strict_mode_allows_cors_preflight_unconditionally() {
    let dir = tempfile::tempdir().unwrap();
    let models = two_model_config(dir.path()).await;
    let tokens = TokenStore::default();

    let server = RunningServer::start(models, tokens, true).await;
    let client = reqwest::Client::new();

    let response = client
        .request(reqwest::Method::OPTIONS, format!("{}/api/chat", server.base_url))
        .header("Origin", "http://example.com")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    server.stop().await;
}

#[tokio::test]
async fn lax_mode_allows_unauthenticated_chat_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let models = two_model_config(dir.path()).await;

    let server = RunningServer::start(models, TokenStore::default(), false).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/chat", server.base_url))
        .json(&serde_json::json!({
            "model": "baseball",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["done"], true);
    assert!(body["message"]["content"].as_str().unwrap().contains("hi"));

    server.stop().await;
}
