//! Bearer-token access store: which tokens exist, and which models each grants access to.

use std::collections::BTreeMap;
use std::path::Path;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A single issued access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Free-form operator note (e.g. who the token was issued to).
    pub note: String,
    /// Model names this token grants access to.
    pub models: Vec<String>,
    /// When the token was created.
    pub created_at: Timestamp,
}

/// The on-disk token store: `{"tokens": {"<64-hex>": TokenRecord, ...}}`.
///
/// A missing or unparseable file is treated as an empty store rather than an
/// error, so a fresh deployment with `--require-token` off doesn't need one.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenStore {
    #[serde(default)]
    tokens: BTreeMap<String, TokenRecord>,
}

impl TokenStore {
    /// Load a token store from `path`. Missing file or parse failure both
    /// yield an empty store; only I/O errors other than "not found" propagate.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };

        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Persist the store to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up a token by its hex value.
    pub fn get(&self, token: &str) -> Option<&TokenRecord> {
        self.tokens.get(token)
    }

    /// Insert or overwrite a token record.
    pub fn upsert(&mut self, token: impl Into<String>, record: TokenRecord) {
        self.tokens.insert(token.into(), record);
    }

    /// Remove a token. Returns the removed record, if any existed.
    pub fn revoke(&mut self, token: &str) -> Option<TokenRecord> {
        self.tokens.remove(token)
    }

    /// Iterate over all tokens and their records.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TokenRecord)> {
        self.tokens.iter()
    }

    /// Whether the store has no tokens at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
