//! Configuration structures for the model-serving gateway: the model/tool-provider
//! JSON config file and the bearer-token JSON store.

#![deny(missing_docs)]

mod error;
mod loader;
mod model;
mod token;

use std::collections::BTreeMap;
use std::path::Path;

pub use error::Error;
pub use model::{Dialect, ModelEntry, ToolProviderSpec};
pub use token::{TokenRecord, TokenStore};

/// Parsed model configuration: the set of models this gateway can serve, keyed
/// by the logical name clients address in request bodies.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Models keyed by logical name.
    pub models: BTreeMap<String, ModelEntry>,
}

impl Config {
    /// Load and validate a model configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Look up a model entry by name.
    pub fn model(&self, name: &str) -> Option<&ModelEntry> {
        self.models.get(name)
    }

    /// All configured model names.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
