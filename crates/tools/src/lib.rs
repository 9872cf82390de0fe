//! Tool-provider manager: connects to every tool provider a model declares,
//! builds the two tool-name lookup indexes, and is the single place that
//! actually invokes a tool on a model's behalf.

mod descriptor;
mod error;
mod transport;

use std::collections::HashMap;

use codecs::{ToolParameterSchema, ToolSchema};
use config::ToolProviderSpec;
use rmcp::model::CallToolRequestParam;
use tokio::sync::RwLock;

pub use descriptor::ToolDescriptor;
pub use error::{ConnectError, ToolError};
use transport::Connection;

struct ConnectedProvider {
    connection: Connection,
    tools: Vec<ToolDescriptor>,
}

#[derive(Default)]
struct Inner {
    providers: HashMap<String, ConnectedProvider>,
    /// Lookup key (plain or qualified name) -> provider name.
    tool_to_provider: HashMap<String, String>,
    /// Lookup key -> descriptor, so `call_tool` knows the provider's own
    /// (unqualified) name to pass over the wire.
    tool_to_descriptor: HashMap<String, ToolDescriptor>,
}

/// Owns every tool-provider connection for one loaded model.
///
/// A model's loaded-record exclusively owns one of these; on unload the
/// record is removed from the lifecycle manager's map before this is
/// disposed, so any lookup racing the teardown fails fast with
/// [`ToolError::ProviderDisconnected`] rather than reaching a half-closed
/// connection.
#[derive(Default)]
pub struct ToolProviderManager {
    inner: RwLock<Inner>,
}

impl ToolProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to every provider spec, logging and skipping any that fail.
    pub async fn connect_all(&self, specs: &[ToolProviderSpec]) {
        for spec in specs {
            if let Err(err) = self.connect(spec).await {
                log::warn!("failed to connect tool provider '{}': {err}", spec.name());
            }
        }
    }

    /// Connect to a single provider. Listing its tools is best-effort: a
    /// provider that connects but fails to list tools is kept around as a
    /// tool-less provider rather than failing the whole connect.
    pub async fn connect(&self, spec: &ToolProviderSpec) -> Result<(), ConnectError> {
        let connection = Connection::connect(spec).await?;
        let provider_name = spec.name().to_string();

        let tools = match connection.list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                log::warn!("provider '{provider_name}' connected but failed to list tools: {err}");
                Vec::new()
            }
        };

        let mut inner = self.inner.write().await;

        let descriptors: Vec<ToolDescriptor> = tools
            .into_iter()
            .map(|tool| {
                let parameters: ToolParameterSchema =
                    serde_json::from_value(serde_json::Value::Object((*tool.input_schema).clone())).unwrap_or_default();

                ToolDescriptor::new(&provider_name, &tool.name, tool.description.unwrap_or_default().to_string(), parameters)
            })
            .collect();

        for descriptor in &descriptors {
            inner
                .tool_to_provider
                .insert(descriptor.qualified_name.clone(), provider_name.clone());
            inner
                .tool_to_descriptor
                .insert(descriptor.qualified_name.clone(), descriptor.clone());

            // First-writer-wins: a later provider never displaces an
            // existing plain-name registration.
            inner
                .tool_to_provider
                .entry(descriptor.plain_name.clone())
                .or_insert_with(|| provider_name.clone());
            inner
                .tool_to_descriptor
                .entry(descriptor.plain_name.clone())
                .or_insert_with(|| descriptor.clone());
        }

        inner.providers.insert(provider_name, ConnectedProvider { connection, tools: descriptors });

        Ok(())
    }

    /// All tools across every connected provider, deduplicated: a tool that
    /// won its plain-name registration is listed by that plain name; one
    /// that lost the collision is listed by its qualified name instead, so
    /// it stays reachable rather than silently disappearing from the list a
    /// model is offered. See DESIGN.md's `crates/tools` section for the
    /// open-question rationale behind this resolution.
    pub async fn get_all_tools(&self) -> Vec<ToolSchema> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();

        for provider in inner.providers.values() {
            for tool in &provider.tools {
                let owns_plain_name = inner
                    .tool_to_descriptor
                    .get(&tool.plain_name)
                    .is_some_and(|owner| owner.qualified_name == tool.qualified_name);

                let name = if owns_plain_name {
                    tool.plain_name.clone()
                } else {
                    tool.qualified_name.clone()
                };

                out.push(ToolSchema {
                    name,
                    description: tool.description.clone(),
                    input_schema: tool.parameters.clone(),
                });
            }
        }

        out
    }

    /// Find the descriptor for a tool name (plain or qualified), if any
    /// provider registered it.
    pub async fn find_tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.inner.read().await.tool_to_descriptor.get(name).cloned()
    }

    /// Invoke a tool by name (plain or qualified) with JSON arguments.
    /// Joins the result's text content parts with newlines; falls back to
    /// the raw structured content if no text parts were present.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String, ToolError> {
        let (provider_name, wire_name) = {
            let inner = self.inner.read().await;

            let provider_name = inner
                .tool_to_provider
                .get(name)
                .cloned()
                .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

            let wire_name = inner
                .tool_to_descriptor
                .get(name)
                .map(|d| d.plain_name.clone())
                .unwrap_or_else(|| name.to_string());

            (provider_name, wire_name)
        };

        let inner = self.inner.read().await;
        let provider = inner
            .providers
            .get(&provider_name)
            .ok_or_else(|| ToolError::ProviderDisconnected(provider_name.clone()))?;

        let arguments = match arguments {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => other.as_object().cloned(),
        };

        let params = CallToolRequestParam {
            name: wire_name.into(),
            arguments,
        };

        let result = provider
            .connection
            .call_tool(params)
            .await
            .map_err(|err| ToolError::ToolCallFailed(err.to_string()))?;

        Ok(render_result(&result))
    }

    /// Disconnect every provider, logging and swallowing individual failures.
    pub async fn disconnect_all(&self) {
        let mut inner = self.inner.write().await;
        let providers = std::mem::take(&mut inner.providers);
        inner.tool_to_provider.clear();
        inner.tool_to_descriptor.clear();
        drop(inner);

        for (name, provider) in providers {
            if let Err(err) = provider.connection.disconnect().await {
                log::warn!("error disconnecting tool provider '{name}': {err}");
            }
        }
    }
}

fn render_result(result: &rmcp::model::CallToolResult) -> String {
    let joined = result
        .content
        .iter()
        .filter_map(|content| content.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n");

    if !joined.is_empty() {
        return joined;
    }

    serde_json::to_string(&result.content).unwrap_or_default()
}
