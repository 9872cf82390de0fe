//! Model and tool-provider configuration structures.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// The tool-call dialect a model expects in its prompts and responses.
///
/// Three dialects are supported; each pairs with a codec in the `codecs` crate
/// that knows how to format tool offers and parse tool calls for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// `<tool_call>{"name":...,"arguments":{...}}</tool_call>` tag-delimited JSON.
    TagDelimited,
    /// `[func(param='value', other=123)]` square-bracket function-call syntax.
    SquareBracket,
    /// Wire-identical to `TagDelimited`, with different system-prompt instructions.
    TagDelimitedAlt,
}

/// Specification of a tool provider a model is allowed to reach.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ToolProviderSpec {
    /// A tool provider reached by spawning a child process speaking MCP over stdio.
    Stdio {
        /// The provider's name, used to qualify tool names as `<name>__<tool>`.
        name: String,
        /// Executable to spawn.
        command: String,
        /// Arguments passed to the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory for the child process. Defaults to the current one.
        #[serde(default)]
        cwd: Option<PathBuf>,
        /// Extra environment variables to set for the child process.
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// A tool provider reached over a remote MCP HTTP transport (streamable-HTTP or SSE).
    Http {
        /// The provider's name, used to qualify tool names as `<name>__<tool>`.
        name: String,
        /// Base URL of the remote MCP server.
        url: String,
    },
}

impl ToolProviderSpec {
    /// The configured name of this provider.
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. } => name,
            Self::Http { name, .. } => name,
        }
    }
}

/// A single entry in the model configuration map.
///
/// The map key (not stored here) is the logical model name clients refer to
/// in `model` fields of requests; it is filled into [`ModelEntry::name`] by
/// the loader once the surrounding map is known.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    /// Filled in by the loader from the surrounding map key, not read from JSON.
    #[serde(skip)]
    pub name: String,
    /// Path to the on-disk model artifact. Resolution of the generator-specific
    /// file format is out of scope here; this is an opaque path handed to it.
    pub path: PathBuf,
    /// The tool-call dialect this model expects.
    pub dialect: Dialect,
    /// Path to a text file containing the model's base system prompt.
    ///
    /// Required: a model entry missing this field fails configuration loading
    /// rather than falling back to an empty prompt.
    pub system_prompt_file: PathBuf,
    /// Optional hardware-offload hint passed through to the generator verbatim
    /// (e.g. a GPU layer count or device string); opaque to this crate.
    #[serde(default)]
    pub offload_hint: Option<String>,
    /// Context window size, in tokens, used both to size the inference context
    /// and to estimate per-context VRAM use during eviction.
    pub context_size: u32,
    /// Tool providers this model is allowed to call.
    #[serde(default)]
    pub tool_providers: Vec<ToolProviderSpec>,
}

/// Top-level model configuration, as parsed from the `models` object of the
/// config file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_debug_snapshot;

    use super::*;

    #[test]
    fn tool_provider_spec_shapes() {
        let json = indoc! {r#"
            [
              {"transport": "stdio", "name": "fs", "command": "mcp-fs", "args": ["--root", "/tmp"]},
              {"transport": "http", "name": "search", "url": "http://localhost:9001"}
            ]
        "#};

        let specs: Vec<ToolProviderSpec> = serde_json::from_str(json).unwrap();

        assert_debug_snapshot!(&specs, @r#"
        [
            Stdio {
                name: "fs",
                command: "mcp-fs",
                args: [
                    "--root",
                    "/tmp",
                ],
                cwd: None,
                env: {},
            },
            Http {
                name: "search",
                url: "http://localhost:9001",
            },
        ]
        "#);
    }

    #[test]
    fn dialect_parses_from_kebab_case_tags() {
        assert_debug_snapshot!(
            [
                serde_json::from_str::<Dialect>("\"tag-delimited\"").unwrap(),
                serde_json::from_str::<Dialect>("\"square-bracket\"").unwrap(),
                serde_json::from_str::<Dialect>("\"tag-delimited-alt\"").unwrap(),
            ],
            @r"
        [
            TagDelimited,
            SquareBracket,
            TagDelimitedAlt,
        ]
        "
        );
    }
}
