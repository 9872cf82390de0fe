/// Errors raised while calling a tool through the provider manager.
///
/// None of these ever reach an HTTP client directly: the tool-execution loop
/// catches them, turns them into `{success: false, result: <message>}`, and
/// feeds that back into the model's next turn as a formatted tool result.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool provider disconnected: {0}")]
    ProviderDisconnected(String),
    #[error("tool call failed: {0}")]
    ToolCallFailed(String),
}

/// Errors raised while connecting to a single tool provider. `connect_all`
/// logs and swallows these; they never stop the other providers from
/// connecting.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to start child process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to establish MCP session: {0}")]
    Session(#[source] anyhow::Error),
}
