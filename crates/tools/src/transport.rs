use config::ToolProviderSpec;
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, Tool},
    service::RunningService,
    transport::{SseClientTransport, StreamableHttpClientTransport, TokioChildProcess},
};

use crate::error::ConnectError;

/// A live connection to one downstream MCP tool provider, no matter the
/// transport it speaks.
pub struct Connection {
    service: RunningService<RoleClient, ()>,
}

impl Connection {
    pub async fn connect(spec: &ToolProviderSpec) -> Result<Self, ConnectError> {
        let service = match spec {
            ToolProviderSpec::Stdio {
                command, args, cwd, env, ..
            } => connect_stdio(command, args, cwd.as_deref(), env).await?,
            ToolProviderSpec::Http { url, .. } => connect_http(url).await?,
        };

        Ok(Self { service })
    }

    pub async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        Ok(self.service.list_tools(Default::default()).await?.tools)
    }

    pub async fn call_tool(&self, params: CallToolRequestParam) -> anyhow::Result<CallToolResult> {
        Ok(self.service.call_tool(params).await?)
    }

    pub async fn disconnect(self) -> anyhow::Result<()> {
        self.service.cancel().await?;
        Ok(())
    }
}

async fn connect_stdio(
    command: &str,
    args: &[String],
    cwd: Option<&std::path::Path>,
    env: &std::collections::BTreeMap<String, String>,
) -> Result<RunningService<RoleClient, ()>, ConnectError> {
    let mut cmd = tokio::process::Command::new(command);
    cmd.args(args);

    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    for (key, value) in env {
        cmd.env(key, value);
    }

    let transport = TokioChildProcess::new(cmd).map_err(ConnectError::Spawn)?;

    ().serve(transport).await.map_err(|err| ConnectError::Session(err.into()))
}

async fn connect_http(url: &str) -> Result<RunningService<RoleClient, ()>, ConnectError> {
    let client = reqwest::Client::new();

    log::debug!("detecting protocol for tool provider at {url}, starting with streamable-http");

    let transport_config = rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig::with_uri(
        url.to_string(),
    );
    let transport = StreamableHttpClientTransport::with_client(client.clone(), transport_config);

    match ().serve(transport).await {
        Ok(service) => Ok(service),
        Err(err) => {
            log::warn!("streamable-http failed for {url} ({err}), trying SSE");

            let sse_config = rmcp::transport::sse_client::SseClientConfig {
                sse_endpoint: url.to_string().into(),
                retry_policy: std::sync::Arc::new(rmcp::transport::common::client_side_sse::FixedInterval::default()),
                use_message_endpoint: None,
            };

            let transport = SseClientTransport::start_with_client(client, sse_config)
                .await
                .map_err(|err| ConnectError::Session(err.into()))?;

            ().serve(transport).await.map_err(|err| ConnectError::Session(err.into()))
        }
    }
}
