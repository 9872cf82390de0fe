use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use config::{Config, TokenStore};
use generator::MockGenerator;
use tokio_util::sync::CancellationToken;

mod args;

use args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config from {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    let host: IpAddr = match args.host.parse() {
        Ok(host) => host,
        Err(err) => {
            eprintln!("invalid --host value '{}': {err}", args.host);
            return ExitCode::FAILURE;
        }
    };

    let tokens_path = args.config.with_file_name("tokens.json");
    let tokens = TokenStore::load(&tokens_path);

    let shutdown_signal = CancellationToken::new();
    let shutdown_signal_for_ctrl_c = shutdown_signal.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal_for_ctrl_c.cancel();
    });

    let log_filter = if args.debug { "debug".to_string() } else { "info".to_string() };

    let result = server::serve(server::ServeConfig {
        listen_address: SocketAddr::new(host, args.port),
        config,
        tokens,
        require_token: args.require_token,
        generator: Arc::new(MockGenerator::default()),
        shutdown_signal,
        log_filter,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fatal error: {err}");
            ExitCode::FAILURE
        }
    }
}
