use std::path::PathBuf;

use clap::Parser;

/// `kiln` — a multi-tenant local LLM serving gateway.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about)]
pub struct Args {
    /// Path to the model configuration file.
    #[arg(long, short = 'c', default_value = "./config.json")]
    pub config: PathBuf,

    /// Port to listen on.
    #[arg(long, short = 'p', default_value_t = 9000)]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, short = 'h', default_value = "0.0.0.0")]
    pub host: String,

    /// Enable debug-level logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Require a valid bearer token on every request.
    #[arg(long, short = 't')]
    pub require_token: bool,
}
