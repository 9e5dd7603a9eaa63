//! beamrpc command-line entry points.
//!
//! ```bash
//! # Run a naming registry
//! beamrpc registry -l 0.0.0.0 -p 9000
//!
//! # Invoke a method on a server (JSON arguments, JSON output)
//! beamrpc call 127.0.0.1:7000 Arith.Sum '{"num1": 1, "num2": 1}'
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tokio::net::TcpListener;

use beamrpc_client::Client;
use beamrpc_common::{Handshake, WireFormat};
use beamrpc_registry::{Registry, DEFAULT_PATH};

/// beamrpc - a small distributed RPC system
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Registry(RegistryCmd),
    Call(CallCmd),
}

/// run a naming registry
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
struct RegistryCmd {
    /// ip address to listen on
    #[argh(option, short = 'l', default = "String::from(\"0.0.0.0\")")]
    listen: String,

    /// port to listen on
    #[argh(option, short = 'p', default = "9000")]
    port: u16,

    /// seconds before an endpoint without a heartbeat is dropped
    #[argh(option, default = "300")]
    timeout: u64,
}

/// invoke a method on a server
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
struct CallCmd {
    /// server endpoint, host:port
    #[argh(positional)]
    addr: String,

    /// dotted method name, Service.Method
    #[argh(positional)]
    method: String,

    /// method arguments as a JSON document
    #[argh(positional, default = "String::from(\"null\")")]
    args: String,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli: Cli = argh::from_env();
    match cli.command {
        Command::Registry(cmd) => run_registry(cmd).await,
        Command::Call(cmd) => run_call(cmd).await,
    }
}

async fn run_registry(cmd: RegistryCmd) -> Result<()> {
    let registry = Arc::new(Registry::new(Duration::from_secs(cmd.timeout)));
    let bind = format!("{}:{}", cmd.listen, cmd.port);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to listen on {bind}"))?;
    registry.serve(listener, DEFAULT_PATH).await?;
    Ok(())
}

async fn run_call(cmd: CallCmd) -> Result<()> {
    let args: serde_json::Value = serde_json::from_str(&cmd.args)
        .with_context(|| format!("arguments are not valid JSON: {}", cmd.args))?;

    let client = Client::dial(&cmd.addr, Handshake::with_codec(WireFormat::Json))
        .await
        .with_context(|| format!("failed to dial {}", cmd.addr))?;
    let reply: serde_json::Value = client.call(&cmd.method, &args).await?;
    let _ = client.close().await;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
