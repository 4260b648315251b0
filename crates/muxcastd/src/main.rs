//! Daemon entry point: run the broadcast JSON-RPC server until stopped.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;

use muxcast_rpc::{BroadcastServer, ServerConfig};

/// Run a muxcast broadcast RPC server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Game id the relayed channels belong to.
    #[arg(long)]
    game_id: String,

    /// JID for the XMPP connection.
    #[arg(long)]
    jid: String,

    /// Password for the XMPP connection.
    #[arg(long)]
    password: String,

    /// XMPP MUC service address.
    #[arg(long)]
    muc: String,

    /// Port for the JSON-RPC broadcast server.
    #[arg(long)]
    port: u16,

    /// Whether the RPC server should listen only on localhost.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    listen_locally: bool,

    /// PEM bundle of root certificates to trust for TLS.
    #[arg(long)]
    root_ca: Option<PathBuf>,

    /// Milliseconds between refresh / reconnection attempts.
    #[arg(long, default_value_t = 30_000)]
    refresh_ms: u64,

    /// Server-side timeout for receive calls in milliseconds.
    #[arg(long, default_value_t = 3_000)]
    receive_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprint!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if args.port == 0 {
        eprintln!("Error: --port must be set");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ServerConfig::new(args.game_id, args.jid, args.password, args.muc);
    config.refresh_interval = Duration::from_millis(args.refresh_ms);
    config.receive_timeout = Duration::from_millis(args.receive_timeout_ms);

    let server = BroadcastServer::new(config);
    if let Some(path) = args.root_ca {
        server.set_root_ca(path)?;
    }
    server.start(args.port, args.listen_locally).await?;
    server.wait().await;
    Ok(())
}
