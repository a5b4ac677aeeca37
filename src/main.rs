//! # dify-rag-mcp CLI
//!
//! Runs the knowledge-base protocol server or performs one-off checks
//! against the upstream service.
//!
//! ## Usage
//!
//! ```bash
//! dify-rag-mcp --config ./config/dify-rag-mcp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dify-rag-mcp serve` | Start the protocol server (stdio, sse or websocket) |
//! | `dify-rag-mcp health` | Probe the upstream with the configured credential |
//! | `dify-rag-mcp tools` | Print the tool catalog as JSON |
//!
//! ## Examples
//!
//! ```bash
//! # stdio, for an editor or agent that spawns the process
//! DIFY_API_KEY=dataset-... dify-rag-mcp serve
//!
//! # WebSocket on all interfaces
//! dify-rag-mcp serve --transport websocket --host 0.0.0.0 --port 8080
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dify_rag_mcp::client::ApiClient;
use dify_rag_mcp::config::{self, Config, TransportKind};
use dify_rag_mcp::dispatch::Dispatcher;
use dify_rag_mcp::mcp;
use dify_rag_mcp::server::ProtocolServer;
use dify_rag_mcp::transport::{http, stdio, ChannelTransport};

/// Protocol server for a remote RAG knowledge base.
///
/// Settings come from a TOML file plus `DIFY_*` environment variables.
/// See `config/dify-rag-mcp.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dify-rag-mcp",
    about = "Expose a RAG knowledge base as protocol tools and resources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing files are allowed when
    /// `DIFY_API_KEY` is set.
    #[arg(long, global = true, default_value = "./config/dify-rag-mcp.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the protocol server.
    ///
    /// Runs until end of input (stdio), Ctrl-C or SIGTERM, then drains
    /// in-flight requests before exiting.
    Serve {
        /// Transport: stdio, sse or websocket. Overrides `server.transport`.
        #[arg(long)]
        transport: Option<TransportKind>,

        /// Bind host for HTTP transports.
        #[arg(long)]
        host: Option<String>,

        /// Bind port for HTTP transports.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check that the upstream is reachable and the credential is accepted.
    Health,

    /// Print the tool catalog (names, descriptions, parameter schemas).
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout belongs to the stdio transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve {
            transport,
            host,
            port,
        } => {
            if let Some(transport) = transport {
                cfg.server.transport = transport;
            }
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            run_serve(&cfg).await?;
        }
        Commands::Health => {
            let dispatcher = build_dispatcher(&cfg)?;
            match dispatcher.health().await {
                Ok(()) => println!("ok: {}", cfg.upstream.base_url),
                Err(e) => {
                    eprintln!("health check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Tools => {
            let dispatcher = build_dispatcher(&cfg)?;
            println!("{}", serde_json::to_string_pretty(&dispatcher.list_tools())?);
        }
    }

    Ok(())
}

fn build_dispatcher(cfg: &Config) -> anyhow::Result<Dispatcher> {
    let api = Arc::new(ApiClient::new(cfg)?);
    Dispatcher::from_config(api, cfg)
}

async fn run_serve(cfg: &Config) -> anyhow::Result<()> {
    let dispatcher = Arc::new(build_dispatcher(cfg)?);

    let mut transport: ChannelTransport = match cfg.server.transport {
        TransportKind::Stdio => stdio::stdio(),
        kind => {
            let addr = cfg.server.bind_addr();
            let (transport, local_addr) = http::bind(kind, &addr, mcp::catalog(dispatcher.tools()))
                .await
                .with_context(|| format!("Failed to start {} transport", kind))?;
            println!("Listening on http://{}", local_addr);
            transport
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let server = ProtocolServer::new(dispatcher, cfg.server.drain_timeout());
    server.run(&mut transport, shutdown).await
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
