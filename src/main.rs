//! DuraKV - A Durable In-Memory Key-Value Server
//!
//! This is the main entry point for the DuraKV server.
//! It parses flags, loads the configuration file, sets up logging and runs
//! the server until Ctrl+C.

use clap::Parser;
use durakv::config::Config;
use durakv::server::Server;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line flags
#[derive(Debug, Parser)]
#[command(name = "durakv", version, about = "A durable Redis-compatible key-value server")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = durakv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = durakv::DEFAULT_PORT)]
    port: u16,

    /// Redis-style configuration file
    #[arg(short, long, default_value = "durakv.conf")]
    config: PathBuf,
}

impl Args {
    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_banner(args: &Args, config: &Config) {
    println!(
        r#"
 ____                  _  ____     __
|  _ \ _   _ _ __ __ _| |/ /\ \   / /
| | | | | | | '__/ _` | ' /  \ \ / /
| |_| | |_| | | | (_| | . \   \ V /
|____/ \__,_|_|  \__,_|_|\_\   \_/

DuraKV v{} - Durable In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Server started on {}
Data directory:   {}
Append-only log:  {}
Save rules:       {}

Use Ctrl+C to shutdown gracefully.
"#,
        durakv::VERSION,
        args.bind_address(),
        config.dir.display(),
        if config.appendonly {
            format!("on ({})", config.appendfsync)
        } else {
            "off".to_string()
        },
        config.save_rules.len(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = Config::load(&args.config)?;

    let server = Server::bind(&args.bind_address(), config.clone()).await?;
    let ctx = std::sync::Arc::clone(server.context());

    print_banner(&args, &config);

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        result = server.run() => result?,
        _ = shutdown => {}
    }

    info!(
        connections = ctx.stats().connections_accepted.load(Ordering::Relaxed),
        commands = ctx.stats().commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
