//! Stubby Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stubby_server::config::{self, ServerSettings};
use stubby_server::{http, ConfigWatcher, StubServer};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stubby-server",
    about = "HTTP stub server - canned responses matched from a YAML declaration file",
    version
)]
struct Args {
    /// Path to the stub declarations
    #[arg(short, long, default_value = "stubs.yaml")]
    config: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8882)]
    port: u16,

    /// Serve the JSON status report on this path (e.g. "/_status")
    #[arg(long, value_name = "PATH")]
    status_path: Option<String>,

    /// Answer request bodies larger than this with 413
    #[arg(long, default_value_t = config::DEFAULT_MAX_BODY_BYTES, value_name = "BYTES")]
    max_body_bytes: usize,

    /// Reload the configuration when the file changes
    #[arg(short, long)]
    watch: bool,

    /// Poll interval when native file notifications are unavailable
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    watch_interval_ms: u64,

    /// Do not log matched requests
    #[arg(long)]
    quiet_matches: bool,

    /// Do not log unmatched requests
    #[arg(long)]
    quiet_unmatched: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.validate {
        let snapshot = config::load_snapshot(&args.config)
            .with_context(|| format!("invalid configuration {}", args.config.display()))?;
        println!(
            "Configuration is valid ({} stubs defined)",
            snapshot.len()
        );
        return Ok(());
    }

    info!(path = %args.config.display(), "Loading configuration");
    let settings = ServerSettings {
        log_matches: !args.quiet_matches,
        log_unmatched: !args.quiet_unmatched,
        status_path: args.status_path.clone(),
        max_body_bytes: args.max_body_bytes,
    };
    let server = Arc::new(
        StubServer::from_file(&args.config, settings)
            .with_context(|| format!("failed to load {}", args.config.display()))?,
    );

    if args.watch {
        let mut watcher = ConfigWatcher::new(
            args.config.clone(),
            Duration::from_millis(args.watch_interval_ms.max(1)),
        );
        watcher.prime().await;
        let watched = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(err) = watcher.run(watched).await {
                error!(error = %err, "Configuration watcher stopped, hot reload disabled");
            }
        });
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;

    http::serve(listener, server, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("Stub server stopped");
    Ok(())
}
