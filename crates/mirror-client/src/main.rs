//! mirror-client: headless live mirror of a documentation server's tree.
//!
//! Connects to the server's push channel and keeps the tree, the open document and the
//! recent-changes list in sync, logging each published snapshot.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mirror_client::{
    EngineConfig, EngineExit, HttpTreeApi, LiveEngine, ServerConfig, SharedApi, ViewKind,
};

#[derive(Parser, Debug)]
#[command(name = "mirror-client")]
#[command(about = "Live mirror of a documentation server's file tree")]
struct Args {
    /// Base URL of the server
    #[arg(short, long, env = "MIRROR_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Repository to mirror on a multi-repo server
    #[arg(short, long, env = "MIRROR_REPO")]
    repo: Option<String>,

    /// Path to open once the tree is loaded
    #[arg(long)]
    open: Option<String>,

    /// Quiet period before applying a batch of changes (milliseconds)
    #[arg(long, default_value_t = 300)]
    debounce_ms: u64,

    /// Longest delay before applying changes under constant churn (milliseconds)
    #[arg(long, default_value_t = 2000)]
    max_wait_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Log a one-line summary of each published snapshot.
fn watch_snapshots(engine: &LiveEngine) -> mirror_core::Subscription<mirror_client::ViewState> {
    engine.subscribe(|state| {
        let view = match state.view {
            ViewKind::File => state
                .file
                .as_ref()
                .map(|f| format!("{} ({} bytes)", f.path, f.content.len()))
                .unwrap_or_else(|| "file pending".to_string()),
            ViewKind::Directory => format!(
                "{} entries",
                state.directory.as_ref().map(Vec::len).unwrap_or(0)
            ),
            ViewKind::None => "nothing open".to_string(),
        };
        debug!(
            "Snapshot: {} node(s), {} expanded, {} recently changed, view: {}, {} highlighted, connection: {:?}",
            state.tree.node_count(),
            state.expanded.len(),
            state.recently_changed.len(),
            view,
            state.highlighted_blocks.len(),
            state.connection
        );
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_client=debug"
    } else {
        "info,mirror_client=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = ServerConfig::new(&args.server, args.repo.clone())?;
    let ws_url = server.ws_url();
    let config = EngineConfig {
        debounce: Duration::from_millis(args.debounce_ms),
        max_wait: Duration::from_millis(args.max_wait_ms),
        ..EngineConfig::default()
    };

    info!("Starting mirror-client");
    info!("Server: {}", server.base_url);
    info!("Push channel: {}", ws_url);
    if let Some(repo) = &server.repo {
        info!("Repository: {}", repo);
    }

    loop {
        // A fresh engine per server build: nothing survives a reload
        let api: SharedApi = Arc::new(HttpTreeApi::new(&server));
        let engine = Arc::new(LiveEngine::new(api, config.clone(), server.repo.clone()));
        let _snapshots = watch_snapshots(&engine);

        engine.initialize().await;
        if let Some(path) = &args.open {
            engine.navigate_to(path).await;
        }

        let runner = Arc::clone(&engine);
        let url = ws_url.clone();
        let run = tokio::spawn(async move { runner.run(url).await });
        tokio::pin!(run);

        let exit = tokio::select! {
            exit = &mut run => exit?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                engine.shutdown();
                run.await?
            }
        };

        match exit {
            EngineExit::Shutdown => break,
            EngineExit::Reload { previous, current } => {
                info!(
                    "Server build changed ({} -> {}), reloading",
                    previous, current
                );
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
