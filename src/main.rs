//! Switchboard - loopback message router for terminal agent teams
//!
//! Server entry point: opens (or recovers) a workspace, starts the
//! background retry worker, and serves the HTTP surface until ctrl-c.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use switchboard::http_api::create_app;
use switchboard::router::{Router, RouterConfig};
use switchboard::server;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about = "Local message router for agent teams")]
struct Args {
    /// Workspace directory; router state lives under its .codex_team/
    workspace: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, default_value_t = 8765)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchboard=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let router = Arc::new(Router::open(&args.workspace, RouterConfig::default())?);
    Router::start(&router);

    let app = create_app(Arc::clone(&router));
    let (listener, addr) = server::bind(&args.host, args.port).await?;
    info!(%addr, session = %router.session().session_id, epoch = router.epoch(), "router listening");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    server::serve_with_graceful_shutdown(listener, app, shutdown).await?;
    router.stop().await;
    info!("router stopped");
    Ok(())
}
