//! Mock slot store HTTP server
//!
//! Serves the versioned document protocol used by the `http` store backend,
//! so several monitor instances can be pointed at one shared record locally.
//!
//! Protocol:
//! - `GET  /{collection}/{document}` → 200 + body + `ETag`, or 404
//! - `PUT` with `If-None-Match: *` → 201, or 412 if it exists
//! - `PUT` with `If-Match: "<version>"` → 200 + new `ETag`, 412 on mismatch
//!
//! Usage:
//!   cargo run --bin mock_slotstore -- --port 8700

use clap::Parser;
use parking_monitor::io::store_server::{serve_store, DocumentTable};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock_slotstore")]
#[command(about = "In-memory versioned document store for local testing")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8700")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    serve_store(listener, DocumentTable::new(), shutdown_rx).await
}
