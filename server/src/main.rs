//! Lockstep server binary.
//!
//! Serves the HTTP facade over an in-memory store. On startup it
//! provisions a demo application so the API is immediately usable:
//!
//!   lockstep-server --port 8080
//!
//! Production deployments replace the in-memory store behind the same
//! service facade.

use anyhow::{Context, Result};
use clap::Parser;
use lockstep_core::{HttpCallbackSink, Service, ServiceConfig};
use lockstep_server::build_router;
use lockstep_store::Store;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lockstep-server")]
#[command(about = "Mobile strong-customer-authentication server")]
struct Args {
    /// Port for the HTTP API
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Master secret for at-rest key encryption (hex or plain string);
    /// omit to store keys unencrypted
    #[arg(long)]
    master_secret: Option<String>,

    /// Name of the demo application provisioned at startup
    #[arg(long, default_value = "demo")]
    application: String,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Lockstep server starting...");

    let config = ServiceConfig {
        master_at_rest_secret: args.master_secret.map(String::into_bytes),
        ..ServiceConfig::default()
    };
    let sink = HttpCallbackSink::spawn(&config).context("Failed to build callback client")?;
    let store = Arc::new(Store::new());
    let service = Arc::new(Service::new(store, config, Arc::new(sink)));

    let detail = service
        .create_application(&args.application)
        .map_err(|e| anyhow::anyhow!("failed to provision application: {e}"))?;
    let version = &detail.versions[0];

    let app = build_router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .context("Failed to bind HTTP port")?;

    println!("\n========================================");
    println!("  Lockstep Server Running");
    println!("========================================");
    println!("  HTTP Port:        {}", args.port);
    println!("  Application:      {} (id {})", detail.application.name, detail.application.id);
    println!("  Application Key:  {}", version.application_key);
    println!("========================================\n");

    info!("HTTP API listening on port {}", args.port);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
