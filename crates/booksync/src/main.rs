mod config;
mod server;
mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use booksync_lib::{
    BookRegistry, HttpSnapshotClient, SessionContext, SnapshotSource, TransportSnapshotClient,
};
use booksync_middleware::{NatsTransport, SubjectBuilder, Transport};
use clap::Parser;
use tracing::info;

use config::Config;
use server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booksync=info,booksync_lib=info".into()),
        )
        .json()
        .init();

    let config = Config::parse();
    let keys = config.subscriptions()?;
    let sync_config = Arc::new(config.sync_config()?);

    info!(
        nats_url = %config.nats_url,
        subject_prefix = %config.subject_prefix,
        markets = keys.len(),
        depth = sync_config.depth,
        liveness_timeout_ms = sync_config.liveness_timeout().as_millis() as u64,
        snapshot_source = if config.snapshot_url.is_some() { "http" } else { "nats" },
        "booksync starting"
    );

    let transport: Arc<dyn Transport> = Arc::new(
        NatsTransport::connect(&config.nats_url)
            .await
            .context("failed to connect to NATS")?,
    );
    let subjects = Arc::new(SubjectBuilder::with_prefix(config.subject_prefix.as_str()));

    let snapshots: Arc<dyn SnapshotSource> = match &config.snapshot_url {
        Some(url) => Arc::new(HttpSnapshotClient::new(
            url.as_str(),
            sync_config.snapshot_timeout(),
        )?),
        None => Arc::new(TransportSnapshotClient::new(
            Arc::clone(&transport),
            Arc::clone(&subjects),
            sync_config.snapshot_timeout(),
        )),
    };

    let registry = Arc::new(BookRegistry::new(SessionContext {
        config: sync_config,
        transport,
        subjects,
        snapshots,
    }));

    for key in keys {
        registry
            .subscribe(key.clone())
            .await
            .with_context(|| format!("failed to subscribe to {}", key))?;
    }

    let app = create_router(AppState {
        registry: Arc::clone(&registry),
    });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context("server error")?;

    info!(books = registry.len(), "Stopping book sessions");
    registry.shutdown().await;
    info!("booksync stopped");
    Ok(())
}
