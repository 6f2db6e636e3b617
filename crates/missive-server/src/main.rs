//! # missive-server
//!
//! Real-time direct-messaging server.
//!
//! This binary provides:
//! - **REST API** (axum) for sessions, the user directory, friendships,
//!   conversations, and tagged-message queries
//! - **WebSocket push** so connected clients see new messages, deletions,
//!   delivery/read receipts, and presence changes as they happen
//! - **Blob storage** for image and file attachments
//! - **Retention sweep** that removes messages past their age limit and
//!   notifies connected clients

mod api;
mod auth;
mod blob_store;
mod config;
mod delivery;
mod error;
mod presence;
mod publish;
mod socket;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use missive_store::Database;

use crate::api::AppState;
use crate::auth::SessionTokens;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::delivery::DeliveryCoordinator;
use crate::presence::PresenceRegistry;
use crate::publish::Publisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,missive_server=debug")),
        )
        .init();

    info!("Starting missive server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Arc::new(Mutex::new(Database::open_at(&config.db_path)?));

    let blobs = Arc::new(BlobStore::new(config.blob_storage_path.clone()).await?);

    let presence = PresenceRegistry::new();
    let publisher = Publisher::new(presence.clone());

    let coordinator = Arc::new(DeliveryCoordinator::new(
        db.clone(),
        presence.clone(),
        publisher,
        blobs.clone(),
    ));

    let auth = Arc::new(SessionTokens::new());

    let state = AppState {
        coordinator: coordinator.clone(),
        db,
        presence,
        auth,
        blobs,
    };

    // -----------------------------------------------------------------------
    // 4. Spawn the retention sweep
    // -----------------------------------------------------------------------
    let sweeper = coordinator.clone();
    let retention_days = config.retention_days;
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
            match sweeper.sweep_expired(cutoff).await {
                Ok(ids) if !ids.is_empty() => {
                    info!(count = ids.len(), "retention sweep complete");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "retention sweep failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
