use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

mod blob;
mod config;
mod error;
mod models;
mod pipeline;
mod prescription;
mod reminder;
mod routes;
mod schedule;
mod session;
mod state;
mod store;
mod tracking;
mod validate;

use crate::blob::LocalBlobStore;
use crate::config::Config;
use crate::prescription::AnalysisClient;
use crate::reminder::HttpNotifier;
use crate::session::SessionRegistry;
use crate::state::AppState;
use crate::store::{DocumentStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            tracing::warn!("⚠️ DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let notifier = Arc::new(HttpNotifier::new(&config.notify_url, config.http_timeout)?);
    let sessions = Arc::new(SessionRegistry::new(store.clone(), notifier));

    let state = AppState {
        store,
        blobs: Arc::new(LocalBlobStore::new(config.blob_dir.clone(), &config.public_base_url)),
        analysis: Arc::new(AnalysisClient::new(&config.analysis_url, config.http_timeout)?),
        sessions: sessions.clone(),
    };
    let app = routes::app(state);

    tracing::info!("🧠 Server running at {}", config.bind_addr);

    axum::serve(
        tokio::net::TcpListener::bind(config.bind_addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    sessions.shutdown();
    tracing::info!("👋 Server stopped");
    Ok(())
}
