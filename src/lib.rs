pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod ports;
pub mod push;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use push::generate_vapid_credentials;

use std::sync::Arc;

use tracing::info;

use crate::error::ServeError;
use crate::store::JsonSubscriptionStore;

/// Validates configuration, then serves the registration API until ctrl-c.
pub async fn serve(config: config::AppConfig) -> Result<(), ServeError> {
    let store = match config.store_path.as_deref() {
        Some(path) => JsonSubscriptionStore::open(path)?,
        None => JsonSubscriptionStore::in_memory(),
    };
    let sessions = push::build_sessions(&config, store.clone())?;
    let public_key = config
        .vapid_public_key
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    let state = state::AppState {
        public_key: Arc::from(public_key),
        store,
        sessions: sessions.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, "listening");
    axum::serve(listener, app::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.stop_all().wait().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
