pub mod db;
pub mod error;
pub mod google_api;
pub mod http;
pub mod ingest;
mod migrations;
pub mod names;
pub mod queries;
pub mod source;
pub mod state;
pub mod store;
pub mod types;
pub mod util;

use std::sync::Arc;

use error::StartupError;
use google_api::sheets::SheetsClient;
use state::AppContext;
use store::SqliteOutcomeStore;

/// Load config, open the store, verify the spreadsheet is reachable, then run
/// the sync poller and the HTTP server until Ctrl-C.
///
/// Any failure before the listener is bound is returned; the caller exits
/// non-zero.
pub async fn run() -> Result<(), StartupError> {
    let config = state::load_config()?;
    log::info!(
        "Config loaded: spreadsheet {} with {} ranges",
        config.spreadsheet_id,
        config.ranges.len()
    );

    let db_path = config.database_path()?;
    let db = db::OutcomeDb::open_at(db_path.clone())?;
    log::info!("Store opened at {}", db_path.display());
    let store = SqliteOutcomeStore::new(db, config.store_timeout());

    let client = SheetsClient::new(
        &config.spreadsheet_id,
        config.sheets_auth()?,
        config.source_timeout(),
    );
    let title = client.check_access().await?;
    log::info!("Spreadsheet reachable: {:?}", title);

    let addr = config.bind_addr();
    let ctx = Arc::new(AppContext::new(config, Arc::new(client), Arc::new(store)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    tokio::spawn(ingest::poller::run_sync_poller(Arc::clone(&ctx)));

    log::info!("HTTP: listening on {}", addr);
    axum::serve(listener, http::app(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)?;
    log::info!("HTTP: server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}
