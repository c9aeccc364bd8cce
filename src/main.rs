use anyhow::Result;
use axum::{Router, extract::DefaultBodyLimit};
use std::{io::ErrorKind, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use services::{
    job_queue::SqliteJobQueue, notifier, share_service::ShareService, worker::JobWorker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting sharebox with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let jobs = SqliteJobQueue::new(db.clone());
    let shares = ShareService::new(db.clone(), cfg.media_dir.clone(), Arc::new(jobs.clone()));
    shares.ensure_roots().await?;
    tracing::info!("Media root at {}", cfg.media_dir.display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = JobWorker::new(
        jobs.clone(),
        shares.clone(),
        notifier::from_config(&cfg.mail),
        cfg.worker_poll_interval,
        cfg.temp_share_ttl,
    );
    let worker = tokio::spawn(worker.run(shutdown_rx));

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state::AppState {
            shares,
            jobs,
            admin_key: Arc::from(cfg.admin_key.as_str()),
        });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // let the worker finish the job it is on
    let _ = shutdown_tx.send(true);
    if let Err(err) = worker.await {
        tracing::warn!("Job worker ended abnormally: {}", err);
    }

    Ok(())
}
