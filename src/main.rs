use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use salestracker_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Cache and alert queue; both degrade to in-memory with a logged warning
    let cache = api::cache::create_cache(&cfg.redis_url);
    let queue = api::message_queue::create_queue(
        &cfg.queue_backend,
        &cfg.redis_url,
        cfg.queue_namespace.clone(),
    );

    let services = api::AppServices::new(
        db.clone(),
        cache,
        queue,
        Duration::from_secs(cfg.cache_ttl_secs),
    );

    let state = api::AppState {
        db,
        config: cfg.clone(),
        services,
    };

    let app = api::app(state).layer(CorsLayer::permissive());

    let addr = cfg.listen_addr();
    info!(addr = %addr, "SalesTracker API listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
