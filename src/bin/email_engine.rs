//! Email engine worker: drains the low-stock alert queue into notifications
//! and sends one daily sales summary per invocation.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use salestracker_api as api;
use api::repositories::{ProductRepository, ProductStore, SaleRepository, SaleStore};
use api::services::mailer::{Mailer, NoopMailer, WebhookMailer};
use api::services::{DailySummaryJob, StockAlertProcessor, StockAlertProcessorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db = Arc::new(api::db::establish_connection_from_app_config(&cfg).await?);
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await?;
    }

    let products: Arc<dyn ProductStore> = Arc::new(ProductRepository::new(db.clone()));
    let sales: Arc<dyn SaleStore> = Arc::new(SaleRepository::new(db));

    let mailer: Arc<dyn Mailer> = match &cfg.notification_webhook_url {
        Some(url) => Arc::new(WebhookMailer::new(url.clone())),
        None => {
            info!("No notification webhook configured, notifications will be dropped");
            Arc::new(NoopMailer)
        }
    };

    let queue = api::message_queue::create_queue(
        &cfg.queue_backend,
        &cfg.redis_url,
        cfg.queue_namespace.clone(),
    );

    // One end-of-day summary per invocation; failures are logged inside and
    // never take the worker down.
    DailySummaryJob::new(sales, products, mailer.clone())
        .run_once()
        .await;

    let processor = StockAlertProcessor::with_config(
        queue,
        mailer,
        StockAlertProcessorConfig {
            batch_size: cfg.queue_batch_size as usize,
            visibility_timeout: Duration::from_secs(cfg.queue_visibility_timeout_secs),
            poll_interval: Duration::from_secs(cfg.queue_poll_interval_secs),
            backoff: Duration::from_secs(cfg.queue_backoff_secs),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { processor.run(shutdown_rx).await });

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping alert processor");
    if shutdown_tx.send(true).is_err() {
        error!("Alert processor already gone");
    }
    worker.await?;

    info!("Email engine stopped");
    Ok(())
}
