use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::broadcast;

use courier_delivery_service::channel::telegram::{HttpTelegramTransport, TelegramProvider};
use courier_delivery_service::channel::ProviderRegistry;
use courier_delivery_service::config::Settings;
use courier_delivery_service::domain::preference::PreferenceResolver;
use courier_delivery_service::domain::template::{MessageTemplate, TemplateEngine, TemplateResolver};
use courier_delivery_service::queue::{DeliveryQueue, MemoryQueue};
use courier_delivery_service::store::memory::{
    MemoryPreferenceRepository, MemoryStore, MemoryTemplateRepository,
};
use courier_delivery_service::store::postgres::{
    PgPreferenceRepository, PgStore, PgTemplateRepository,
};
use courier_delivery_service::store::{NotificationStore, PreferenceRepository, TemplateRepository};
use courier_delivery_service::telemetry::init_tracing;
use courier_delivery_service::worker::{DeliveryWorker, WorkerPool};
use courier_delivery_service::NotificationService;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Storage backends
    let (store, template_repo, preference_repo): (
        Arc<dyn NotificationStore>,
        Arc<dyn TemplateRepository>,
        Arc<dyn PreferenceRepository>,
    ) = if settings.database.enabled {
        let pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.url)
            .await?;
        tracing::info!("Connected to PostgreSQL");
        (
            Arc::new(PgStore::new(pool.clone())),
            Arc::new(PgTemplateRepository::new(pool.clone())),
            Arc::new(PgPreferenceRepository::new(pool)),
        )
    } else {
        tracing::info!("Database disabled, using in-memory backends");
        (
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryTemplateRepository::new()),
            Arc::new(MemoryPreferenceRepository::new()),
        )
    };

    // Template resolution: database rows first, registered fallbacks second
    let engine = Arc::new(TemplateEngine::new());
    engine.register_all(builtin_templates());
    let templates = Arc::new(TemplateResolver::new(template_repo, engine));

    let preferences = Arc::new(PreferenceResolver::with_cache_ttl(
        preference_repo,
        Duration::from_secs(settings.preferences.cache_ttl_seconds),
    ));

    // Channel providers
    let transport = Arc::new(HttpTelegramTransport::new(&settings.telegram)?);
    let providers = Arc::new(ProviderRegistry::new(vec![Arc::new(TelegramProvider::new(
        transport,
    ))]));

    let queue: Arc<dyn DeliveryQueue> =
        Arc::new(MemoryQueue::new(settings.delivery.queue_capacity));

    // Recover rows whose scheduled retry was lost when the previous
    // process stopped; permanently failed rows stay terminal
    let service = NotificationService::new(
        store.clone(),
        queue.clone(),
        preferences,
        templates.clone(),
    );
    let recovered = service
        .recover_transient_failures(settings.delivery.queue_capacity)
        .await?;
    if recovered > 0 {
        tracing::info!(recovered = recovered, "Requeued failed notifications from previous run");
    }

    let worker = Arc::new(DeliveryWorker::new(store, templates, providers));
    let pool = WorkerPool::with_concurrency(
        queue.clone(),
        worker,
        settings.delivery.worker_concurrency,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let pool_shutdown = shutdown_tx.clone();
    let pool_handle = tokio::spawn(async move { pool.run(pool_shutdown).await });

    tracing::info!(
        concurrency = settings.delivery.worker_concurrency,
        "Delivery workers started"
    );

    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(());

    let _ = pool_handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Fallback templates compiled into the binary, used when no active
/// database row exists for a key.
fn builtin_templates() -> Vec<MessageTemplate> {
    vec![
        MessageTemplate {
            key: "booking.created".to_string(),
            body: "Your booking {{booking_id}} is confirmed for {{date}}.".to_string(),
            buttons: vec![],
        },
        MessageTemplate {
            key: "booking.cancelled".to_string(),
            body: "Your booking {{booking_id}} has been cancelled.".to_string(),
            buttons: vec![],
        },
        MessageTemplate {
            key: "booking.reminder".to_string(),
            body: "Reminder: your booking {{booking_id}} starts at {{time}}.".to_string(),
            buttons: vec![],
        },
    ]
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
