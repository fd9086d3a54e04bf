//! Procura Notification Dispatch Service
//!
//! Background worker that drains the notification queue through channel
//! transports, plus a small HTTP surface for health and queue statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use procura_database::{
    create_postgres_pool, migrations::run_postgres_migrations, MemoryStore,
    NotificationQueueStore, PgNotificationQueueStore,
};
use procura_models::NotificationQueueEntry;
use procura_utils::config::AppConfig;
use procura_utils::logging::init_logging;
use procura_utils::ProcuraError;

mod dispatcher;
mod smtp_client;

use dispatcher::Dispatcher;
use smtp_client::{NotificationTransport, SmtpMailer};

#[derive(Clone)]
struct AppState {
    queue: Arc<dyn NotificationQueueStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_or_default();
    init_logging(&config.logging)?;
    info!("Starting Procura Notification Dispatch Service");

    let queue: Arc<dyn NotificationQueueStore> = if config.database.postgres_url.is_empty() {
        tracing::warn!("No PostgreSQL URL configured, using the in-memory store");
        MemoryStore::new()
    } else {
        let pool = create_postgres_pool(
            &config.database.postgres_url,
            config.database.max_connections,
        )
        .await?;
        run_postgres_migrations(&pool).await?;
        Arc::new(PgNotificationQueueStore::new(pool))
    };

    let transports: Vec<Arc<dyn NotificationTransport>> =
        vec![Arc::new(SmtpMailer::new(&config.smtp)?)];
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        transports,
        config.notification.backoff_base_seconds,
        config.notification.dispatch_batch_size,
    ));

    let interval_seconds = config.notification.dispatch_interval_seconds;
    tokio::spawn(run_dispatch_loop(dispatcher, interval_seconds));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/queue/stats", get(queue_stats))
        .route("/api/v1/queue/:id", get(queue_entry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { queue });

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Notification Dispatch Service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_dispatch_loop(dispatcher: Arc<Dispatcher>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    loop {
        interval.tick().await;
        match dispatcher.run_once(Utc::now()).await {
            Ok(summary) if summary.claimed > 0 => {
                info!(
                    claimed = summary.claimed,
                    sent = summary.sent,
                    retried = summary.retried,
                    failed = summary.failed,
                    "Dispatch cycle complete"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(%error, "Dispatch cycle failed");
            }
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "notification-dispatch",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ProcuraError> {
    let counts = state.queue.counts_by_status().await?;
    let stats: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, count)| (status.to_string(), serde_json::json!(count)))
        .collect();
    Ok(Json(serde_json::Value::Object(stats)))
}

async fn queue_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationQueueEntry>, ProcuraError> {
    let entry = state
        .queue
        .entry(id)
        .await?
        .ok_or_else(|| ProcuraError::not_found(format!("queue entry {id}")))?;
    Ok(Json(entry))
}
