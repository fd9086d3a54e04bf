//! Procura Shipment Routing Service
//!
//! HTTP surface for dispatch: resolves MANUAL versus API per company policy
//! and vendor routing, then creates the shipment and updates the order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use procura_database::{
    create_postgres_pool, migrations::run_postgres_migrations, MemoryStore, PgEntityStore,
    PgShippingStore, ShippingStore,
};
use procura_models::{DispatchOutcome, DispatchRequest, Shipment};
use procura_utils::config::AppConfig;
use procura_utils::logging::init_logging;
use procura_utils::ProcuraError;

mod mode_resolver;
mod providers;
mod service;
mod vault;

use providers::ProviderRegistry;
use service::ShipmentService;
use vault::EnvCredentialVault;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_or_default();
    init_logging(&config.logging)?;
    info!("Starting Procura Shipment Routing Service");

    let service = build_service(&config).await?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/shipments/dispatch", post(dispatch_shipment))
        .route("/api/v1/shipments/:id", get(get_shipment))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Shipment Routing Service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_service(config: &AppConfig) -> Result<Arc<ShipmentService>> {
    let timeout = Duration::from_secs(config.shipping.carrier_timeout_seconds);

    let (store, entities): (Arc<dyn ShippingStore>, Arc<dyn procura_database::EntityStore>) =
        if config.database.postgres_url.is_empty() {
            tracing::warn!("No PostgreSQL URL configured, using the in-memory store");
            let store = MemoryStore::new();
            (store.clone(), store)
        } else {
            let pool = create_postgres_pool(
                &config.database.postgres_url,
                config.database.max_connections,
            )
            .await?;
            run_postgres_migrations(&pool).await?;
            (
                Arc::new(PgShippingStore::new(pool.clone())),
                Arc::new(PgEntityStore::new(pool)),
            )
        };

    let catalog = store.active_providers().await?;
    let registry = ProviderRegistry::from_catalog(&catalog, &EnvCredentialVault, timeout);
    info!(providers = catalog.len(), "Carrier registry initialized");

    Ok(Arc::new(ShipmentService::new(
        store,
        entities,
        Arc::new(registry),
    )))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "shipment-routing",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn dispatch_shipment(
    State(service): State<Arc<ShipmentService>>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchOutcome>, ProcuraError> {
    let outcome = service.dispatch(request).await?;
    Ok(Json(outcome))
}

async fn get_shipment(
    State(service): State<Arc<ShipmentService>>,
    Path(id): Path<String>,
) -> Result<Json<Shipment>, ProcuraError> {
    let shipment = service.shipment(&id).await?;
    Ok(Json(shipment))
}
