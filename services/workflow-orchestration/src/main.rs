//! Procura Workflow Orchestration Service
//!
//! HTTP surface for the approval state machine: configuration-driven stage
//! transitions, rejection handling, and the hash-chained audit trail.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use procura_database::{
    create_postgres_pool, migrations::run_postgres_migrations, MemoryDirectory, MemoryStore,
    PgAuditLedger, PgEntityStore, PgMappingStore, PgNotificationQueueStore,
    PgRecipientDirectory, PgWorkflowConfigStore,
};
use procura_models::{
    CompanyScope, EntityType, Role, WorkflowActionKind, WorkflowConfiguration, WorkflowStage,
};
use procura_utils::config::AppConfig;
use procura_utils::logging::init_logging;
use procura_utils::{ProcuraError, ProcuraResult};

mod notifier;
mod service;
mod stage_engine;
mod templates;

use notifier::Notifier;
use service::{ActionRequest, AuditTrail, TransitionOutcome, WorkflowService};
use templates::TemplateCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_or_default();
    init_logging(&config.logging)?;
    info!("Starting Procura Workflow Orchestration Service");

    let service = build_service(&config).await?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/workflows/:entity_type/:entity_id/actions",
            post(execute_action),
        )
        .route(
            "/api/v1/workflows/:entity_type/:entity_id/audit",
            get(get_audit_trail),
        )
        .route("/api/v1/rejections/:id/resolve", post(resolve_rejection))
        .route("/api/v1/workflow-configs", post(activate_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Workflow Orchestration Service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_service(config: &AppConfig) -> Result<WorkflowService> {
    let templates = Arc::new(TemplateCatalog::new());
    let defaults = config.notification.clone();

    if config.database.postgres_url.is_empty() {
        tracing::warn!("No PostgreSQL URL configured, using the in-memory store");
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            templates,
            defaults,
        ));
        return Ok(WorkflowService::new(
            store.clone(),
            store.clone(),
            store,
            directory,
            notifier,
        ));
    }

    let pool = create_postgres_pool(
        &config.database.postgres_url,
        config.database.max_connections,
    )
    .await?;
    run_postgres_migrations(&pool).await?;

    let mappings = Arc::new(PgMappingStore::new(pool.clone()));
    let queue = Arc::new(PgNotificationQueueStore::new(pool.clone()));
    let directory = Arc::new(PgRecipientDirectory::new(pool.clone()));
    let notifier = Arc::new(Notifier::new(
        mappings,
        queue,
        directory.clone(),
        templates,
        defaults,
    ));
    Ok(WorkflowService::new(
        Arc::new(PgWorkflowConfigStore::new(pool.clone())),
        Arc::new(PgEntityStore::new(pool.clone())),
        Arc::new(PgAuditLedger::new(pool)),
        directory,
        notifier,
    ))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "workflow-orchestration",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action: String,
    pub actor_id: String,
    pub actor_role: String,
    pub remarks: Option<String>,
    pub reason_code: Option<String>,
}

fn parse_entity_type(s: &str) -> ProcuraResult<EntityType> {
    EntityType::from_str(s)
        .ok_or_else(|| ProcuraError::validation("entity_type", format!("unknown entity type: {s}")))
}

async fn execute_action(
    State(service): State<WorkflowService>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Json(body): Json<ActionBody>,
) -> Result<Json<TransitionOutcome>, ProcuraError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let action = WorkflowActionKind::from_str(&body.action).ok_or_else(|| {
        ProcuraError::validation("action", format!("unknown action: {}", body.action))
    })?;
    let actor_role = Role::from_str(&body.actor_role).ok_or_else(|| {
        ProcuraError::validation("actor_role", format!("unknown role: {}", body.actor_role))
    })?;

    let outcome = service
        .execute(
            entity_type,
            &entity_id,
            ActionRequest {
                action,
                actor_id: body.actor_id,
                actor_role,
                remarks: body.remarks,
                reason_code: body.reason_code,
            },
        )
        .await?;

    Ok(Json(outcome))
}

async fn get_audit_trail(
    State(service): State<WorkflowService>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<AuditTrail>, ProcuraError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let trail = service.audit_trail(entity_type, &entity_id).await?;
    Ok(Json(trail))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRejectionBody {
    pub resolved_by: String,
    pub resolution_action: String,
}

async fn resolve_rejection(
    State(service): State<WorkflowService>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveRejectionBody>,
) -> Result<Json<serde_json::Value>, ProcuraError> {
    service
        .resolve_rejection(id, &body.resolved_by, &body.resolution_action)
        .await?;
    Ok(Json(serde_json::json!({ "rejection_id": id, "resolved": true })))
}

#[derive(Debug, Deserialize)]
pub struct ActivateConfigBody {
    pub company_scope: CompanyScope,
    pub entity_type: String,
    pub version: i32,
    pub stages: Vec<WorkflowStage>,
}

async fn activate_config(
    State(service): State<WorkflowService>,
    Json(body): Json<ActivateConfigBody>,
) -> Result<Json<serde_json::Value>, ProcuraError> {
    let entity_type = parse_entity_type(&body.entity_type)?;
    if body.stages.is_empty() {
        return Err(ProcuraError::validation(
            "stages",
            "a workflow configuration needs at least one stage",
        ));
    }
    let config =
        WorkflowConfiguration::new(body.company_scope, entity_type, body.version, body.stages);
    let id = config.id;
    service.activate_config(config).await?;
    Ok(Json(serde_json::json!({ "config_id": id, "active": true })))
}
