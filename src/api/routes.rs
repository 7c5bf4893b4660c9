use super::handlers::{execution, health, ws};
use super::middleware::cors::add_cors;
use crate::config::Config;
use crate::paths::ScratchLayout;
use crate::repository::ExecutionRepository;
use crate::services::{
    ClientRegistry, ConnectionManager, EncryptionService, ExecutionService, ExtractionService,
    ScriptLocator, UploadService, ValidationService,
};
use axum::{
    Router,
    routing::{get, put},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionManager,
    pub clients: ClientRegistry,
    pub encryption_service: EncryptionService,
    pub upload_service: UploadService,
    pub extraction_service: ExtractionService,
    pub execution_service: ExecutionService,
}

impl AppState {
    /// Wires every service once at startup.
    pub fn from_config(config: &Config) -> Self {
        let layout = ScratchLayout::new(&config.temp_root);
        let clients = ClientRegistry::new();
        let encryption_service = EncryptionService::new();
        let upload_service = UploadService::new(
            ValidationService::new(config.max_upload_bytes),
            encryption_service.clone(),
            layout.clone(),
        );
        let execution_service = ExecutionService::new(
            ExecutionRepository::new(),
            ScriptLocator::new(layout.temp_root()),
            Arc::new(clients.clone()),
            config.script_timeout(),
            config.shell.clone(),
        );

        Self {
            connections: ConnectionManager::new(config.max_connections),
            clients,
            encryption_service,
            upload_service,
            extraction_service: ExtractionService::new(layout),
            execution_service,
        }
    }
}

pub fn create_router(state: AppState, allowed_origin: Option<&str>) -> Router {
    let routes = Router::new()
        // Client hub
        .route("/hub", get(ws::hub))
        // Health check
        .route("/health", get(health::health_check))
        // Execution status
        .route("/api/executions", get(execution::list_executions))
        .route("/api/executions/{id}", get(execution::get_execution))
        .route("/api/executions/{id}/cancel", put(execution::cancel_execution))
        .with_state(state);

    add_cors(routes, allowed_origin)
}
