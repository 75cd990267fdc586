pub mod analyzer;
pub mod api;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod db;
pub mod destination;
pub mod errors;
pub mod models;
pub mod processor;
pub mod quality;
pub mod redaction;
pub mod repo;
pub mod scheduler;
pub mod suggest;
pub mod transform;

use crate::config::ServerConfig;
use crate::controller::MigrationController;
use crate::db::Database;
use crate::repo::{Repositories, SettingsRepo};
use crate::suggest::provider::provider_from_settings;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Opens the store, wires the controller and starts its scheduler.
pub fn bootstrap(config: &ServerConfig) -> errors::AppResult<Arc<MigrationController>> {
    let db = Arc::new(Database::new(&config.database_path())?);
    let settings = db.get_settings()?;
    let provider = provider_from_settings(&settings.suggestion);
    tracing::info!(
        database = %db.path().display(),
        suggestions = provider.name(),
        "migration engine starting"
    );

    let controller = MigrationController::new(Repositories::from_database(db), provider)?;
    controller.start_scheduler();
    Ok(controller)
}

pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
