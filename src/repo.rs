//! Storage seams for the migration controller.
//!
//! `Database` implements every trait; tests and alternative stores can swap
//! individual pieces through [`Repositories`].

use crate::config::EngineSettings;
use crate::errors::AppResult;
use crate::models::{
    Connector, DestinationRef, FieldMapping, FileType, ListRecordsFilters, MappingTemplate,
    Migration, MigrationRecord, MigrationStats, MigrationStatus, SaveTemplatePayload, SourceRecord,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct NewMigration {
    pub name: String,
    pub source_crm: String,
    pub file_type: FileType,
    pub status: MigrationStatus,
    pub config: serde_json::Value,
}

/// Columns for one destination row, already coerced and whitelisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRow {
    pub table: &'static str,
    pub values: Vec<(&'static str, serde_json::Value)>,
}

pub trait ConnectorRepo: Send + Sync {
    fn list_connectors(&self) -> AppResult<Vec<Connector>>;
    fn get_connector(&self, key: &str) -> AppResult<Option<Connector>>;
}

pub trait MigrationRepo: Send + Sync {
    /// Inserts the migration, its seeded records and any initial mappings in
    /// one transaction.
    fn create_migration(
        &self,
        migration: &NewMigration,
        records: &[SourceRecord],
        mappings: &[FieldMapping],
    ) -> AppResult<Migration>;
    fn get_migration(&self, migration_id: &str) -> AppResult<Option<Migration>>;
    fn list_migrations(&self, limit: i64) -> AppResult<Vec<Migration>>;
    /// Compare-and-set: moves to `to` only from one of `from`.
    fn transition_status(
        &self,
        migration_id: &str,
        from: &[MigrationStatus],
        to: MigrationStatus,
    ) -> AppResult<bool>;
    /// Running -> completed; arms rollback when anything was written.
    fn complete_migration(&self, migration_id: &str) -> AppResult<bool>;
    /// Completed -> rolled back, consuming the single rollback allowance.
    fn begin_rollback(&self, migration_id: &str) -> AppResult<bool>;
    /// Rolled back -> completed with rollback re-armed, after a failed rollback pass.
    fn restore_rollback(&self, migration_id: &str) -> AppResult<bool>;
    fn replace_mappings(&self, migration_id: &str, mappings: &[FieldMapping]) -> AppResult<()>;
    fn list_mappings(&self, migration_id: &str) -> AppResult<Vec<FieldMapping>>;
    fn migration_stats(&self) -> AppResult<MigrationStats>;
    /// Running migrations orphaned by a restart become paused.
    fn pause_orphaned_migrations(&self) -> AppResult<u64>;
}

pub trait RecordRepo: Send + Sync {
    fn list_records(&self, filters: &ListRecordsFilters) -> AppResult<Vec<MigrationRecord>>;
    fn pending_records(&self, migration_id: &str) -> AppResult<Vec<MigrationRecord>>;
    fn successful_records(&self, migration_id: &str) -> AppResult<Vec<MigrationRecord>>;
    fn count_pending(&self, migration_id: &str) -> AppResult<i64>;
    /// Writes the destination rows and flips the record to success in one
    /// transaction. `None` when the record was no longer pending.
    fn commit_record_success(
        &self,
        migration_id: &str,
        record_id: &str,
        rows: &[DestinationRow],
    ) -> AppResult<Option<Vec<DestinationRef>>>;
    fn commit_record_failure(
        &self,
        migration_id: &str,
        record_id: &str,
        error_message: &str,
    ) -> AppResult<bool>;
    /// Deletes a record's destination rows and marks it rolled back.
    fn rollback_record(&self, record: &MigrationRecord) -> AppResult<usize>;
}

pub trait TemplateRepo: Send + Sync {
    fn insert_template(&self, payload: &SaveTemplatePayload) -> AppResult<MappingTemplate>;
    fn get_template(&self, template_id: &str) -> AppResult<Option<MappingTemplate>>;
    fn list_templates(&self, source_crm: Option<&str>) -> AppResult<Vec<MappingTemplate>>;
    fn increment_template_usage(&self, template_id: &str) -> AppResult<()>;
}

pub trait SettingsRepo: Send + Sync {
    fn get_settings(&self) -> AppResult<EngineSettings>;
    fn update_settings(&self, patch: serde_json::Value) -> AppResult<EngineSettings>;
}

#[derive(Clone)]
pub struct Repositories {
    pub connectors: Arc<dyn ConnectorRepo>,
    pub migrations: Arc<dyn MigrationRepo>,
    pub records: Arc<dyn RecordRepo>,
    pub templates: Arc<dyn TemplateRepo>,
    pub settings: Arc<dyn SettingsRepo>,
}

impl Repositories {
    pub fn from_database(db: Arc<crate::db::Database>) -> Self {
        Self {
            connectors: db.clone(),
            migrations: db.clone(),
            records: db.clone(),
            templates: db.clone(),
            settings: db,
        }
    }
}
