use crate::analyzer::{infer_fields, parse_content};
use crate::catalog::{detect_connector, missing_mapped_fields};
use crate::config::EngineSettings;
use crate::destination::validate_mappings;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AcceptedResponse, AnalysisResult, Connector, CreateMigrationPayload, FieldMapping, FieldType,
    FileType, ListRecordsFilters, MappingTemplate, MappingUpdateResult, Migration,
    MigrationRecord, MigrationStats, MigrationStatus, ParsedField, SaveTemplatePayload,
};
use crate::processor::RecordProcessor;
use crate::quality;
use crate::redaction::Redactor;
use crate::repo::{NewMigration, Repositories};
use crate::scheduler::{ExecutorFuture, MigrationJob, Scheduler};
use crate::suggest::provider::SuggestionProvider;
use crate::suggest::MappingSuggester;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;
const DEFAULT_RECORD_LIMIT: i64 = 100;
const MAX_RECORD_LIMIT: i64 = 1_000;
const EXCLUDE_FIELD_NULL_RATE: f64 = 0.8;
const LOW_QUALITY_SCORE: u8 = 50;

#[derive(Clone)]
pub struct MigrationController {
    repos: Repositories,
    scheduler: Scheduler,
    processor: RecordProcessor,
    suggester: MappingSuggester,
}

impl MigrationController {
    pub fn new(
        repos: Repositories,
        provider: Arc<dyn SuggestionProvider>,
    ) -> AppResult<Arc<Self>> {
        let settings = repos.settings.get_settings()?;
        let scheduler = Scheduler::new(settings.worker_limit, settings.max_queue_size);
        let suggester = MappingSuggester::new(
            provider,
            Duration::from_secs(settings.suggestion.timeout_seconds.max(1)),
            settings.suggestion.max_sample_values,
        );

        let this = Arc::new(Self {
            processor: RecordProcessor::new(repos.migrations.clone(), repos.records.clone()),
            repos,
            scheduler: scheduler.clone(),
            suggester,
        });

        match this.repos.migrations.pause_orphaned_migrations() {
            Ok(paused) if paused > 0 => {
                tracing::warn!(count = paused, "paused migrations left running by a previous process");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(error = %error, "failed to recover orphaned migrations");
            }
        }

        let weak = Arc::downgrade(&this);
        scheduler.set_executor(Arc::new(move |migration_id: String| -> ExecutorFuture {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(strong) = weak.upgrade() {
                    strong.execute_job(migration_id).await
                } else {
                    true
                }
            })
        }));

        Ok(this)
    }

    /// Runs synchronous store work on the blocking pool.
    pub async fn run_blocking<T, F>(&self, work: F) -> AppResult<T>
    where
        F: FnOnce(&MigrationController) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || work(&this))
            .await
            .map_err(|error| AppError::Internal(format!("storage worker failed: {}", error)))?
    }

    pub fn start_scheduler(&self) {
        self.scheduler.start();
    }

    /// Resolves once no processing job for the migration is queued or running.
    pub async fn wait_until_idle(&self, migration_id: &str) {
        self.scheduler.wait_idle(migration_id).await;
    }

    async fn execute_job(&self, migration_id: String) -> bool {
        let processor = self.processor.clone();
        let id = migration_id.clone();
        match tokio::task::spawn_blocking(move || processor.run(&id)).await {
            Ok(Ok(_)) => false,
            Ok(Err(error)) => {
                tracing::error!(migration_id = %migration_id, error = %error, "migration job failed");
                true
            }
            Err(join_error) => {
                tracing::error!(migration_id = %migration_id, error = %join_error, "migration worker panicked");
                if let Err(error) = self.repos.migrations.transition_status(
                    &migration_id,
                    &[MigrationStatus::Running],
                    MigrationStatus::Failed,
                ) {
                    tracing::error!(migration_id = %migration_id, error = %error, "failed to mark migration failed");
                }
                true
            }
        }
    }

    pub async fn analyze_file(
        &self,
        file_content: &str,
        file_type: &str,
        source_crm: Option<&str>,
    ) -> AppResult<AnalysisResult> {
        let file_type = parse_file_type(file_type)?;
        let settings = self.repos.settings.get_settings()?;
        let parsed = parse_content(file_content, file_type)?;
        let fields = infer_fields(&parsed, settings.type_sample_size);

        let mut hint_warnings = Vec::new();
        let hinted = match source_crm.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => match self.repos.connectors.get_connector(key)? {
                Some(connector) => Some(connector),
                None => {
                    hint_warnings.push(format!(
                        "unknown source CRM '{}'; detecting from headers instead",
                        key
                    ));
                    None
                }
            },
            None => None,
        };

        // A hinted connector's mapped fields that never appear count as fully empty.
        let mut scored = fields.clone();
        if let Some(connector) = &hinted {
            if !parsed.records.is_empty() {
                scored.extend(missing_mapped_fields(connector, &parsed.headers).into_iter().map(
                    |field| ParsedField {
                        name: field.name.clone(),
                        field_type: field.field_type,
                        sample_values: Vec::new(),
                        null_rate: 1.0,
                        mixed_types: false,
                    },
                ));
            }
        }
        let report = quality::score(&parsed.records, &scored);
        let mut warnings = report.warnings;
        warnings.extend(hint_warnings);

        let connectors = self.repos.connectors.list_connectors()?;
        let (connector, detected_confidence): (Option<Connector>, f64) = match hinted {
            Some(connector) => (Some(connector), 1.0),
            None => match detect_connector(&parsed.headers, &connectors) {
                Some(detection) => (
                    connectors
                        .iter()
                        .find(|connector| connector.key == detection.key)
                        .cloned(),
                    detection.confidence,
                ),
                None => (None, 0.0),
            },
        };

        let suggested_mappings = self.suggester.suggest(&fields, connector.as_ref()).await;
        let detected_crm = connector.as_ref().map(|connector| connector.key.clone());
        let recommendations = self.recommendations(
            &fields,
            report.score,
            detected_crm.as_deref(),
            suggested_mappings.is_empty(),
            parsed.records.len(),
            &settings,
        );

        tracing::info!(
            records = parsed.records.len(),
            fields = fields.len(),
            quality = report.score,
            detected_crm = detected_crm.as_deref().unwrap_or("unknown"),
            suggestions = suggested_mappings.len(),
            "analyzed migration file"
        );

        Ok(AnalysisResult {
            record_count: parsed.records.len(),
            fields,
            quality_score: report.score,
            detected_crm,
            detected_confidence,
            suggested_mappings,
            warnings,
            recommendations,
        })
    }

    fn recommendations(
        &self,
        fields: &[ParsedField],
        score: u8,
        detected_crm: Option<&str>,
        no_suggestions: bool,
        record_count: usize,
        settings: &EngineSettings,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        for field in fields {
            if field.null_rate >= EXCLUDE_FIELD_NULL_RATE {
                recommendations.push(format!(
                    "consider excluding {}; it is mostly empty",
                    field.name
                ));
                continue;
            }
            match field.field_type {
                FieldType::Date => recommendations.push(format!(
                    "apply the date transform to {}",
                    field.name
                )),
                FieldType::Number => recommendations.push(format!(
                    "apply the number transform to {}",
                    field.name
                )),
                FieldType::String | FieldType::Boolean => {}
            }
        }

        if !fields.is_empty() && score < LOW_QUALITY_SCORE {
            recommendations.push("clean up the source data before migrating".to_string());
        }
        if record_count > settings.record_batch_cap {
            recommendations.push(format!(
                "only the first {} records will be migrated; split the file into smaller batches",
                settings.record_batch_cap
            ));
        }
        match detected_crm {
            Some(crm) => match self.repos.templates.list_templates(Some(crm)) {
                Ok(templates) => {
                    if let Some(template) = templates.first() {
                        recommendations.push(format!(
                            "apply saved template '{}' (used {} times)",
                            template.name, template.usage_count
                        ));
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "failed to look up templates for recommendation");
                }
            },
            None => recommendations
                .push("select the source CRM manually; it could not be detected".to_string()),
        }
        if no_suggestions && !fields.is_empty() {
            recommendations
                .push("no automatic mapping suggestions were available; map fields manually".to_string());
        }
        recommendations
    }

    pub fn create_migration(&self, payload: CreateMigrationPayload) -> AppResult<Migration> {
        let name = payload.name.trim();
        let source_crm = payload.source_crm.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        if source_crm.is_empty() {
            return Err(AppError::Validation("source_crm is required".to_string()));
        }
        if payload.file_content.trim().is_empty() {
            return Err(AppError::Validation("file_content is required".to_string()));
        }
        let file_type = parse_file_type(&payload.file_type)?;
        let mappings = payload.mappings.unwrap_or_default();
        let warnings = validate_mappings(&mappings)?;

        let settings = self.repos.settings.get_settings()?;
        let parsed = parse_content(&payload.file_content, file_type)?;
        let source_record_count = parsed.records.len();
        let kept = source_record_count.min(settings.record_batch_cap);

        let status = if mappings.is_empty() {
            MigrationStatus::Pending
        } else {
            MigrationStatus::Mapping
        };
        let migration = self.repos.migrations.create_migration(
            &NewMigration {
                name: name.to_string(),
                source_crm: source_crm.to_string(),
                file_type,
                status,
                config: build_config(&payload.file_content, &parsed.headers, source_record_count, kept, &warnings, &settings),
            },
            &parsed.records[..kept],
            &mappings,
        )?;

        if kept < source_record_count {
            tracing::warn!(
                migration_id = %migration.id,
                source_records = source_record_count,
                kept,
                "source file exceeds the record batch cap"
            );
        }
        tracing::info!(migration_id = %migration.id, records = kept, status = status.as_str(), "migration created");
        self.get_status(&migration.id)
    }

    pub fn update_mappings(
        &self,
        migration_id: &str,
        mappings: Vec<FieldMapping>,
    ) -> AppResult<MappingUpdateResult> {
        let migration = self.require_migration(migration_id)?;
        if mappings.is_empty() {
            return Err(AppError::Validation(
                "at least one field mapping is required".to_string(),
            ));
        }
        let warnings = validate_mappings(&mappings)?;

        let from = MigrationStatus::sources_of(MigrationStatus::Mapping);
        if !self
            .repos
            .migrations
            .transition_status(migration_id, &from, MigrationStatus::Mapping)?
        {
            return Err(AppError::Precondition(format!(
                "mappings cannot be changed while the migration is {}",
                migration.status.as_str()
            )));
        }
        self.repos.migrations.replace_mappings(migration_id, &mappings)?;
        tracing::info!(migration_id, count = mappings.len(), "mappings replaced");

        Ok(MappingUpdateResult {
            migration_id: migration_id.to_string(),
            mappings,
            warnings,
        })
    }

    pub async fn run_migration(&self, migration_id: &str) -> AppResult<AcceptedResponse> {
        self.start_processing(migration_id, "run").await
    }

    pub async fn resume_migration(&self, migration_id: &str) -> AppResult<AcceptedResponse> {
        self.start_processing(migration_id, "resume").await
    }

    async fn start_processing(&self, migration_id: &str, verb: &str) -> AppResult<AcceptedResponse> {
        let migration = self.require_migration(migration_id)?;
        if self.repos.migrations.list_mappings(migration_id)?.is_empty() {
            return Err(AppError::Validation("no field mappings defined".to_string()));
        }
        if !migration.status.can_transition_to(MigrationStatus::Running) {
            return Err(AppError::Precondition(format!(
                "cannot {} a migration that is {}",
                verb,
                migration.status.as_str()
            )));
        }

        let from = MigrationStatus::sources_of(MigrationStatus::Running);
        if !self
            .repos
            .migrations
            .transition_status(migration_id, &from, MigrationStatus::Running)?
        {
            return Err(AppError::Precondition(format!(
                "migration {} changed state; cannot {}",
                migration_id, verb
            )));
        }

        if let Err(error) = self.scheduler.enqueue(MigrationJob::new(migration_id)).await {
            self.repos.migrations.transition_status(
                migration_id,
                &[MigrationStatus::Running],
                migration.status,
            )?;
            return Err(error);
        }

        let queue_depth = self.scheduler.queued_len().await;
        tracing::info!(
            migration_id,
            from = migration.status.as_str(),
            queue_depth = queue_depth,
            "migration queued"
        );
        Ok(AcceptedResponse {
            migration_id: migration_id.to_string(),
            status: MigrationStatus::Running,
            message: format!("{} queued", verb),
        })
    }

    pub fn pause_migration(&self, migration_id: &str) -> AppResult<AcceptedResponse> {
        self.simple_transition(migration_id, MigrationStatus::Paused, "migration paused")
    }

    pub fn cancel_migration(&self, migration_id: &str) -> AppResult<AcceptedResponse> {
        self.simple_transition(migration_id, MigrationStatus::Cancelled, "migration cancelled")
    }

    fn simple_transition(
        &self,
        migration_id: &str,
        to: MigrationStatus,
        message: &str,
    ) -> AppResult<AcceptedResponse> {
        let migration = self.require_migration(migration_id)?;
        let from = MigrationStatus::sources_of(to);
        if !self
            .repos
            .migrations
            .transition_status(migration_id, &from, to)?
        {
            return Err(AppError::Precondition(format!(
                "cannot move migration from {} to {}",
                migration.status.as_str(),
                to.as_str()
            )));
        }
        tracing::info!(migration_id, from = migration.status.as_str(), to = to.as_str(), "migration status changed");
        Ok(AcceptedResponse {
            migration_id: migration_id.to_string(),
            status: to,
            message: message.to_string(),
        })
    }

    pub async fn rollback_migration(&self, migration_id: &str) -> AppResult<AcceptedResponse> {
        let migration = self.require_migration(migration_id)?;
        if migration.status != MigrationStatus::Completed || !migration.can_rollback {
            return Err(AppError::Precondition(format!(
                "migration {} cannot be rolled back",
                migration_id
            )));
        }
        if !self.repos.migrations.begin_rollback(migration_id)? {
            return Err(AppError::Precondition(format!(
                "migration {} cannot be rolled back",
                migration_id
            )));
        }

        let records = self.repos.records.clone();
        let id = migration_id.to_string();
        let pass = tokio::task::spawn_blocking(move || -> AppResult<(usize, usize)> {
            let mut reverted = 0usize;
            let mut deleted = 0usize;
            for record in records.successful_records(&id)? {
                deleted += records.rollback_record(&record)?;
                reverted += 1;
            }
            Ok((reverted, deleted))
        })
        .await
        .map_err(|error| AppError::Internal(format!("rollback worker failed: {}", error)))
        .and_then(|result| result);

        let (reverted, deleted) = match pass {
            Ok(counts) => counts,
            Err(error) => {
                // Records already reverted stay reverted; a retry picks up the rest.
                tracing::error!(migration_id, error = %error, "rollback pass failed");
                match self.repos.migrations.restore_rollback(migration_id) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(migration_id, "migration changed state during rollback");
                    }
                    Err(restore_error) => {
                        tracing::error!(migration_id, error = %restore_error, "failed to re-arm rollback");
                    }
                }
                return Err(error);
            }
        };

        tracing::info!(migration_id, records = reverted, rows = deleted, "migration rolled back");
        Ok(AcceptedResponse {
            migration_id: migration_id.to_string(),
            status: MigrationStatus::RolledBack,
            message: format!("rolled back {} records", reverted),
        })
    }

    pub fn list_records(&self, mut filters: ListRecordsFilters) -> AppResult<Vec<MigrationRecord>> {
        self.require_migration(&filters.migration_id)?;
        filters.limit = Some(
            filters
                .limit
                .unwrap_or(DEFAULT_RECORD_LIMIT)
                .clamp(1, MAX_RECORD_LIMIT),
        );
        filters.offset = Some(filters.offset.unwrap_or(0).max(0));
        self.repos.records.list_records(&filters)
    }

    pub fn get_status(&self, migration_id: &str) -> AppResult<Migration> {
        self.require_migration(migration_id)
    }

    pub fn get_stats(&self) -> AppResult<MigrationStats> {
        self.repos.migrations.migration_stats()
    }

    pub fn list_connectors(&self) -> AppResult<Vec<Connector>> {
        self.repos.connectors.list_connectors()
    }

    pub fn list_migrations(&self, limit: Option<i64>) -> AppResult<Vec<Migration>> {
        self.repos
            .migrations
            .list_migrations(limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT))
    }

    pub fn list_templates(&self, source_crm: Option<&str>) -> AppResult<Vec<MappingTemplate>> {
        self.repos
            .templates
            .list_templates(source_crm.map(str::trim).filter(|crm| !crm.is_empty()))
    }

    pub fn save_template(&self, payload: SaveTemplatePayload) -> AppResult<MappingTemplate> {
        if payload.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        if payload.source_crm.trim().is_empty() {
            return Err(AppError::Validation("source_crm is required".to_string()));
        }
        if payload.mappings.is_empty() {
            return Err(AppError::Validation("mappings are required".to_string()));
        }
        validate_mappings(&payload.mappings)?;
        let template = self.repos.templates.insert_template(&payload)?;
        tracing::info!(template_id = %template.id, source_crm = %template.source_crm, "template saved");
        Ok(template)
    }

    pub fn apply_template(
        &self,
        migration_id: &str,
        template_id: &str,
    ) -> AppResult<(MappingTemplate, MappingUpdateResult)> {
        let template = self
            .repos
            .templates
            .get_template(template_id)?
            .ok_or_else(|| AppError::NotFound(format!("template {} not found", template_id)))?;
        let result = self.update_mappings(migration_id, template.mappings.clone())?;
        self.repos.templates.increment_template_usage(template_id)?;
        let template = MappingTemplate {
            usage_count: template.usage_count + 1,
            ..template
        };
        Ok((template, result))
    }

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        self.repos.settings.get_settings()
    }

    /// Persists a partial patch. Worker and queue limits apply on restart.
    pub fn update_settings(&self, patch: serde_json::Value) -> AppResult<EngineSettings> {
        if !patch.is_object() {
            return Err(AppError::Validation("settings must be an object".to_string()));
        }
        let settings = self.repos.settings.update_settings(patch)?;
        tracing::info!("engine settings updated");
        Ok(settings)
    }

    fn require_migration(&self, migration_id: &str) -> AppResult<Migration> {
        if migration_id.trim().is_empty() {
            return Err(AppError::Validation("migration_id is required".to_string()));
        }
        self.repos
            .migrations
            .get_migration(migration_id)?
            .ok_or_else(|| AppError::NotFound(format!("migration {} not found", migration_id)))
    }
}

fn parse_file_type(raw: &str) -> AppResult<FileType> {
    FileType::parse(raw).ok_or_else(|| {
        AppError::Validation(format!(
            "unsupported file_type '{}'; expected csv, tsv or json",
            raw
        ))
    })
}

/// Audit blob stored with the migration: a bounded, redacted preview of the
/// raw content plus ingest bookkeeping.
fn build_config(
    content: &str,
    headers: &[String],
    source_record_count: usize,
    kept: usize,
    warnings: &[String],
    settings: &EngineSettings,
) -> serde_json::Value {
    let preview: String = content.chars().take(settings.preview_chars).collect();
    let preview_truncated = content.chars().count() > settings.preview_chars;
    let (preview, redaction_count) = if settings.redact_preview {
        let redacted = Redactor::new(false).redact(&preview);
        (redacted.content, redacted.redaction_count)
    } else {
        (preview, 0)
    };
    serde_json::json!({
        "preview": preview,
        "preview_truncated": preview_truncated,
        "redaction_count": redaction_count,
        "headers": headers,
        "source_record_count": source_record_count,
        "records_truncated": kept < source_record_count,
        "mapping_warnings": warnings,
    })
}
