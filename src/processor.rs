//! Record-by-record transform and load.
//!
//! Each record is written in its own transaction. A record that fails to
//! transform or write is marked failed and the loop moves on; only storage
//! failures outside a single record abort the pass.

use crate::destination::{coerce_for_column, find_table};
use crate::errors::{AppError, AppResult};
use crate::models::{FieldMapping, MigrationStatus, SourceRecord};
use crate::repo::{DestinationRow, MigrationRepo, RecordRepo};
use crate::transform;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the pass stopped because the migration left `running`.
    pub interrupted: bool,
    pub completed: bool,
}

#[derive(Clone)]
pub struct RecordProcessor {
    migrations: Arc<dyn MigrationRepo>,
    records: Arc<dyn RecordRepo>,
}

impl RecordProcessor {
    pub fn new(migrations: Arc<dyn MigrationRepo>, records: Arc<dyn RecordRepo>) -> Self {
        Self {
            migrations,
            records,
        }
    }

    /// Processes every pending record of a running migration. Storage errors
    /// move the migration to `failed` before being returned.
    pub fn run(&self, migration_id: &str) -> AppResult<ProcessOutcome> {
        match self.process(migration_id) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                tracing::error!(migration_id, error = %error, "migration pass aborted");
                if let Err(mark_error) = self.migrations.transition_status(
                    migration_id,
                    &[MigrationStatus::Running],
                    MigrationStatus::Failed,
                ) {
                    tracing::error!(migration_id, error = %mark_error, "failed to mark migration failed");
                }
                Err(error)
            }
        }
    }

    fn process(&self, migration_id: &str) -> AppResult<ProcessOutcome> {
        let mut outcome = ProcessOutcome::default();
        if self.current_status(migration_id)? != MigrationStatus::Running {
            outcome.interrupted = true;
            return Ok(outcome);
        }

        let mappings = self.migrations.list_mappings(migration_id)?;
        if mappings.is_empty() {
            return Err(AppError::Validation("no field mappings defined".to_string()));
        }

        let pending = self.records.pending_records(migration_id)?;
        tracing::info!(migration_id, pending = pending.len(), "processing migration records");

        for record in pending {
            let status = self.current_status(migration_id)?;
            if status != MigrationStatus::Running {
                tracing::info!(
                    migration_id,
                    status = status.as_str(),
                    closed = status.is_terminal(),
                    "migration pass interrupted"
                );
                outcome.interrupted = true;
                break;
            }

            let rows = match build_rows(&record.source_data, &mappings) {
                Ok(rows) => rows,
                Err(error) => {
                    self.mark_failed(migration_id, &record.id, record.record_index, error.detail())?;
                    outcome.failed += 1;
                    continue;
                }
            };

            match self
                .records
                .commit_record_success(migration_id, &record.id, &rows)
            {
                Ok(Some(_)) => outcome.succeeded += 1,
                Ok(None) => {
                    tracing::debug!(migration_id, record_id = %record.id, "record already claimed");
                }
                Err(error) => {
                    let message = format!("destination write rejected: {}", error.detail());
                    self.mark_failed(migration_id, &record.id, record.record_index, &message)?;
                    outcome.failed += 1;
                }
            }
        }

        if !outcome.interrupted && self.records.count_pending(migration_id)? == 0 {
            outcome.completed = self.migrations.complete_migration(migration_id)?;
        }

        tracing::info!(
            migration_id,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            interrupted = outcome.interrupted,
            completed = outcome.completed,
            "migration pass finished"
        );
        Ok(outcome)
    }

    fn current_status(&self, migration_id: &str) -> AppResult<MigrationStatus> {
        self.migrations
            .get_migration(migration_id)?
            .map(|migration| migration.status)
            .ok_or_else(|| AppError::NotFound(format!("migration {} not found", migration_id)))
    }

    fn mark_failed(
        &self,
        migration_id: &str,
        record_id: &str,
        record_index: i64,
        message: &str,
    ) -> AppResult<()> {
        tracing::debug!(migration_id, record_index, error = %message, "record failed");
        self.records
            .commit_record_failure(migration_id, record_id, message)?;
        Ok(())
    }
}

/// Applies the mapping set to one record, producing one row per destination
/// table that received at least one value.
pub fn build_rows(source: &SourceRecord, mappings: &[FieldMapping]) -> AppResult<Vec<DestinationRow>> {
    let mut rows: Vec<DestinationRow> = Vec::new();

    for mapping in mappings {
        let table = find_table(&mapping.destination_table).ok_or_else(|| {
            AppError::Record(format!(
                "unknown destination table {}",
                mapping.destination_table
            ))
        })?;
        let column = table.column(&mapping.destination_field).ok_or_else(|| {
            AppError::Record(format!(
                "unknown destination field {}.{}",
                table.name, mapping.destination_field
            ))
        })?;

        let raw = source.get(&mapping.source_field).unwrap_or(&Value::Null);
        let Some(value) = transform::apply(mapping.transform, raw)
            .map_err(|error| AppError::Record(format!("field {}: {}", mapping.source_field, error)))?
        else {
            continue;
        };
        let value = coerce_for_column(table, column, value).map_err(AppError::Record)?;
        if value.is_null() {
            continue;
        }

        let row = match rows.iter_mut().position(|row| row.table == table.name) {
            Some(index) => &mut rows[index],
            None => {
                rows.push(DestinationRow {
                    table: table.name,
                    values: Vec::new(),
                });
                let last = rows.len() - 1;
                &mut rows[last]
            }
        };
        // First mapping to fill a column wins.
        if !row.values.iter().any(|(name, _)| *name == column.name) {
            row.values.push((column.name, value));
        }
    }

    if rows.is_empty() {
        return Err(AppError::Record(
            "record produced no destination values".to_string(),
        ));
    }

    for row in &rows {
        let Some(table) = find_table(row.table) else {
            continue;
        };
        let missing = table
            .required_columns()
            .filter(|required| !row.values.iter().any(|(name, _)| *name == required.name))
            .map(|required| format!("{}.{}", table.name, required.name))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(AppError::Record(format!(
                "missing required field {}",
                missing.join(", ")
            )));
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::{build_rows, RecordProcessor};
    use crate::db::Database;
    use crate::models::{
        FieldMapping, FileType, ListRecordsFilters, MigrationStatus, RecordStatus, SourceRecord,
        TransformKind,
    };
    use crate::repo::{MigrationRepo, NewMigration, RecordRepo};
    use serde_json::json;
    use std::sync::Arc;

    fn mapping(source: &str, table: &str, field: &str, transform: TransformKind) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            destination_table: table.to_string(),
            destination_field: field.to_string(),
            confidence: 1.0,
            transform,
        }
    }

    fn record(value: serde_json::Value) -> SourceRecord {
        value.as_object().cloned().expect("object literal")
    }

    fn contact_mappings() -> Vec<FieldMapping> {
        vec![
            mapping("First", "contacts", "first_name", TransformKind::Trim),
            mapping("Last", "contacts", "last_name", TransformKind::Trim),
            mapping("Email", "contacts", "email", TransformKind::Lowercase),
        ]
    }

    fn running_migration(db: &Arc<Database>, records: &[SourceRecord]) -> String {
        let migration = db
            .create_migration(
                &NewMigration {
                    name: "contacts".to_string(),
                    source_crm: "generic".to_string(),
                    file_type: FileType::Csv,
                    status: MigrationStatus::Mapping,
                    config: json!({}),
                },
                records,
                &contact_mappings(),
            )
            .expect("create");
        assert!(db
            .transition_status(&migration.id, &[MigrationStatus::Mapping], MigrationStatus::Running)
            .expect("run"));
        migration.id
    }

    #[test]
    fn groups_values_by_table_and_skips_omitted() {
        let mappings = vec![
            mapping("Last", "contacts", "last_name", TransformKind::None),
            mapping("Notes", "contacts", "notes", TransformKind::Null),
            mapping("Company", "companies", "name", TransformKind::Trim),
            mapping("Employees", "companies", "employee_count", TransformKind::Number),
        ];
        let rows = build_rows(
            &record(json!({"Last": "Hopper", "Notes": "vip", "Company": " Navy ", "Employees": "1,200"})),
            &mappings,
        )
        .expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].table, "contacts");
        assert_eq!(rows[0].values, vec![("last_name", json!("Hopper"))]);
        assert_eq!(rows[1].table, "companies");
        assert_eq!(
            rows[1].values,
            vec![("name", json!("Navy")), ("employee_count", json!(1200.0))]
        );
    }

    #[test]
    fn transform_and_required_failures_are_reported() {
        let mappings = contact_mappings();
        let missing = build_rows(&record(json!({"First": "Ada", "Last": ""})), &mappings)
            .expect_err("missing last name");
        assert_eq!(missing.detail(), "missing required field contacts.last_name");

        let bad_date = vec![
            mapping("Last", "contacts", "last_name", TransformKind::None),
            mapping("Created", "contacts", "created_date", TransformKind::Date),
        ];
        let err = build_rows(&record(json!({"Last": "x", "Created": "someday"})), &bad_date)
            .expect_err("bad date");
        assert!(err.detail().starts_with("field Created:"));

        let err = build_rows(&record(json!({"Other": "x"})), &mappings).expect_err("empty");
        assert_eq!(err.to_string(), "RECORD: record produced no destination values");
    }

    #[test]
    fn partial_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let records: Vec<SourceRecord> = (1..=5)
            .map(|index| {
                let last = if index == 3 { "" } else { "Doe" };
                record(json!({"First": format!("P{}", index), "Last": last, "Email": "A@B.CO"}))
            })
            .collect();
        let id = running_migration(&db, &records);

        let processor = RecordProcessor::new(db.clone(), db.clone());
        let outcome = processor.run(&id).expect("run");
        assert_eq!(outcome.succeeded, 4);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.completed);

        let migration = db.get_migration(&id).expect("get").expect("exists");
        assert_eq!(migration.status, MigrationStatus::Completed);
        assert_eq!(migration.migrated_count, 4);
        assert_eq!(migration.failed_count, 1);
        assert!(migration.can_rollback);

        let all = db
            .list_records(&ListRecordsFilters {
                migration_id: id.clone(),
                ..ListRecordsFilters::default()
            })
            .expect("records");
        for (index, record) in all.iter().enumerate() {
            if index == 2 {
                assert_eq!(record.status, RecordStatus::Failed);
                assert!(record
                    .error_message
                    .as_deref()
                    .unwrap_or_default()
                    .contains("last_name"));
            } else {
                assert_eq!(record.status, RecordStatus::Success);
                assert!(record.destination_id.is_some());
            }
        }
        assert_eq!(db.count_destination_rows("contacts", &id).expect("count"), 4);
    }

    #[test]
    fn stops_when_migration_is_not_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let id = running_migration(&db, &[record(json!({"Last": "Doe"}))]);
        db.transition_status(&id, &[MigrationStatus::Running], MigrationStatus::Paused)
            .expect("pause");

        let processor = RecordProcessor::new(db.clone(), db.clone());
        let outcome = processor.run(&id).expect("run");
        assert!(outcome.interrupted);
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(db.count_pending(&id).expect("pending"), 1);
        assert_eq!(
            db.get_migration(&id).expect("get").expect("exists").status,
            MigrationStatus::Paused
        );
    }

    #[test]
    fn completed_migration_is_not_reprocessed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let id = running_migration(&db, &[record(json!({"Last": "Doe"}))]);
        let processor = RecordProcessor::new(db.clone(), db.clone());
        processor.run(&id).expect("first pass");

        let again = processor.run(&id).expect("second pass");
        assert_eq!(again.succeeded + again.failed, 0);
        assert_eq!(db.count_destination_rows("contacts", &id).expect("count"), 1);
    }
}
