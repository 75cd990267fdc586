use crate::catalog::seed_connectors;
use crate::config::{merge_json, EngineSettings};
use crate::destination::{find_table, DESTINATION_TABLES};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Connector, CrmBreakdown, DestinationRef, FieldMapping, FieldType, FileType, ListRecordsFilters,
    MappingTemplate, Migration, MigrationRecord, MigrationStats, MigrationStatus, RecordStatus,
    SaveTemplatePayload, SourceRecord, TransformKind,
};
use crate::repo::{
    ConnectorRepo, DestinationRow, MigrationRepo, NewMigration, RecordRepo, SettingsRepo,
    TemplateRepo,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "engine";

const MIGRATION_COLUMNS: &str = "id, name, source_crm, file_type, total_records, migrated_count, failed_count,
     status, can_rollback, created_at, started_at, completed_at, config_json";
const RECORD_COLUMNS: &str = "id, migration_id, record_index, source_json, status, destination_table,
     destination_id, destination_refs_json, error_message, processed_at";
const TEMPLATE_COLUMNS: &str =
    "id, name, source_crm, description, mappings_json, is_public, usage_count, created_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_destination_tables()?;
        db.seed_connectors()?;
        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    fn ensure_destination_tables(&self) -> AppResult<()> {
        let conn = self.lock()?;
        for table in DESTINATION_TABLES {
            let columns = table
                .columns
                .iter()
                .map(|column| {
                    let sql_type = match column.kind {
                        FieldType::Number => "REAL",
                        FieldType::Boolean => "INTEGER",
                        FieldType::String | FieldType::Date => "TEXT",
                    };
                    if column.required {
                        format!("{} {} NOT NULL", column.name, sql_type)
                    } else {
                        format!("{} {}", column.name, sql_type)
                    }
                })
                .collect::<Vec<_>>()
                .join(",\n  ");
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                   id TEXT PRIMARY KEY,
                   source_migration_id TEXT NOT NULL,
                   source_record_id TEXT NOT NULL,
                   created_at TEXT NOT NULL,
                   {columns}
                 );
                 CREATE INDEX IF NOT EXISTS idx_{table}_source_migration ON {table}(source_migration_id);",
                table = table.name,
                columns = columns,
            ))?;
        }
        Ok(())
    }

    fn seed_connectors(&self) -> AppResult<()> {
        let conn = self.lock()?;
        for connector in seed_connectors() {
            conn.execute(
                "INSERT OR IGNORE INTO connectors (key, name, fields_json, keywords_json, popularity_rank, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    connector.key,
                    connector.name,
                    serde_json::to_string(&connector.fields)?,
                    serde_json::to_string(&connector.detection_keywords)?,
                    connector.popularity_rank,
                    connector.is_active,
                ],
            )?;
        }
        Ok(())
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&EngineSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

impl ConnectorRepo for Database {
    fn list_connectors(&self) -> AppResult<Vec<Connector>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT key, name, fields_json, keywords_json, popularity_rank, is_active
             FROM connectors WHERE is_active = 1 ORDER BY popularity_rank ASC, name ASC",
        )?;
        let connectors = statement
            .query_map([], parse_connector_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(connectors)
    }

    fn get_connector(&self, key: &str) -> AppResult<Option<Connector>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT key, name, fields_json, keywords_json, popularity_rank, is_active
             FROM connectors WHERE key = ?1",
            [key],
            parse_connector_row,
        )
        .optional()
        .map_err(AppError::from)
    }
}

impl MigrationRepo for Database {
    fn create_migration(
        &self,
        migration: &NewMigration,
        records: &[SourceRecord],
        mappings: &[FieldMapping],
    ) -> AppResult<Migration> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO migrations (id, name, source_crm, file_type, status, total_records, created_at, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                migration.name,
                migration.source_crm,
                migration.file_type.as_str(),
                migration.status.as_str(),
                records.len() as i64,
                now.to_rfc3339(),
                serde_json::to_string(&migration.config)?,
            ],
        )?;
        insert_record_rows(&tx, &id, records)?;
        write_mappings(&tx, &id, mappings)?;
        tx.commit()?;

        Ok(Migration {
            id,
            name: migration.name.clone(),
            source_crm: migration.source_crm.clone(),
            file_type: migration.file_type,
            total_records: records.len() as i64,
            migrated_count: 0,
            failed_count: 0,
            status: migration.status,
            can_rollback: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            config: migration.config.clone(),
        })
    }

    fn get_migration(&self, migration_id: &str) -> AppResult<Option<Migration>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM migrations WHERE id = ?1", MIGRATION_COLUMNS),
            [migration_id],
            parse_migration_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn list_migrations(&self, limit: i64) -> AppResult<Vec<Migration>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM migrations ORDER BY created_at DESC LIMIT ?1",
            MIGRATION_COLUMNS
        ))?;
        let migrations = statement
            .query_map([limit], parse_migration_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(migrations)
    }

    fn transition_status(
        &self,
        migration_id: &str,
        from: &[MigrationStatus],
        to: MigrationStatus,
    ) -> AppResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let stamp = match to {
            MigrationStatus::Running => ", started_at = COALESCE(started_at, ?3)",
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::Cancelled => {
                ", completed_at = ?3"
            }
            _ => "",
        };
        let mut values: Vec<String> = vec![to.as_str().to_string(), migration_id.to_string()];
        if !stamp.is_empty() {
            values.push(Utc::now().to_rfc3339());
        }
        let first_status = values.len() + 1;
        let placeholders = (0..from.len())
            .map(|index| format!("?{}", first_status + index))
            .collect::<Vec<_>>()
            .join(", ");
        values.extend(from.iter().map(|status| status.as_str().to_string()));

        let sql = format!(
            "UPDATE migrations SET status = ?1{} WHERE id = ?2 AND status IN ({})",
            stamp, placeholders
        );
        let conn = self.lock()?;
        let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    fn complete_migration(&self, migration_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE migrations
             SET status = 'completed',
                 completed_at = ?1,
                 can_rollback = CASE WHEN migrated_count > 0 THEN 1 ELSE 0 END
             WHERE id = ?2 AND status = 'running'",
            params![Utc::now().to_rfc3339(), migration_id],
        )?;
        Ok(changed > 0)
    }

    fn begin_rollback(&self, migration_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE migrations SET status = 'rolled_back', can_rollback = 0
             WHERE id = ?1 AND status = 'completed' AND can_rollback = 1",
            [migration_id],
        )?;
        Ok(changed > 0)
    }

    fn restore_rollback(&self, migration_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE migrations SET status = 'completed', can_rollback = 1
             WHERE id = ?1 AND status = 'rolled_back'",
            [migration_id],
        )?;
        Ok(changed > 0)
    }

    fn replace_mappings(&self, migration_id: &str, mappings: &[FieldMapping]) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM field_mappings WHERE migration_id = ?1", [migration_id])?;
        write_mappings(&tx, migration_id, mappings)?;
        tx.commit()?;
        Ok(())
    }

    fn list_mappings(&self, migration_id: &str) -> AppResult<Vec<FieldMapping>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT source_field, destination_table, destination_field, confidence, transform
             FROM field_mappings WHERE migration_id = ?1 ORDER BY position ASC",
        )?;
        let mappings = statement
            .query_map([migration_id], |row| {
                Ok(FieldMapping {
                    source_field: row.get(0)?,
                    destination_table: row.get(1)?,
                    destination_field: row.get(2)?,
                    confidence: row.get(3)?,
                    transform: TransformKind::parse_lenient(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    fn migration_stats(&self) -> AppResult<MigrationStats> {
        let conn = self.lock()?;
        let mut stats = MigrationStats::default();

        let mut status_stmt =
            conn.prepare("SELECT status, COUNT(1) FROM migrations GROUP BY status")?;
        let mut rows = status_stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            stats.total_migrations += count;
            stats.by_status.insert(status, count);
        }

        let (total, migrated, failed): (i64, i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(total_records), 0), COALESCE(SUM(migrated_count), 0),
                    COALESCE(SUM(failed_count), 0)
             FROM migrations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        stats.total_records = total;
        stats.migrated_records = migrated;
        stats.failed_records = failed;
        stats.success_rate = if migrated + failed > 0 {
            ((migrated as f64 / (migrated + failed) as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        let mut crm_stmt = conn.prepare(
            "SELECT source_crm, COUNT(1), COALESCE(SUM(migrated_count), 0), COALESCE(SUM(failed_count), 0)
             FROM migrations GROUP BY source_crm ORDER BY COUNT(1) DESC, source_crm ASC",
        )?;
        stats.by_crm = crm_stmt
            .query_map([], |row| {
                Ok(CrmBreakdown {
                    source_crm: row.get(0)?,
                    migrations: row.get(1)?,
                    migrated_records: row.get(2)?,
                    failed_records: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    fn pause_orphaned_migrations(&self) -> AppResult<u64> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE migrations SET status = 'paused' WHERE status = 'running'",
            [],
        )?;
        Ok(changed as u64)
    }
}

impl RecordRepo for Database {
    fn list_records(&self, filters: &ListRecordsFilters) -> AppResult<Vec<MigrationRecord>> {
        let conn = self.lock()?;
        let mut query = format!(
            "SELECT {} FROM migration_records WHERE migration_id = ?",
            RECORD_COLUMNS
        );
        let mut params_vec: Vec<String> = vec![filters.migration_id.clone()];
        if let Some(status) = filters.status {
            query.push_str(" AND status = ?");
            params_vec.push(status.as_str().to_string());
        }
        query.push_str(" ORDER BY record_index ASC LIMIT ? OFFSET ?");

        let limit = filters.limit.unwrap_or(100);
        let offset = filters.offset.unwrap_or(0);
        let mut statement = conn.prepare(&query)?;
        let mut dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        dyn_params.push(&limit);
        dyn_params.push(&offset);

        let records = statement
            .query_map(rusqlite::params_from_iter(dyn_params), parse_record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn pending_records(&self, migration_id: &str) -> AppResult<Vec<MigrationRecord>> {
        self.records_with_status(migration_id, RecordStatus::Pending)
    }

    fn successful_records(&self, migration_id: &str) -> AppResult<Vec<MigrationRecord>> {
        self.records_with_status(migration_id, RecordStatus::Success)
    }

    fn count_pending(&self, migration_id: &str) -> AppResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(1) FROM migration_records WHERE migration_id = ?1 AND status = 'pending'",
            [migration_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn commit_record_success(
        &self,
        migration_id: &str,
        record_id: &str,
        rows: &[DestinationRow],
    ) -> AppResult<Option<Vec<DestinationRef>>> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let claimed = tx.execute(
            "UPDATE migration_records SET status = 'success', processed_at = ?1
             WHERE id = ?2 AND migration_id = ?3 AND status = 'pending'",
            params![now, record_id, migration_id],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        let mut refs = Vec::with_capacity(rows.len());
        for row in rows {
            let table = find_table(row.table).ok_or_else(|| {
                AppError::Validation(format!("unknown destination table {}", row.table))
            })?;
            let id = Uuid::new_v4().to_string();
            let mut columns = vec!["id", "source_migration_id", "source_record_id", "created_at"];
            let mut values: Vec<rusqlite::types::Value> = vec![
                id.clone().into(),
                migration_id.to_string().into(),
                record_id.to_string().into(),
                now.clone().into(),
            ];
            for (column, value) in &row.values {
                let column = table.column(column).ok_or_else(|| {
                    AppError::Validation(format!("unknown destination field {}.{}", table.name, column))
                })?;
                columns.push(column.name);
                values.push(sql_value(value));
            }
            let placeholders = (1..=columns.len())
                .map(|index| format!("?{}", index))
                .collect::<Vec<_>>()
                .join(", ");
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.name,
                    columns.join(", "),
                    placeholders
                ),
                rusqlite::params_from_iter(values),
            )?;
            refs.push(DestinationRef {
                table: table.name.to_string(),
                id,
            });
        }

        let primary = refs.first();
        tx.execute(
            "UPDATE migration_records
             SET destination_table = ?1, destination_id = ?2, destination_refs_json = ?3
             WHERE id = ?4",
            params![
                primary.map(|reference| reference.table.clone()),
                primary.map(|reference| reference.id.clone()),
                serde_json::to_string(&refs)?,
                record_id,
            ],
        )?;
        tx.execute(
            "UPDATE migrations SET migrated_count = migrated_count + 1 WHERE id = ?1",
            [migration_id],
        )?;
        tx.commit()?;
        Ok(Some(refs))
    }

    fn commit_record_failure(
        &self,
        migration_id: &str,
        record_id: &str,
        error_message: &str,
    ) -> AppResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE migration_records SET status = 'failed', error_message = ?1, processed_at = ?2
             WHERE id = ?3 AND migration_id = ?4 AND status = 'pending'",
            params![error_message, Utc::now().to_rfc3339(), record_id, migration_id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE migrations SET failed_count = failed_count + 1 WHERE id = ?1",
            [migration_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn rollback_record(&self, record: &MigrationRecord) -> AppResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut deleted = 0usize;
        for reference in &record.destination_refs {
            let table = find_table(&reference.table).ok_or_else(|| {
                AppError::Internal(format!(
                    "record {} references unknown table {}",
                    record.id, reference.table
                ))
            })?;
            deleted += tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", table.name),
                [&reference.id],
            )?;
        }
        tx.execute(
            "UPDATE migration_records SET status = 'rolled_back' WHERE id = ?1 AND status = 'success'",
            [&record.id],
        )?;
        tx.commit()?;
        Ok(deleted)
    }
}

impl Database {
    fn records_with_status(
        &self,
        migration_id: &str,
        status: RecordStatus,
    ) -> AppResult<Vec<MigrationRecord>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM migration_records WHERE migration_id = ?1 AND status = ?2
             ORDER BY record_index ASC",
            RECORD_COLUMNS
        ))?;
        let records = statement
            .query_map(params![migration_id, status.as_str()], parse_record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    #[cfg(test)]
    pub(crate) fn count_destination_rows(&self, table: &str, migration_id: &str) -> AppResult<i64> {
        let table = find_table(table)
            .ok_or_else(|| AppError::Validation(format!("unknown destination table {}", table)))?;
        let conn = self.lock()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(1) FROM {} WHERE source_migration_id = ?1",
                table.name
            ),
            [migration_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl TemplateRepo for Database {
    fn insert_template(&self, payload: &SaveTemplatePayload) -> AppResult<MappingTemplate> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO mapping_templates (id, name, source_crm, description, mappings_json, is_public, usage_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                id,
                payload.name,
                payload.source_crm,
                payload.description,
                serde_json::to_string(&payload.mappings)?,
                payload.is_public,
                now.to_rfc3339(),
            ],
        )?;
        Ok(MappingTemplate {
            id,
            name: payload.name.clone(),
            source_crm: payload.source_crm.clone(),
            description: payload.description.clone(),
            mappings: payload.mappings.clone(),
            is_public: payload.is_public,
            usage_count: 0,
            created_at: now,
        })
    }

    fn get_template(&self, template_id: &str) -> AppResult<Option<MappingTemplate>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM mapping_templates WHERE id = ?1", TEMPLATE_COLUMNS),
            [template_id],
            parse_template_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn list_templates(&self, source_crm: Option<&str>) -> AppResult<Vec<MappingTemplate>> {
        let conn = self.lock()?;
        let templates = match source_crm {
            Some(source_crm) => {
                let mut statement = conn.prepare(&format!(
                    "SELECT {} FROM mapping_templates WHERE source_crm = ?1
                     ORDER BY usage_count DESC, created_at DESC",
                    TEMPLATE_COLUMNS
                ))?;
                let rows = statement
                    .query_map([source_crm], parse_template_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut statement = conn.prepare(&format!(
                    "SELECT {} FROM mapping_templates ORDER BY usage_count DESC, created_at DESC",
                    TEMPLATE_COLUMNS
                ))?;
                let rows = statement
                    .query_map([], parse_template_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(templates)
    }

    fn increment_template_usage(&self, template_id: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE mapping_templates SET usage_count = usage_count + 1 WHERE id = ?1",
            [template_id],
        )?;
        Ok(())
    }
}

impl SettingsRepo for Database {
    fn get_settings(&self) -> AppResult<EngineSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<EngineSettings>(&raw).unwrap_or_default()),
            None => Ok(EngineSettings::default()),
        }
    }

    fn update_settings(&self, patch: serde_json::Value) -> AppResult<EngineSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, patch);
        let settings: EngineSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("invalid settings: {}", error)))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![
                SETTINGS_KEY,
                serde_json::to_string(&settings)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(settings)
    }
}

fn insert_record_rows(
    conn: &Connection,
    migration_id: &str,
    records: &[SourceRecord],
) -> AppResult<()> {
    let mut statement = conn.prepare(
        "INSERT INTO migration_records (id, migration_id, record_index, source_json, status)
         VALUES (?1, ?2, ?3, ?4, 'pending')",
    )?;
    for (index, record) in records.iter().enumerate() {
        statement.execute(params![
            Uuid::new_v4().to_string(),
            migration_id,
            index as i64,
            serde_json::to_string(record)?,
        ])?;
    }
    Ok(())
}

fn write_mappings(conn: &Connection, migration_id: &str, mappings: &[FieldMapping]) -> AppResult<()> {
    let mut statement = conn.prepare(
        "INSERT INTO field_mappings
           (migration_id, position, source_field, destination_table, destination_field, confidence, transform)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (position, mapping) in mappings.iter().enumerate() {
        statement.execute(params![
            migration_id,
            position as i64,
            mapping.source_field,
            mapping.destination_table,
            mapping.destination_field,
            mapping.confidence,
            mapping.transform.as_str(),
        ])?;
    }
    Ok(())
}

fn sql_value(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_json_column<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|error| conversion_error(error.to_string()))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

fn parse_migration_status(raw: &str) -> rusqlite::Result<MigrationStatus> {
    MigrationStatus::parse(raw)
        .ok_or_else(|| conversion_error(format!("Unknown migration status '{}'", raw)))
}

fn parse_record_status(raw: &str) -> rusqlite::Result<RecordStatus> {
    RecordStatus::parse(raw).ok_or_else(|| conversion_error(format!("Unknown record status '{}'", raw)))
}

fn parse_file_type(raw: &str) -> rusqlite::Result<FileType> {
    FileType::parse(raw).ok_or_else(|| conversion_error(format!("Unknown file type '{}'", raw)))
}

fn parse_connector_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connector> {
    Ok(Connector {
        key: row.get(0)?,
        name: row.get(1)?,
        fields: parse_json_column(&row.get::<_, String>(2)?)?,
        detection_keywords: parse_json_column(&row.get::<_, String>(3)?)?,
        popularity_rank: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn parse_migration_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Migration> {
    Ok(Migration {
        id: row.get(0)?,
        name: row.get(1)?,
        source_crm: row.get(2)?,
        file_type: parse_file_type(&row.get::<_, String>(3)?)?,
        total_records: row.get(4)?,
        migrated_count: row.get(5)?,
        failed_count: row.get(6)?,
        status: parse_migration_status(&row.get::<_, String>(7)?)?,
        can_rollback: row.get(8)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        started_at: parse_optional_time(row.get(10)?)?,
        completed_at: parse_optional_time(row.get(11)?)?,
        config: serde_json::from_str(&row.get::<_, String>(12)?).unwrap_or(serde_json::json!({})),
    })
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MigrationRecord> {
    Ok(MigrationRecord {
        id: row.get(0)?,
        migration_id: row.get(1)?,
        record_index: row.get(2)?,
        source_data: parse_json_column(&row.get::<_, String>(3)?)?,
        status: parse_record_status(&row.get::<_, String>(4)?)?,
        destination_table: row.get(5)?,
        destination_id: row.get(6)?,
        destination_refs: parse_json_column(&row.get::<_, String>(7)?)?,
        error_message: row.get(8)?,
        processed_at: parse_optional_time(row.get(9)?)?,
    })
}

fn parse_template_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MappingTemplate> {
    Ok(MappingTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        source_crm: row.get(2)?,
        description: row.get(3)?,
        mappings: parse_json_column(&row.get::<_, String>(4)?)?,
        is_public: row.get(5)?,
        usage_count: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::models::{
        FieldMapping, FileType, ListRecordsFilters, MigrationStatus, RecordStatus,
        SaveTemplatePayload, SourceRecord, TransformKind,
    };
    use crate::repo::{
        ConnectorRepo, DestinationRow, MigrationRepo, NewMigration, RecordRepo, SettingsRepo,
        TemplateRepo,
    };

    fn open(dir: &tempfile::TempDir) -> Database {
        Database::new(&dir.path().join("test.db")).expect("db")
    }

    fn new_migration(db: &Database) -> String {
        seeded_migration(db, &[])
    }

    fn seeded_migration(db: &Database, records: &[SourceRecord]) -> String {
        db.create_migration(
            &NewMigration {
                name: "import".to_string(),
                source_crm: "hubspot".to_string(),
                file_type: FileType::Csv,
                status: MigrationStatus::Pending,
                config: serde_json::json!({}),
            },
            records,
            &[],
        )
        .expect("create migration")
        .id
    }

    fn record(last_name: &str) -> SourceRecord {
        let mut record = SourceRecord::new();
        record.insert("Last".to_string(), serde_json::json!(last_name));
        record
    }

    #[test]
    fn seeds_connectors_and_settings_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let first = Database::new(&db_path).expect("db");
        let count = first.list_connectors().expect("connectors").len();
        drop(first);
        let second = Database::new(&db_path).expect("reopen");
        assert_eq!(second.list_connectors().expect("connectors").len(), count);
        assert_eq!(second.get_settings().expect("settings").record_batch_cap, 1_000);
        assert!(second.get_connector("salesforce").expect("lookup").is_some());
    }

    #[test]
    fn status_transitions_are_compare_and_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let id = new_migration(&db);

        assert!(!db
            .transition_status(&id, &[MigrationStatus::Running], MigrationStatus::Paused)
            .expect("cas"));
        assert!(db
            .transition_status(&id, &[MigrationStatus::Pending], MigrationStatus::Running)
            .expect("cas"));
        let migration = db.get_migration(&id).expect("get").expect("exists");
        assert_eq!(migration.status, MigrationStatus::Running);
        assert!(migration.started_at.is_some());
        assert!(db
            .transition_status(&id, &[MigrationStatus::Running], MigrationStatus::Paused)
            .expect("cas"));
    }

    #[test]
    fn success_commit_writes_rows_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let id = seeded_migration(&db, &[record("Lovelace")]);
        let pending = db.pending_records(&id).expect("pending");
        assert_eq!(pending.len(), 1);

        let rows = vec![DestinationRow {
            table: "contacts",
            values: vec![("last_name", serde_json::json!("Lovelace"))],
        }];
        let refs = db
            .commit_record_success(&id, &pending[0].id, &rows)
            .expect("commit")
            .expect("claimed");
        assert_eq!(refs.len(), 1);
        assert!(db
            .commit_record_success(&id, &pending[0].id, &rows)
            .expect("second commit")
            .is_none());
        assert_eq!(db.count_destination_rows("contacts", &id).expect("count"), 1);

        let migration = db.get_migration(&id).expect("get").expect("exists");
        assert_eq!(migration.total_records, 1);
        assert_eq!(migration.migrated_count, 1);

        let done = db.successful_records(&id).expect("success");
        assert_eq!(done[0].destination_table.as_deref(), Some("contacts"));
        assert_eq!(db.rollback_record(&done[0]).expect("rollback"), 1);
        assert_eq!(db.count_destination_rows("contacts", &id).expect("count"), 0);
    }

    #[test]
    fn rejected_write_leaves_record_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let id = seeded_migration(&db, &[record("x")]);
        let pending = db.pending_records(&id).expect("pending");

        // last_name is NOT NULL in the destination table.
        let rows = vec![DestinationRow {
            table: "contacts",
            values: vec![("email", serde_json::json!("x@example.com"))],
        }];
        assert!(db.commit_record_success(&id, &pending[0].id, &rows).is_err());
        assert_eq!(db.count_pending(&id).expect("count"), 1);
        assert_eq!(db.count_destination_rows("contacts", &id).expect("count"), 0);

        assert!(db
            .commit_record_failure(&id, &pending[0].id, "write rejected")
            .expect("fail"));
        let failed = db
            .list_records(&ListRecordsFilters {
                migration_id: id.clone(),
                status: Some(RecordStatus::Failed),
                ..ListRecordsFilters::default()
            })
            .expect("list");
        assert_eq!(failed[0].error_message.as_deref(), Some("write rejected"));
        assert_eq!(db.get_migration(&id).expect("get").expect("exists").failed_count, 1);
    }

    #[test]
    fn create_migration_is_all_or_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let new = NewMigration {
            name: "import".to_string(),
            source_crm: "hubspot".to_string(),
            file_type: FileType::Csv,
            status: MigrationStatus::Mapping,
            config: serde_json::json!({}),
        };
        let mapping = |confidence: f64| FieldMapping {
            source_field: "Last".to_string(),
            destination_table: "contacts".to_string(),
            destination_field: "last_name".to_string(),
            confidence,
            transform: TransformKind::Trim,
        };

        // NaN binds as NULL and trips the NOT NULL confidence column.
        assert!(db
            .create_migration(&new, &[record("Lovelace"), record("Hopper")], &[mapping(f64::NAN)])
            .is_err());
        assert!(db.list_migrations(10).expect("list").is_empty());
        let orphans: i64 = db
            .lock()
            .expect("lock")
            .query_row("SELECT COUNT(1) FROM migration_records", [], |row| row.get(0))
            .expect("count");
        assert_eq!(orphans, 0);

        let created = db
            .create_migration(&new, &[record("Lovelace"), record("Hopper")], &[mapping(0.9)])
            .expect("create");
        assert_eq!(created.total_records, 2);
        assert_eq!(db.count_pending(&created.id).expect("pending"), 2);
        assert_eq!(db.list_mappings(&created.id).expect("mappings"), vec![mapping(0.9)]);
    }

    #[test]
    fn mappings_are_replaced_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let id = new_migration(&db);
        let mapping = |source: &str, field: &str| FieldMapping {
            source_field: source.to_string(),
            destination_table: "contacts".to_string(),
            destination_field: field.to_string(),
            confidence: 0.9,
            transform: TransformKind::Trim,
        };
        db.replace_mappings(&id, &[mapping("a", "email"), mapping("b", "phone")])
            .expect("first");
        db.replace_mappings(&id, &[mapping("c", "last_name")]).expect("second");
        let mappings = db.list_mappings(&id).expect("list");
        assert_eq!(mappings, vec![mapping("c", "last_name")]);
    }

    #[test]
    fn templates_filter_by_crm_and_track_usage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let saved = db
            .insert_template(&SaveTemplatePayload {
                name: "hubspot contacts".to_string(),
                source_crm: "hubspot".to_string(),
                mappings: Vec::new(),
                description: None,
                is_public: true,
            })
            .expect("save");
        db.increment_template_usage(&saved.id).expect("usage");
        assert_eq!(db.list_templates(Some("hubspot")).expect("list").len(), 1);
        assert!(db.list_templates(Some("zoho")).expect("list").is_empty());
        assert_eq!(
            db.get_template(&saved.id).expect("get").expect("exists").usage_count,
            1
        );
    }

    #[test]
    fn restore_rollback_rearms_only_rolled_back_migrations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let id = seeded_migration(&db, &[record("Lovelace")]);
        assert!(!db.restore_rollback(&id).expect("pending is untouched"));

        db.transition_status(&id, &[MigrationStatus::Pending], MigrationStatus::Running)
            .expect("run");
        let pending = db.pending_records(&id).expect("pending");
        let rows = vec![DestinationRow {
            table: "contacts",
            values: vec![("last_name", serde_json::json!("Lovelace"))],
        }];
        db.commit_record_success(&id, &pending[0].id, &rows)
            .expect("commit")
            .expect("claimed");
        assert!(db.complete_migration(&id).expect("complete"));
        assert!(db.begin_rollback(&id).expect("begin"));
        assert!(!db.begin_rollback(&id).expect("consumed"));

        assert!(db.restore_rollback(&id).expect("restore"));
        let migration = db.get_migration(&id).expect("get").expect("exists");
        assert_eq!(migration.status, MigrationStatus::Completed);
        assert!(migration.can_rollback);
        assert!(db.begin_rollback(&id).expect("retry"));
    }

    #[test]
    fn orphaned_running_migrations_are_paused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let id = new_migration(&db);
        db.transition_status(&id, &[MigrationStatus::Pending], MigrationStatus::Running)
            .expect("run");
        assert_eq!(db.pause_orphaned_migrations().expect("recover"), 1);
        assert_eq!(
            db.get_migration(&id).expect("get").expect("exists").status,
            MigrationStatus::Paused
        );
    }

    #[test]
    fn settings_patch_is_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open(&dir);
        let updated = db
            .update_settings(serde_json::json!({ "record_batch_cap": 3 }))
            .expect("update");
        assert_eq!(updated.record_batch_cap, 3);
        assert_eq!(db.get_settings().expect("get").record_batch_cap, 3);
        assert!(db
            .update_settings(serde_json::json!({ "worker_limit": "many" }))
            .is_err());
    }
}
