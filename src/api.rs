//! Single action-dispatch endpoint.
//!
//! Every request is a JSON object with an `action` string plus the fields
//! that action needs. Success bodies carry `success: true`; failures carry
//! `success: false`, the rendered error and its code.

use crate::controller::MigrationController;
use crate::errors::{AppError, AppResult};
use crate::models::{
    CreateMigrationPayload, FieldMapping, ListRecordsFilters, SaveTemplatePayload,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<MigrationController>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    ListConnectors,
    ListMigrations {
        #[serde(default)]
        limit: Option<i64>,
    },
    ListTemplates {
        #[serde(default)]
        source_crm: Option<String>,
    },
    AnalyzeFile {
        file_content: String,
        file_type: String,
        #[serde(default)]
        source_crm: Option<String>,
    },
    CreateMigration(CreateMigrationPayload),
    UpdateMappings {
        migration_id: String,
        mappings: Vec<FieldMapping>,
    },
    RunMigration {
        migration_id: String,
    },
    PauseMigration {
        migration_id: String,
    },
    ResumeMigration {
        migration_id: String,
    },
    CancelMigration {
        migration_id: String,
    },
    RollbackMigration {
        migration_id: String,
    },
    ListRecords(ListRecordsFilters),
    GetStatus {
        migration_id: String,
    },
    GetStats,
    SaveTemplate(SaveTemplatePayload),
    ApplyTemplate {
        migration_id: String,
        template_id: String,
    },
    GetSettings,
    UpdateSettings {
        settings: Value,
    },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

pub fn router(controller: Arc<MigrationController>) -> Router {
    Router::new()
        .route("/api/migrations", post(handle_action))
        .route("/health", get(health))
        .with_state(ApiState { controller })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_action(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match body {
        Ok(Json(body)) => dispatch(&state.controller, body).await,
        Err(rejection) => {
            let error = AppError::Validation(format!("invalid request body: {}", rejection.body_text()));
            (status_for(&error), error_body(&error))
        }
    };
    (status, Json(body))
}

/// Decodes and runs one action, returning the HTTP status and JSON body.
pub async fn dispatch(controller: &MigrationController, body: Value) -> (StatusCode, Value) {
    let action = body
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let result = match parse_request(body) {
        Ok(request) => execute(controller, request).await,
        Err(error) => Err(error),
    };
    match result {
        Ok(body) => (StatusCode::OK, body),
        Err(error) => {
            match &error {
                AppError::Internal(_) | AppError::Io(_) => {
                    tracing::error!(action = %action, error = %error, "action failed");
                }
                _ => tracing::debug!(action = %action, error = %error, "action rejected"),
            }
            (status_for(&error), error_body(&error))
        }
    }
}

pub fn parse_request(body: Value) -> AppResult<ActionRequest> {
    match body.get("action") {
        Some(Value::String(action)) if !action.trim().is_empty() => {}
        _ => return Err(AppError::Validation("action is required".to_string())),
    }
    serde_json::from_value(body)
        .map_err(|error| AppError::Validation(format!("invalid request: {}", error)))
}

async fn execute(controller: &MigrationController, request: ActionRequest) -> AppResult<Value> {
    match request {
        ActionRequest::ListConnectors => ok("connectors", controller.list_connectors()?),
        ActionRequest::ListMigrations { limit } => {
            ok("migrations", controller.list_migrations(limit)?)
        }
        ActionRequest::ListTemplates { source_crm } => {
            ok("templates", controller.list_templates(source_crm.as_deref())?)
        }
        ActionRequest::AnalyzeFile {
            file_content,
            file_type,
            source_crm,
        } => ok(
            "analysis",
            controller
                .analyze_file(&file_content, &file_type, source_crm.as_deref())
                .await?,
        ),
        ActionRequest::CreateMigration(payload) => ok(
            "migration",
            controller
                .run_blocking(move |controller| controller.create_migration(payload))
                .await?,
        ),
        ActionRequest::UpdateMappings {
            migration_id,
            mappings,
        } => ok_flat(
            controller
                .run_blocking(move |controller| controller.update_mappings(&migration_id, mappings))
                .await?,
        ),
        ActionRequest::RunMigration { migration_id } => {
            ok_flat(controller.run_migration(&migration_id).await?)
        }
        ActionRequest::PauseMigration { migration_id } => {
            ok_flat(controller.pause_migration(&migration_id)?)
        }
        ActionRequest::ResumeMigration { migration_id } => {
            ok_flat(controller.resume_migration(&migration_id).await?)
        }
        ActionRequest::CancelMigration { migration_id } => {
            ok_flat(controller.cancel_migration(&migration_id)?)
        }
        ActionRequest::RollbackMigration { migration_id } => {
            ok_flat(controller.rollback_migration(&migration_id).await?)
        }
        ActionRequest::ListRecords(filters) => ok(
            "records",
            controller
                .run_blocking(move |controller| controller.list_records(filters))
                .await?,
        ),
        ActionRequest::GetStatus { migration_id } => {
            ok("migration", controller.get_status(&migration_id)?)
        }
        ActionRequest::GetStats => ok("stats", controller.get_stats()?),
        ActionRequest::SaveTemplate(payload) => ok("template", controller.save_template(payload)?),
        ActionRequest::ApplyTemplate {
            migration_id,
            template_id,
        } => {
            let (template, result) = controller
                .run_blocking(move |controller| controller.apply_template(&migration_id, &template_id))
                .await?;
            let mut body = ok_flat(result)?;
            body["template"] = serde_json::to_value(template)?;
            Ok(body)
        }
        ActionRequest::GetSettings => ok("settings", controller.get_settings()?),
        ActionRequest::UpdateSettings { settings } => {
            ok("settings", controller.update_settings(settings)?)
        }
    }
}

fn ok(key: &str, payload: impl Serialize) -> AppResult<Value> {
    let mut body = serde_json::Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    body.insert(key.to_string(), serde_json::to_value(payload)?);
    Ok(Value::Object(body))
}

fn ok_flat(payload: impl Serialize) -> AppResult<Value> {
    let mut body = match serde_json::to_value(payload)? {
        Value::Object(fields) => fields,
        other => {
            let mut fields = serde_json::Map::new();
            fields.insert("result".to_string(), other);
            fields
        }
    };
    body.insert("success".to_string(), Value::Bool(true));
    Ok(Value::Object(body))
}

pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation(_) | AppError::Parse(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Precondition(_) => StatusCode::CONFLICT,
        AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        AppError::Record(_) | AppError::Io(_) | AppError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_body(error: &AppError) -> Value {
    serde_json::to_value(ErrorBody {
        success: false,
        error: error.to_string(),
        code: error.code(),
    })
    .unwrap_or_else(|_| json!({ "success": false, "error": error.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::{dispatch, parse_request, status_for, ActionRequest};
    use crate::controller::MigrationController;
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::repo::Repositories;
    use crate::suggest::provider::StaticSuggestionProvider;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    fn controller(dir: &tempfile::TempDir) -> Arc<MigrationController> {
        let db = Arc::new(Database::new(&dir.path().join("api.db")).expect("db"));
        MigrationController::new(
            Repositories::from_database(db),
            Arc::new(StaticSuggestionProvider::failing("offline")),
        )
        .expect("controller")
    }

    #[test]
    fn decodes_actions_with_optional_fields() {
        let request = parse_request(json!({
            "action": "list_records",
            "migration_id": "m1",
            "status": "failed",
            "limit": 10
        }))
        .expect("parse");
        match request {
            ActionRequest::ListRecords(filters) => {
                assert_eq!(filters.migration_id, "m1");
                assert_eq!(filters.limit, Some(10));
                assert!(filters.status.is_some());
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert!(matches!(
            parse_request(json!({ "action": "get_stats" })).expect("parse"),
            ActionRequest::GetStats
        ));
    }

    #[test]
    fn missing_action_or_fields_are_validation_errors() {
        assert!(matches!(
            parse_request(json!({ "migration_id": "m1" })),
            Err(AppError::Validation(message)) if message == "action is required"
        ));
        assert!(matches!(
            parse_request(json!({ "action": "run_migration" })),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_request(json!({ "action": "drop_tables" })),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn error_statuses_follow_taxonomy() {
        assert_eq!(
            status_for(&AppError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&AppError::Parse("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&AppError::Precondition("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AppError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn dispatch_wraps_success_and_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let controller = controller(&dir);

        let (status, body) = dispatch(&controller, json!({ "action": "list_connectors" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["connectors"].as_array().expect("array").len() >= 10);

        let (status, body) = dispatch(
            &controller,
            json!({ "action": "get_status", "migration_id": "missing" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "NOT_FOUND");
        assert!(body["error"].as_str().expect("error").starts_with("NOT_FOUND:"));
    }

    #[tokio::test]
    async fn analyze_never_fails_on_suggestion_outage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let controller = controller(&dir);
        let (status, body) = dispatch(
            &controller,
            json!({
                "action": "analyze_file",
                "file_content": "Email,Last Name\na@b.co,Doe\n",
                "file_type": "csv"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis"]["record_count"], 1);
        assert_eq!(body["analysis"]["suggested_mappings"], json!([]));
    }
}
