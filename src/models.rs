use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One flat key-value unit from a source file.
pub type SourceRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    None,
    Lowercase,
    Uppercase,
    Trim,
    Date,
    Number,
    Null,
}

impl TransformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
            Self::Trim => "trim",
            Self::Date => "date",
            Self::Number => "number",
            Self::Null => "null",
        }
    }

    /// Unknown kinds collapse to `None` rather than failing.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lowercase" | "lower" => Self::Lowercase,
            "uppercase" | "upper" => Self::Uppercase,
            "trim" => Self::Trim,
            "date" => Self::Date,
            "number" => Self::Number,
            "null" => Self::Null,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Tsv,
    Json,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" | "text/csv" | "delimited" => Some(Self::Csv),
            "tsv" | "text/tab-separated-values" => Some(Self::Tsv),
            "json" | "application/json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Mapping,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Mapping => "mapping",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "mapping" => Some(Self::Mapping),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::RolledBack
        )
    }

    /// Edges of the migration lifecycle graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MigrationStatus::*;
        match (self, next) {
            (Pending | Mapping, Mapping) => true,
            (Pending | Mapping | Paused, Running) => true,
            (Running, Paused | Completed | Failed) => true,
            (Pending | Mapping | Running | Paused, Cancelled) => true,
            (Completed, RolledBack) => true,
            _ => false,
        }
    }

    /// Every status that may move to `next`.
    pub fn sources_of(next: Self) -> Vec<Self> {
        ALL_MIGRATION_STATUSES
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

pub const ALL_MIGRATION_STATUSES: [MigrationStatus; 8] = [
    MigrationStatus::Pending,
    MigrationStatus::Mapping,
    MigrationStatus::Running,
    MigrationStatus::Paused,
    MigrationStatus::Completed,
    MigrationStatus::Failed,
    MigrationStatus::Cancelled,
    MigrationStatus::RolledBack,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Success,
    Failed,
    RolledBack,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DestinationHint {
    pub table: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectorField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub destination: Option<DestinationHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Connector {
    pub key: String,
    pub name: String,
    pub fields: Vec<ConnectorField>,
    pub detection_keywords: Vec<String>,
    pub popularity_rank: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ParsedField {
    pub name: String,
    pub field_type: FieldType,
    pub sample_values: Vec<String>,
    pub null_rate: f64,
    #[serde(default)]
    pub mixed_types: bool,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct FieldMapping {
    pub source_field: String,
    pub destination_table: String,
    pub destination_field: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub transform: TransformKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Migration {
    pub id: String,
    pub name: String,
    pub source_crm: String,
    pub file_type: FileType,
    pub total_records: i64,
    pub migrated_count: i64,
    pub failed_count: i64,
    pub status: MigrationStatus,
    pub can_rollback: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DestinationRef {
    pub table: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigrationRecord {
    pub id: String,
    pub migration_id: String,
    pub record_index: i64,
    pub source_data: SourceRecord,
    pub status: RecordStatus,
    pub destination_table: Option<String>,
    pub destination_id: Option<String>,
    pub destination_refs: Vec<DestinationRef>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MappingTemplate {
    pub id: String,
    pub name: String,
    pub source_crm: String,
    pub description: Option<String>,
    pub mappings: Vec<FieldMapping>,
    pub is_public: bool,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisResult {
    pub fields: Vec<ParsedField>,
    pub quality_score: u8,
    pub detected_crm: Option<String>,
    pub detected_confidence: f64,
    pub suggested_mappings: Vec<FieldMapping>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MappingUpdateResult {
    pub migration_id: String,
    pub mappings: Vec<FieldMapping>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AcceptedResponse {
    pub migration_id: String,
    pub status: MigrationStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct CrmBreakdown {
    pub source_crm: String,
    pub migrations: i64,
    pub migrated_records: i64,
    pub failed_records: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct MigrationStats {
    pub total_migrations: i64,
    pub by_status: BTreeMap<String, i64>,
    pub total_records: i64,
    pub migrated_records: i64,
    pub failed_records: i64,
    pub success_rate: f64,
    pub by_crm: Vec<CrmBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateMigrationPayload {
    pub name: String,
    pub source_crm: String,
    pub file_content: String,
    pub file_type: String,
    #[serde(default)]
    pub mappings: Option<Vec<FieldMapping>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SaveTemplatePayload {
    pub name: String,
    pub source_crm: String,
    pub mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ListRecordsFilters {
    pub migration_id: String,
    #[serde(default)]
    pub status: Option<RecordStatus>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}
