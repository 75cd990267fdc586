//! Canonical destination schema.
//!
//! Every table and column name that reaches SQL comes from this whitelist;
//! mappings naming anything else are rejected before a migration can run.

use crate::errors::{AppError, AppResult};
use crate::models::{FieldMapping, FieldType};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct DestinationColumn {
    pub name: &'static str,
    pub kind: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DestinationTable {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: &'static [DestinationColumn],
}

const fn col(name: &'static str, kind: FieldType, required: bool) -> DestinationColumn {
    DestinationColumn {
        name,
        kind,
        required,
    }
}

pub const DESTINATION_TABLES: &[DestinationTable] = &[
    DestinationTable {
        name: "contacts",
        description: "People: leads and contacts",
        columns: &[
            col("first_name", FieldType::String, false),
            col("last_name", FieldType::String, true),
            col("email", FieldType::String, false),
            col("phone", FieldType::String, false),
            col("mobile", FieldType::String, false),
            col("job_title", FieldType::String, false),
            col("company_name", FieldType::String, false),
            col("lead_source", FieldType::String, false),
            col("lead_status", FieldType::String, false),
            col("address", FieldType::String, false),
            col("city", FieldType::String, false),
            col("country", FieldType::String, false),
            col("notes", FieldType::String, false),
            col("do_not_contact", FieldType::Boolean, false),
            col("created_date", FieldType::Date, false),
        ],
    },
    DestinationTable {
        name: "companies",
        description: "Organizations and accounts",
        columns: &[
            col("name", FieldType::String, true),
            col("domain", FieldType::String, false),
            col("website", FieldType::String, false),
            col("industry", FieldType::String, false),
            col("phone", FieldType::String, false),
            col("employee_count", FieldType::Number, false),
            col("annual_revenue", FieldType::Number, false),
            col("address", FieldType::String, false),
            col("city", FieldType::String, false),
            col("country", FieldType::String, false),
            col("created_date", FieldType::Date, false),
        ],
    },
    DestinationTable {
        name: "deals",
        description: "Opportunities in the sales pipeline",
        columns: &[
            col("name", FieldType::String, true),
            col("amount", FieldType::Number, false),
            col("currency", FieldType::String, false),
            col("stage", FieldType::String, false),
            col("probability", FieldType::Number, false),
            col("close_date", FieldType::Date, false),
            col("owner", FieldType::String, false),
            col("company_name", FieldType::String, false),
            col("is_won", FieldType::Boolean, false),
        ],
    },
    DestinationTable {
        name: "activities",
        description: "Calls, meetings, tasks and notes",
        columns: &[
            col("subject", FieldType::String, true),
            col("activity_type", FieldType::String, false),
            col("due_date", FieldType::Date, false),
            col("completed", FieldType::Boolean, false),
            col("contact_email", FieldType::String, false),
            col("notes", FieldType::String, false),
        ],
    },
];

pub fn find_table(name: &str) -> Option<&'static DestinationTable> {
    DESTINATION_TABLES.iter().find(|table| table.name == name)
}

impl DestinationTable {
    pub fn column(&self, name: &str) -> Option<&'static DestinationColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &'static DestinationColumn> {
        self.columns.iter().filter(|column| column.required)
    }
}

pub fn is_known_target(table: &str, field: &str) -> bool {
    find_table(table)
        .and_then(|table| table.column(field))
        .is_some()
}

/// Rejects unknown targets; returns duplicate-target warnings.
pub fn validate_mappings(mappings: &[FieldMapping]) -> AppResult<Vec<String>> {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    for mapping in mappings {
        if mapping.source_field.trim().is_empty() {
            return Err(AppError::Validation(
                "mapping source_field cannot be empty".to_string(),
            ));
        }
        if !is_known_target(&mapping.destination_table, &mapping.destination_field) {
            return Err(AppError::Validation(format!(
                "unknown destination {}.{} for source field '{}'",
                mapping.destination_table, mapping.destination_field, mapping.source_field
            )));
        }
        let target = (
            mapping.destination_table.as_str(),
            mapping.destination_field.as_str(),
        );
        if !seen.insert(target) {
            warnings.push(format!(
                "destination {}.{} is targeted by more than one source field",
                target.0, target.1
            ));
        }
    }
    Ok(warnings)
}

/// Human-readable schema summary used in suggestion prompts.
pub fn describe_schema() -> String {
    DESTINATION_TABLES
        .iter()
        .map(|table| {
            let columns = table
                .columns
                .iter()
                .map(|column| {
                    if column.required {
                        format!("{} ({}, required)", column.name, column.kind.as_str())
                    } else {
                        format!("{} ({})", column.name, column.kind.as_str())
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("- {}: {}. Columns: {}", table.name, table.description, columns)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Coerces a transformed value into the column's storage type.
pub fn coerce_for_column(
    table: &DestinationTable,
    column: &DestinationColumn,
    value: Value,
) -> Result<Value, String> {
    match (column.kind, value) {
        (FieldType::Number, Value::Number(number)) => Ok(Value::Number(number)),
        (FieldType::Number, Value::String(raw)) => crate::transform::parse_number(&raw)
            .map(|parsed| serde_json::json!(parsed))
            .ok_or_else(|| {
                format!(
                    "value '{}' is not a valid number for {}.{}",
                    raw, table.name, column.name
                )
            }),
        (FieldType::Boolean, Value::Bool(flag)) => Ok(Value::Bool(flag)),
        (FieldType::Boolean, Value::String(raw)) => crate::transform::parse_boolean(&raw)
            .map(Value::Bool)
            .ok_or_else(|| {
                format!(
                    "value '{}' is not a valid boolean for {}.{}",
                    raw, table.name, column.name
                )
            }),
        (FieldType::Boolean, Value::Number(number)) => match number.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(format!(
                "value {} is not a valid boolean for {}.{}",
                number, table.name, column.name
            )),
        },
        (FieldType::Number | FieldType::Boolean, other) => Err(format!(
            "value {} cannot be stored in {}.{} ({})",
            other,
            table.name,
            column.name,
            column.kind.as_str()
        )),
        (_, Value::String(raw)) => Ok(Value::String(raw)),
        (_, Value::Null) => Ok(Value::Null),
        (_, other) => Ok(Value::String(match other {
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            nested => nested.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::{coerce_for_column, find_table, validate_mappings};
    use crate::models::{FieldMapping, TransformKind};

    fn mapping(source: &str, table: &str, field: &str) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            destination_table: table.to_string(),
            destination_field: field.to_string(),
            confidence: 1.0,
            transform: TransformKind::None,
        }
    }

    #[test]
    fn duplicate_targets_warn_but_pass() {
        let warnings = validate_mappings(&[
            mapping("First", "contacts", "notes"),
            mapping("Second", "contacts", "notes"),
        ])
        .expect("valid mappings");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("contacts.notes"));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = validate_mappings(&[mapping("x", "contacts; DROP TABLE contacts", "email")])
            .expect_err("unknown table");
        assert!(err.to_string().starts_with("VALIDATION"));
    }

    #[test]
    fn number_columns_parse_formatted_strings() {
        let deals = find_table("deals").expect("deals table");
        let amount = deals.column("amount").expect("amount column");
        let value = coerce_for_column(deals, amount, serde_json::json!("$1,250.50")).expect("coerce");
        assert_eq!(value, serde_json::json!(1250.5));
        assert!(coerce_for_column(deals, amount, serde_json::json!("lots")).is_err());
    }
}
