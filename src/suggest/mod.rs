//! Source-to-destination mapping suggestions.
//!
//! The suggester never fails from the caller's point of view: an unreachable
//! service, a timeout, or a reply without a usable JSON array all collapse to
//! an empty list and a logged diagnostic.

pub mod provider;
pub mod structured;

use crate::destination::{describe_schema, is_known_target};
use crate::errors::AppError;
use crate::models::{Connector, FieldMapping, ParsedField, TransformKind};
use crate::redaction::Redactor;
use provider::SuggestionProvider;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use structured::{extract_json_array, is_valid_suggestion_item};

const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Clone)]
pub struct MappingSuggester {
    provider: Arc<dyn SuggestionProvider>,
    timeout: Duration,
    max_sample_values: usize,
    redactor: Redactor,
}

impl MappingSuggester {
    pub fn new(
        provider: Arc<dyn SuggestionProvider>,
        timeout: Duration,
        max_sample_values: usize,
    ) -> Self {
        Self {
            provider,
            timeout,
            max_sample_values,
            redactor: Redactor::new(true),
        }
    }

    pub async fn suggest(
        &self,
        fields: &[ParsedField],
        connector: Option<&Connector>,
    ) -> Vec<FieldMapping> {
        if fields.is_empty() {
            return Vec::new();
        }

        let prompt = self.build_prompt(fields, connector);
        let reply = match tokio::time::timeout(self.timeout, self.provider.complete(&prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                tracing::warn!(provider = self.provider.name(), error = %error, "mapping suggestion unavailable");
                return Vec::new();
            }
            Err(_) => {
                let error = AppError::Upstream(format!(
                    "completion timed out after {}s",
                    self.timeout.as_secs()
                ));
                tracing::warn!(provider = self.provider.name(), error = %error, "mapping suggestion unavailable");
                return Vec::new();
            }
        };

        let suggestions = parse_suggestions(&reply, fields);
        tracing::debug!(count = suggestions.len(), "parsed mapping suggestions");
        suggestions
    }

    fn build_prompt(&self, fields: &[ParsedField], connector: Option<&Connector>) -> String {
        let mut prompt = String::new();
        match connector {
            Some(connector) => {
                let _ = writeln!(prompt, "The export comes from {}.", connector.name);
                let hints: Vec<String> = connector
                    .fields
                    .iter()
                    .filter_map(|field| {
                        field.destination.as_ref().map(|hint| {
                            format!("{} -> {}.{}", field.name, hint.table, hint.field)
                        })
                    })
                    .collect();
                if !hints.is_empty() {
                    let _ = writeln!(prompt, "Known field correspondences: {}", hints.join("; "));
                }
            }
            None => {
                let _ = writeln!(prompt, "The source CRM is unknown.");
            }
        }

        let _ = writeln!(prompt, "\nSource fields:");
        for field in fields {
            let samples = field
                .sample_values
                .iter()
                .take(self.max_sample_values)
                .map(|value| self.redactor.redact(value).content)
                .collect::<Vec<_>>()
                .join(" | ");
            let _ = writeln!(
                prompt,
                "- {} ({}, {:.0}% empty): {}",
                field.name,
                field.field_type.as_str(),
                field.null_rate * 100.0,
                samples
            );
        }

        let _ = writeln!(prompt, "\nDestination schema:\n{}", describe_schema());
        let _ = writeln!(
            prompt,
            "\nReturn a JSON array of objects with keys source_field, destination_table, \
destination_field, confidence (0 to 1) and transform (one of none, lowercase, uppercase, \
trim, date, number, null). Skip source fields with no sensible destination."
        );
        prompt
    }
}

/// Converts a completion reply into validated mappings.
pub fn parse_suggestions(reply: &str, fields: &[ParsedField]) -> Vec<FieldMapping> {
    let Some(items) = extract_json_array(reply) else {
        tracing::warn!("completion reply did not contain a JSON array");
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| is_valid_suggestion_item(item))
        .filter_map(|item| {
            let requested = item.get("source_field")?.as_str()?;
            let source_field = fields
                .iter()
                .find(|field| field.name == requested)
                .or_else(|| {
                    fields
                        .iter()
                        .find(|field| field.name.eq_ignore_ascii_case(requested))
                })?
                .name
                .clone();
            let destination_table = item.get("destination_table")?.as_str()?.trim().to_string();
            let destination_field = item.get("destination_field")?.as_str()?.trim().to_string();
            if !is_known_target(&destination_table, &destination_field) {
                tracing::debug!(
                    table = %destination_table,
                    field = %destination_field,
                    "dropping suggestion with unknown destination"
                );
                return None;
            }
            Some(FieldMapping {
                source_field,
                destination_table,
                destination_field,
                confidence: read_confidence(item.get("confidence")),
                transform: item
                    .get("transform")
                    .and_then(Value::as_str)
                    .map(TransformKind::parse_lenient)
                    .unwrap_or_default(),
            })
        })
        .collect()
}

fn read_confidence(raw: Option<&Value>) -> f64 {
    let value = match raw {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::provider::StaticSuggestionProvider;
    use super::{parse_suggestions, MappingSuggester};
    use crate::catalog::seed_connectors;
    use crate::models::{FieldType, ParsedField, TransformKind};
    use std::sync::Arc;
    use std::time::Duration;

    fn fields() -> Vec<ParsedField> {
        ["Email", "Last Name", "Deal Value"]
            .iter()
            .map(|name| ParsedField {
                name: name.to_string(),
                field_type: FieldType::String,
                sample_values: vec!["x".to_string()],
                null_rate: 0.0,
                mixed_types: false,
            })
            .collect()
    }

    #[test]
    fn clamps_confidence_and_normalizes_transforms() {
        let reply = r#"[
            {"source_field":"Email","destination_table":"contacts","destination_field":"email","confidence":1.7,"transform":"lowercase"},
            {"source_field":"last name","destination_table":"contacts","destination_field":"last_name","confidence":-3,"transform":"titlecase"},
            {"source_field":"Deal Value","destination_table":"deals","destination_field":"amount","confidence":"0.8","transform":"number"}
        ]"#;
        let mappings = parse_suggestions(reply, &fields());
        assert_eq!(mappings.len(), 3);
        assert_eq!(mappings[0].confidence, 1.0);
        assert_eq!(mappings[0].transform, TransformKind::Lowercase);
        assert_eq!(mappings[1].source_field, "Last Name");
        assert_eq!(mappings[1].confidence, 0.0);
        assert_eq!(mappings[1].transform, TransformKind::None);
        assert_eq!(mappings[2].confidence, 0.8);
        for mapping in &mappings {
            assert!((0.0..=1.0).contains(&mapping.confidence));
        }
    }

    #[test]
    fn drops_unknown_sources_and_destinations() {
        let reply = r#"[
            {"source_field":"Nope","destination_table":"contacts","destination_field":"email"},
            {"source_field":"Email","destination_table":"contacts","destination_field":"fax"},
            {"source_field":"Email","destination_table":"contacts","destination_field":"email"}
        ]"#;
        let mappings = parse_suggestions(reply, &fields());
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].confidence, 0.5);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty() {
        let suggester = MappingSuggester::new(
            Arc::new(StaticSuggestionProvider::failing("connection refused")),
            Duration::from_secs(1),
            3,
        );
        let connectors = seed_connectors();
        assert!(suggester.suggest(&fields(), connectors.first()).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_empty() {
        let suggester = MappingSuggester::new(
            Arc::new(StaticSuggestionProvider::replying("Sorry, no idea.")),
            Duration::from_secs(1),
            3,
        );
        assert!(suggester.suggest(&fields(), None).await.is_empty());
    }

    #[test]
    fn prompt_mentions_fields_schema_and_redacts_samples() {
        let suggester = MappingSuggester::new(
            Arc::new(StaticSuggestionProvider::replying("[]")),
            Duration::from_secs(1),
            3,
        );
        let mut fields = fields();
        fields[0].sample_values = vec!["password=hunter2hunter2".to_string()];
        let connectors = seed_connectors();
        let prompt = suggester.build_prompt(&fields, connectors.iter().find(|c| c.key == "hubspot"));
        assert!(prompt.contains("HubSpot"));
        assert!(prompt.contains("- Email (string, 0% empty)"));
        assert!(prompt.contains("contacts:"));
        assert!(!prompt.contains("hunter2hunter2"));
    }
}
