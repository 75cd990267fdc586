use once_cell::sync::Lazy;
use serde_json::Value;

static SUGGESTION_ITEM_SCHEMA: Lazy<Option<jsonschema::JSONSchema>> = Lazy::new(|| {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "source_field": { "type": "string", "minLength": 1 },
            "destination_table": { "type": "string", "minLength": 1 },
            "destination_field": { "type": "string", "minLength": 1 },
            "confidence": { "type": ["number", "string", "null"] },
            "transform": { "type": ["string", "null"] }
        },
        "required": ["source_field", "destination_table", "destination_field"]
    });
    match jsonschema::JSONSchema::compile(&schema) {
        Ok(compiled) => Some(compiled),
        Err(error) => {
            tracing::error!(error = %error, "suggestion item schema failed to compile");
            None
        }
    }
});

/// Pulls the first JSON array out of free-form completion text.
///
/// Accepts a bare array, an object wrapping it under `mappings`, or an array
/// embedded in prose or a fenced code block.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => return Some(items),
        Ok(Value::Object(mut object)) => {
            if let Some(Value::Array(items)) = object.remove("mappings") {
                return Some(items);
            }
        }
        _ => {}
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

pub fn is_valid_suggestion_item(item: &Value) -> bool {
    match SUGGESTION_ITEM_SCHEMA.as_ref() {
        Some(schema) => schema.is_valid(item),
        None => item.is_object(),
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_json_array, is_valid_suggestion_item};

    #[test]
    fn extracts_from_fenced_block() {
        let text = "Here you go:\n```json\n[{\"source_field\":\"a\"}]\n```\nThanks";
        let items = extract_json_array(text).expect("array");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn extracts_wrapped_mappings_object() {
        let items = extract_json_array(r#"{"mappings":[{"x":1},{"x":2}]}"#).expect("array");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn prose_without_array_yields_none() {
        assert!(extract_json_array("I cannot help with that.").is_none());
        assert!(extract_json_array("broken ] then [").is_none());
        assert!(extract_json_array("").is_none());
    }

    #[test]
    fn item_shape_requires_target_strings() {
        assert!(is_valid_suggestion_item(&serde_json::json!({
            "source_field": "Email",
            "destination_table": "contacts",
            "destination_field": "email",
            "confidence": 0.9
        })));
        assert!(!is_valid_suggestion_item(&serde_json::json!({
            "source_field": "Email",
            "destination_table": "contacts"
        })));
        assert!(!is_valid_suggestion_item(&serde_json::json!("Email")));
    }
}
