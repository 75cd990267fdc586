//! Turns raw export content into flat records and per-field type profiles.

use crate::errors::{AppError, AppResult};
use crate::models::{FieldType, FileType, ParsedField, SourceRecord};
use crate::transform::{is_blank, is_boolean_literal, parse_date};
use serde_json::Value;
use std::collections::HashSet;

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const DISPLAY_SAMPLES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    /// Field names in first-seen order.
    pub headers: Vec<String>,
    pub records: Vec<SourceRecord>,
}

pub fn parse_content(content: &str, file_type: FileType) -> AppResult<ParsedFile> {
    let content = content.trim_start_matches('\u{feff}');
    match file_type {
        FileType::Json => parse_structured(content),
        FileType::Tsv => parse_delimited(content, b'\t'),
        FileType::Csv => {
            let header_line = content.lines().next().unwrap_or_default();
            parse_delimited(content, detect_delimiter(header_line))
        }
    }
}

pub fn detect_delimiter(header_line: &str) -> u8 {
    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .max_by_key(|&delimiter| header_line.matches(delimiter as char).count())
        .filter(|&delimiter| header_line.contains(delimiter as char))
        .unwrap_or(b',')
}

fn parse_structured(content: &str) -> AppResult<ParsedFile> {
    let value: Value = serde_json::from_str(content)
        .map_err(|error| AppError::Parse(format!("invalid JSON content: {}", error)))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        other => {
            return Err(AppError::Parse(format!(
                "expected an array of records or a single record, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut parsed = ParsedFile::default();
    let mut seen = HashSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(object) = item else {
            return Err(AppError::Parse(format!(
                "record {} is {}, expected an object",
                index,
                json_kind(&item)
            )));
        };
        let mut record = SourceRecord::new();
        flatten_into(&mut record, None, object);
        for key in record.keys() {
            if seen.insert(key.clone()) {
                parsed.headers.push(key.clone());
            }
        }
        parsed.records.push(record);
    }
    Ok(parsed)
}

fn flatten_into(
    record: &mut SourceRecord,
    prefix: Option<&str>,
    object: serde_json::Map<String, Value>,
) {
    for (key, value) in object {
        let name = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key,
        };
        match value {
            Value::Object(nested) => flatten_into(record, Some(&name), nested),
            Value::Array(items) => {
                record.insert(name, Value::String(Value::Array(items).to_string()));
            }
            scalar => {
                record.insert(name, scalar);
            }
        }
    }
}

fn parse_delimited(content: &str, delimiter: u8) -> AppResult<ParsedFile> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let raw_headers = reader.headers()?.clone();
    let headers = unique_headers(raw_headers.iter());
    if headers.is_empty() {
        return Ok(ParsedFile::default());
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        // Empty lines never reach here; a whitespace-only line trims to one empty cell.
        if row.len() == 1 && row.get(0).is_some_and(str::is_empty) {
            continue;
        }
        let mut record = SourceRecord::new();
        for (index, header) in headers.iter().enumerate() {
            if let Some(cell) = row.get(index) {
                record.insert(header.clone(), Value::String(cell.to_string()));
            }
        }
        records.push(record);
    }

    Ok(ParsedFile { headers, records })
}

// Blank header cells get positional names; repeated names get a numeric suffix.
fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut headers = Vec::new();
    for (index, cell) in raw.enumerate() {
        let base = if cell.trim().is_empty() {
            format!("column_{}", index + 1)
        } else {
            cell.trim().to_string()
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while !seen.insert(name.clone()) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        headers.push(name);
    }
    if headers.len() == 1 && headers[0] == "column_1" {
        return Vec::new();
    }
    headers
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn looks_numeric(raw: &str) -> bool {
    let trimmed = raw.trim();
    let unsigned = trimmed
        .strip_prefix(['$', '€', '£', '¥'])
        .unwrap_or(trimmed);
    if unsigned.is_empty() || unsigned.contains(char::is_whitespace) {
        return false;
    }
    unsigned
        .replace(',', "")
        .parse::<f64>()
        .map(|value| value.is_finite())
        .unwrap_or(false)
}

fn classify(value: &Value) -> FieldType {
    match value {
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(_) => FieldType::Number,
        Value::String(raw) => {
            if looks_numeric(raw) {
                FieldType::Number
            } else if parse_date(raw).is_some() {
                FieldType::Date
            } else if is_boolean_literal(raw) {
                FieldType::Boolean
            } else {
                FieldType::String
            }
        }
        _ => FieldType::String,
    }
}

pub fn infer_fields(parsed: &ParsedFile, sample_size: usize) -> Vec<ParsedField> {
    let total = parsed.records.len();
    if total == 0 {
        return Vec::new();
    }

    parsed
        .headers
        .iter()
        .map(|header| {
            let mut null_count = 0usize;
            let mut samples: Vec<&Value> = Vec::new();
            for record in &parsed.records {
                match record.get(header) {
                    Some(value) if !is_blank(value) => {
                        if samples.len() < sample_size.max(1) {
                            samples.push(value);
                        }
                    }
                    _ => null_count += 1,
                }
            }

            let classes: HashSet<FieldType> = samples.iter().map(|value| classify(value)).collect();
            let (field_type, mixed_types) = match classes.len() {
                0 => (FieldType::String, false),
                1 => (classes.into_iter().next().unwrap_or(FieldType::String), false),
                _ => (FieldType::String, true),
            };

            let mut sample_values = Vec::new();
            for value in &samples {
                let shown = display_value(value);
                if !sample_values.contains(&shown) {
                    sample_values.push(shown);
                }
                if sample_values.len() >= DISPLAY_SAMPLES {
                    break;
                }
            }

            ParsedField {
                name: header.clone(),
                field_type,
                sample_values,
                null_rate: null_count as f64 / total as f64,
                mixed_types,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{detect_delimiter, infer_fields, parse_content};
    use crate::models::{FieldType, FileType};

    #[test]
    fn delimited_record_count_matches_data_lines() {
        let content = "Name,Email,Amount\nAda,ada@example.com,10\nGrace,grace@example.com,20\nLinus,,30\n";
        let parsed = parse_content(content, FileType::Csv).expect("parse");
        assert_eq!(parsed.headers, vec!["Name", "Email", "Amount"]);
        assert_eq!(parsed.records.len(), 3);
    }

    #[test]
    fn rows_of_blank_cells_still_count() {
        let content = "Name,Email\nAda,a@x.co\n,\nGrace,g@x.co\n\n   \n";
        let parsed = parse_content(content, FileType::Csv).expect("parse");
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.records[1]["Name"], serde_json::json!(""));

        let fields = infer_fields(&parsed, 10);
        let email = fields.iter().find(|field| field.name == "Email").expect("email");
        assert!((email.null_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn quoted_cells_may_contain_the_delimiter() {
        let content = "Company,City\n\"Acme, Inc.\",Berlin\n";
        let parsed = parse_content(content, FileType::Csv).expect("parse");
        assert_eq!(parsed.records[0]["Company"], serde_json::json!("Acme, Inc."));
    }

    #[test]
    fn semicolon_exports_are_detected() {
        assert_eq!(detect_delimiter("a;b;c"), b';');
        assert_eq!(detect_delimiter("single"), b',');
        let parsed = parse_content("a;b\n1;2\n", FileType::Csv).expect("parse");
        assert_eq!(parsed.records[0]["b"], serde_json::json!("2"));
    }

    #[test]
    fn short_rows_leave_missing_values() {
        let parsed = parse_content("a,b,c\n1,2\n", FileType::Csv).expect("parse");
        assert!(!parsed.records[0].contains_key("c"));
        let fields = infer_fields(&parsed, 10);
        assert_eq!(fields[2].null_rate, 1.0);
    }

    #[test]
    fn bare_object_is_wrapped_and_nested_keys_flatten() {
        let parsed = parse_content(
            r#"{"name":"Acme","address":{"city":"Oslo"},"tags":["a","b"]}"#,
            FileType::Json,
        )
        .expect("parse");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0]["address.city"], serde_json::json!("Oslo"));
        assert_eq!(parsed.records[0]["tags"], serde_json::json!("[\"a\",\"b\"]"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_content("[{\"a\":", FileType::Json).expect_err("malformed");
        assert!(err.to_string().starts_with("PARSE_ERROR"));
        let err = parse_content("[1, 2]", FileType::Json).expect_err("not records");
        assert!(err.to_string().contains("expected an object"));
    }

    #[test]
    fn empty_input_yields_no_fields() {
        let parsed = parse_content("", FileType::Csv).expect("parse");
        assert!(parsed.records.is_empty());
        assert!(infer_fields(&parsed, 10).is_empty());
        let parsed = parse_content("[]", FileType::Json).expect("parse");
        assert!(parsed.records.is_empty());
    }

    #[test]
    fn infers_types_and_flags_mixed_columns() {
        let content = "joined,score,active,label,mixed\n2024-01-02,1.5,yes,alpha,10\n2024-02-03,\"1,200\",no,beta,ten\n";
        let parsed = parse_content(content, FileType::Csv).expect("parse");
        let fields = infer_fields(&parsed, 25);
        let kinds: Vec<FieldType> = fields.iter().map(|field| field.field_type).collect();
        assert_eq!(
            kinds,
            vec![
                FieldType::Date,
                FieldType::Number,
                FieldType::Boolean,
                FieldType::String,
                FieldType::String
            ]
        );
        assert!(fields[4].mixed_types);
        assert!(!fields[3].mixed_types);
        assert_eq!(fields[3].sample_values, vec!["alpha", "beta"]);
    }
}
