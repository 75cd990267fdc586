use crate::models::{ParsedField, SourceRecord};

const SPARSE_WARNING_RATE: f64 = 0.5;
const MIXED_TYPE_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub score: u8,
    pub warnings: Vec<String>,
}

/// 0 means unusable, 100 means fully populated and consistently typed.
///
/// Completeness is the mean non-null rate across fields; every field with
/// mixed sampled types shaves off a share of the remaining score.
pub fn score(records: &[SourceRecord], fields: &[ParsedField]) -> QualityReport {
    let mut warnings = Vec::new();

    if records.is_empty() {
        warnings.push("file contains no records".to_string());
        return QualityReport { score: 0, warnings };
    }
    if fields.is_empty() {
        warnings.push("no fields could be identified in the file".to_string());
        return QualityReport { score: 0, warnings };
    }

    let field_count = fields.len() as f64;
    let completeness =
        fields.iter().map(|field| 1.0 - field.null_rate.clamp(0.0, 1.0)).sum::<f64>() / field_count;
    let mixed = fields.iter().filter(|field| field.mixed_types).count() as f64;
    let consistency = 1.0 - MIXED_TYPE_WEIGHT * (mixed / field_count);

    for field in fields {
        if field.null_rate >= SPARSE_WARNING_RATE {
            warnings.push(format!(
                "field {} is empty in {}% of records",
                field.name,
                (field.null_rate * 100.0).round() as u32
            ));
        }
        if field.mixed_types {
            warnings.push(format!(
                "field {} has inconsistent value types and will be treated as text",
                field.name
            ));
        }
    }

    let score = (100.0 * completeness * consistency).round().clamp(0.0, 100.0) as u8;
    QualityReport { score, warnings }
}
