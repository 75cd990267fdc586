use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"(?i)\b(api[_-]?key|access[_-]?token|secret|password)\s*[:=]\s*["']?[A-Za-z0-9_\-\.]{6,}["']?"#)
                .expect("valid regex"),
            "credential",
        ),
        (Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").expect("valid regex"), "api_key"),
        (Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"), "api_key"),
        (
            Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("valid regex"),
            "card_number",
        ),
        (Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex"), "ssn"),
    ]
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Masks credentials and payment identifiers in export previews and in
/// sample values sent to the suggestion service.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    aggressive: bool,
}

impl Redactor {
    pub fn new(aggressive: bool) -> Self {
        Self { aggressive }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        for (pattern, label) in SECRET_PATTERNS.iter() {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }
            redaction_count += matches;
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| match caps.get(1) {
                    Some(key) => format!("{}=[REDACTED]", key.as_str().to_ascii_lowercase()),
                    None => format!("[REDACTED_{}]", label.to_ascii_uppercase()),
                })
                .to_string();
        }

        if self.aggressive {
            // Line structure must survive so CSV previews stay readable.
            result = result
                .split('\n')
                .map(|line| {
                    line.split(' ')
                        .map(|token| {
                            if token.len() > 48
                                && token
                                    .chars()
                                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                            {
                                redaction_count += 1;
                                "[REDACTED_LONG_TOKEN]".to_string()
                            } else {
                                token.to_string()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
                .join("\n");
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Redactor;

    #[test]
    fn redacts_named_secret() {
        let redactor = Redactor::new(false);
        let result = redactor.redact("note: api_key=abcd1234abcd1234");
        assert!(result.content.contains("api_key=[REDACTED]"));
        assert_eq!(result.redaction_count, 1);
    }

    #[test]
    fn redacts_card_numbers_inside_csv_rows() {
        let redactor = Redactor::new(true);
        let result = redactor.redact("name,card\nAda,4111 1111 1111 1111\n");
        assert!(result.content.contains("[REDACTED_CARD_NUMBER]"));
        assert!(result.content.starts_with("name,card\n"));
    }

    #[test]
    fn leaves_ordinary_rows_alone() {
        let redactor = Redactor::new(true);
        let input = "Name,Phone\nGrace,555-0100";
        let result = redactor.redact(input);
        assert_eq!(result.content, input);
        assert_eq!(result.redaction_count, 0);
    }
}
