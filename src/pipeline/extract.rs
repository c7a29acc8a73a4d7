//! Per-page procedure extraction via the reasoning model.
//!
//! Sends the page's OCR text through the extraction prompt, repairs the
//! response JSON, and keeps only rows whose code matches the nomenclature
//! pattern. Items that fail to deserialize are skipped, not fatal.

use std::sync::OnceLock;

use regex::Regex;

use super::llm::LlmClient;
use super::prompts::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT, EXTRACTION_TEMPERATURE};
use super::repair::repair_json_payload;
use super::types::ExtractedProcedure;
use super::PipelineError;

/// Nomenclature codes: `A` followed by dot-separated digit groups,
/// e.g. `A1.01.01.01` or `A2.00`.
fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^A\d+(\.\d+)+$").expect("valid regex"))
}

pub fn is_valid_code(code: &str) -> bool {
    code_pattern().is_match(code)
}

/// Extract procedures from one page of OCR text.
pub fn extract_procedures_from_page(
    client: &dyn LlmClient,
    model: &str,
    page_text: &str,
) -> Result<Vec<ExtractedProcedure>, PipelineError> {
    let prompt = build_extraction_prompt(page_text);
    let response = client.generate(model, &prompt, EXTRACTION_SYSTEM_PROMPT, EXTRACTION_TEMPERATURE)?;
    parse_extraction_response(&response)
}

/// Parse the model's response into validated procedures.
pub fn parse_extraction_response(
    response: &str,
) -> Result<Vec<ExtractedProcedure>, PipelineError> {
    let payload = repair_json_payload(response)?;

    let items = payload
        .get("procedures")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            PipelineError::MalformedResponse("Response has no \"procedures\" array".into())
        })?;

    let mut procedures = Vec::with_capacity(items.len());
    for item in items {
        let Some(code) = item.get("code").and_then(|v| v.as_str()) else {
            continue;
        };
        let code = code.trim();
        if !is_valid_code(code) {
            tracing::debug!(code, "Skipping row with non-nomenclature code");
            continue;
        }
        let Some(description) = item.get("description").and_then(|v| v.as_str()) else {
            continue;
        };
        let description = description.trim();
        if description.is_empty() {
            continue;
        }

        procedures.push(ExtractedProcedure {
            code: code.to_string(),
            description: description.to_string(),
            value: item.get("value").and_then(parse_value),
        });
    }

    Ok(procedures)
}

/// Parse a price that may be a JSON number, or a string with a comma
/// decimal separator and currency markers ("50,00 €"). Negative prices
/// are discarded.
fn parse_value(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
                .collect();
            // "1.250,00" style: the comma is the decimal separator
            let normalized = if cleaned.contains(',') {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned
            };
            normalized.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed.filter(|v| *v >= 0.0 && v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::MockLlmClient;

    #[test]
    fn code_pattern_accepts_nomenclature_codes() {
        assert!(is_valid_code("A1.01.01.01"));
        assert!(is_valid_code("A2.00"));
        assert!(is_valid_code("A10.20.30"));
    }

    #[test]
    fn code_pattern_rejects_noise() {
        assert!(!is_valid_code("A1"));
        assert!(!is_valid_code("B1.01"));
        assert!(!is_valid_code("1.01.01"));
        assert!(!is_valid_code("A1.01."));
        assert!(!is_valid_code("Consulta"));
        assert!(!is_valid_code(""));
    }

    #[test]
    fn parses_basic_response() {
        let response = r#"{"procedures": [
            {"code": "A1.01.01.01", "description": "Consulta", "value": 50.0},
            {"code": "A2.00.00.01", "description": "Prótese total", "value": null}
        ]}"#;
        let procedures = parse_extraction_response(response).unwrap();
        assert_eq!(procedures.len(), 2);
        assert_eq!(procedures[0].value, Some(50.0));
        assert_eq!(procedures[1].value, None);
    }

    #[test]
    fn skips_rows_with_invalid_codes() {
        let response = r#"{"procedures": [
            {"code": "A1.01.01.01", "description": "Consulta", "value": 50.0},
            {"code": "TOTAL", "description": "Soma da página", "value": 980.0}
        ]}"#;
        let procedures = parse_extraction_response(response).unwrap();
        assert_eq!(procedures.len(), 1);
        assert_eq!(procedures[0].code, "A1.01.01.01");
    }

    #[test]
    fn skips_rows_missing_description() {
        let response = r#"{"procedures": [
            {"code": "A1.01.01.01", "value": 50.0},
            {"code": "A1.01.01.02", "description": "  ", "value": 10.0}
        ]}"#;
        let procedures = parse_extraction_response(response).unwrap();
        assert!(procedures.is_empty());
    }

    #[test]
    fn parses_comma_decimal_string_values() {
        let response = r#"{"procedures": [
            {"code": "A1.01.01.01", "description": "Consulta", "value": "50,00"},
            {"code": "A1.01.01.02", "description": "Destartarização", "value": "1.250,50 €"}
        ]}"#;
        let procedures = parse_extraction_response(response).unwrap();
        assert_eq!(procedures[0].value, Some(50.0));
        assert_eq!(procedures[1].value, Some(1250.5));
    }

    #[test]
    fn rejects_negative_and_non_numeric_values() {
        let response = r#"{"procedures": [
            {"code": "A1.01.01.01", "description": "Consulta", "value": -5.0},
            {"code": "A1.01.01.02", "description": "Limpeza", "value": "sob orçamento"}
        ]}"#;
        let procedures = parse_extraction_response(response).unwrap();
        assert_eq!(procedures[0].value, None);
        assert_eq!(procedures[1].value, None);
    }

    #[test]
    fn missing_procedures_array_is_malformed() {
        let err = parse_extraction_response(r#"{"rows": []}"#).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[test]
    fn extracts_through_mock_client() {
        let client = MockLlmClient::new(
            r#"```json
{"procedures": [{"code": "A1.01.01.01", "description": "Consulta", "value": 50.0}]}
```"#,
        );
        let procedures =
            extract_procedures_from_page(&client, "qwen2.5:14b", "A1.01.01.01 Consulta 50,00")
                .unwrap();
        assert_eq!(procedures.len(), 1);
        assert_eq!(procedures[0].description, "Consulta");
    }
}
