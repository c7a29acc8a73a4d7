//! AI classification of deduplicated procedures.
//!
//! Procedures go to the reasoning model in batches of 50, merged back
//! positionally. Classification is advisory — every failure mode degrades
//! to a conservative verdict the reviewer can override, never to a failed
//! document.

use super::llm::LlmClient;
use super::prompts::{
    build_classification_prompt, CLASSIFICATION_SYSTEM_PROMPT, CLASSIFICATION_TEMPERATURE,
};
use super::repair::repair_json_payload;
use super::types::{Classification, ExtractedProcedure};

pub const CLASSIFICATION_BATCH_SIZE: usize = 50;

/// Classify all procedures, one verdict per input in input order.
pub fn classify_procedures(
    client: &dyn LlmClient,
    model: &str,
    procedures: &[ExtractedProcedure],
) -> Vec<Classification> {
    if procedures.is_empty() {
        return Vec::new();
    }

    let mut verdicts = Vec::with_capacity(procedures.len());
    for (batch_index, batch) in procedures.chunks(CLASSIFICATION_BATCH_SIZE).enumerate() {
        match classify_batch(client, model, batch) {
            Ok(batch_verdicts) => verdicts.extend(batch_verdicts),
            Err(reason) => {
                tracing::warn!(
                    batch = batch_index,
                    batch_size = batch.len(),
                    reason = %reason,
                    "Classification batch failed, using conservative defaults"
                );
                verdicts.extend(
                    std::iter::repeat_with(|| Classification::conservative(&reason))
                        .take(batch.len()),
                );
            }
        }
    }
    verdicts
}

/// Classify one batch. Any failure (transport, malformed JSON, wrong count)
/// fails the whole batch so verdicts never drift out of position.
fn classify_batch(
    client: &dyn LlmClient,
    model: &str,
    batch: &[ExtractedProcedure],
) -> Result<Vec<Classification>, String> {
    let prompt = build_classification_prompt(batch);
    let response = client
        .generate(
            model,
            &prompt,
            CLASSIFICATION_SYSTEM_PROMPT,
            CLASSIFICATION_TEMPERATURE,
        )
        .map_err(|e| e.to_string())?;

    let payload = repair_json_payload(&response).map_err(|e| e.to_string())?;
    let items = payload
        .as_array()
        .ok_or_else(|| "response is not a JSON array".to_string())?;

    if items.len() != batch.len() {
        return Err(format!(
            "expected {} verdicts, got {}",
            batch.len(),
            items.len()
        ));
    }

    let mut verdicts = Vec::with_capacity(items.len());
    for item in items {
        verdicts.push(Classification {
            periciable: item
                .get("periciable")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            adults_only: item
                .get("adults_only")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            periciable_confidence: confidence(item, "periciable_confidence"),
            adults_only_confidence: confidence(item, "adults_only_confidence"),
            reasoning: item
                .get("reasoning")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        });
    }
    Ok(verdicts)
}

fn confidence(item: &serde_json::Value, field: &str) -> f64 {
    item.get(field)
        .and_then(|v| v.as_f64())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}
