//! Prompt construction for the extraction and classification calls.
//!
//! Both prompts demand strict JSON; `repair_json_payload` handles the
//! deviations local models still produce.

use crate::pipeline::types::ExtractedProcedure;

/// Extraction runs at temperature 0 — transcription, not creativity.
pub const EXTRACTION_TEMPERATURE: f32 = 0.0;
/// Classification gets a sliver of temperature so reasoning strings vary.
pub const CLASSIFICATION_TEMPERATURE: f32 = 0.1;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are a data extraction engine for Portuguese dental price tables (precários). \
You receive the OCR text of a single page and return ONLY a JSON object, with no \
commentary, no markdown fences, and no trailing text.";

/// Build the per-page extraction prompt.
pub fn build_extraction_prompt(page_text: &str) -> String {
    format!(
        "Extract every procedure row from this price-table page.\n\
         \n\
         Rules:\n\
         - A procedure row has a nomenclature code starting with \"A\" followed by \
         dot-separated digit groups (e.g. A1.01.01.01), a description, and optionally \
         a price in euros.\n\
         - Prices may use a comma as the decimal separator (e.g. 50,00). Emit them as \
         JSON numbers with a dot.\n\
         - When a price cell is empty, dashed, or says \"sob orçamento\", emit null.\n\
         - Ignore page headers, footers, legends, and section titles without a code.\n\
         \n\
         Respond with exactly this shape:\n\
         {{\"procedures\": [{{\"code\": \"A1.01.01.01\", \"description\": \"Consulta\", \"value\": 50.0}}]}}\n\
         \n\
         Page text:\n\
         {page_text}"
    )
}

pub const CLASSIFICATION_SYSTEM_PROMPT: &str = "\
You are a dental insurance analyst. For each procedure you decide whether it is \
periciable (requires prior expert review before authorization) and whether it is \
restricted to adult patients. Return ONLY a JSON array, no commentary.";

/// Build the classification prompt for one batch of procedures.
pub fn build_classification_prompt(procedures: &[ExtractedProcedure]) -> String {
    let mut listing = String::new();
    for (i, p) in procedures.iter().enumerate() {
        let value = p
            .value
            .map(|v| format!("{v:.2} EUR"))
            .unwrap_or_else(|| "no price".into());
        listing.push_str(&format!(
            "{}. code={} description=\"{}\" ({value})\n",
            i + 1,
            p.code,
            p.description
        ));
    }

    format!(
        "Classify each of the following {count} dental procedures.\n\
         \n\
         For each one decide:\n\
         - periciable: does authorization require prior expert (perito) review? \
         Typically prosthetics, orthodontics, implants, and surgery.\n\
         - adults_only: is the procedure restricted to patients 18 or older? \
         Typically prostheses and some surgical acts.\n\
         \n\
         Respond with a JSON array of exactly {count} objects, in the same order:\n\
         [{{\"periciable\": false, \"adults_only\": false, \
         \"periciable_confidence\": 0.9, \"adults_only_confidence\": 0.9, \
         \"reasoning\": \"short justification\"}}]\n\
         \n\
         Procedures:\n\
         {listing}",
        count = procedures.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ExtractedProcedure> {
        vec![
            ExtractedProcedure {
                code: "A1.01.01.01".into(),
                description: "Consulta".into(),
                value: Some(50.0),
            },
            ExtractedProcedure {
                code: "A2.00.00.01".into(),
                description: "Prótese total".into(),
                value: None,
            },
        ]
    }

    #[test]
    fn extraction_prompt_embeds_page_text() {
        let prompt = build_extraction_prompt("A1.01.01.01 Consulta 50,00");
        assert!(prompt.contains("A1.01.01.01 Consulta 50,00"));
        assert!(prompt.contains("\"procedures\""));
    }

    #[test]
    fn classification_prompt_numbers_items_in_order() {
        let prompt = build_classification_prompt(&sample());
        assert!(prompt.contains("following 2 dental procedures"));
        assert!(prompt.contains("1. code=A1.01.01.01"));
        assert!(prompt.contains("2. code=A2.00.00.01"));
        assert!(prompt.contains("no price"));
    }

    #[test]
    fn temperatures_are_deterministic_leaning() {
        assert_eq!(EXTRACTION_TEMPERATURE, 0.0);
        assert!(CLASSIFICATION_TEMPERATURE <= 0.2);
    }
}
