//! Cross-page deduplication of extracted procedures.
//!
//! Multi-page tables repeat header rows and sometimes whole sections; the
//! same code can surface several times with varying OCR quality. One winner
//! survives per code, scored by completeness: a priced row beats an unpriced
//! one, and among equals the longer description wins. Ties keep the
//! first-seen row, and output preserves first-seen order.

use std::collections::HashMap;

use super::types::ExtractedProcedure;

/// Completeness score: description length in characters (descriptions are
/// Portuguese, so byte length would over-weight accents), plus a flat 1000
/// when a price is present so any priced row outranks any unpriced one.
pub fn completeness_score(procedure: &ExtractedProcedure) -> usize {
    procedure.description.chars().count() + if procedure.value.is_some() { 1000 } else { 0 }
}

/// Deduplicate by code, keeping the highest-scoring row per code.
/// Only a strictly greater score replaces the incumbent.
pub fn dedup_procedures(procedures: Vec<ExtractedProcedure>) -> Vec<ExtractedProcedure> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, ExtractedProcedure> = HashMap::new();

    for procedure in procedures {
        match best.get(&procedure.code) {
            None => {
                order.push(procedure.code.clone());
                best.insert(procedure.code.clone(), procedure);
            }
            Some(incumbent) => {
                if completeness_score(&procedure) > completeness_score(incumbent) {
                    best.insert(procedure.code.clone(), procedure);
                }
            }
        }
    }

    order
        .into_iter()
        .map(|code| best.remove(&code).expect("code recorded with entry"))
        .collect()
}
