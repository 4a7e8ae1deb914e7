// crates/taskloom-contract/src/lib.rs
// ============================================================================
// Module: Task Loom Contract Extraction
// Description: Per-stage-kind reduction of raw executor output into a
//              `StructuredOutput`.
// Purpose: Give the engine a stable, typed surface to gate and branch on,
//          regardless of how a given agent role phrases its output.
// Dependencies: taskloom-core, serde_json
// ============================================================================

//! ## Overview
//! Extraction first tries to parse the output as a JSON object carrying a
//! `status`/`confidence`/`summary` envelope (the convention agent roles are
//! instructed to follow); when that fails, it falls back to heuristic
//! text scanning so a stage whose agent forgot to emit structured JSON
//! still produces a usable, if low-confidence, summary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use taskloom_core::ArtifactRef;
use taskloom_core::ContractError;
use taskloom_core::ContractExtractor;
use taskloom_core::OutputStatus;
use taskloom_core::StageKind;
use taskloom_core::StructuredOutput;

/// Output longer than this is summarized down to its first line rather than
/// carried verbatim into `summary`.
const SUMMARY_CHAR_BUDGET: usize = 240;

// ============================================================================
// SECTION: Default Extractor
// ============================================================================

/// A [`ContractExtractor`] that handles every stage kind with the same
/// envelope convention, falling back to heuristic parsing when the agent's
/// raw output is not valid JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContractExtractor;

impl ContractExtractor for DefaultContractExtractor {
    fn extract(&self, kind: StageKind, output_text: &str) -> Result<StructuredOutput, ContractError> {
        if let Ok(value) = serde_json::from_str::<Value>(output_text) {
            if let Some(object) = value.as_object() {
                return Ok(from_envelope(kind, object));
            }
        }
        Ok(heuristic_extract(kind, output_text))
    }
}

fn from_envelope(kind: StageKind, object: &serde_json::Map<String, Value>) -> StructuredOutput {
    let status = object
        .get("status")
        .and_then(Value::as_str)
        .map_or(OutputStatus::Partial, status_from_str);

    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .map_or_else(|| first_line(""), ToString::to_string);

    let confidence = object.get("confidence").and_then(Value::as_f64).map(|value| value.clamp(0.0, 1.0));

    let artifacts = object
        .get("artifacts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let path = item.get("path").and_then(Value::as_str)?.to_string();
                    let description = item.get("description").and_then(Value::as_str).map(ToString::to_string);
                    Some(ArtifactRef { path, description })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut fields = BTreeMap::new();
    for (key, val) in object {
        if matches!(key.as_str(), "status" | "summary" | "confidence" | "artifacts") {
            continue;
        }
        fields.insert(key.clone(), val.clone());
    }

    StructuredOutput {
        kind,
        summary,
        status,
        confidence,
        artifacts,
        fields,
    }
}

fn heuristic_extract(kind: StageKind, output_text: &str) -> StructuredOutput {
    let lowered = output_text.to_ascii_lowercase();
    let status = if lowered.contains("fail") || lowered.contains("error") {
        OutputStatus::Fail
    } else if lowered.contains("pass") || lowered.contains("success") || lowered.contains("complete") {
        OutputStatus::Pass
    } else {
        OutputStatus::Partial
    };

    StructuredOutput {
        kind,
        summary: first_line(output_text),
        status,
        confidence: None,
        artifacts: Vec::new(),
        fields: BTreeMap::new(),
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or_default();
    if line.chars().count() <= SUMMARY_CHAR_BUDGET {
        return line.to_string();
    }
    let truncated: String = line.chars().take(SUMMARY_CHAR_BUDGET).collect();
    format!("{truncated}...")
}

fn status_from_str(text: &str) -> OutputStatus {
    match text {
        "pass" => OutputStatus::Pass,
        "fail" => OutputStatus::Fail,
        _ => OutputStatus::Partial,
    }
}
