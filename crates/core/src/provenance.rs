//! Generation provenance extracted from retained workflow JSON, and the
//! schema of the export sidecar file.
//!
//! Workflows are in the backend's API format: an object mapping node ids to
//! `{ "class_type": ..., "inputs": { ... } }`. An input is either a literal
//! value or a link `[node_id, output_index]` to another node.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current schema version of the export sidecar.
pub const EXPORT_SCHEMA_VERSION: &str = "1.0";

/// How many links are followed when resolving prompt text.
const MAX_LINK_DEPTH: usize = 6;

/// Input keys naming a model file.
const MODEL_KEYS: &[&str] = &["unet_name", "ckpt_name", "model_name"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A LoRA adapter applied during generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoraUsage {
    pub name: String,
    pub strength: f64,
}

/// Parameters recovered from one clip's workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub models: Vec<String>,
    pub loras: Vec<LoraUsage>,
    pub seed: Option<i64>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler: Option<String>,
}

/// Provenance of one clip in an export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipProvenance {
    pub order_index: u32,
    /// The prompt as recorded on the clip (may differ from the workflow's).
    pub prompt: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

/// Top-level structure of `<export>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportMetadata {
    pub schema_version: String,
    pub video_id: DbId,
    pub output: String,
    pub high_quality: bool,
    /// ISO 8601 timestamp of the export.
    pub exported_at: String,
    pub clips: Vec<ClipProvenance>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract generation parameters from a workflow JSON string.
///
/// Unparseable input yields empty parameters.
pub fn extract_params(workflow_json: &str) -> GenerationParams {
    match serde_json::from_str::<Value>(workflow_json) {
        Ok(Value::Object(nodes)) => extract_from_nodes(&nodes),
        Ok(_) => GenerationParams::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Workflow JSON is not parseable, no provenance");
            GenerationParams::default()
        }
    }
}

fn extract_from_nodes(nodes: &Map<String, Value>) -> GenerationParams {
    let mut params = GenerationParams::default();

    // Node ids are numeric strings; visit them in numeric order so the
    // first sampler wins deterministically.
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.as_str()));

    for id in ids {
        let Some(node) = nodes.get(id.as_str()) else {
            continue;
        };
        let class_type = node.get("class_type").and_then(Value::as_str).unwrap_or("");
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };

        for key in MODEL_KEYS {
            if let Some(name) = inputs.get(*key).and_then(Value::as_str) {
                if !params.models.iter().any(|m| m == name) {
                    params.models.push(name.to_string());
                }
            }
        }

        if let Some(name) = inputs.get("lora_name").and_then(Value::as_str) {
            let strength = inputs
                .get("strength_model")
                .or_else(|| inputs.get("strength"))
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            if strength != 0.0 && name != "None" {
                params.loras.push(LoraUsage {
                    name: name.to_string(),
                    strength,
                });
            }
        }

        if is_sampler(class_type, inputs) && params.seed.is_none() && params.steps.is_none() {
            params.seed = inputs
                .get("seed")
                .or_else(|| inputs.get("noise_seed"))
                .and_then(Value::as_i64);
            params.steps = inputs.get("steps").and_then(Value::as_i64);
            params.cfg = inputs.get("cfg").and_then(Value::as_f64);
            params.sampler = inputs
                .get("sampler_name")
                .and_then(Value::as_str)
                .map(str::to_string);
            params.prompt = inputs
                .get("positive")
                .and_then(|v| resolve_text(nodes, v, "positive", MAX_LINK_DEPTH));
            params.negative_prompt = inputs
                .get("negative")
                .and_then(|v| resolve_text(nodes, v, "negative", MAX_LINK_DEPTH));
        }
    }

    if params.prompt.is_none() {
        params.prompt = first_text_encoder(nodes);
    }
    params
}

fn is_sampler(class_type: &str, inputs: &Map<String, Value>) -> bool {
    class_type.contains("Sampler") && (inputs.contains_key("steps") || inputs.contains_key("seed"))
}

/// Follow a literal or link input until a `text` string is found.
///
/// Conditioning nodes that carry both sides (`WanImageToVideo` and the
/// like) are followed through the input named like the one being resolved.
fn resolve_text(nodes: &Map<String, Value>, value: &Value, key: &str, depth: usize) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(link) if depth > 0 => {
            let node_id = link.first().and_then(Value::as_str)?;
            let inputs = nodes.get(node_id)?.get("inputs")?.as_object()?;
            if let Some(text) = inputs.get("text").and_then(Value::as_str) {
                return Some(text.to_string());
            }
            if let Some(same) = inputs.get(key).filter(|v| v.is_array()) {
                return resolve_text(nodes, same, key, depth - 1);
            }
            inputs
                .values()
                .filter(|v| v.is_array())
                .find_map(|v| resolve_text(nodes, v, key, depth - 1))
        }
        _ => None,
    }
}

fn first_text_encoder(nodes: &Map<String, Value>) -> Option<String> {
    nodes.values().find_map(|node| {
        let class_type = node.get("class_type")?.as_str()?;
        if !class_type.contains("TextEncode") {
            return None;
        }
        node.get("inputs")?
            .get("text")?
            .as_str()
            .map(str::to_string)
    })
}

/// Build the provenance record for one clip.
pub fn clip_provenance(order_index: u32, prompt: &str, workflow_json: Option<&str>) -> ClipProvenance {
    ClipProvenance {
        order_index,
        prompt: prompt.to_string(),
        params: workflow_json.map(extract_params).unwrap_or_default(),
    }
}
