//! Interpretation of `GET /history/{prompt_id}` responses.
//!
//! The body is `{ "<prompt_id>": { "status": {...}, "outputs": {...} } }`,
//! or `{}` while the prompt has not finished. Failure is reported either as
//! `status.status_str == "error"` or as an `execution_error` entry in
//! `status.messages` (a list of `[name, data]` tuples).

use serde_json::Value;

/// A file listed under a node's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub filename: String,
    pub subfolder: String,
    /// `output` or `temp`.
    pub kind: String,
}

/// Terminal or pending state of a submitted prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Completed { outputs: Vec<OutputFile> },
    Failed { message: String },
}

/// Output list keys in preference order: videos first, then images.
const OUTPUT_KEYS: &[&str] = &["gifs", "videos", "images"];

/// Classify the history entry for `prompt_id`.
pub fn parse_history(history: &Value, prompt_id: &str) -> JobState {
    let Some(entry) = history.get(prompt_id) else {
        return JobState::Pending;
    };
    let status = entry.get("status");

    if let Some(message) = status.and_then(error_message) {
        return JobState::Failed { message };
    }

    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if completed {
        JobState::Completed {
            outputs: collect_outputs(entry),
        }
    } else {
        JobState::Pending
    }
}

fn error_message(status: &Value) -> Option<String> {
    let execution_error = status
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|m| m.get(0).and_then(Value::as_str) == Some("execution_error"));

    if let Some(entry) = execution_error {
        let data = entry.get(1);
        let text = data
            .and_then(|d| d.get("exception_message"))
            .and_then(Value::as_str)
            .unwrap_or("execution_error");
        let node = data
            .and_then(|d| d.get("node_id"))
            .map(|n| n.as_str().map(str::to_string).unwrap_or_else(|| n.to_string()))
            .unwrap_or_default();
        return Some(if node.is_empty() {
            text.trim().to_string()
        } else {
            format!("node {node}: {}", text.trim())
        });
    }

    (status.get("status_str").and_then(Value::as_str) == Some("error"))
        .then(|| "status_str=error".to_string())
}

/// Every output file of the entry, videos before images, in node id order.
pub fn collect_outputs(entry: &Value) -> Vec<OutputFile> {
    let Some(nodes) = entry.get("outputs").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.as_str()));

    let mut files = Vec::new();
    for key in OUTPUT_KEYS {
        for id in &ids {
            let list = nodes
                .get(id.as_str())
                .and_then(|n| n.get(*key))
                .and_then(Value::as_array);
            for item in list.into_iter().flatten() {
                let Some(filename) = item.get("filename").and_then(Value::as_str) else {
                    continue;
                };
                files.push(OutputFile {
                    filename: filename.to_string(),
                    subfolder: item
                        .get("subfolder")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    kind: item
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("output")
                        .to_string(),
                });
            }
        }
    }
    files
}
