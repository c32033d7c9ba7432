//! Workflow template placeholder substitution.
//!
//! Templates are API-format workflow JSON containing curly-brace tokens
//! such as `{prompt}` or `{width}`. Text values go inside existing JSON
//! string quotes and are escaped; numeric values are inserted bare, so a
//! template reads `"text": "{prompt}"` but `"width": {width}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

// ---------------------------------------------------------------------------
// Placeholder names
// ---------------------------------------------------------------------------

pub const PROMPT: &str = "prompt";
pub const NEGATIVE_PROMPT: &str = "negative_prompt";
pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const SEED: &str = "seed";
pub const STEPS: &str = "steps";
pub const CFG: &str = "cfg";
pub const START_IMAGE: &str = "start_image";

/// Number of LoRA slots a template may expose (`{lora_1_name}` ..).
pub const MAX_LORA_SLOTS: usize = 4;

/// Name written into unused LoRA slots; paired with strength 0.
pub const EMPTY_LORA_NAME: &str = "None";

pub fn lora_name_key(slot: usize) -> String {
    format!("lora_{slot}_name")
}

pub fn lora_strength_key(slot: usize) -> String {
    format!("lora_{slot}_strength")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Cannot read workflow template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Filled workflow is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Too many LoRAs: {given} given, template has {MAX_LORA_SLOTS} slots")]
    TooManyLoras { given: usize },
}

// ---------------------------------------------------------------------------
// Substitutions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Replacement {
    Text(String),
    Raw(String),
}

/// Placeholder values for one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitutions {
    values: BTreeMap<String, Replacement>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A string value, JSON-escaped on insertion.
    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), Replacement::Text(value.into()));
        self
    }

    /// An integer value, inserted bare.
    pub fn int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), Replacement::Raw(value.to_string()));
        self
    }

    /// A float value, inserted bare. Non-finite values become 0.
    pub fn float(mut self, key: impl Into<String>, value: f64) -> Self {
        let value = if value.is_finite() { value } else { 0.0 };
        self.values.insert(key.into(), Replacement::Raw(format!("{value:?}")));
        self
    }

    /// Fill every LoRA slot: given entries first, then inert defaults.
    pub fn loras<'a, I>(mut self, loras: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let loras: Vec<(&str, f64)> = loras.into_iter().collect();
        if loras.len() > MAX_LORA_SLOTS {
            return Err(TemplateError::TooManyLoras { given: loras.len() });
        }
        for slot in 1..=MAX_LORA_SLOTS {
            let (name, strength) = loras.get(slot - 1).copied().unwrap_or((EMPTY_LORA_NAME, 0.0));
            self = self
                .text(lora_name_key(slot), name)
                .float(lora_strength_key(slot), strength);
        }
        Ok(self)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Replace a text value in place, keeping raw values untouched.
    pub fn set_text(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.to_string(), Replacement::Text(value.into()));
    }

    /// Text value of `key`, if it is a text substitution.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(Replacement::Text(s)) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Matches a placeholder token that survived substitution.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("valid regex"));

/// A loaded workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    text: String,
}

impl WorkflowTemplate {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub async fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TemplateError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_text(text))
    }

    /// Substitute every placeholder and parse the result.
    ///
    /// Placeholders without a value are left as-is and logged; if they make
    /// the document invalid JSON the parse error is returned.
    pub fn fill(&self, substitutions: &Substitutions) -> Result<serde_json::Value, TemplateError> {
        let (filled, unfilled) = self.render(substitutions);
        if !unfilled.is_empty() {
            tracing::warn!(placeholders = ?unfilled, "Workflow template has unfilled placeholders");
        }
        Ok(serde_json::from_str(&filled)?)
    }

    /// Replace every known token in one pass over the template, so inserted
    /// values are never scanned for placeholders themselves. Also returns the
    /// tokens left in place.
    fn render(&self, substitutions: &Substitutions) -> (String, Vec<String>) {
        let mut unfilled = Vec::new();
        let filled = PLACEHOLDER_RE.replace_all(&self.text, |caps: &Captures<'_>| {
            match substitutions.values.get(&caps[1]) {
                Some(Replacement::Text(s)) => escape_json_string(s),
                Some(Replacement::Raw(s)) => s.clone(),
                None => {
                    unfilled.push(caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });
        (filled.into_owned(), unfilled)
    }
}

/// JSON string escaping without the surrounding quotes.
fn escape_json_string(s: &str) -> String {
    let quoted = serde_json::Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"{
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "{prompt}"}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "{negative_prompt}"}},
        "50": {"class_type": "WanImageToVideo", "inputs": {"width": {width}, "height": {height}}},
        "52": {"class_type": "LoadImage", "inputs": {"image": "{start_image}"}},
        "60": {"class_type": "LoraLoaderModelOnly", "inputs": {"lora_name": "{lora_1_name}", "strength_model": {lora_1_strength}}},
        "61": {"class_type": "LoraLoaderModelOnly", "inputs": {"lora_name": "{lora_2_name}", "strength_model": {lora_2_strength}}},
        "3": {"class_type": "KSampler", "inputs": {"seed": {seed}, "cfg": {cfg}}}
    }"#;

    fn full() -> Substitutions {
        Substitutions::new()
            .text(PROMPT, "a \"quoted\" cat\nwalks")
            .text(NEGATIVE_PROMPT, "blurry")
            .int(WIDTH, 832)
            .int(HEIGHT, 480)
            .text(START_IMAGE, "src.png")
            .int(SEED, 7)
            .float(CFG, 6.0)
            .loras([("motion.safetensors", 0.75)])
            .unwrap()
    }

    #[test]
    fn fills_text_and_numbers() {
        let workflow = WorkflowTemplate::from_text(TEMPLATE).fill(&full()).unwrap();
        assert_eq!(workflow["6"]["inputs"]["text"], "a \"quoted\" cat\nwalks");
        assert_eq!(workflow["50"]["inputs"]["width"], 832);
        assert_eq!(workflow["3"]["inputs"]["cfg"], 6.0);
        assert_eq!(workflow["52"]["inputs"]["image"], "src.png");
    }

    #[test]
    fn unused_lora_slots_are_inert() {
        let workflow = WorkflowTemplate::from_text(TEMPLATE).fill(&full()).unwrap();
        assert_eq!(workflow["60"]["inputs"]["lora_name"], "motion.safetensors");
        assert_eq!(workflow["60"]["inputs"]["strength_model"], 0.75);
        assert_eq!(workflow["61"]["inputs"]["lora_name"], EMPTY_LORA_NAME);
        assert_eq!(workflow["61"]["inputs"]["strength_model"], 0.0);
    }

    #[test]
    fn too_many_loras_rejected() {
        let many = vec![("a", 1.0); MAX_LORA_SLOTS + 1];
        assert!(matches!(
            Substitutions::new().loras(many),
            Err(TemplateError::TooManyLoras { given: 5 })
        ));
    }

    #[test]
    fn missing_numeric_value_is_invalid_json() {
        let subs = Substitutions::new().text(PROMPT, "x");
        let err = WorkflowTemplate::from_text(TEMPLATE).fill(&subs).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidJson(_)));
    }

    #[test]
    fn missing_text_value_still_parses() {
        let template = WorkflowTemplate::from_text(r#"{"1": {"inputs": {"text": "{prompt}"}}}"#);
        let workflow = template.fill(&Substitutions::new()).unwrap();
        assert_eq!(workflow["1"]["inputs"]["text"], "{prompt}");
    }

    #[test]
    fn braces_in_values_are_kept_verbatim() {
        let subs = Substitutions::new()
            .text(PROMPT, "a cat with {width} whiskers and {seed} spots")
            .text(START_IMAGE, "upload_{height}.png")
            .int(WIDTH, 832)
            .int(HEIGHT, 480)
            .int(SEED, 7);
        let template = WorkflowTemplate::from_text(
            r#"{"text": "{prompt}", "image": "{start_image}", "width": {width}, "height": {height}, "seed": {seed}}"#,
        );
        let workflow = template.fill(&subs).unwrap();
        assert_eq!(workflow["text"], "a cat with {width} whiskers and {seed} spots");
        assert_eq!(workflow["image"], "upload_{height}.png");
        assert_eq!(workflow["width"], 832);
        assert_eq!(workflow["seed"], 7);
    }

    #[test]
    fn escape_keeps_unicode() {
        assert_eq!(escape_json_string("café \\ tab\t"), "café \\\\ tab\\t");
    }

    #[test]
    fn float_formatting_is_json_number() {
        let subs = Substitutions::new().float("x", 1.0).float("y", f64::NAN);
        let workflow = WorkflowTemplate::from_text(r#"{"x": {x}, "y": {y}}"#)
            .fill(&subs)
            .unwrap();
        assert_eq!(workflow["x"], 1.0);
        assert_eq!(workflow["y"], 0.0);
    }
}
