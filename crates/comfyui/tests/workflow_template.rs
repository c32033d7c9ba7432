//! The bundled image-to-video workflow fills into a valid, complete document.

use std::path::PathBuf;

use clipchain_comfyui::template::{self, MAX_LORA_SLOTS};
use clipchain_comfyui::{Substitutions, WorkflowTemplate};
use clipchain_core::provenance::extract_params;

fn bundled() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../workflows/image_to_video.json")
}

fn substitutions() -> Substitutions {
    Substitutions::new()
        .text(template::PROMPT, "a heron lifts off the water")
        .text(template::NEGATIVE_PROMPT, "blurry")
        .int(template::WIDTH, 832)
        .int(template::HEIGHT, 464)
        .text(template::START_IMAGE, "clipchain_start_1.png")
        .int(template::SEED, 1234)
        .int(template::STEPS, 20)
        .float(template::CFG, 6.0)
        .loras([("wings.safetensors", 0.8)])
        .unwrap()
}

#[tokio::test]
async fn bundled_workflow_fills_every_placeholder() {
    let template = WorkflowTemplate::load(&bundled()).await.unwrap();
    let workflow = template.fill(&substitutions()).unwrap();

    let text = workflow.to_string();
    for key in ["prompt", "negative_prompt", "width", "seed", "start_image"] {
        assert!(!text.contains(&format!("{{{key}}}")), "{key} left unfilled");
    }
    for slot in 1..=MAX_LORA_SLOTS {
        assert!(!text.contains(&format!("{{{}}}", template::lora_name_key(slot))));
    }
}

#[tokio::test]
async fn filled_workflow_yields_provenance() {
    let template = WorkflowTemplate::load(&bundled()).await.unwrap();
    let workflow = template.fill(&substitutions()).unwrap();

    let params = extract_params(&workflow.to_string());
    assert_eq!(params.seed, Some(1234));
    assert_eq!(params.steps, Some(20));
    assert_eq!(params.cfg, Some(6.0));
    assert_eq!(params.prompt.as_deref(), Some("a heron lifts off the water"));
    assert_eq!(params.negative_prompt.as_deref(), Some("blurry"));
    // Only the active LoRA slot is reported.
    assert_eq!(params.loras.len(), 1);
    assert_eq!(params.loras[0].name, "wings.safetensors");
}
