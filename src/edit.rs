use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PipelineError;
use crate::models::{
    ControlType, EditDecision, EditMode, EditType, MaskMode, ProductAnalysis, SubjectType,
};

/// Seed used when the caller supplies none; keeps repeated runs comparable.
pub const DEFAULT_SEED: u32 = 1;
const BASE_STEPS: u32 = 75;
const STYLE_BASE_STEPS: u32 = 25;
const DEFAULT_MASK_DILATION: f32 = 0.01;
const CONTROLLED_PROMPT_PREFIX: &str =
    "Generate an image aligning with the scribble map to match the description: ";

// ---- Wire payload for the prediction endpoint ----

#[derive(Debug, Serialize)]
pub struct EditPayload {
    pub instances: Vec<Instance>,
    pub parameters: Parameters,
}

#[derive(Debug, Serialize)]
pub struct Instance {
    pub prompt: String,
    #[serde(rename = "referenceImages")]
    pub reference_images: Vec<ReferenceImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReferenceType {
    #[serde(rename = "REFERENCE_TYPE_RAW")]
    Raw,
    #[serde(rename = "REFERENCE_TYPE_SUBJECT")]
    Subject,
    #[serde(rename = "REFERENCE_TYPE_STYLE")]
    Style,
    #[serde(rename = "REFERENCE_TYPE_CONTROL")]
    Control,
    #[serde(rename = "REFERENCE_TYPE_MASK")]
    Mask,
}

#[derive(Debug, Serialize)]
pub struct ReferenceImage {
    #[serde(rename = "referenceType")]
    pub reference_type: ReferenceType,
    #[serde(rename = "referenceId")]
    pub reference_id: u32,
    #[serde(rename = "referenceImage", skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<ImageBytes>,
    #[serde(rename = "subjectImageConfig", skip_serializing_if = "Option::is_none")]
    pub subject_image_config: Option<SubjectImageConfig>,
    #[serde(rename = "styleImageConfig", skip_serializing_if = "Option::is_none")]
    pub style_image_config: Option<StyleImageConfig>,
    #[serde(rename = "controlImageConfig", skip_serializing_if = "Option::is_none")]
    pub control_image_config: Option<ControlImageConfig>,
    #[serde(rename = "maskImageConfig", skip_serializing_if = "Option::is_none")]
    pub mask_image_config: Option<MaskImageConfig>,
}

impl ReferenceImage {
    fn bare(reference_type: ReferenceType, reference_id: u32) -> Self {
        ReferenceImage {
            reference_type,
            reference_id,
            reference_image: None,
            subject_image_config: None,
            style_image_config: None,
            control_image_config: None,
            mask_image_config: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageBytes {
    #[serde(rename = "bytesBase64Encoded")]
    pub bytes_base64_encoded: String,
}

#[derive(Debug, Serialize)]
pub struct SubjectImageConfig {
    #[serde(rename = "subjectDescription")]
    pub subject_description: String,
    #[serde(rename = "subjectType")]
    pub subject_type: SubjectType,
}

#[derive(Debug, Serialize)]
pub struct StyleImageConfig {
    #[serde(rename = "styleDescription", skip_serializing_if = "Option::is_none")]
    pub style_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ControlImageConfig {
    #[serde(rename = "controlType")]
    pub control_type: ControlType,
    #[serde(rename = "enableControlImageComputation")]
    pub enable_control_image_computation: bool,
}

#[derive(Debug, Serialize)]
pub struct MaskImageConfig {
    #[serde(rename = "maskMode")]
    pub mask_mode: MaskMode,
    pub dilation: f32,
}

#[derive(Debug, Serialize)]
pub struct Parameters {
    #[serde(rename = "negativePrompt")]
    pub negative_prompt: String,
    pub seed: u32,
    #[serde(rename = "sampleCount")]
    pub sample_count: u32,
    #[serde(rename = "promptLanguage")]
    pub prompt_language: &'static str,
    #[serde(rename = "editConfig", skip_serializing_if = "Option::is_none")]
    pub edit_config: Option<EditConfig>,
    #[serde(rename = "editMode", skip_serializing_if = "Option::is_none")]
    pub edit_mode: Option<&'static str>,
    #[serde(rename = "guidanceScale", skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct EditConfig {
    #[serde(rename = "baseSteps")]
    pub base_steps: u32,
}

/// Caller overrides for the numeric parameters; anything set here is passed
/// through verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Overrides {
    #[serde(default)]
    pub seed: Option<u32>,
    #[serde(default)]
    pub sample_count: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub mask_dilation: Option<f32>,
}

fn default_sample_count(edit_type: EditType) -> u32 {
    match edit_type {
        EditType::SubjectEditing | EditType::StyleEditing => 2,
        EditType::RawEditing | EditType::ControlledEditing | EditType::InstructEditing => 4,
    }
}

fn encode_image(path: &Path) -> Result<String, PipelineError> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn base_parameters(decision: &EditDecision, overrides: &Overrides) -> Parameters {
    Parameters {
        negative_prompt: decision.negative_prompt.clone(),
        seed: overrides.seed.unwrap_or(DEFAULT_SEED),
        sample_count: overrides
            .sample_count
            .unwrap_or_else(|| default_sample_count(decision.edit_type)),
        prompt_language: "en",
        edit_config: Some(EditConfig { base_steps: BASE_STEPS }),
        edit_mode: None,
        guidance_scale: None,
    }
}

/// Builds the one endpoint payload a decision maps to. Reference ids are
/// assigned sequentially starting at 1 and are unique within a request.
/// Reads every reference image from disk and base64-encodes it, which is the
/// dominant cost of this call.
pub fn build_edit_payload(
    decision: &EditDecision,
    image_paths: &[impl AsRef<Path>],
    overrides: &Overrides,
) -> Result<EditPayload, PipelineError> {
    if image_paths.is_empty() {
        return Err(PipelineError::BadRequest(
            "at least one reference image is required".into(),
        ));
    }

    let mut parameters = base_parameters(decision, overrides);
    let prompt;
    let mut reference_images = Vec::new();

    match decision.edit_type {
        EditType::RawEditing => {
            prompt = decision.positive_prompt.clone();
            let mut raw = ReferenceImage::bare(ReferenceType::Raw, 1);
            raw.reference_image = Some(ImageBytes {
                bytes_base64_encoded: encode_image(image_paths[0].as_ref())?,
            });
            reference_images.push(raw);

            if decision.mask_mode != MaskMode::None {
                let mut mask = ReferenceImage::bare(ReferenceType::Mask, 2);
                mask.mask_image_config = Some(MaskImageConfig {
                    mask_mode: decision.mask_mode,
                    dilation: overrides
                        .mask_dilation
                        .or(decision.mask_dilation)
                        .unwrap_or(DEFAULT_MASK_DILATION),
                });
                reference_images.push(mask);
            }

            if decision.edit_mode != EditMode::None {
                parameters.edit_mode = Some(decision.edit_mode.as_wire());
            }
            parameters.guidance_scale = overrides.guidance_scale.or(decision.guidance_scale);
        }
        EditType::InstructEditing => {
            prompt = decision.positive_prompt.clone();
            let mut raw = ReferenceImage::bare(ReferenceType::Raw, 1);
            raw.reference_image = Some(ImageBytes {
                bytes_base64_encoded: encode_image(image_paths[0].as_ref())?,
            });
            reference_images.push(raw);
        }
        EditType::SubjectEditing => {
            prompt = decision.positive_prompt.clone();
            let mut subject = ReferenceImage::bare(ReferenceType::Subject, 1);
            subject.reference_image = Some(ImageBytes {
                bytes_base64_encoded: encode_image(image_paths[0].as_ref())?,
            });
            subject.subject_image_config = Some(SubjectImageConfig {
                subject_description: decision.main_object_description.clone(),
                subject_type: decision.subject_type,
            });
            reference_images.push(subject);
            parameters.edit_mode = Some("EDIT_MODE_DEFAULT");
        }
        EditType::StyleEditing => {
            prompt = decision.positive_prompt.clone();
            let mut style = ReferenceImage::bare(ReferenceType::Style, 1);
            style.reference_image = Some(ImageBytes {
                bytes_base64_encoded: encode_image(image_paths[0].as_ref())?,
            });
            style.style_image_config = Some(StyleImageConfig {
                style_description: Some(decision.main_object_description.clone())
                    .filter(|d| !d.is_empty()),
            });
            reference_images.push(style);
            // Style transfers converge with a reduced step count.
            parameters.edit_config = Some(EditConfig { base_steps: STYLE_BASE_STEPS });
        }
        EditType::ControlledEditing => {
            prompt = format!("{CONTROLLED_PROMPT_PREFIX}{}", decision.positive_prompt);
            for (idx, path) in image_paths.iter().enumerate() {
                let mut control = ReferenceImage::bare(ReferenceType::Control, idx as u32 + 1);
                control.reference_image = Some(ImageBytes {
                    bytes_base64_encoded: encode_image(path.as_ref())?,
                });
                control.control_image_config = Some(ControlImageConfig {
                    control_type: decision.control_type,
                    enable_control_image_computation: false,
                });
                reference_images.push(control);
            }
            parameters.edit_config = None;
        }
    }

    Ok(EditPayload {
        instances: vec![Instance { prompt, reference_images }],
        parameters,
    })
}

/// Multi-subject product background request: every image becomes its own
/// SUBJECT reference carrying the per-image analysis.
pub fn build_product_payload(
    analysis: &ProductAnalysis,
    image_paths: &[impl AsRef<Path>],
    overrides: &Overrides,
) -> Result<EditPayload, PipelineError> {
    if image_paths.is_empty() {
        return Err(PipelineError::BadRequest(
            "at least one product image is required".into(),
        ));
    }

    let mut reference_images = Vec::with_capacity(image_paths.len());
    for (idx, path) in image_paths.iter().enumerate() {
        let info = analysis.images.get(idx);
        let mut subject = ReferenceImage::bare(ReferenceType::Subject, idx as u32 + 1);
        subject.reference_image = Some(ImageBytes {
            bytes_base64_encoded: encode_image(path.as_ref())?,
        });
        subject.subject_image_config = Some(SubjectImageConfig {
            subject_description: info.map(|i| i.subject_description.clone()).unwrap_or_default(),
            subject_type: info.map(|i| i.subject_type).unwrap_or_default(),
        });
        reference_images.push(subject);
    }

    Ok(EditPayload {
        instances: vec![Instance {
            prompt: analysis.positive_prompt.clone(),
            reference_images,
        }],
        parameters: Parameters {
            negative_prompt: analysis.negative_prompt.clone(),
            seed: overrides.seed.unwrap_or(DEFAULT_SEED),
            sample_count: overrides.sample_count.unwrap_or(4),
            prompt_language: "en",
            edit_config: Some(EditConfig { base_steps: BASE_STEPS }),
            edit_mode: None,
            guidance_scale: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubjectInfo;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::path::PathBuf;

    fn decision(edit_type: EditType) -> EditDecision {
        EditDecision {
            original_description: "a cat on a sofa".into(),
            main_object_description: "a tabby cat".into(),
            edit_type,
            edit_mode: EditMode::None,
            mask_mode: MaskMode::None,
            subject_type: SubjectType::Animal,
            positive_prompt: "a tabby cat wearing a party hat".into(),
            negative_prompt: "blurry, low quality".into(),
            guidance_scale: None,
            mask_dilation: None,
            control_type: ControlType::Scribble,
        }
    }

    fn temp_images(n: usize) -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = (0..n)
            .map(|i| {
                let p = dir.path().join(format!("ref_{i}.png"));
                std::fs::write(&p, format!("fake-image-{i}")).unwrap();
                p
            })
            .collect();
        (dir, paths)
    }

    fn to_value(payload: &EditPayload) -> Value {
        serde_json::to_value(payload).unwrap()
    }

    fn reference_types(value: &Value) -> Vec<String> {
        value["instances"][0]["referenceImages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["referenceType"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn raw_editing_without_mask_is_single_raw_reference() {
        let (_dir, paths) = temp_images(1);
        let payload =
            build_edit_payload(&decision(EditType::RawEditing), &paths, &Overrides::default())
                .unwrap();
        let value = to_value(&payload);
        assert_eq!(reference_types(&value), vec!["REFERENCE_TYPE_RAW"]);
        assert_eq!(value["instances"][0]["referenceImages"][0]["referenceId"], 1);
        // editMode stays off the wire when the decision says NONE.
        assert!(value["parameters"].get("editMode").is_none());
        assert_eq!(value["parameters"]["sampleCount"], 4);
        assert_eq!(value["parameters"]["seed"], DEFAULT_SEED);
        assert_eq!(value["parameters"]["editConfig"]["baseSteps"], 75);
        assert_eq!(value["parameters"]["promptLanguage"], "en");
    }

    #[test]
    fn raw_editing_with_mask_appends_mask_reference() {
        let (_dir, paths) = temp_images(1);
        let mut d = decision(EditType::RawEditing);
        d.edit_mode = EditMode::InpaintInsertion;
        d.mask_mode = MaskMode::Background;
        d.mask_dilation = Some(0.03);
        d.guidance_scale = Some(20.0);
        let payload = build_edit_payload(&d, &paths, &Overrides::default()).unwrap();
        let value = to_value(&payload);

        assert_eq!(
            reference_types(&value),
            vec!["REFERENCE_TYPE_RAW", "REFERENCE_TYPE_MASK"]
        );
        let mask = &value["instances"][0]["referenceImages"][1];
        assert_eq!(mask["referenceId"], 2);
        assert!(mask.get("referenceImage").is_none());
        assert_eq!(mask["maskImageConfig"]["maskMode"], "MASK_MODE_BACKGROUND");
        let dilation = mask["maskImageConfig"]["dilation"].as_f64().unwrap();
        assert!((dilation - 0.03).abs() < 1e-6);
        assert_eq!(value["parameters"]["editMode"], "EDIT_MODE_INPAINT_INSERTION");
        assert_eq!(value["parameters"]["guidanceScale"], 20.0);
    }

    #[test]
    fn subject_editing_shape() {
        let (_dir, paths) = temp_images(1);
        let payload =
            build_edit_payload(&decision(EditType::SubjectEditing), &paths, &Overrides::default())
                .unwrap();
        let value = to_value(&payload);
        assert_eq!(reference_types(&value), vec!["REFERENCE_TYPE_SUBJECT"]);
        let subject = &value["instances"][0]["referenceImages"][0];
        assert_eq!(subject["subjectImageConfig"]["subjectDescription"], "a tabby cat");
        assert_eq!(subject["subjectImageConfig"]["subjectType"], "SUBJECT_TYPE_ANIMAL");
        assert_eq!(value["parameters"]["editMode"], "EDIT_MODE_DEFAULT");
        assert_eq!(value["parameters"]["sampleCount"], 2);
    }

    #[test]
    fn style_editing_uses_reduced_steps() {
        let (_dir, paths) = temp_images(1);
        let payload =
            build_edit_payload(&decision(EditType::StyleEditing), &paths, &Overrides::default())
                .unwrap();
        let value = to_value(&payload);
        assert_eq!(reference_types(&value), vec!["REFERENCE_TYPE_STYLE"]);
        assert_eq!(
            value["instances"][0]["referenceImages"][0]["styleImageConfig"]["styleDescription"],
            "a tabby cat"
        );
        assert_eq!(value["parameters"]["editConfig"]["baseSteps"], 25);
        assert_eq!(value["parameters"]["sampleCount"], 2);
    }

    #[test]
    fn instruct_editing_is_raw_reference_without_mask_or_mode() {
        let (_dir, paths) = temp_images(1);
        let payload = build_edit_payload(
            &decision(EditType::InstructEditing),
            &paths,
            &Overrides::default(),
        )
        .unwrap();
        let value = to_value(&payload);
        assert_eq!(reference_types(&value), vec!["REFERENCE_TYPE_RAW"]);
        assert!(value["parameters"].get("editMode").is_none());
        assert_eq!(value["parameters"]["sampleCount"], 4);
    }

    #[test]
    fn controlled_editing_tags_every_reference() {
        let (_dir, paths) = temp_images(2);
        let mut d = decision(EditType::ControlledEditing);
        d.control_type = ControlType::Canny;
        let payload = build_edit_payload(&d, &paths, &Overrides::default()).unwrap();
        let value = to_value(&payload);

        assert_eq!(
            reference_types(&value),
            vec!["REFERENCE_TYPE_CONTROL", "REFERENCE_TYPE_CONTROL"]
        );
        let refs = value["instances"][0]["referenceImages"].as_array().unwrap();
        assert_eq!(refs[0]["referenceId"], 1);
        assert_eq!(refs[1]["referenceId"], 2);
        for r in refs {
            assert_eq!(r["controlImageConfig"]["controlType"], "CONTROL_TYPE_CANNY");
            assert_eq!(r["controlImageConfig"]["enableControlImageComputation"], false);
        }
        assert!(value["parameters"].get("editConfig").is_none());
        assert!(value["instances"][0]["prompt"]
            .as_str()
            .unwrap()
            .starts_with("Generate an image aligning with the scribble map"));
    }

    #[test]
    fn product_payload_carries_per_image_subject_configs() {
        let (_dir, paths) = temp_images(2);
        let analysis = ProductAnalysis {
            images: vec![
                SubjectInfo {
                    subject_description: "a ceramic mug".into(),
                    subject_type: SubjectType::Product,
                },
                SubjectInfo {
                    subject_description: "a leather wallet".into(),
                    subject_type: SubjectType::Product,
                },
            ],
            positive_prompt: "a modern minimalist shelf".into(),
            negative_prompt: "clutter".into(),
        };
        let payload = build_product_payload(&analysis, &paths, &Overrides::default()).unwrap();
        let value = to_value(&payload);

        assert_eq!(
            reference_types(&value),
            vec!["REFERENCE_TYPE_SUBJECT", "REFERENCE_TYPE_SUBJECT"]
        );
        let refs = value["instances"][0]["referenceImages"].as_array().unwrap();
        assert_eq!(refs[0]["referenceId"], 1);
        assert_eq!(refs[1]["referenceId"], 2);
        assert_eq!(refs[1]["subjectImageConfig"]["subjectDescription"], "a leather wallet");
        assert_eq!(value["parameters"]["editConfig"]["baseSteps"], 75);
        assert_eq!(value["parameters"]["sampleCount"], 4);
    }

    #[test]
    fn overrides_pass_through_verbatim() {
        let (_dir, paths) = temp_images(1);
        let overrides = Overrides {
            seed: Some(777),
            sample_count: Some(8),
            guidance_scale: Some(15.5),
            mask_dilation: Some(0.005),
        };
        let mut d = decision(EditType::RawEditing);
        d.mask_mode = MaskMode::Foreground;
        let payload = build_edit_payload(&d, &paths, &overrides).unwrap();
        let value = to_value(&payload);
        assert_eq!(value["parameters"]["seed"], 777);
        assert_eq!(value["parameters"]["sampleCount"], 8);
        assert_eq!(value["parameters"]["guidanceScale"], 15.5);
        let dilation = value["instances"][0]["referenceImages"][1]["maskImageConfig"]["dilation"]
            .as_f64()
            .unwrap();
        assert!((dilation - 0.005).abs() < 1e-6);
    }

    #[test]
    fn empty_image_list_is_rejected() {
        let paths: Vec<PathBuf> = Vec::new();
        let err = build_edit_payload(&decision(EditType::RawEditing), &paths, &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::BadRequest(_)));
    }

    #[test]
    fn classifier_answer_flows_into_a_controlled_payload() {
        let answer = "Here is the analysis you asked for:\n\
            ```json\n\
            {\"edit_type\": \"CONTROLLED_EDITING\", \"control_type\": \"CONTROL_TYPE_CANNY\",\n\
             \"positive_prompt\": \"the Eiffel Tower at sunset\"}\n\
            ```\nLet me know if you need anything else.";
        let value = crate::fence::extract_json_value(answer).unwrap();
        let raw: crate::models::RawDecision = serde_json::from_value(value).unwrap();
        let decision = EditDecision::from_raw(raw).unwrap();

        let (_dir, paths) = temp_images(2);
        let payload = build_edit_payload(&decision, &paths, &Overrides::default()).unwrap();
        let value = to_value(&payload);
        let refs = value["instances"][0]["referenceImages"].as_array().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0]["referenceId"], 1);
        assert_eq!(refs[1]["referenceId"], 2);
        for r in refs {
            assert_eq!(r["referenceType"], "REFERENCE_TYPE_CONTROL");
            assert_eq!(r["controlImageConfig"]["controlType"], "CONTROL_TYPE_CANNY");
        }
    }

    #[test]
    fn reference_image_bytes_are_base64() {
        let (_dir, paths) = temp_images(1);
        let payload =
            build_edit_payload(&decision(EditType::RawEditing), &paths, &Overrides::default())
                .unwrap();
        let value = to_value(&payload);
        let encoded = value["instances"][0]["referenceImages"][0]["referenceImage"]
            ["bytesBase64Encoded"]
            .as_str()
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"fake-image-0");
    }
}
