use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::edit::Overrides;
use crate::error::PipelineError;
use crate::imagen::UpscaleTarget;
use crate::postprocess::{AspectRatio, ResolutionPolicy};

// ---- Edit decision enums (wire values match the prediction endpoint) ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EditType {
    #[default]
    #[serde(rename = "RAW_EDITING")]
    RawEditing,
    #[serde(rename = "SUBJECT_EDITING")]
    SubjectEditing,
    #[serde(rename = "STYLE_EDITING")]
    StyleEditing,
    #[serde(rename = "CONTROLLED_EDITING")]
    ControlledEditing,
    #[serde(rename = "INSTRUCT_EDITING")]
    InstructEditing,
}

impl EditType {
    pub fn from_wire(s: &str) -> Result<Self, PipelineError> {
        match s {
            "RAW_EDITING" | "EDIT_MODE_DEFAULT" => Ok(EditType::RawEditing),
            "SUBJECT_EDITING" => Ok(EditType::SubjectEditing),
            "STYLE_EDITING" => Ok(EditType::StyleEditing),
            "CONTROLLED_EDITING" => Ok(EditType::ControlledEditing),
            "INSTRUCT_EDITING" => Ok(EditType::InstructEditing),
            other => Err(PipelineError::InvalidEditType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EditMode {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "EDIT_MODE_INPAINT_INSERTION")]
    InpaintInsertion,
    #[serde(rename = "EDIT_MODE_INPAINT_REMOVAL")]
    InpaintRemoval,
    #[serde(rename = "EDIT_MODE_OUTPAINT")]
    Outpaint,
}

impl EditMode {
    pub fn from_wire(s: &str) -> Result<Self, PipelineError> {
        match s {
            "NONE" => Ok(EditMode::None),
            "EDIT_MODE_INPAINT_INSERTION" => Ok(EditMode::InpaintInsertion),
            "EDIT_MODE_INPAINT_REMOVAL" => Ok(EditMode::InpaintRemoval),
            "EDIT_MODE_OUTPAINT" => Ok(EditMode::Outpaint),
            other => Err(PipelineError::ClassificationError(format!(
                "unknown edit_mode: {other}"
            ))),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            EditMode::None => "NONE",
            EditMode::InpaintInsertion => "EDIT_MODE_INPAINT_INSERTION",
            EditMode::InpaintRemoval => "EDIT_MODE_INPAINT_REMOVAL",
            EditMode::Outpaint => "EDIT_MODE_OUTPAINT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaskMode {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "MASK_MODE_FOREGROUND")]
    Foreground,
    #[serde(rename = "MASK_MODE_BACKGROUND")]
    Background,
}

impl MaskMode {
    pub fn from_wire(s: &str) -> Result<Self, PipelineError> {
        match s {
            "NONE" => Ok(MaskMode::None),
            "MASK_MODE_FOREGROUND" => Ok(MaskMode::Foreground),
            "MASK_MODE_BACKGROUND" => Ok(MaskMode::Background),
            other => Err(PipelineError::ClassificationError(format!(
                "unknown mask_mode: {other}"
            ))),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            MaskMode::None => "NONE",
            MaskMode::Foreground => "MASK_MODE_FOREGROUND",
            MaskMode::Background => "MASK_MODE_BACKGROUND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SubjectType {
    #[default]
    #[serde(rename = "SUBJECT_TYPE_DEFAULT")]
    Default,
    #[serde(rename = "SUBJECT_TYPE_PERSON")]
    Person,
    #[serde(rename = "SUBJECT_TYPE_ANIMAL")]
    Animal,
    #[serde(rename = "SUBJECT_TYPE_PRODUCT")]
    Product,
}

impl SubjectType {
    pub fn from_wire(s: &str) -> Result<Self, PipelineError> {
        match s {
            "SUBJECT_TYPE_DEFAULT" => Ok(SubjectType::Default),
            "SUBJECT_TYPE_PERSON" => Ok(SubjectType::Person),
            "SUBJECT_TYPE_ANIMAL" => Ok(SubjectType::Animal),
            "SUBJECT_TYPE_PRODUCT" => Ok(SubjectType::Product),
            other => Err(PipelineError::ClassificationError(format!(
                "unknown subject_type: {other}"
            ))),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            SubjectType::Default => "SUBJECT_TYPE_DEFAULT",
            SubjectType::Person => "SUBJECT_TYPE_PERSON",
            SubjectType::Animal => "SUBJECT_TYPE_ANIMAL",
            SubjectType::Product => "SUBJECT_TYPE_PRODUCT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ControlType {
    #[default]
    #[serde(rename = "CONTROL_TYPE_SCRIBBLE")]
    Scribble,
    #[serde(rename = "CONTROL_TYPE_CANNY")]
    Canny,
}

impl ControlType {
    pub fn from_wire(s: &str) -> Result<Self, PipelineError> {
        match s {
            "CONTROL_TYPE_SCRIBBLE" => Ok(ControlType::Scribble),
            "CONTROL_TYPE_CANNY" => Ok(ControlType::Canny),
            other => Err(PipelineError::ClassificationError(format!(
                "unknown control_type: {other}"
            ))),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            ControlType::Scribble => "CONTROL_TYPE_SCRIBBLE",
            ControlType::Canny => "CONTROL_TYPE_CANNY",
        }
    }
}

// ---- Edit decision ----

/// Structured output of the edit-intent classifier. The caller may edit any
/// field before submitting it back through `/api/edit`.
#[derive(Debug, Clone, Serialize)]
pub struct EditDecision {
    pub original_description: String,
    pub main_object_description: String,
    pub edit_type: EditType,
    pub edit_mode: EditMode,
    pub mask_mode: MaskMode,
    pub subject_type: SubjectType,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub guidance_scale: Option<f32>,
    pub mask_dilation: Option<f32>,
    pub control_type: ControlType,
}

/// Loose decision shape as decoded from a model answer or an API body.
/// Missing fields fall back to documented defaults in [`EditDecision::from_raw`];
/// unknown enum text surfaces as a typed error rather than a silent no-op.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDecision {
    #[serde(default, alias = "org_image_description")]
    pub original_description: Option<String>,
    #[serde(default)]
    pub main_object_description: Option<String>,
    #[serde(default)]
    pub edit_type: Option<String>,
    #[serde(default)]
    pub edit_mode: Option<String>,
    #[serde(default)]
    pub mask_mode: Option<String>,
    #[serde(default)]
    pub subject_type: Option<String>,
    #[serde(default)]
    pub positive_prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub mask_dilation: Option<f32>,
    #[serde(default)]
    pub control_type: Option<String>,
}

impl EditDecision {
    /// positive_prompt is the one mandatory field; everything else defaults.
    pub fn from_raw(raw: RawDecision) -> Result<Self, PipelineError> {
        let positive_prompt = raw
            .positive_prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::ClassificationError("decision is missing positive_prompt".into())
            })?;

        Ok(EditDecision {
            original_description: raw.original_description.unwrap_or_default(),
            main_object_description: raw.main_object_description.unwrap_or_default(),
            edit_type: match raw.edit_type.as_deref() {
                Some(s) => EditType::from_wire(s)?,
                None => EditType::RawEditing,
            },
            edit_mode: match raw.edit_mode.as_deref() {
                Some(s) => EditMode::from_wire(s)?,
                None => EditMode::None,
            },
            mask_mode: match raw.mask_mode.as_deref() {
                Some(s) => MaskMode::from_wire(s)?,
                None => MaskMode::None,
            },
            subject_type: match raw.subject_type.as_deref() {
                Some(s) => SubjectType::from_wire(s)?,
                None => SubjectType::Default,
            },
            positive_prompt,
            negative_prompt: raw.negative_prompt.unwrap_or_default(),
            guidance_scale: raw.guidance_scale,
            mask_dilation: raw.mask_dilation,
            control_type: match raw.control_type.as_deref() {
                Some(s) => ControlType::from_wire(s)?,
                None => ControlType::Scribble,
            },
        })
    }
}

// ---- Multi-subject product analysis ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_description: String,
    pub subject_type: SubjectType,
}

/// Per-image subject analysis plus the prompt pair for a product background.
#[derive(Debug, Clone, Serialize)]
pub struct ProductAnalysis {
    pub images: Vec<SubjectInfo>,
    pub positive_prompt: String,
    pub negative_prompt: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProductAnalysis {
    #[serde(default)]
    pub images: Vec<RawSubjectInfo>,
    #[serde(default)]
    pub positive_prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSubjectInfo {
    #[serde(default)]
    pub subject_description: Option<String>,
    #[serde(default)]
    pub subject_type: Option<String>,
}

impl ProductAnalysis {
    pub fn from_raw(raw: RawProductAnalysis) -> Result<Self, PipelineError> {
        let positive_prompt = raw
            .positive_prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::ClassificationError("analysis is missing positive_prompt".into())
            })?;
        let images = raw
            .images
            .into_iter()
            .map(|img| {
                Ok(SubjectInfo {
                    subject_description: img.subject_description.unwrap_or_default(),
                    subject_type: match img.subject_type.as_deref() {
                        Some(s) => SubjectType::from_wire(s)?,
                        None => SubjectType::Default,
                    },
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        Ok(ProductAnalysis {
            images,
            positive_prompt,
            negative_prompt: raw.negative_prompt.unwrap_or_default(),
        })
    }
}

/// Positive/negative pair produced by prompt reinterpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPair {
    pub positive: String,
    #[serde(default)]
    pub negative: String,
}

// ---- Image store ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Uploaded,
    Generated,
    Edited,
    Upscaled,
    Resized,
}

/// A source or result image held by the studio. Immutable once created;
/// the bytes are kept alongside the on-disk path so fetches never re-read.
#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub id: Uuid,
    pub path: PathBuf,
    #[serde(skip_serializing)]
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ImageSummary {
    pub fn of(img: &StoredImage) -> Self {
        ImageSummary { id: img.id, width: img.width, height: img.height, kind: img.kind, model: None }
    }

    pub fn with_model(img: &StoredImage, model: &str) -> Self {
        ImageSummary { model: Some(model.to_string()), ..Self::of(img) }
    }
}

// ---- Route bodies ----

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub filename: Option<String>,
    pub bytes_base64: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub prompt: String,
    #[serde(default)]
    pub option: crate::gemini::ReinterpretOption,
    /// Free-form template text; only read for the UserInput option.
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub positive: String,
    pub negative: String,
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub image_ids: Vec<Uuid>,
    #[serde(default)]
    pub goal: String,
}

#[derive(Debug, Deserialize)]
pub struct EditRequestBody {
    pub decision: RawDecision,
    pub image_ids: Vec<Uuid>,
    #[serde(default)]
    pub overrides: Overrides,
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub image_ids: Vec<Uuid>,
    #[serde(default)]
    pub goal: String,
    /// Caller-edited analysis; when present the classification call is skipped.
    #[serde(default)]
    pub analysis: Option<RawProductAnalysis>,
    #[serde(default)]
    pub overrides: Overrides,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub analysis: ProductAnalysis,
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Deserialize)]
pub struct UpscaleRequest {
    pub image_id: Uuid,
    #[serde(flatten)]
    pub target: UpscaleTarget,
    #[serde(default)]
    pub model: crate::imagen::GenerationModel,
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub image_id: Uuid,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub policy: ResolutionPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decision_defaults_fill_missing_fields() {
        let raw: RawDecision =
            serde_json::from_str(r#"{"positive_prompt": "a red bicycle at sunset"}"#).unwrap();
        let decision = EditDecision::from_raw(raw).unwrap();
        assert_eq!(decision.edit_type, EditType::RawEditing);
        assert_eq!(decision.edit_mode, EditMode::None);
        assert_eq!(decision.mask_mode, MaskMode::None);
        assert_eq!(decision.subject_type, SubjectType::Default);
        assert_eq!(decision.control_type, ControlType::Scribble);
        assert_eq!(decision.negative_prompt, "");
        assert!(decision.guidance_scale.is_none());
    }

    #[test]
    fn decision_missing_mask_mode_is_none_not_error() {
        let raw: RawDecision = serde_json::from_str(
            r#"{
                "org_image_description": "a girl in a park",
                "edit_type": "SUBJECT_EDITING",
                "subject_type": "SUBJECT_TYPE_PERSON",
                "positive_prompt": "the girl [1] smiling at the camera",
                "negative_prompt": "blurry"
            }"#,
        )
        .unwrap();
        let decision = EditDecision::from_raw(raw).unwrap();
        assert_eq!(decision.mask_mode, MaskMode::None);
        assert_eq!(decision.edit_type, EditType::SubjectEditing);
        assert_eq!(decision.original_description, "a girl in a park");
    }

    #[test]
    fn decision_without_positive_prompt_is_classification_error() {
        let raw: RawDecision = serde_json::from_str(r#"{"edit_type": "RAW_EDITING"}"#).unwrap();
        let err = EditDecision::from_raw(raw).unwrap_err();
        assert!(matches!(err, PipelineError::ClassificationError(_)));
    }

    #[test]
    fn unknown_edit_type_is_typed_error() {
        let raw = RawDecision {
            edit_type: Some("HOLOGRAM_EDITING".into()),
            positive_prompt: Some("anything".into()),
            ..RawDecision::default()
        };
        let err = EditDecision::from_raw(raw).unwrap_err();
        match err {
            PipelineError::InvalidEditType(t) => assert_eq!(t, "HOLOGRAM_EDITING"),
            other => panic!("expected InvalidEditType, got {other:?}"),
        }
    }

    #[test]
    fn enum_wire_values_round_trip() {
        let json = serde_json::to_string(&EditMode::InpaintRemoval).unwrap();
        assert_eq!(json, r#""EDIT_MODE_INPAINT_REMOVAL""#);
        let json = serde_json::to_string(&ControlType::Canny).unwrap();
        assert_eq!(json, r#""CONTROL_TYPE_CANNY""#);
        let back: MaskMode = serde_json::from_str(r#""MASK_MODE_BACKGROUND""#).unwrap();
        assert_eq!(back, MaskMode::Background);
    }

    #[test]
    fn product_analysis_fills_subject_defaults() {
        let raw: RawProductAnalysis = serde_json::from_str(
            r#"{
                "images": [
                    {"subject_description": "a ceramic mug", "subject_type": "SUBJECT_TYPE_PRODUCT"},
                    {"subject_description": "a wooden coaster"}
                ],
                "positive_prompt": "a modern minimalist desk scene",
                "negative_prompt": "clutter"
            }"#,
        )
        .unwrap();
        let analysis = ProductAnalysis::from_raw(raw).unwrap();
        assert_eq!(analysis.images.len(), 2);
        assert_eq!(analysis.images[0].subject_type, SubjectType::Product);
        assert_eq!(analysis.images[1].subject_type, SubjectType::Default);
    }
}
