use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::PipelineError;
use crate::fence::extract_json_value;
use crate::models::{EditDecision, ProductAnalysis, PromptPair, RawDecision, RawProductAnalysis};

const CLASSIFIER_MODEL: &str = "gemini-1.5-flash";

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100
                            && s.chars().all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
                        {
                            *val = Value::String(format!(
                                "{}...[truncated {} chars]",
                                &s[..50],
                                s.len() - 50
                            ));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

/// Fixed reinterpretation templates the analyze tab offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReinterpretOption {
    #[default]
    KeepOriginal,
    DescriptiveNarration,
    KeywordFocus,
    DetailedSpecifications,
    CopyrightConsiderations,
    UserInput,
}

impl ReinterpretOption {
    fn instruction(&self) -> Option<&'static str> {
        match self {
            ReinterpretOption::KeepOriginal => Some(
                "When generating the image, please adhere to the following guidelines:\n\
                 1. Maintain the original sentence structure and expression as much as possible.\n\
                 2. Minimize unnecessary additional explanations or modifiers.\n\
                 3. Accurately reflect the original context and intent.\n\
                 4. Add only essential details for image generation.",
            ),
            ReinterpretOption::DescriptiveNarration => Some(
                "Please reconstruct the original text in detail, following these guidelines:\n\
                 1. Specifically describe the overall atmosphere and emotion of the scene.\n\
                 2. Describe the appearance, texture, and condition of the elements in detail.\n\
                 3. Add descriptions that express a sense of space and perspective.\n\
                 4. Include environmental elements such as lighting, shadows, and time of day.\n\
                 5. Appropriately utilize sensory and metaphorical expressions.",
            ),
            ReinterpretOption::KeywordFocus => Some(
                "Please reconstruct the prompt focusing on the following elements from the original text:\n\
                 1. Extract the core subjects/objects.\n\
                 2. Identify key actions and states.\n\
                 3. Identify important background elements.\n\
                 4. Select key modifiers that determine the atmosphere.\n\
                 5. Clearly state the relationships between each keyword.\n\
                 Connect the extracted keywords naturally to construct the prompt.",
            ),
            ReinterpretOption::DetailedSpecifications => Some(
                "Please construct the prompt including the following technical specifications:\n\
                 [Style Specifications] image style, art style, rendering style (name a concrete \
                 artist/artwork style instead of a broad term like \"oil painting\").\n\
                 [Camera/Composition Specifications] shooting angle, focal length, distance.\n\
                 [Image Quality Specifications] resolution, level of detail, noise/grain.\n\
                 [Color/Lighting Specifications] dominant color, lighting style, contrast.",
            ),
            ReinterpretOption::CopyrightConsiderations => Some(
                "Please generate a copyright-aware prompt according to the following guidelines:\n\
                 1. Brands/logos: specific names become general form descriptions.\n\
                 2. Characters: proper names become general characteristic descriptions.\n\
                 3. Trademarks/designs: specific product names become product type and features.\n\
                 4. Artworks: specific artwork names become style and theme descriptions.\n\
                 5. Violent or gore-like content: keep only the feeling of the image and drop \
                 the specific event descriptions.\n\
                 6. Overly broad drawing styles: specify a particular artist or artwork style.",
            ),
            ReinterpretOption::UserInput => None,
        }
    }
}

const CLASSIFY_INSTRUCTION_HEADER: &str = "\
You're an advertising professional utilizing Imagen for ad creation.
Generate an English Imagen prompt that will transform the provided image to meet the user's specifications.
";

const CLASSIFY_INSTRUCTION_TASKS: &str = r#"
<instructions>

<task1> Analyze the original photo and write a detailed description of it (within 60 tokens). Store it in org_image_description. </task1>

<task2> Identify and describe the most central object in the original photo (within 20 tokens). Store it in main_object_description. </task2>

<task3> Analyze the user request and identify the edit type:
* SUBJECT_EDITING: Keep the main object but change its position or background.
* STYLE_EDITING: Generate an image with the given style image.
* CONTROLLED_EDITING: Maintain the overall image composition but change color, tone, or convert an edge/scribble map to a photo.
* INSTRUCT_EDITING: Change the overall image composition and art/cartoon style, or make a very significant change to a main object.
* RAW_EDITING: Change a main object or the background directly via the prompt.
The value of edit_type MUST be one of [RAW_EDITING, SUBJECT_EDITING, STYLE_EDITING, CONTROLLED_EDITING, INSTRUCT_EDITING]. </task3>

<task4> Determine the edit mode based on the user request:
EDIT_MODE_INPAINT_INSERTION: Add to or change the main object or background.
EDIT_MODE_INPAINT_REMOVAL: Remove the main object or background.
EDIT_MODE_OUTPAINT: Extend the background.
NONE: Apply changes to the entire image.
Store this in edit_mode. </task4>

<task5> Determine the mask mode:
NONE: No mask needed.
MASK_MODE_FOREGROUND: Mask the main object for edits focused on it.
MASK_MODE_BACKGROUND: Mask the background for edits focused on it.
Store this in mask_mode. </task5>

<task6> Determine the subject type for SUBJECT_EDITING. The value of subject_type MUST be one of [SUBJECT_TYPE_PERSON, SUBJECT_TYPE_ANIMAL, SUBJECT_TYPE_PRODUCT, SUBJECT_TYPE_DEFAULT]. </task6>

<task7> Write an Imagen positive_prompt in English describing the final desired image, referencing reference images by id (e.g. "the girl [1]") where appropriate (within 120 tokens). List important forbidden keywords in negative_prompt (within 60 tokens). </task7>

<task8> guidance_scale indicates the degree of influence the prompt has on the image. Use about 1.0 when modifying the foreground and up to 20.0 for significant background changes. </task8>

<task9> mask_dilation determines how much of the original image is reflected in the result. Use 0.005 for minimal modifications and up to 0.03 for significant alterations. </task9>

<task10> control_type describes the given image when it is a structural guide. The value MUST be one of [CONTROL_TYPE_SCRIBBLE, CONTROL_TYPE_CANNY]; use CONTROL_TYPE_SCRIBBLE when unsure. </task10>

<task11> All outputs should be in English. </task11>

<task12> Please DO NOT REPEAT the same words in the negative prompt. </task12>

</instructions>

<output>
{
  "org_image_description" : ...,
  "main_object_description" : ...,
  "edit_type" : ...,
  "edit_mode" : ...,
  "mask_mode" : ...,
  "subject_type" : ...,
  "positive_prompt" : ...,
  "negative_prompt" : ...,
  "guidance_scale" : ...,
  "mask_dilation" : ...,
  "control_type" : ...
}
</output>
"#;

const PRODUCT_INSTRUCTION: &str = r#"
You are an advertising specialist composing product images with Imagen.
Analyze the given product photos and write an English Imagen prompt for a background matching the user request.

<instructions>
<task1> For each given image, analyze:
- a detailed description of the main product/object (subject_description)
- the product/object type (subject_type: one of SUBJECT_TYPE_PERSON, SUBJECT_TYPE_ANIMAL, SUBJECT_TYPE_PRODUCT, SUBJECT_TYPE_DEFAULT) </task1>
<task2> Analyze the common characteristics and differences of the products. </task2>
<task3> Analyze the user request and write a positive_prompt for the background image (English, within 120 tokens). </task3>
<task4> Write a negative_prompt for elements that would degrade image quality (English, within 60 tokens). </task4>
</instructions>

<output>
{
  "images": [
    {
      "subject_description": "detailed description of the product/object",
      "subject_type": "SUBJECT_TYPE_XXX"
    },
    ...
  ],
  "positive_prompt": "detailed prompt for the background image",
  "negative_prompt": "prompt for elements to avoid"
}
</output>
"#;

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let base_url = std::env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Self { client: Client::new(), api_key, base_url }
    }

    async fn generate_content(
        &self,
        parts: Vec<Value>,
        generation_config: Value,
    ) -> Result<String, PipelineError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, CLASSIFIER_MODEL, self.api_key
        );
        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let request_body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": generation_config,
        });
        let mut loggable = request_body.clone();
        truncate_base64_in_json(&mut loggable);
        info!("📤 Request body: {}", serde_json::to_string(&loggable).unwrap_or_default());

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| PipelineError::RemoteCallFailure(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API error response: {}", error_body);
            return Err(PipelineError::RemoteCallFailure(format!(
                "status={status} body={error_body}"
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| PipelineError::RemoteCallFailure(e.to_string()))?;
        let parsed: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            PipelineError::RemoteCallFailure(format!("unparseable model response: {e}"))
        })?;

        if let Some(candidate) = parsed.candidates.first() {
            for part in &candidate.content.parts {
                if let Part::Text { text } = part {
                    return Ok(text.clone());
                }
            }
        }
        Err(PipelineError::MalformedResponse("no text content in model response".into()))
    }

    /// One blocking round trip that turns (images, goal) into an [`EditDecision`].
    /// An empty goal still yields a best-effort decision; missing response
    /// fields fall back to the documented defaults.
    pub async fn classify_edit(
        &self,
        images_b64: &[String],
        goal: &str,
    ) -> Result<EditDecision, PipelineError> {
        if images_b64.is_empty() {
            return Err(PipelineError::BadRequest("at least one image is required".into()));
        }

        let mut parts = image_parts(images_b64);
        parts.push(json!({
            "text": format!(
                "{CLASSIFY_INSTRUCTION_HEADER}\nUser Request: {goal}\n{CLASSIFY_INSTRUCTION_TASKS}"
            )
        }));

        let text = self
            .generate_content(
                parts,
                json!({
                    "maxOutputTokens": 4192,
                    "temperature": 0.6,
                    "topP": 0.93,
                    "topK": 32
                }),
            )
            .await?;

        let value = extract_json_value(&text)?;
        let raw: RawDecision = serde_json::from_value(value)
            .map_err(|e| PipelineError::ClassificationError(format!("unexpected shape: {e}")))?;
        let decision = EditDecision::from_raw(raw)?;
        info!("✅ Classified edit intent: {:?}", decision.edit_type);
        Ok(decision)
    }

    /// Per-image subject analysis plus a background prompt pair for the
    /// multi-product flow.
    pub async fn analyze_products(
        &self,
        images_b64: &[String],
        goal: &str,
    ) -> Result<ProductAnalysis, PipelineError> {
        if images_b64.is_empty() {
            return Err(PipelineError::BadRequest("at least one image is required".into()));
        }

        let mut parts = image_parts(images_b64);
        parts.push(json!({ "text": format!("User request: {goal}\n{PRODUCT_INSTRUCTION}") }));

        let text = self
            .generate_content(
                parts,
                json!({
                    "maxOutputTokens": 2048,
                    "temperature": 0.5,
                    "topP": 0.93,
                    "topK": 32
                }),
            )
            .await?;

        let value = extract_json_value(&text)?;
        let raw: RawProductAnalysis = serde_json::from_value(value)
            .map_err(|e| PipelineError::ClassificationError(format!("unexpected shape: {e}")))?;
        ProductAnalysis::from_raw(raw)
    }

    /// Rewrites a free-text prompt into a positive/negative pair using one of
    /// the fixed instruction templates.
    pub async fn reinterpret(
        &self,
        prompt: &str,
        option: ReinterpretOption,
        custom_instruction: Option<&str>,
    ) -> Result<PromptPair, PipelineError> {
        let instruction = match option.instruction() {
            Some(fixed) => fixed,
            None => custom_instruction.ok_or_else(|| {
                PipelineError::BadRequest("user_input option requires an instruction".into())
            })?,
        };

        let template = format!(
            "You are an advertising specialist using Imagen to create advertising images.\n\
             Analyze the given user prompt and transform it into a well-formed prompt suitable for Imagen.\n\
             The output should be in JSON format and must contain two keys: \"positive\" and \"negative\". \
             All results must be generated in English.\n\n\
             Based on the detailed instructions, generate the output.\n\n\
             <User Prompt>\n{prompt}\n</User Prompt>\n\n\
             <Detailed Instructions>\n{instruction}\n</Detailed Instructions>"
        );

        let text = self
            .generate_content(
                vec![json!({ "text": template })],
                json!({
                    "maxOutputTokens": 2048,
                    "temperature": 0.8,
                    "topP": 0.95,
                    "topK": 32
                }),
            )
            .await?;

        let value = extract_json_value(&text)?;
        serde_json::from_value(value)
            .map_err(|e| PipelineError::MalformedResponse(format!("unexpected shape: {e}")))
    }
}

fn image_parts(images_b64: &[String]) -> Vec<Value> {
    images_b64
        .iter()
        .map(|data| json!({ "inlineData": { "mimeType": "image/png", "data": data } }))
        .collect()
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Other(Value),
}
