use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::edit::EditPayload;
use crate::error::PipelineError;
use crate::postprocess::AspectRatio;

/// Capability model behind every edit request.
const CAPABILITY_MODEL: &str = "imagen-3.0-capability-001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationModel {
    #[default]
    Imagen2,
    Imagen3,
}

impl GenerationModel {
    pub fn model_id(&self) -> &'static str {
        match self {
            GenerationModel::Imagen2 => "imagegeneration@006",
            GenerationModel::Imagen3 => "imagen-3.0-generate-001",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GenerationModel::Imagen2 => "Imagen 2",
            GenerationModel::Imagen3 => "Imagen 3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum UpscaleFactor {
    #[serde(rename = "x2")]
    X2,
    #[serde(rename = "x4")]
    X4,
}

impl UpscaleFactor {
    fn as_str(&self) -> &'static str {
        match self {
            UpscaleFactor::X2 => "x2",
            UpscaleFactor::X4 => "x4",
        }
    }
}

/// How far to upscale: an explicit output size or a fixed factor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpscaleTarget {
    NewSize(u32),
    UpscaleFactor(UpscaleFactor),
}

// ---- Prediction endpoint response ----

#[derive(Debug, Default, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub predictions: Option<Vec<Prediction>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Prediction {
    #[serde(rename = "bytesBase64Encoded", default)]
    pub bytes_base64_encoded: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

/// Converts a prediction list into raw image bytes, in response order.
/// Entries without usable image data are skipped and logged; a response with
/// no predictions at all yields an empty list, never an error.
pub fn decode_predictions(response: &PredictResponse) -> Vec<Vec<u8>> {
    let Some(predictions) = &response.predictions else {
        warn!("⚠️ Response does not contain predictions");
        return Vec::new();
    };

    let mut images = Vec::with_capacity(predictions.len());
    for (idx, prediction) in predictions.iter().enumerate() {
        let Some(encoded) = &prediction.bytes_base64_encoded else {
            warn!("⚠️ Prediction at index {idx} does not contain image bytes, skipping");
            continue;
        };
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => {
                info!(
                    "🎯 Decoded prediction {idx} ({})",
                    prediction.mime_type.as_deref().unwrap_or("unknown mime type")
                );
                images.push(bytes);
            }
            Err(e) => warn!("⚠️ Prediction at index {idx} is not valid base64 ({e}), skipping"),
        }
    }
    images
}

// ---- Client ----

pub struct ImagenClient {
    client: Client,
    base_url: String,
    project_id: String,
    region: String,
    access_token: String,
}

impl ImagenClient {
    pub fn new(project_id: String, region: String, access_token: String) -> Self {
        let base_url = std::env::var("IMAGEN_API_BASE")
            .unwrap_or_else(|_| format!("https://{region}-aiplatform.googleapis.com"));
        Self { client: Client::new(), base_url, project_id, region, access_token }
    }

    fn endpoint_uri(&self, model: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            self.base_url, self.project_id, self.region, model
        )
    }

    async fn predict(
        &self,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<PredictResponse, PipelineError> {
        let url = self.endpoint_uri(model);
        info!("🔗 Prediction request to model {model}");
        info!(
            "📤 Request body: {}",
            serde_json::to_string(&strip_image_bytes(body.clone())).unwrap_or_default()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::RemoteCallFailure(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {status}");
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(PipelineError::RemoteCallFailure(format!(
                "status={status} body={error_body}"
            )));
        }

        response
            .json::<PredictResponse>()
            .await
            .map_err(|e| PipelineError::RemoteCallFailure(format!("invalid response body: {e}")))
    }

    /// Submits an edit payload to the capability model and decodes the result.
    pub async fn edit(&self, payload: &EditPayload) -> Result<Vec<Vec<u8>>, PipelineError> {
        let body = serde_json::to_value(payload)
            .map_err(|e| PipelineError::BadRequest(format!("unserializable payload: {e}")))?;
        let response = self.predict(CAPABILITY_MODEL, &body).await?;
        let images = decode_predictions(&response);
        info!("✅ Edit produced {} image(s)", images.len());
        Ok(images)
    }

    /// Text-to-image generation against one model version.
    pub async fn generate(
        &self,
        model: GenerationModel,
        positive_prompt: &str,
        negative_prompt: &str,
        aspect_ratio: AspectRatio,
        sample_count: u32,
    ) -> Result<Vec<Vec<u8>>, PipelineError> {
        let body = json!({
            "instances": [{ "prompt": positive_prompt }],
            "parameters": {
                "negativePrompt": negative_prompt,
                "sampleCount": sample_count,
                "aspectRatio": aspect_ratio.as_str(),
            }
        });
        let response = self.predict(model.model_id(), &body).await?;
        let images = decode_predictions(&response);
        info!("✅ {} produced {} image(s)", model.label(), images.len());
        Ok(images)
    }

    /// Fans generation out to both model versions and awaits both. There is
    /// no partial-result handling: either failure fails the whole operation.
    pub async fn generate_pair(
        &self,
        positive_prompt: &str,
        negative_prompt: &str,
        aspect_ratio: AspectRatio,
        sample_count: u32,
    ) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), PipelineError> {
        let (imagen2, imagen3) = tokio::join!(
            self.generate(
                GenerationModel::Imagen2,
                positive_prompt,
                negative_prompt,
                aspect_ratio,
                sample_count
            ),
            self.generate(
                GenerationModel::Imagen3,
                positive_prompt,
                negative_prompt,
                aspect_ratio,
                sample_count
            ),
        );
        Ok((imagen2?, imagen3?))
    }

    /// Upscales one image through the same prediction endpoint.
    pub async fn upscale(
        &self,
        model: GenerationModel,
        image_bytes: &[u8],
        target: &UpscaleTarget,
    ) -> Result<Vec<u8>, PipelineError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let parameters = match target {
            UpscaleTarget::NewSize(size) => json!({
                "sampleCount": 1,
                "mode": "upscale",
                "sampleImageSize": size.to_string(),
            }),
            UpscaleTarget::UpscaleFactor(factor) => json!({
                "sampleCount": 1,
                "mode": "upscale",
                "upscaleConfig": { "upscaleFactor": factor.as_str() },
            }),
        };
        let body = json!({
            "instances": [{ "prompt": "", "image": { "bytesBase64Encoded": encoded } }],
            "parameters": parameters,
        });

        info!("*** start upscaling ***");
        let response = self.predict(model.model_id(), &body).await?;
        decode_predictions(&response).into_iter().next().ok_or_else(|| {
            PipelineError::RemoteCallFailure("upscale returned no image".into())
        })
    }
}

// Replaces every base64 image payload with a placeholder so request logging
// stays readable.
fn strip_image_bytes(mut value: serde_json::Value) -> serde_json::Value {
    fn walk(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    if key == "bytesBase64Encoded" {
                        *val = serde_json::Value::String("bytes".into());
                    } else {
                        walk(val);
                    }
                }
            }
            serde_json::Value::Array(arr) => arr.iter_mut().for_each(walk),
            _ => {}
        }
    }
    walk(&mut value);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn b64(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn decode_skips_entries_without_image_bytes() {
        let response: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                { "bytesBase64Encoded": b64(b"first"), "mimeType": "image/png" },
                { "bytesBase64Encoded": b64(b"second") },
                { "mimeType": "image/png" },
                { "bytesBase64Encoded": b64(b"fourth") },
            ]
        }))
        .unwrap();
        let images = decode_predictions(&response);
        assert_eq!(images.len(), 3);
        assert_eq!(images[0], b"first");
        assert_eq!(images[1], b"second");
        assert_eq!(images[2], b"fourth");
    }

    #[test]
    fn decode_without_predictions_key_is_empty_not_error() {
        let response: PredictResponse = serde_json::from_value(json!({})).unwrap();
        assert!(decode_predictions(&response).is_empty());
    }

    #[test]
    fn decode_skips_undecodable_base64() {
        let response: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                { "bytesBase64Encoded": "!!! not base64 !!!" },
                { "bytesBase64Encoded": b64(b"good") },
            ]
        }))
        .unwrap();
        let images = decode_predictions(&response);
        assert_eq!(images, vec![b"good".to_vec()]);
    }

    #[test]
    fn upscale_target_accepts_both_shapes() {
        let by_size: UpscaleTarget = serde_json::from_value(json!({ "new_size": 2048 })).unwrap();
        assert!(matches!(by_size, UpscaleTarget::NewSize(2048)));

        let by_factor: UpscaleTarget =
            serde_json::from_value(json!({ "upscale_factor": "x4" })).unwrap();
        assert!(matches!(by_factor, UpscaleTarget::UpscaleFactor(UpscaleFactor::X4)));
    }

    #[test]
    fn endpoint_uri_is_versioned_per_model() {
        let client = ImagenClient {
            client: Client::new(),
            base_url: "https://us-central1-aiplatform.googleapis.com".into(),
            project_id: "demo-project".into(),
            region: "us-central1".into(),
            access_token: "token".into(),
        };
        assert_eq!(
            client.endpoint_uri("imagen-3.0-capability-001"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo-project/locations/us-central1/publishers/google/models/imagen-3.0-capability-001:predict"
        );
    }

    #[test]
    fn strip_image_bytes_replaces_payloads() {
        let value = json!({
            "instances": [{
                "referenceImages": [
                    { "referenceImage": { "bytesBase64Encoded": "AAAA" } }
                ]
            }]
        });
        let stripped = strip_image_bytes(value);
        assert_eq!(
            stripped["instances"][0]["referenceImages"][0]["referenceImage"]["bytesBase64Encoded"],
            "bytes"
        );
    }
}
