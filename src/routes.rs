use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use uuid::Uuid;

use crate::edit::{build_edit_payload, build_product_payload};
use crate::error::PipelineError;
use crate::gemini::GeminiClient;
use crate::imagen::{GenerationModel, ImagenClient};
use crate::models::{
    AnalyzeRequest, AnalyzeResponse, ClassifyRequest, EditDecision, EditRequestBody, EditResponse,
    EditType, ImageKind, ImageSummary, ProductAnalysis, ProductRequest, ProductResponse,
    ResizeRequest, StoredImage, UploadRequest, UploadResponse, UpscaleRequest,
};
use crate::postprocess::{resize_and_clip, ResolutionPolicy};

/// Images generated per model version on the analyze tab.
const GENERATION_SAMPLES: u32 = 2;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<HashMap<Uuid, StoredImage>>>,
    pub gemini: Arc<GeminiClient>,
    pub imagen: Arc<ImagenClient>,
    pub work_dir: Arc<PathBuf>,
}

impl AppState {
    fn lookup(&self, id: Uuid) -> Result<StoredImage, PipelineError> {
        self.store
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::BadRequest(format!("unknown image id {id}")))
    }

    fn lookup_all(&self, ids: &[Uuid]) -> Result<Vec<StoredImage>, PipelineError> {
        ids.iter().map(|id| self.lookup(*id)).collect()
    }

    /// Every user action owns its own directory of temporaries.
    fn request_dir(&self) -> Result<PathBuf, PipelineError> {
        let dir = self.work_dir.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn insert(&self, img: StoredImage) -> StoredImage {
        self.store.write().insert(img.id, img.clone());
        img
    }

    /// Writes result bytes to disk and registers them in the store.
    fn persist(
        &self,
        path: PathBuf,
        bytes: Vec<u8>,
        kind: ImageKind,
    ) -> Result<StoredImage, PipelineError> {
        let decoded = image::load_from_memory(&bytes)?;
        std::fs::write(&path, &bytes)?;
        Ok(self.insert(StoredImage {
            id: Uuid::new_v4(),
            path,
            data: Bytes::from(bytes),
            width: decoded.width(),
            height: decoded.height(),
            kind,
            created_at: Utc::now(),
        }))
    }

    /// Registers a file some other step already wrote.
    fn register_file(&self, path: PathBuf, kind: ImageKind) -> Result<StoredImage, PipelineError> {
        let bytes = std::fs::read(&path)?;
        let decoded = image::load_from_memory(&bytes)?;
        Ok(self.insert(StoredImage {
            id: Uuid::new_v4(),
            path,
            data: Bytes::from(bytes),
            width: decoded.width(),
            height: decoded.height(),
            kind,
            created_at: Utc::now(),
        }))
    }
}

fn encode_stored(images: &[StoredImage]) -> Vec<String> {
    images
        .iter()
        .map(|img| base64::engine::general_purpose::STANDARD.encode(&img.data))
        .collect()
}

pub async fn upload_image(
    State(state): State<AppState>,
    Json(body): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, PipelineError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.bytes_base64.as_bytes())
        .map_err(|e| PipelineError::BadRequest(format!("invalid base64 image data: {e}")))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| PipelineError::BadRequest(format!("not a decodable image: {e}")))?;

    let uploads = state.work_dir.join("uploads");
    std::fs::create_dir_all(&uploads)?;
    let id = Uuid::new_v4();
    let name = body.filename.unwrap_or_else(|| "upload.png".into());
    let path = uploads.join(format!("{id}_{name}"));
    std::fs::write(&path, &bytes)?;

    tracing::info!("🚀 Uploaded {} ({}x{})", path.display(), decoded.width(), decoded.height());

    let img = state.insert(StoredImage {
        id,
        path,
        data: Bytes::from(bytes),
        width: decoded.width(),
        height: decoded.height(),
        kind: ImageKind::Uploaded,
        created_at: Utc::now(),
    });
    Ok(Json(UploadResponse { id: img.id, width: img.width, height: img.height }))
}

pub async fn get_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    if let Some(img) = state.store.read().get(&id) {
        ([(header::CONTENT_TYPE, "image/png")], img.data.clone()).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Prompt reinterpretation followed by concurrent generation against both
/// model versions. Either remote failure fails the whole call.
pub async fn analyze_prompt(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, PipelineError> {
    tracing::info!("🎯 Reinterpreting prompt with option {:?}", body.option);
    let pair = state
        .gemini
        .reinterpret(&body.prompt, body.option, body.instruction.as_deref())
        .await?;

    let (imagen2, imagen3) = state
        .imagen
        .generate_pair(&pair.positive, &pair.negative, body.aspect_ratio, GENERATION_SAMPLES)
        .await?;

    let dir = state.request_dir()?;
    let mut summaries = Vec::new();
    let labeled = imagen2
        .into_iter()
        .map(|b| (GenerationModel::Imagen2.label(), b))
        .chain(imagen3.into_iter().map(|b| (GenerationModel::Imagen3.label(), b)));
    for (idx, (label, bytes)) in labeled.enumerate() {
        let raw =
            state.persist(dir.join(format!("result_{idx}.png")), bytes, ImageKind::Generated)?;
        // Results are shown at a uniform display resolution.
        let resized = resize_and_clip(
            &raw.path,
            &dir.join(format!("resized_result_{idx}.png")),
            body.aspect_ratio,
            ResolutionPolicy::default(),
        )?;
        let stored = state.register_file(resized.path, ImageKind::Resized)?;
        summaries.push(ImageSummary::with_model(&stored, label));
    }

    tracing::info!("✅ Analyze produced {} image(s)", summaries.len());
    Ok(Json(AnalyzeResponse {
        positive: pair.positive,
        negative: pair.negative,
        images: summaries,
    }))
}

pub async fn classify_edit(
    State(state): State<AppState>,
    Json(body): Json<ClassifyRequest>,
) -> Result<Json<EditDecision>, PipelineError> {
    let images = state.lookup_all(&body.image_ids)?;
    let decision = state.gemini.classify_edit(&encode_stored(&images), &body.goal).await?;
    Ok(Json(decision))
}

pub async fn edit_image(
    State(state): State<AppState>,
    Json(body): Json<EditRequestBody>,
) -> Result<Json<EditResponse>, PipelineError> {
    let decision = EditDecision::from_raw(body.decision)?;
    let sources = state.lookup_all(&body.image_ids)?;
    let paths: Vec<PathBuf> = sources.iter().map(|img| img.path.clone()).collect();

    tracing::info!(
        "🎯 Building {:?} request with {} reference image(s)",
        decision.edit_type,
        paths.len()
    );
    let payload = build_edit_payload(&decision, &paths, &body.overrides)?;
    let results = state.imagen.edit(&payload).await?;

    let dir = state.request_dir()?;
    let mut summaries = Vec::new();
    for (idx, bytes) in results.into_iter().enumerate() {
        let stored =
            state.persist(dir.join(format!("result_{idx}.png")), bytes, ImageKind::Edited)?;
        summaries.push(ImageSummary::of(&stored));
    }

    // The controlled variant cleans its source temporaries up after use;
    // best-effort only, the in-memory copies stay fetchable.
    if decision.edit_type == EditType::ControlledEditing {
        for img in &sources {
            if img.kind == ImageKind::Uploaded {
                let _ = std::fs::remove_file(&img.path);
            }
        }
    }

    tracing::info!("✅ Edit produced {} image(s)", summaries.len());
    Ok(Json(EditResponse { images: summaries }))
}

pub async fn product_background(
    State(state): State<AppState>,
    Json(body): Json<ProductRequest>,
) -> Result<Json<ProductResponse>, PipelineError> {
    let sources = state.lookup_all(&body.image_ids)?;
    let analysis = match body.analysis {
        // The caller edited the analysis; skip the classification round trip.
        Some(raw) => ProductAnalysis::from_raw(raw)?,
        None => state.gemini.analyze_products(&encode_stored(&sources), &body.goal).await?,
    };

    let paths: Vec<PathBuf> = sources.iter().map(|img| img.path.clone()).collect();
    let payload = build_product_payload(&analysis, &paths, &body.overrides)?;
    let results = state.imagen.edit(&payload).await?;

    let dir = state.request_dir()?;
    let mut summaries = Vec::new();
    for (idx, bytes) in results.into_iter().enumerate() {
        let stored =
            state.persist(dir.join(format!("result_{idx}.png")), bytes, ImageKind::Edited)?;
        summaries.push(ImageSummary::of(&stored));
    }

    tracing::info!("✅ Product edit produced {} image(s)", summaries.len());
    Ok(Json(ProductResponse { analysis, images: summaries }))
}

pub async fn upscale_image(
    State(state): State<AppState>,
    Json(body): Json<UpscaleRequest>,
) -> Result<Json<ImageSummary>, PipelineError> {
    let source = state.lookup(body.image_id)?;
    let bytes = state.imagen.upscale(body.model, &source.data, &body.target).await?;

    let dir = state.request_dir()?;
    let name = source
        .path
        .file_name()
        .map(|n| format!("upscaled_{}", n.to_string_lossy()))
        .unwrap_or_else(|| "upscaled_result_0.png".into());
    let stored = state.persist(dir.join(name), bytes, ImageKind::Upscaled)?;
    Ok(Json(ImageSummary::of(&stored)))
}

pub async fn resize_image(
    State(state): State<AppState>,
    Json(body): Json<ResizeRequest>,
) -> Result<Json<ImageSummary>, PipelineError> {
    let source = state.lookup(body.image_id)?;
    let dir = state.request_dir()?;
    let name = source
        .path
        .file_name()
        .map(|n| format!("resized_{}", n.to_string_lossy()))
        .unwrap_or_else(|| "resized_result_0.png".into());

    let resized = resize_and_clip(&source.path, &dir.join(name), body.aspect_ratio, body.policy)?;
    let stored = state.register_file(resized.path, ImageKind::Resized)?;
    Ok(Json(ImageSummary::of(&stored)))
}
