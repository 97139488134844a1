use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("classification error: {0}")]
    ClassificationError(String),
    #[error("invalid edit type: {0}")]
    InvalidEditType(String),
    #[error("remote call failed: {0}")]
    RemoteCallFailure(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    fn status(&self) -> StatusCode {
        match self {
            PipelineError::MalformedResponse(_) | PipelineError::ClassificationError(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::InvalidEditType(_) | PipelineError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::RemoteCallFailure(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Image(_) | PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Every failure returns control to the interactive caller as a JSON message;
// nothing here terminates the process.
impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!("❌ {}", self);
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
