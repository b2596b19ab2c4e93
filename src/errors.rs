use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the disc analysis pipeline.
///
/// Each variant carries the context of its error domain (filesystem, image processing,
/// model inference, request input) so the request boundary can decide what reaches the
/// caller without parsing strings.
#[derive(Error, Debug)]
pub enum SpineDiscError {
    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model unavailable: {model}")]
    ModelUnavailable { model: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Invalid disc crop (rank {rank}): {reason}")]
    InvalidCrop { rank: usize, reason: String },

    #[error("No overlay outline found: {reason}")]
    OverlayNotFound { reason: String },

    #[error("Pipeline stage panicked: {message}")]
    Panicked { message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SpineDiscError>;

/// How a failure is reported to whoever submitted the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The upload itself was unusable; nothing ran.
    ClientError,
    /// The pipeline could not complete.
    ProcessingFailure,
}

impl SpineDiscError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput { .. } => FailureKind::ClientError,
            _ => FailureKind::ProcessingFailure,
        }
    }

    /// Single descriptive message that is safe to hand to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput { reason } => reason.clone(),
            Self::ModelUnavailable { .. } => "Failed to process the image: model unavailable".to_string(),
            Self::OverlayNotFound { .. } => "Failed to process the image: no disc outlines found in overlay".to_string(),
            _ => "Failed to process the image".to_string(),
        }
    }
}

/// I/O errors without path context. Callers that know the path construct
/// `SpineDiscError::FileSystem` directly.
impl From<std::io::Error> for SpineDiscError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SpineDiscError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SpineDiscError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: err.to_string().into(),
        }
    }
}

/// Shape errors only come out of tensor plumbing around inference.
impl From<ndarray::ShapeError> for SpineDiscError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
