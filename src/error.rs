// Error types for the emotion overlay

use thiserror::Error;

/// Main error type for the emotion overlay
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Scaler loading failed: {0}")]
    ScalerLoad(String),

    #[error("Feature width mismatch: expected {expected}, got {actual}")]
    FeatureWidthMismatch { expected: usize, actual: usize },

    #[error("Invalid probabilities: {0}")]
    InvalidProbabilities(String),

    #[error("Landmark detection failed: {0}")]
    LandmarkDetection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for emotion overlay operations
pub type Result<T> = std::result::Result<T, OverlayError>;

// Conversion from ONNX Runtime errors
#[cfg(feature = "onnx")]
impl From<ort::Error> for OverlayError {
    fn from(err: ort::Error) -> Self {
        OverlayError::OnnxRuntime(err.to_string())
    }
}

impl From<ndarray::ShapeError> for OverlayError {
    fn from(err: ndarray::ShapeError) -> Self {
        OverlayError::FrameProcessing(format!("Tensor shape error: {err}"))
    }
}
