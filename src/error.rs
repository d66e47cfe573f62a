use std::fmt::Display;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Candle error: {0}")]
    CandleError(#[from] candle_core::Error),
    #[error("ONNX Runtime error: {0}")]
    OrtError(String),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Json deser error: {0}")]
    JsonDeserError(#[from] serde_json::Error),
    #[error("Yaml deser error: {0}")]
    YamlDeserError(#[from] serde_yaml::Error),
    #[error("Hugging Face Hub error: {0}")]
    ApiError(#[from] hf_hub::api::sync::ApiError),
    #[error("unexpected model output: {0}")]
    ModelOutput(String),
}

impl DetectError {
    /// wrap any ort error (builder, session or value) by its message
    pub fn ort(err: impl Display) -> Self {
        Self::OrtError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
