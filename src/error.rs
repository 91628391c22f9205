//! Error types for detection, the batch engine and configuration loading.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Input contains no bytes")]
    EmptyInput,

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image too small for card detection: {width}x{height}")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("Pipeline step ran before its input was produced: missing {0}")]
    MissingStage(&'static str),

    #[error("Failed to write debug output: {0}")]
    DebugOutput(String),

    #[error("Invalid detector configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Worker pool failed to start: {0}")]
    WorkerInit(#[source] std::io::Error),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Processing is active")]
    ProcessingActive,

    #[error("Engine orchestrator is no longer running")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}
