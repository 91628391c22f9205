pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;

pub use config::{DetectorConfig, EngineConfig};
pub use detection::{build_standard_pipeline, CardDetector};
pub use engine::{Engine, EngineEvent, EngineSnapshot, FileProcessor, InputFile};
pub use error::{ConfigError, DetectionError, EngineError};
pub use models::{
    BackgroundType, Bounds, CardCondition, DetectedCard, DetectionDebugInfo, DetectionReport, Point, Strategy,
};
pub use pipeline::{DebugConfig, Pipeline, PipelineContext, PipelineData, PipelineStep, StepOutcome};
