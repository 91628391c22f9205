mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from cardscan for tests
pub use cardscan::engine::{ItemStatus, ProcessorFactory};
pub use cardscan::models::{Point, RectGeometry, Strategy};
pub use cardscan::{
    Bounds, CardDetector, DetectedCard, DetectionError, DetectorConfig, Engine, EngineConfig, EngineEvent,
    FileProcessor, InputFile,
};
