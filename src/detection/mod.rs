pub mod engine;

pub use engine::{DetectionEngine, DetectionResult};
