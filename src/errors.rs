use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate state name: {0}")]
    DuplicateState(String),

    #[error("State '{0}' has no detection patterns")]
    EmptyPatterns(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Diagnostics error: {0}")]
    Diagnostics(String),

    #[error("Giving up after {count} consecutive cycle failures")]
    TooManyFailures { count: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl BotError {
    /// Registry misconfiguration; the process must not enter the run loop.
    pub fn is_registration_error(&self) -> bool {
        matches!(self, BotError::DuplicateState(_) | BotError::EmptyPatterns(_))
    }
}

pub type BotResult<T> = Result<T, BotError>;
