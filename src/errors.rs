use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device transport error: {0}")]
    Transport(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Screenshot decode error: {0}")]
    Decode(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type TapClawResult<T> = Result<T, TapClawError>;
