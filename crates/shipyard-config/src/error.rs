//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("invalid request document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("unsupported framework: {0}")]
    UnsupportedFramework(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for shipyard_core::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnsupportedFramework(_) => Self::Classification(err.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
