//! Error types for Shipyard.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("checkout failed: {0}")]
    Checkout(String),

    #[error("provisioning {kind} failed: {message}")]
    Provisioning { kind: ResourceKind, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn provisioning(kind: ResourceKind, message: impl Into<String>) -> Self {
        Self::Provisioning {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Classification(_) => ErrorKind::Classification,
            Error::Checkout(_) => ErrorKind::Checkout,
            Error::Provisioning { .. } => ErrorKind::Provisioning,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Build(_) => ErrorKind::Build,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse error category, used in structured logs and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[display("validation")]
    Validation,
    #[display("classification")]
    Classification,
    #[display("checkout")]
    Checkout,
    #[display("provisioning")]
    Provisioning,
    #[display("timeout")]
    Timeout,
    #[display("build")]
    Build,
    #[display("internal")]
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;
