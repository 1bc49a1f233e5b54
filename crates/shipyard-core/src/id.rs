//! Deployment and project identifiers.
//!
//! Both are opaque strings issued by the API layer. They end up inside cloud
//! resource names and tags, so only ASCII alphanumerics, `-` and `_` are
//! accepted.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn check_id(label: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::Validation(format!("{label} must not be empty")));
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::Validation(format!(
            "{label} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Identifier of one deployment attempt. Also the idempotency and rollback key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        check_id("deployment id", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeploymentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeploymentId> for String {
    fn from(id: DeploymentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for DeploymentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Identifier of the project a deployment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        check_id("project id", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used for every per-project cloud resource name.
    pub fn resource_prefix(&self) -> String {
        self.0.to_ascii_lowercase().replace('_', "-")
    }
}

impl TryFrom<String> for ProjectId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ProjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
