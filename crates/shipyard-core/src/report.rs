//! Status and log payloads sent to the external control plane.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentStatus;
use crate::{DeploymentId, ProjectId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Append-log call payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub deployment_id: DeploymentId,
    pub project_id: ProjectId,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

/// Status-update call payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub deployment_id: DeploymentId,
    pub project_id: ProjectId,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl StatusUpdate {
    pub fn new(
        deployment_id: DeploymentId,
        project_id: ProjectId,
        status: DeploymentStatus,
    ) -> Self {
        Self {
            deployment_id,
            project_id,
            status,
            url: None,
            error: None,
            framework: None,
            database: None,
        }
    }
}

/// Project-level outcome of a finished deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Deployed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusUpdate {
    pub project_id: ProjectId,
    pub status: ProjectState,
    pub url: Option<String>,
    pub error: Option<String>,
    pub last_deployment: DateTime<Utc>,
}

/// Trait for the external control plane receiving pipeline events.
///
/// Each call is a single best-effort attempt; callers log failures and move on.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Name of this control plane client.
    fn name(&self) -> &'static str;

    async fn append_log(&self, record: &LogRecord) -> Result<()>;

    async fn update_status(&self, update: &StatusUpdate) -> Result<()>;

    async fn update_project(&self, update: &ProjectStatusUpdate) -> Result<()>;

    async fn heartbeat(&self, deployment_id: &DeploymentId, project_id: &ProjectId) -> Result<()>;
}
