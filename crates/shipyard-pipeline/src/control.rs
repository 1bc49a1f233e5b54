//! HTTP client for the external control plane.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use shipyard_core::report::{ControlPlane, LogRecord, ProjectStatusUpdate, StatusUpdate};
use shipyard_core::{DeploymentId, Error, ProjectId, Result};
use std::time::Duration;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Heartbeat<'a> {
    deployment_id: &'a DeploymentId,
    project_id: &'a ProjectId,
    status: &'static str,
    timestamp: chrono::DateTime<Utc>,
}

/// Control plane reached over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        })
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &T,
    ) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("{path}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "{path}: control plane returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn append_log(&self, record: &LogRecord) -> Result<()> {
        self.send(reqwest::Method::POST, "/api/logs", record).await
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<()> {
        let path = format!("/api/deployments/{}/status", update.deployment_id);
        self.send(reqwest::Method::POST, &path, update).await
    }

    async fn update_project(&self, update: &ProjectStatusUpdate) -> Result<()> {
        let path = format!("/api/projects/{}", update.project_id);
        self.send(reqwest::Method::PUT, &path, update).await
    }

    async fn heartbeat(&self, deployment_id: &DeploymentId, project_id: &ProjectId) -> Result<()> {
        let body = Heartbeat {
            deployment_id,
            project_id,
            status: "healthy",
            timestamp: Utc::now(),
        };
        self.send(reqwest::Method::POST, "/api/health", &body).await
    }
}
