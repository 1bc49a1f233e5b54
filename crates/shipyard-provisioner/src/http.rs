//! HTTP provisioning gateway client.
//!
//! The gateway fronts the real cloud account and exposes one JSON endpoint per
//! provider call. Status codes map onto [`ProviderError`]: `409` is an
//! existing resource, `404` a missing one.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use shipyard_core::DeploymentId;
use shipyard_core::provider::{
    CloudProvider, ObjectUpload, ProviderError, ProviderResult, RegistryCredentials, ResourceSpec,
    TargetHealth,
};
use shipyard_core::resource::{ResourceHandle, ResourceKind, ResourceRecord};
use shipyard_core::secret::SecretValue;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct CreateRequest<'a> {
    spec: &'a ResourceSpec,
    owner: &'a DeploymentId,
}

#[derive(Serialize)]
struct UpdateServiceRequest<'a> {
    task_definition: &'a str,
}

#[derive(Serialize)]
struct WebsiteRequest<'a> {
    index_document: &'a str,
    error_document: &'a str,
}

#[derive(serde::Deserialize)]
struct WebsiteResponse {
    endpoint: String,
}

/// Cloud provider backed by a provisioning gateway.
#[derive(Debug, Clone)]
pub struct HttpCloudProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCloudProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn resource_path(kind: ResourceKind, name: &str) -> String {
        format!("/resources/{}/{}", kind, urlencoding::encode(name))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    /// Turn a non-success response into the matching provider error.
    async fn check(
        response: Response,
        kind: ResourceKind,
        name: &str,
    ) -> ProviderResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(%status, kind = %kind, name, body = %body, "Gateway request failed");
        Err(match status {
            StatusCode::CONFLICT => ProviderError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            StatusCode::NOT_FOUND => ProviderError::NotFound {
                kind,
                name: name.to_string(),
            },
            _ if body.is_empty() => ProviderError::Rejected(format!("{kind} {name}: {status}")),
            _ => ProviderError::Rejected(format!("{kind} {name}: {status}: {body}")),
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> ProviderResult<T> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("invalid gateway response: {e}")))
    }
}

#[async_trait]
impl CloudProvider for HttpCloudProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(
        &self,
        spec: &ResourceSpec,
        owner: &DeploymentId,
    ) -> ProviderResult<ResourceRecord> {
        let request = self
            .client
            .post(self.url("/resources"))
            .json(&CreateRequest { spec, owner });
        let response = self.send(request).await?;
        let response = Self::check(response, spec.kind(), spec.name()).await?;
        Self::json(response).await
    }

    async fn describe(&self, kind: ResourceKind, name: &str) -> ProviderResult<ResourceRecord> {
        let request = self.client.get(self.url(&Self::resource_path(kind, name)));
        let response = Self::check(self.send(request).await?, kind, name).await?;
        Self::json(response).await
    }

    async fn delete(&self, handle: &ResourceHandle) -> ProviderResult<()> {
        let request = self
            .client
            .delete(self.url(&Self::resource_path(handle.kind, &handle.name)));
        Self::check(self.send(request).await?, handle.kind, &handle.name).await?;
        Ok(())
    }

    async fn list_owned_by(&self, owner: &DeploymentId) -> ProviderResult<Vec<ResourceRecord>> {
        let request = self
            .client
            .get(self.url("/resources"))
            .query(&[("owner", owner.as_str())]);
        let response = self
            .send(request)
            .await?
            .error_for_status()
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;
        Self::json(response).await
    }

    async fn update_service(
        &self,
        service: &ResourceHandle,
        task_definition: &ResourceHandle,
    ) -> ProviderResult<()> {
        let path = format!("/services/{}", urlencoding::encode(&service.name));
        let request = self
            .client
            .put(self.url(&path))
            .json(&UpdateServiceRequest {
                task_definition: &task_definition.name,
            });
        Self::check(self.send(request).await?, ResourceKind::Service, &service.name).await?;
        Ok(())
    }

    async fn configure_static_hosting(
        &self,
        store: &ResourceHandle,
        index_document: &str,
        error_document: &str,
    ) -> ProviderResult<String> {
        let path = format!("/stores/{}/website", urlencoding::encode(&store.name));
        let request = self.client.put(self.url(&path)).json(&WebsiteRequest {
            index_document,
            error_document,
        });
        let response =
            Self::check(self.send(request).await?, ResourceKind::ObjectStore, &store.name).await?;
        let website: WebsiteResponse = Self::json(response).await?;
        Ok(website.endpoint)
    }

    async fn read_secret(&self, secret: &ResourceHandle) -> ProviderResult<SecretValue> {
        let path = format!("/secrets/{}/value", urlencoding::encode(&secret.name));
        let request = self.client.get(self.url(&path));
        let response =
            Self::check(self.send(request).await?, ResourceKind::Secret, &secret.name).await?;
        Self::json(response).await
    }

    async fn update_secret(
        &self,
        secret: &ResourceHandle,
        value: &SecretValue,
    ) -> ProviderResult<()> {
        let path = format!("/secrets/{}/value", urlencoding::encode(&secret.name));
        let request = self.client.put(self.url(&path)).json(value);
        Self::check(self.send(request).await?, ResourceKind::Secret, &secret.name).await?;
        Ok(())
    }

    async fn put_public_read_policy(&self, store: &ResourceHandle) -> ProviderResult<()> {
        let path = format!("/stores/{}/policy", urlencoding::encode(&store.name));
        let request = self
            .client
            .put(self.url(&path))
            .json(&serde_json::json!({ "public_read": true }));
        Self::check(self.send(request).await?, ResourceKind::ObjectStore, &store.name).await?;
        Ok(())
    }

    async fn put_object(&self, store: &ResourceHandle, object: ObjectUpload) -> ProviderResult<()> {
        let path = format!(
            "/stores/{}/objects/{}",
            urlencoding::encode(&store.name),
            urlencoding::encode(&object.key)
        );
        let request = self
            .client
            .put(self.url(&path))
            .header(reqwest::header::CONTENT_TYPE, object.content_type)
            .header("x-content-sha256", object.checksum)
            .body(object.body);
        Self::check(self.send(request).await?, ResourceKind::ObjectStore, &store.name).await?;
        Ok(())
    }

    async fn registry_credentials(
        &self,
        registry: &ResourceHandle,
    ) -> ProviderResult<RegistryCredentials> {
        let path = format!("/registries/{}/credentials", urlencoding::encode(&registry.name));
        let request = self.client.get(self.url(&path));
        let response =
            Self::check(self.send(request).await?, ResourceKind::Registry, &registry.name).await?;
        Self::json(response).await
    }

    async fn target_health(
        &self,
        target_group: &ResourceHandle,
    ) -> ProviderResult<Vec<TargetHealth>> {
        let path = format!("/target-groups/{}/health", urlencoding::encode(&target_group.name));
        let request = self.client.get(self.url(&path));
        let response = Self::check(
            self.send(request).await?,
            ResourceKind::TargetGroup,
            &target_group.name,
        )
        .await?;
        Self::json(response).await
    }
}
