//! Cloud provider capability.
//!
//! A provider exposes raw, provider-specific create/describe/delete calls.
//! Creation is not idempotent at this level: re-creating an existing object
//! yields [`ProviderError::AlreadyExists`], which the provisioner turns into a
//! successful lookup.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::DeploymentId;
use crate::deployment::Database;
use crate::resource::{ResourceHandle, ResourceKind, ResourceRecord};
use crate::secret::SecretValue;

/// Errors reported by a provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Network placement for load balancers, services and databases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub vpc_id: Option<String>,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Load balancer health check settings for a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub matcher: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
            matcher: "200".to_string(),
        }
    }
}

/// Request to create one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Cluster {
        name: String,
    },
    LogSink {
        name: String,
        retention_days: u32,
    },
    Registry {
        name: String,
    },
    TaskDefinition {
        name: String,
        image: String,
        port: u16,
        /// Overrides the image's default command when set.
        command: Option<Vec<String>>,
        env: BTreeMap<String, String>,
        log_sink: String,
        cpu: u32,
        memory_mb: u32,
    },
    Service {
        name: String,
        cluster: String,
        task_definition: String,
        target_group: String,
        container_port: u16,
        desired_count: u32,
        network: NetworkConfig,
    },
    ObjectStore {
        name: String,
        region: String,
    },
    Distribution {
        name: String,
        origin_domain: String,
    },
    Database {
        name: String,
        engine: Database,
        instance_class: String,
        storage_gb: u32,
        username: String,
        password: String,
        database_name: String,
        network: NetworkConfig,
    },
    Secret {
        name: String,
        value: SecretValue,
    },
    LoadBalancer {
        name: String,
        network: NetworkConfig,
    },
    TargetGroup {
        name: String,
        port: u16,
        vpc_id: Option<String>,
        health_check: HealthCheck,
    },
    Listener {
        name: String,
        load_balancer: String,
        target_group: String,
        port: u16,
    },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Cluster { .. } => ResourceKind::Cluster,
            ResourceSpec::LogSink { .. } => ResourceKind::LogSink,
            ResourceSpec::Registry { .. } => ResourceKind::Registry,
            ResourceSpec::TaskDefinition { .. } => ResourceKind::TaskDefinition,
            ResourceSpec::Service { .. } => ResourceKind::Service,
            ResourceSpec::ObjectStore { .. } => ResourceKind::ObjectStore,
            ResourceSpec::Distribution { .. } => ResourceKind::Distribution,
            ResourceSpec::Database { .. } => ResourceKind::Database,
            ResourceSpec::Secret { .. } => ResourceKind::Secret,
            ResourceSpec::LoadBalancer { .. } => ResourceKind::LoadBalancer,
            ResourceSpec::TargetGroup { .. } => ResourceKind::TargetGroup,
            ResourceSpec::Listener { .. } => ResourceKind::Listener,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceSpec::Cluster { name }
            | ResourceSpec::LogSink { name, .. }
            | ResourceSpec::Registry { name }
            | ResourceSpec::TaskDefinition { name, .. }
            | ResourceSpec::Service { name, .. }
            | ResourceSpec::ObjectStore { name, .. }
            | ResourceSpec::Distribution { name, .. }
            | ResourceSpec::Database { name, .. }
            | ResourceSpec::Secret { name, .. }
            | ResourceSpec::LoadBalancer { name, .. }
            | ResourceSpec::TargetGroup { name, .. }
            | ResourceSpec::Listener { name, .. } => name,
        }
    }
}

/// One file to place in an object store.
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    /// Hex-encoded SHA-256 of `body`.
    pub checksum: String,
}

/// Credentials for pushing images to a registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Health of one load balancer target as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target_id: String,
    /// Raw provider state, e.g. `initial`, `healthy`, `unhealthy`.
    pub state: String,
    pub reason: Option<String>,
}

impl TargetHealth {
    pub fn is_healthy(&self) -> bool {
        self.state.eq_ignore_ascii_case("healthy")
    }
}

/// Trait for cloud providers.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Name of this provider.
    fn name(&self) -> &'static str;

    /// Create a resource tagged with the owning deployment.
    async fn create(&self, spec: &ResourceSpec, owner: &DeploymentId)
    -> ProviderResult<ResourceRecord>;

    /// Look up a resource by kind and logical name.
    async fn describe(&self, kind: ResourceKind, name: &str) -> ProviderResult<ResourceRecord>;

    /// Delete a resource. Deleting something already gone yields `NotFound`.
    async fn delete(&self, handle: &ResourceHandle) -> ProviderResult<()>;

    /// Every resource tagged with `owner`, in creation order.
    async fn list_owned_by(&self, owner: &DeploymentId) -> ProviderResult<Vec<ResourceRecord>>;

    /// Point an existing service at a new task definition.
    async fn update_service(
        &self,
        service: &ResourceHandle,
        task_definition: &ResourceHandle,
    ) -> ProviderResult<()>;

    /// Enable website hosting on an object store; returns the website endpoint.
    async fn configure_static_hosting(
        &self,
        store: &ResourceHandle,
        index_document: &str,
        error_document: &str,
    ) -> ProviderResult<String>;

    /// Current value of a secret.
    async fn read_secret(&self, secret: &ResourceHandle) -> ProviderResult<SecretValue>;

    /// Replace the value of an existing secret.
    async fn update_secret(&self, secret: &ResourceHandle, value: &SecretValue)
    -> ProviderResult<()>;

    /// Attach a public-read policy to an object store.
    async fn put_public_read_policy(&self, store: &ResourceHandle) -> ProviderResult<()>;

    /// Upload one object.
    async fn put_object(&self, store: &ResourceHandle, object: ObjectUpload) -> ProviderResult<()>;

    /// Short-lived push credentials for a registry.
    async fn registry_credentials(
        &self,
        registry: &ResourceHandle,
    ) -> ProviderResult<RegistryCredentials>;

    /// Health of every target registered with a target group.
    async fn target_health(&self, target_group: &ResourceHandle)
    -> ProviderResult<Vec<TargetHealth>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_kind_and_name() {
        let spec = ResourceSpec::TargetGroup {
            name: "proj-tg".into(),
            port: 3000,
            vpc_id: None,
            health_check: HealthCheck::default(),
        };
        assert_eq!(spec.kind(), ResourceKind::TargetGroup);
        assert_eq!(spec.name(), "proj-tg");
    }

    #[test]
    fn test_spec_serializes_with_kind_tag() {
        let spec = ResourceSpec::Cluster {
            name: "proj-cluster".into(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "cluster");
        assert_eq!(json["name"], "proj-cluster");
    }

    #[test]
    fn test_target_health_is_case_insensitive() {
        let t = TargetHealth {
            target_id: "10.0.0.1".into(),
            state: "Healthy".into(),
            reason: None,
        };
        assert!(t.is_healthy());
    }
}
