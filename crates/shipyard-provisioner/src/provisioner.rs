//! Idempotent resource provisioning over a cloud provider.

use shipyard_core::deployment::Database;
use shipyard_core::executor::{ImageBuildRequest, ImageBuilder, LineSink};
use shipyard_core::provider::{
    CloudProvider, HealthCheck, NetworkConfig, ProviderError, ResourceSpec, TargetHealth,
};
use shipyard_core::resource::{ProvisioningLedger, ResourceHandle, ResourceKind, ResourceRecord};
use shipyard_core::secret::SecretValue;
use shipyard_core::{DeploymentId, Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::upload::{self, UploadSummary};

pub const DATABASE_INSTANCE_CLASS: &str = "db.t3.micro";
pub const DATABASE_STORAGE_GB: u32 = 20;
pub const LOG_RETENTION_DAYS: u32 = 7;
pub const INDEX_DOCUMENT: &str = "index.html";

/// Container definition for one run.
#[derive(Debug, Clone)]
pub struct TaskDefinitionRequest {
    pub name: String,
    pub image: String,
    pub port: u16,
    /// Replaces the image's own command when set.
    pub command: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub cpu: u32,
    pub memory_mb: u32,
}

impl TaskDefinitionRequest {
    pub fn new(name: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            port,
            command: None,
            env: BTreeMap::new(),
            cpu: 256,
            memory_mb: 512,
        }
    }
}

/// A change made to a resource another deployment owns, with the state to
/// put back if this run fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restore {
    /// An adopted service was pointed at this run's task definition.
    ServiceTask {
        service: ResourceHandle,
        previous: ResourceHandle,
    },
    /// An adopted secret was overwritten.
    SecretValue {
        secret: ResourceHandle,
        previous: SecretValue,
    },
}

impl Restore {
    /// The adopted resource the change was made to.
    pub fn target(&self) -> &ResourceHandle {
        match self {
            Restore::ServiceTask { service, .. } => service,
            Restore::SecretValue { secret, .. } => secret,
        }
    }
}

/// Creates resources for one deployment and records the ones it owns.
///
/// Creates never fail on "already exists": the existing resource is looked up
/// and returned. It is recorded for rollback only when this deployment created
/// it; resources owned by other deployments are used but never recorded. When
/// an adopted resource has to be modified, its prior state is kept as a
/// [`Restore`] instead.
pub struct Provisioner {
    cloud: Arc<dyn CloudProvider>,
    ledger: ProvisioningLedger,
    restores: Vec<Restore>,
}

impl Provisioner {
    pub fn new(cloud: Arc<dyn CloudProvider>, deployment_id: DeploymentId) -> Self {
        Self {
            cloud,
            ledger: ProvisioningLedger::new(deployment_id),
            restores: Vec::new(),
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        self.ledger.deployment_id()
    }

    pub fn ledger(&self) -> &ProvisioningLedger {
        &self.ledger
    }

    /// Changes to adopted resources, oldest first.
    pub fn restores(&self) -> &[Restore] {
        &self.restores
    }

    /// Whether a failed run has anything to undo.
    pub fn has_changes(&self) -> bool {
        !self.ledger.is_empty() || !self.restores.is_empty()
    }

    fn adopted(&self, record: &ResourceRecord) -> bool {
        &record.owner != self.deployment_id()
    }

    async fn ensure(&mut self, spec: ResourceSpec) -> Result<ResourceRecord> {
        let kind = spec.kind();
        let name = spec.name().to_string();
        let owner = self.ledger.deployment_id().clone();

        match self.cloud.create(&spec, &owner).await {
            Ok(record) => {
                info!(kind = %kind, name = %name, provider_id = %record.provider_id, "Resource created");
                self.ledger.record(record.handle());
                Ok(record)
            }
            Err(ProviderError::AlreadyExists { .. }) => {
                let record = self
                    .cloud
                    .describe(kind, &name)
                    .await
                    .map_err(|e| Error::provisioning(kind, format!("{name}: {e}")))?;
                if record.owner == owner {
                    info!(kind = %kind, name = %name, "Resource already created by this deployment");
                    self.ledger.record(record.handle());
                } else {
                    info!(kind = %kind, name = %name, owner = %record.owner, "Reusing existing resource");
                }
                Ok(record)
            }
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "Resource creation failed");
                Err(Error::provisioning(kind, format!("{name}: {e}")))
            }
        }
    }

    pub async fn create_compute_cluster(&mut self, name: &str) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::Cluster { name: name.into() })
            .await
    }

    pub async fn create_log_sink(&mut self, name: &str) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::LogSink {
            name: name.into(),
            retention_days: LOG_RETENTION_DAYS,
        })
        .await
    }

    pub async fn create_registry(&mut self, name: &str) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::Registry { name: name.into() })
            .await
    }

    pub async fn create_task_definition(
        &mut self,
        request: TaskDefinitionRequest,
        log_sink: &ResourceHandle,
    ) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::TaskDefinition {
            name: request.name,
            image: request.image,
            port: request.port,
            command: request.command,
            env: request.env,
            log_sink: log_sink.name.clone(),
            cpu: request.cpu,
            memory_mb: request.memory_mb,
        })
        .await
    }

    /// Create the service, or point an existing one at `task_definition`.
    pub async fn create_service(
        &mut self,
        name: &str,
        cluster: &ResourceHandle,
        task_definition: &ResourceHandle,
        target_group: &ResourceHandle,
        container_port: u16,
        network: &NetworkConfig,
    ) -> Result<ResourceRecord> {
        let record = self
            .ensure(ResourceSpec::Service {
                name: name.into(),
                cluster: cluster.name.clone(),
                task_definition: task_definition.name.clone(),
                target_group: target_group.name.clone(),
                container_port,
                desired_count: 1,
                network: network.clone(),
            })
            .await?;

        let current = record.attribute("task_definition");
        if current == Some(task_definition.name.as_str()) {
            return Ok(record);
        }

        let previous = match current {
            Some(previous) if self.adopted(&record) => {
                Some(self.task_definition_handle(previous, &record.owner).await)
            }
            _ => None,
        };
        info!(service = %name, task_definition = %task_definition.name, "Updating service");
        let service = record.handle();
        self.cloud
            .update_service(&service, task_definition)
            .await
            .map_err(|e| Error::provisioning(ResourceKind::Service, format!("{name}: {e}")))?;
        if let Some(previous) = previous {
            self.restores.push(Restore::ServiceTask { service, previous });
        }
        Ok(record)
    }

    async fn task_definition_handle(&self, name: &str, owner: &DeploymentId) -> ResourceHandle {
        match self.cloud.describe(ResourceKind::TaskDefinition, name).await {
            Ok(record) => record.handle(),
            Err(e) => {
                warn!(task_definition = %name, error = %e, "Previous task definition not described");
                ResourceHandle {
                    kind: ResourceKind::TaskDefinition,
                    name: name.to_string(),
                    provider_id: name.to_string(),
                    created_by: owner.clone(),
                }
            }
        }
    }

    pub async fn create_object_store(&mut self, name: &str, region: &str) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::ObjectStore {
            name: name.into(),
            region: region.into(),
        })
        .await
    }

    pub async fn create_cdn_distribution(
        &mut self,
        name: &str,
        origin_domain: &str,
    ) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::Distribution {
            name: name.into(),
            origin_domain: origin_domain.into(),
        })
        .await
    }

    pub async fn create_managed_database(
        &mut self,
        name: &str,
        engine: Database,
        username: &str,
        password: &str,
        network: &NetworkConfig,
    ) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::Database {
            name: name.into(),
            engine,
            instance_class: DATABASE_INSTANCE_CLASS.into(),
            storage_gb: DATABASE_STORAGE_GB,
            username: username.into(),
            password: password.into(),
            database_name: engine.default_database_name().into(),
            network: network.clone(),
        })
        .await
    }

    /// Create the secret, or overwrite an adopted one holding a different value.
    pub async fn create_secret(&mut self, name: &str, value: SecretValue) -> Result<ResourceRecord> {
        let record = self
            .ensure(ResourceSpec::Secret {
                name: name.into(),
                value: value.clone(),
            })
            .await?;
        if !self.adopted(&record) {
            return Ok(record);
        }

        let secret = record.handle();
        let previous = self
            .cloud
            .read_secret(&secret)
            .await
            .map_err(|e| Error::provisioning(ResourceKind::Secret, format!("{name}: {e}")))?;
        if previous == value {
            return Ok(record);
        }
        info!(secret = %name, owner = %record.owner, "Updating secret");
        self.cloud
            .update_secret(&secret, &value)
            .await
            .map_err(|e| Error::provisioning(ResourceKind::Secret, format!("{name}: {e}")))?;
        self.restores.push(Restore::SecretValue { secret, previous });
        Ok(record)
    }

    pub async fn create_load_balancer(
        &mut self,
        name: &str,
        network: &NetworkConfig,
    ) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::LoadBalancer {
            name: name.into(),
            network: network.clone(),
        })
        .await
    }

    pub async fn create_target_group(
        &mut self,
        name: &str,
        port: u16,
        vpc_id: Option<&str>,
    ) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::TargetGroup {
            name: name.into(),
            port,
            vpc_id: vpc_id.map(str::to_string),
            health_check: HealthCheck::default(),
        })
        .await
    }

    pub async fn create_listener(
        &mut self,
        name: &str,
        load_balancer: &ResourceHandle,
        target_group: &ResourceHandle,
        port: u16,
    ) -> Result<ResourceRecord> {
        self.ensure(ResourceSpec::Listener {
            name: name.into(),
            load_balancer: load_balancer.name.clone(),
            target_group: target_group.name.clone(),
            port,
        })
        .await
    }

    /// Enable website hosting on a store; returns the website endpoint.
    pub async fn configure_static_hosting(&self, store: &ResourceHandle) -> Result<String> {
        self.cloud
            .configure_static_hosting(store, INDEX_DOCUMENT, INDEX_DOCUMENT)
            .await
            .map_err(|e| Error::provisioning(ResourceKind::ObjectStore, e.to_string()))
    }

    pub async fn attach_public_read_policy(&self, store: &ResourceHandle) -> Result<()> {
        self.cloud
            .put_public_read_policy(store)
            .await
            .map_err(|e| Error::provisioning(ResourceKind::ObjectStore, e.to_string()))
    }

    /// Upload a directory tree, `concurrency` files at a time.
    pub async fn upload_tree(
        &self,
        store: &ResourceHandle,
        root: &Path,
        concurrency: usize,
    ) -> Result<UploadSummary> {
        upload::upload_tree(self.cloud.as_ref(), store, root, concurrency).await
    }

    /// Build an image from `context` and push it to `registry`.
    ///
    /// The image is tagged with the deployment id; returns the pushed reference.
    pub async fn build_and_publish_image(
        &self,
        builder: &dyn ImageBuilder,
        registry: &ResourceRecord,
        context: PathBuf,
        dockerfile: String,
        on_line: LineSink<'_>,
    ) -> Result<String> {
        let credentials = self
            .cloud
            .registry_credentials(&registry.handle())
            .await
            .map_err(|e| Error::provisioning(ResourceKind::Registry, e.to_string()))?;

        let repository = registry
            .attribute("uri")
            .unwrap_or(registry.provider_id.as_str());
        let tag = format!("{}:{}", repository, self.deployment_id());
        let request = ImageBuildRequest {
            context,
            dockerfile,
            tag: tag.clone(),
        };

        builder.build(&request, on_line).await?;
        builder.push(&tag, &credentials, on_line).await
    }

    pub async fn describe(&self, kind: ResourceKind, name: &str) -> Result<ResourceRecord> {
        self.cloud
            .describe(kind, name)
            .await
            .map_err(|e| Error::provisioning(kind, e.to_string()))
    }

    /// Value of the named secret, or `None` when it does not exist yet.
    pub async fn read_secret(&self, name: &str) -> Result<Option<SecretValue>> {
        let handle = ResourceHandle {
            kind: ResourceKind::Secret,
            name: name.to_string(),
            provider_id: name.to_string(),
            created_by: self.deployment_id().clone(),
        };
        match self.cloud.read_secret(&handle).await {
            Ok(value) => Ok(Some(value)),
            Err(ProviderError::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::provisioning(ResourceKind::Secret, format!("{name}: {e}"))),
        }
    }

    pub async fn target_health(&self, target_group: &ResourceHandle) -> Result<Vec<TargetHealth>> {
        self.cloud
            .target_health(target_group)
            .await
            .map_err(|e| Error::provisioning(ResourceKind::TargetGroup, e.to_string()))
    }

    /// Undo one change to an adopted resource.
    pub async fn restore(&self, restore: &Restore) -> Result<()> {
        let result = match restore {
            Restore::ServiceTask { service, previous } => {
                self.cloud.update_service(service, previous).await
            }
            Restore::SecretValue { secret, previous } => {
                self.cloud.update_secret(secret, previous).await
            }
        };
        let target = restore.target();
        result.map_err(|e| {
            Error::provisioning(target.kind, format!("restore {}: {}", target.name, e))
        })?;
        info!(kind = %target.kind, name = %target.name, "Adopted resource restored");
        Ok(())
    }

    /// Delete a resource, routed by its kind. Already-deleted resources succeed.
    pub async fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        match self.cloud.delete(handle).await {
            Ok(()) => {
                info!(kind = %handle.kind, name = %handle.name, "Resource deleted");
                Ok(())
            }
            Err(ProviderError::NotFound { .. }) => {
                info!(kind = %handle.kind, name = %handle.name, "Resource already gone");
                Ok(())
            }
            Err(e) => Err(Error::provisioning(handle.kind, format!("delete {}: {}", handle.name, e))),
        }
    }
}
