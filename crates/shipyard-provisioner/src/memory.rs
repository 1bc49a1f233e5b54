//! In-memory cloud provider.
//!
//! Simulates the provider surface without leaving the process. Used for dry
//! runs and as the fake in tests: failures can be injected per resource kind
//! and convergence states scripted for databases and load balancer targets.

use async_trait::async_trait;
use shipyard_core::DeploymentId;
use shipyard_core::provider::{
    CloudProvider, ObjectUpload, ProviderError, ProviderResult, RegistryCredentials,
    ResourceSpec, TargetHealth,
};
use shipyard_core::resource::{ResourceHandle, ResourceKind, ResourceRecord};
use shipyard_core::secret::SecretValue;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const AVAILABLE: &str = "available";

#[derive(Debug, Default)]
struct CloudState {
    resources: Vec<ResourceRecord>,
    objects: BTreeMap<(String, String), ObjectUpload>,
    public_stores: BTreeSet<String>,
    websites: BTreeMap<String, String>,
    service_tasks: HashMap<String, String>,
    secrets: HashMap<String, SecretValue>,
    create_calls: HashMap<ResourceKind, usize>,
    deleted: Vec<ResourceHandle>,
    failing_creates: BTreeSet<ResourceKind>,
    failing_deletes: BTreeSet<ResourceKind>,
    database_states: VecDeque<String>,
    target_states: VecDeque<String>,
    steady_target_state: Option<String>,
    sequence: u64,
}

impl CloudState {
    fn position(&self, kind: ResourceKind, name: &str) -> Option<usize> {
        self.resources
            .iter()
            .position(|r| r.kind == kind && r.name == name)
    }

    fn find(&self, kind: ResourceKind, name: &str) -> ProviderResult<&ResourceRecord> {
        self.position(kind, name)
            .map(|i| &self.resources[i])
            .ok_or_else(|| ProviderError::NotFound {
                kind,
                name: name.to_string(),
            })
    }
}

/// A cloud that lives in a mutex.
#[derive(Debug, Clone)]
pub struct InMemoryCloud {
    region: String,
    state: Arc<Mutex<CloudState>>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::with_region("ap-south-1")
    }

    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            state: Arc::new(Mutex::new(CloudState::default())),
        }
    }

    /// Make every create of `kind` fail with a rejection.
    pub async fn fail_creates_of(&self, kind: ResourceKind) {
        self.state.lock().await.failing_creates.insert(kind);
    }

    /// Make every delete of `kind` fail with a rejection.
    pub async fn fail_deletes_of(&self, kind: ResourceKind) {
        self.state.lock().await.failing_deletes.insert(kind);
    }

    /// States reported by successive database describes; `available` once exhausted.
    pub async fn script_database_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.database_states = states.into_iter().map(Into::into).collect();
    }

    /// States reported by successive target health checks.
    pub async fn script_target_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.target_states = states.into_iter().map(Into::into).collect();
    }

    /// State reported once the scripted target states are exhausted (default `healthy`).
    pub async fn set_steady_target_state(&self, target_state: impl Into<String>) {
        self.state.lock().await.steady_target_state = Some(target_state.into());
    }

    /// Every live resource, in creation order.
    pub async fn resources(&self) -> Vec<ResourceRecord> {
        self.state.lock().await.resources.clone()
    }

    pub async fn resources_of(&self, kind: ResourceKind) -> Vec<ResourceRecord> {
        self.state
            .lock()
            .await
            .resources
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of create calls made for `kind`, including ones that failed.
    pub async fn create_calls(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .await
            .create_calls
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Every successful delete, in call order.
    pub async fn deleted(&self) -> Vec<ResourceHandle> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn object_keys(&self, store: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(s, _)| s == store)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub async fn object(&self, store: &str, key: &str) -> Option<ObjectUpload> {
        self.state
            .lock()
            .await
            .objects
            .get(&(store.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn is_public(&self, store: &str) -> bool {
        self.state.lock().await.public_stores.contains(store)
    }

    /// Task definition the named service currently runs.
    pub async fn service_task_definition(&self, service: &str) -> Option<String> {
        self.state.lock().await.service_tasks.get(service).cloned()
    }

    fn record_for(&self, spec: &ResourceSpec, owner: &DeploymentId, seq: u64) -> ResourceRecord {
        let name = spec.name().to_string();
        let region = &self.region;
        let mut attributes = BTreeMap::new();
        let mut state = None;

        match spec {
            ResourceSpec::LoadBalancer { .. } => {
                attributes.insert(
                    "dns_name".to_string(),
                    format!("{name}-{seq}.{region}.elb.shipyard.internal"),
                );
            }
            ResourceSpec::Distribution { origin_domain, .. } => {
                attributes.insert(
                    "domain_name".to_string(),
                    format!("d{seq:06}.cdn.shipyard.internal"),
                );
                attributes.insert("origin".to_string(), origin_domain.clone());
            }
            ResourceSpec::Registry { .. } => {
                attributes.insert(
                    "uri".to_string(),
                    format!("registry.{region}.shipyard.internal/{name}"),
                );
            }
            ResourceSpec::Database {
                engine,
                database_name,
                username,
                ..
            } => {
                state = Some("creating".to_string());
                attributes.insert("username".to_string(), username.clone());
                attributes.insert("port".to_string(), engine.default_port().to_string());
                attributes.insert("database".to_string(), database_name.clone());
            }
            ResourceSpec::Service {
                task_definition, ..
            } => {
                state = Some("ACTIVE".to_string());
                attributes.insert("task_definition".to_string(), task_definition.clone());
            }
            ResourceSpec::ObjectStore { region, .. } => {
                attributes.insert("region".to_string(), region.clone());
            }
            _ => {}
        }

        ResourceRecord {
            kind: spec.kind(),
            provider_id: format!("mem:{region}:{}/{name}", spec.kind()),
            name,
            owner: owner.clone(),
            state,
            attributes,
        }
    }
}

#[async_trait]
impl CloudProvider for InMemoryCloud {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(
        &self,
        spec: &ResourceSpec,
        owner: &DeploymentId,
    ) -> ProviderResult<ResourceRecord> {
        let kind = spec.kind();
        let mut state = self.state.lock().await;
        *state.create_calls.entry(kind).or_default() += 1;

        if state.failing_creates.contains(&kind) {
            return Err(ProviderError::Rejected(format!(
                "simulated failure creating {kind} {}",
                spec.name()
            )));
        }
        if state.position(kind, spec.name()).is_some() {
            return Err(ProviderError::AlreadyExists {
                kind,
                name: spec.name().to_string(),
            });
        }

        state.sequence += 1;
        let record = self.record_for(spec, owner, state.sequence);
        if let ResourceSpec::Service {
            name,
            task_definition,
            ..
        } = spec
        {
            state
                .service_tasks
                .insert(name.clone(), task_definition.clone());
        }
        if let ResourceSpec::Secret { name, value } = spec {
            state.secrets.insert(name.clone(), value.clone());
        }
        debug!(kind = %kind, name = %record.name, owner = %owner, "Created resource");
        state.resources.push(record.clone());
        Ok(record)
    }

    async fn describe(&self, kind: ResourceKind, name: &str) -> ProviderResult<ResourceRecord> {
        let mut state = self.state.lock().await;
        let idx = state.position(kind, name).ok_or_else(|| ProviderError::NotFound {
            kind,
            name: name.to_string(),
        })?;

        if kind == ResourceKind::Database && state.resources[idx].state.as_deref() != Some(AVAILABLE)
        {
            let next = state
                .database_states
                .pop_front()
                .unwrap_or_else(|| AVAILABLE.to_string());
            let region = self.region.clone();
            let record = &mut state.resources[idx];
            if next == AVAILABLE {
                record.attributes.insert(
                    "endpoint".to_string(),
                    format!("{name}.{region}.db.shipyard.internal"),
                );
            }
            record.state = Some(next);
        }

        Ok(state.resources[idx].clone())
    }

    async fn delete(&self, handle: &ResourceHandle) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        if state.failing_deletes.contains(&handle.kind) {
            return Err(ProviderError::Rejected(format!(
                "simulated failure deleting {} {}",
                handle.kind, handle.name
            )));
        }
        let idx = state
            .position(handle.kind, &handle.name)
            .ok_or_else(|| ProviderError::NotFound {
                kind: handle.kind,
                name: handle.name.clone(),
            })?;
        state.resources.remove(idx);

        match handle.kind {
            ResourceKind::ObjectStore => {
                state.objects.retain(|(store, _), _| store != &handle.name);
                state.public_stores.remove(&handle.name);
                state.websites.remove(&handle.name);
            }
            ResourceKind::Service => {
                state.service_tasks.remove(&handle.name);
            }
            ResourceKind::Secret => {
                state.secrets.remove(&handle.name);
            }
            _ => {}
        }
        state.deleted.push(handle.clone());
        Ok(())
    }

    async fn list_owned_by(&self, owner: &DeploymentId) -> ProviderResult<Vec<ResourceRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .resources
            .iter()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect())
    }

    async fn update_service(
        &self,
        service: &ResourceHandle,
        task_definition: &ResourceHandle,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        let idx = state
            .position(ResourceKind::Service, &service.name)
            .ok_or_else(|| ProviderError::NotFound {
                kind: ResourceKind::Service,
                name: service.name.clone(),
            })?;
        state.resources[idx]
            .attributes
            .insert("task_definition".to_string(), task_definition.name.clone());
        state
            .service_tasks
            .insert(service.name.clone(), task_definition.name.clone());
        Ok(())
    }

    async fn configure_static_hosting(
        &self,
        store: &ResourceHandle,
        index_document: &str,
        _error_document: &str,
    ) -> ProviderResult<String> {
        let mut state = self.state.lock().await;
        state.find(ResourceKind::ObjectStore, &store.name)?;
        let endpoint = format!(
            "{}.website.{}.shipyard.internal",
            store.name, self.region
        );
        state
            .websites
            .insert(store.name.clone(), index_document.to_string());
        Ok(endpoint)
    }

    async fn update_secret(
        &self,
        secret: &ResourceHandle,
        value: &SecretValue,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        match state.secrets.get_mut(&secret.name) {
            Some(current) => {
                *current = value.clone();
                Ok(())
            }
            None => Err(ProviderError::NotFound {
                kind: ResourceKind::Secret,
                name: secret.name.clone(),
            }),
        }
    }

    async fn read_secret(&self, secret: &ResourceHandle) -> ProviderResult<SecretValue> {
        let state = self.state.lock().await;
        state
            .secrets
            .get(&secret.name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                kind: ResourceKind::Secret,
                name: secret.name.clone(),
            })
    }

    async fn put_public_read_policy(&self, store: &ResourceHandle) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.find(ResourceKind::ObjectStore, &store.name)?;
        state.public_stores.insert(store.name.clone());
        Ok(())
    }

    async fn put_object(&self, store: &ResourceHandle, object: ObjectUpload) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.find(ResourceKind::ObjectStore, &store.name)?;
        state
            .objects
            .insert((store.name.clone(), object.key.clone()), object);
        Ok(())
    }

    async fn registry_credentials(
        &self,
        registry: &ResourceHandle,
    ) -> ProviderResult<RegistryCredentials> {
        let state = self.state.lock().await;
        let record = state.find(ResourceKind::Registry, &registry.name)?;
        Ok(RegistryCredentials {
            server: record
                .attribute("uri")
                .and_then(|uri| uri.split('/').next())
                .unwrap_or_default()
                .to_string(),
            username: "shipyard".to_string(),
            password: "in-memory".to_string(),
        })
    }

    async fn target_health(
        &self,
        target_group: &ResourceHandle,
    ) -> ProviderResult<Vec<TargetHealth>> {
        let mut state = self.state.lock().await;
        state.find(ResourceKind::TargetGroup, &target_group.name)?;

        let registered = state
            .resources
            .iter()
            .any(|r| r.kind == ResourceKind::Service);
        if !registered {
            return Ok(Vec::new());
        }

        let target_state = state
            .target_states
            .pop_front()
            .or_else(|| state.steady_target_state.clone())
            .unwrap_or_else(|| "healthy".to_string());
        let reason = match target_state.as_str() {
            "healthy" => None,
            "initial" => Some("Elb.RegistrationInProgress".to_string()),
            _ => Some("Target.FailedHealthChecks".to_string()),
        };

        Ok(vec![TargetHealth {
            target_id: "10.0.1.10".to_string(),
            state: target_state,
            reason,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::deployment::Database;
    use shipyard_core::provider::NetworkConfig;

    fn owner() -> DeploymentId {
        DeploymentId::new("dep-1").unwrap()
    }

    fn cluster(name: &str) -> ResourceSpec {
        ResourceSpec::Cluster { name: name.into() }
    }

    #[tokio::test]
    async fn test_second_create_reports_already_exists() {
        let cloud = InMemoryCloud::new();
        cloud.create(&cluster("c"), &owner()).await.unwrap();
        let err = cloud.create(&cluster("c"), &owner()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists { .. }));
        assert_eq!(cloud.create_calls(ResourceKind::Cluster).await, 2);
        assert_eq!(cloud.resources_of(ResourceKind::Cluster).await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let cloud = InMemoryCloud::new();
        let record = cloud.create(&cluster("c"), &owner()).await.unwrap();
        cloud.delete(&record.handle()).await.unwrap();
        let err = cloud.delete(&record.handle()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
        assert_eq!(cloud.deleted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_database_follows_scripted_states() {
        let cloud = InMemoryCloud::new();
        cloud
            .script_database_states(["creating", "backing-up"])
            .await;
        let spec = ResourceSpec::Database {
            name: "db".into(),
            engine: Database::Postgresql,
            instance_class: "db.t3.micro".into(),
            storage_gb: 20,
            username: "u".into(),
            password: "p".into(),
            database_name: "postgres".into(),
            network: NetworkConfig::default(),
        };
        cloud.create(&spec, &owner()).await.unwrap();

        let first = cloud.describe(ResourceKind::Database, "db").await.unwrap();
        assert_eq!(first.state.as_deref(), Some("creating"));
        assert!(first.attribute("endpoint").is_none());

        let second = cloud.describe(ResourceKind::Database, "db").await.unwrap();
        assert_eq!(second.state.as_deref(), Some("backing-up"));

        let third = cloud.describe(ResourceKind::Database, "db").await.unwrap();
        assert_eq!(third.state.as_deref(), Some("available"));
        assert!(third.attribute("endpoint").is_some());
    }

    #[tokio::test]
    async fn test_list_owned_by_filters_by_owner_in_order() {
        let cloud = InMemoryCloud::new();
        let other = DeploymentId::new("dep-2").unwrap();
        cloud.create(&cluster("a"), &owner()).await.unwrap();
        cloud.create(&cluster("b"), &other).await.unwrap();
        cloud.create(&cluster("c"), &owner()).await.unwrap();

        let names: Vec<String> = cloud
            .list_owned_by(&owner())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let cloud = InMemoryCloud::new();
        cloud.fail_creates_of(ResourceKind::Cluster).await;
        let err = cloud.create(&cluster("c"), &owner()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
        assert!(cloud.resources().await.is_empty());
    }
}
