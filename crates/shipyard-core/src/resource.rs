//! Cloud resource handles and the per-run provisioning ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::DeploymentId;

/// Kinds of cloud objects the orchestrator provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[display("cluster")]
    Cluster,
    #[display("task_definition")]
    TaskDefinition,
    #[display("service")]
    Service,
    #[display("registry")]
    Registry,
    #[display("object_store")]
    ObjectStore,
    #[display("distribution")]
    Distribution,
    #[display("database")]
    Database,
    #[display("secret")]
    Secret,
    #[display("log_sink")]
    LogSink,
    #[display("load_balancer")]
    LoadBalancer,
    #[display("target_group")]
    TargetGroup,
    #[display("listener")]
    Listener,
}

/// One provisioned cloud object, as recorded for rollback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    /// Logical name the resource was requested under.
    pub name: String,
    /// Provider-assigned identifier (ARN, URI, ...).
    pub provider_id: String,
    pub created_by: DeploymentId,
}

/// A resource as described by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub name: String,
    pub provider_id: String,
    /// Deployment id the resource is tagged with.
    pub owner: DeploymentId,
    /// Provider-reported lifecycle state, if the kind has one.
    pub state: Option<String>,
    /// Kind-specific outputs such as `dns_name` or `endpoint`.
    pub attributes: BTreeMap<String, String>,
}

impl ResourceRecord {
    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle {
            kind: self.kind,
            name: self.name.clone(),
            provider_id: self.provider_id.clone(),
            created_by: self.owner.clone(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }
}

/// Ordered record of the resources created by one deployment run.
///
/// The ledger is the only source of truth for rollback; it refuses handles
/// created by any other deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningLedger {
    deployment_id: DeploymentId,
    entries: Vec<ResourceHandle>,
}

impl ProvisioningLedger {
    pub fn new(deployment_id: DeploymentId) -> Self {
        Self {
            deployment_id,
            entries: Vec::new(),
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    /// Record a handle. Returns `false` (and records nothing) when the handle
    /// belongs to another deployment or is already recorded.
    pub fn record(&mut self, handle: ResourceHandle) -> bool {
        if handle.created_by != self.deployment_id || self.entries.contains(&handle) {
            return false;
        }
        self.entries.push(handle);
        true
    }

    pub fn entries(&self) -> &[ResourceHandle] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_kind(&self, kind: ResourceKind) -> bool {
        self.entries.iter().any(|h| h.kind == kind)
    }

    /// Handles in reverse creation order, the order rollback deletes them in.
    pub fn rollback_order(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.entries.iter().rev()
    }
}
