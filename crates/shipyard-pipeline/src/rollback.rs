//! Compensating deletes for failed and orphaned runs.

use serde::Serialize;
use shipyard_core::deployment::DeploymentStatus;
use shipyard_core::provider::CloudProvider;
use shipyard_core::resource::{ResourceHandle, ResourceKind};
use shipyard_core::{DeploymentId, Error, Result};
use shipyard_provisioner::Provisioner;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::warn;

use crate::reporter::Reporter;

/// A compensating delete or restore that failed.
///
/// Reported beside the failure that triggered the rollback, never instead of it.
#[derive(Debug, Clone, ThisError, PartialEq, Eq, Serialize)]
#[error("rollback of {kind} {name} failed: {message}")]
pub struct RollbackError {
    pub kind: ResourceKind,
    pub name: String,
    pub message: String,
}

impl RollbackError {
    fn new(handle: &ResourceHandle, error: &Error) -> Self {
        Self {
            kind: handle.kind,
            name: handle.name.clone(),
            message: error.to_string(),
        }
    }
}

/// Undo this run: put adopted resources back the way they were, then delete
/// everything it recorded, newest first.
///
/// Adopted resources are restored before any deletes so they never point at a
/// task definition this run is about to remove. Every step is attempted once;
/// failures are collected, not raised.
pub async fn rollback(provisioner: &Provisioner, reporter: &Reporter) -> Vec<RollbackError> {
    let ledger = provisioner.ledger();
    let restores = provisioner.restores();
    reporter.warn(format!(
        "Rolling back {} resource(s), restoring {} adopted resource(s)",
        ledger.len(),
        restores.len()
    ));

    let mut errors = Vec::new();
    for restore in restores.iter().rev() {
        let target = restore.target();
        match provisioner.restore(restore).await {
            Ok(()) => reporter.info(format!("Restored {} {}", target.kind, target.name)),
            Err(e) => {
                let error = RollbackError::new(target, &e);
                reporter.warn(error.to_string());
                errors.push(error);
            }
        }
    }
    for handle in ledger.rollback_order() {
        match provisioner.delete(handle).await {
            Ok(()) => reporter.info(format!("Deleted {} {}", handle.kind, handle.name)),
            Err(e) => {
                let error = RollbackError::new(handle, &e);
                reporter.warn(error.to_string());
                errors.push(error);
            }
        }
    }
    errors
}

/// Outcome of a reconcile sweep.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub deleted: Vec<ResourceHandle>,
    pub errors: Vec<RollbackError>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Remove every resource tagged with `deployment_id`, newest first.
///
/// Recovers runs killed before they could roll back. When something was
/// removed and nothing failed, the deployment is reported `rolled_back`.
pub async fn reconcile(
    cloud: Arc<dyn CloudProvider>,
    deployment_id: &DeploymentId,
    reporter: &Reporter,
) -> Result<ReconcileReport> {
    let owned = cloud
        .list_owned_by(deployment_id)
        .await
        .map_err(|e| Error::Internal(format!("failed to list resources for {deployment_id}: {e}")))?;

    let mut report = ReconcileReport::default();
    if owned.is_empty() {
        reporter.info(format!("No resources tagged with {deployment_id}"));
        return Ok(report);
    }

    reporter.warn(format!(
        "Reconciling {} orphaned resource(s) of {deployment_id}",
        owned.len()
    ));
    let provisioner = Provisioner::new(cloud, deployment_id.clone());
    for record in owned.iter().rev() {
        let handle = record.handle();
        match provisioner.delete(&handle).await {
            Ok(()) => {
                reporter.info(format!("Deleted {} {}", handle.kind, handle.name));
                report.deleted.push(handle);
            }
            Err(e) => {
                let error = RollbackError::new(&handle, &e);
                warn!(kind = %handle.kind, name = %handle.name, error = %e, "Reconcile delete failed");
                report.errors.push(error);
            }
        }
    }

    if report.is_clean() {
        let mut update = reporter.status_update(DeploymentStatus::RolledBack);
        update.error = Some(format!(
            "removed {} orphaned resource(s)",
            report.deleted.len()
        ));
        reporter.status(update);
    } else {
        reporter.error(format!(
            "Reconcile left {} resource(s) behind",
            report.errors.len()
        ));
    }
    Ok(report)
}
