//! The `reconcile` command: clean up after a run that was killed.

use anyhow::{Context, Result};
use shipyard_config::SystemConfig;
use shipyard_core::DeploymentId;
use std::process::ExitCode;
use tracing::info;

use super::{cloud_provider, spawn_reporter};

pub async fn run(deployment_id: Option<&str>) -> Result<ExitCode> {
    let system = SystemConfig::from_env().context("Invalid orchestrator environment")?;
    let deployment_id = match deployment_id {
        Some(id) => DeploymentId::new(id)?,
        None => system.deployment_id.clone(),
    };

    let cloud = cloud_provider(&system)?;
    let (reporter, relay) = spawn_reporter(
        system.reporting.as_ref(),
        deployment_id.clone(),
        system.project_id.clone(),
    )?;

    let report = shipyard_pipeline::reconcile(cloud, &deployment_id, &reporter).await;
    drop(reporter);
    relay.finish().await;
    let report = report?;

    info!(
        deployment_id = %deployment_id,
        deleted = report.deleted.len(),
        failed = report.errors.len(),
        "Reconcile finished"
    );
    for handle in &report.deleted {
        println!("deleted {} {}", handle.kind, handle.name);
    }
    for error in &report.errors {
        eprintln!("{error}");
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
