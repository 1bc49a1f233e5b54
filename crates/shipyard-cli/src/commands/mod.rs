//! CLI command implementations.

pub mod deploy;
pub mod reconcile;

use anyhow::{Context, Result};
use shipyard_config::frameworks::resolve_framework;
use shipyard_config::system::ReportingConfig;
use shipyard_config::{DeploymentContext, DeploymentRequest, ProviderKind, SystemConfig, normalize};
use shipyard_core::deployment::Database;
use shipyard_core::provider::CloudProvider;
use shipyard_core::report::ControlPlane;
use shipyard_core::{DeploymentId, ProjectId};
use shipyard_pipeline::{HttpControlPlane, Relay, Reporter, classifier};
use shipyard_provisioner::{HttpCloudProvider, InMemoryCloud};
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable carrying the request document.
pub const PROJECT_CONFIG_ENV: &str = "PROJECT_CONFIG";

/// Read the request document from `path`, `PROJECT_CONFIG`, or stdin, in that order.
pub fn read_request(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request document: {}", path.display()));
    }
    if let Some(raw) = std::env::var(PROJECT_CONFIG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
    {
        return Ok(raw);
    }
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read request document from stdin")?;
    Ok(raw)
}

/// The cloud provider selected by the system configuration.
pub fn cloud_provider(config: &SystemConfig) -> Result<Arc<dyn CloudProvider>> {
    match config.provider.kind {
        ProviderKind::Memory => {
            info!(region = %config.region, "Using in-memory cloud provider");
            Ok(Arc::new(InMemoryCloud::with_region(config.region.clone())))
        }
        ProviderKind::Http => {
            let url = config
                .provider
                .url
                .clone()
                .context("SHIPYARD_PROVIDER_URL is required for the http provider")?;
            info!(url = %url, "Using HTTP provisioning gateway");
            let provider = HttpCloudProvider::new(url, config.provider.token.clone())
                .context("Failed to create provisioning gateway client")?;
            Ok(Arc::new(provider))
        }
    }
}

/// A reporter relaying to the configured control plane, or local-only.
pub fn spawn_reporter(
    reporting: Option<&ReportingConfig>,
    deployment_id: DeploymentId,
    project_id: ProjectId,
) -> Result<(Reporter, Relay)> {
    match reporting {
        Some(reporting) => {
            let control: Arc<dyn ControlPlane> = Arc::new(
                HttpControlPlane::new(&reporting.url, &reporting.token)
                    .context("Failed to create control plane client")?,
            );
            Ok(Reporter::spawn(control, deployment_id, project_id))
        }
        None => {
            warn!("No control plane configured; reporting to local output only");
            Ok(Reporter::local(deployment_id, project_id))
        }
    }
}

pub fn validate(
    path: Option<&Path>,
    deployment_id: &str,
    project_id: &str,
    subdomain: &str,
) -> Result<ExitCode> {
    let raw = read_request(path)?;
    let context = DeploymentContext {
        deployment_id: DeploymentId::new(deployment_id)?,
        project_id: ProjectId::new(project_id)?,
        subdomain: subdomain.to_string(),
    };

    let spec = DeploymentRequest::from_json(&raw).and_then(|request| normalize(&request, &context));
    match spec {
        Ok(spec) => {
            println!("{}", serde_json::to_string_pretty(&spec)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

pub fn classify(
    dir: &Path,
    framework: Option<&str>,
    db: Option<&str>,
    port: Option<&str>,
) -> Result<ExitCode> {
    let hint = resolve_framework(framework)?;
    let database = db.map(str::parse::<Database>).transpose()?;

    match classifier::classify_tree(dir, hint, database, port) {
        Ok(plan) => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Classification error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
