//! The `deploy` command: one pipeline run per worker process.

use anyhow::{Context, Result};
use shipyard_config::{DeploymentRequest, SystemConfig, normalize};
use shipyard_core::deployment::DeploymentStatus;
use shipyard_core::executor::ImageBuilder;
use shipyard_executor::{DockerImageBuilder, LocalShellExecutor, UnavailableImageBuilder};
use shipyard_pipeline::{DeploymentPipeline, DeploymentResult, PipelineSettings, Relay, Reporter};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

use super::{cloud_provider, read_request, spawn_reporter};

fn image_builder() -> Arc<dyn ImageBuilder> {
    match DockerImageBuilder::new() {
        Ok(builder) => Arc::new(builder),
        Err(e) => {
            warn!(error = %e, "Docker client unavailable; images will not be built");
            Arc::new(UnavailableImageBuilder)
        }
    }
}

fn print_result(result: &DeploymentResult) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Parse the request document, folding read failures into a validation error.
fn parse_request(raw: Result<String>) -> shipyard_core::Result<DeploymentRequest> {
    let raw = raw.map_err(|e| shipyard_core::Error::Validation(format!("{e:#}")))?;
    Ok(DeploymentRequest::from_json(&raw)?)
}

/// Report a run that never reached the pipeline as failed.
fn rejection(
    system: &SystemConfig,
    reporter: &Reporter,
    e: &shipyard_core::Error,
) -> DeploymentResult {
    error!(kind = %e.kind(), error = %e, "Request rejected");
    let mut update = reporter.status_update(DeploymentStatus::Failed);
    update.error = Some(e.to_string());
    reporter.status(update);
    DeploymentResult::rejected(system.project_id.clone(), system.deployment_id.clone(), e)
        .dry_run(system.provider.kind.is_dry_run())
}

async fn reject(
    system: &SystemConfig,
    reporter: Reporter,
    relay: Relay,
    e: &shipyard_core::Error,
) -> Result<ExitCode> {
    let result = rejection(system, &reporter, e);
    drop(reporter);
    relay.finish().await;
    print_result(&result)
}

pub async fn run(config_path: Option<&Path>) -> Result<ExitCode> {
    let mut system = SystemConfig::from_env().context("Invalid orchestrator environment")?;
    let request = parse_request(read_request(config_path));

    if let Ok(request) = &request {
        let (url, token) = request.reporting_credentials();
        system = system.with_request_reporting(url, token);
    }
    let (reporter, relay) = spawn_reporter(
        system.reporting.as_ref(),
        system.deployment_id.clone(),
        system.project_id.clone(),
    )?;

    let spec = request.and_then(|request| Ok(normalize(&request, &system.deployment_context())?));
    let spec = match spec {
        Ok(spec) => spec,
        Err(e) => return reject(&system, reporter, relay, &e).await,
    };
    let cloud = match cloud_provider(&system) {
        Ok(cloud) => cloud,
        Err(e) => {
            let e = shipyard_core::Error::Internal(format!("{e:#}"));
            return reject(&system, reporter, relay, &e).await;
        }
    };
    if system.provider.kind.is_dry_run() {
        warn!("Dry run: resources are simulated and the resulting URL is not reachable");
    }

    let pipeline = DeploymentPipeline::new(
        cloud,
        Arc::new(LocalShellExecutor::new()),
        image_builder(),
        reporter,
        PipelineSettings::from_config(&system),
    );
    let result = pipeline.run(&spec).await;

    drop(pipeline);
    relay.finish().await;
    print_result(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shipyard_core::report::{ControlPlane, LogRecord, ProjectStatusUpdate, StatusUpdate};
    use shipyard_core::{DeploymentId, ErrorKind, ProjectId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        statuses: Mutex<Vec<StatusUpdate>>,
    }

    #[async_trait]
    impl ControlPlane for RecordingControl {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn append_log(&self, _: &LogRecord) -> shipyard_core::Result<()> {
            Ok(())
        }

        async fn update_status(&self, update: &StatusUpdate) -> shipyard_core::Result<()> {
            self.statuses.lock().unwrap().push(update.clone());
            Ok(())
        }

        async fn update_project(&self, _: &ProjectStatusUpdate) -> shipyard_core::Result<()> {
            Ok(())
        }

        async fn heartbeat(&self, _: &DeploymentId, _: &ProjectId) -> shipyard_core::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_malformed_request_is_a_validation_error() {
        let err = parse_request(Ok("{".to_string())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_unreadable_request_is_a_validation_error() {
        let err = parse_request(Err(anyhow::anyhow!(
            "Failed to read request document: /nope"
        )))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("/nope"));
    }

    #[tokio::test]
    async fn test_unparseable_request_reports_failed_status() {
        let system = super::super::tests::system(&[]);
        let control = Arc::new(RecordingControl::default());
        let (reporter, relay) = Reporter::spawn(
            control.clone(),
            system.deployment_id.clone(),
            system.project_id.clone(),
        );
        let err = parse_request(Ok("not json".to_string())).unwrap_err();

        let result = rejection(&system, &reporter, &err);
        drop(reporter);
        relay.finish().await;

        let statuses = control.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, DeploymentStatus::Failed);
        assert!(statuses[0].error.is_some());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "validation");
        assert_eq!(json["deploymentId"], "dep-1");
        assert_eq!(json["dryRun"], true);
    }
}
