use async_trait::async_trait;
use shipyard_core::deployment::DeploymentStatus;
use shipyard_core::executor::LogLine;
use shipyard_core::plan::Strategy;
use shipyard_core::provider::TargetHealth;
use shipyard_core::{Error, Result};
use shipyard_executor::dockerfile;
use shipyard_provisioner::TaskDefinitionRequest;

use super::{DeploymentStrategy, install_and_build};
use crate::context::RunContext;
use crate::poller::{HealthProbeResult, poll_until_ready};

/// A container service on a compute cluster behind a load balancer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicServiceStrategy;

/// Summarize target health for the progress log.
fn describe_targets(targets: &[TargetHealth]) -> HealthProbeResult {
    if targets.is_empty() {
        return HealthProbeResult::pending("no targets registered");
    }
    let detail = targets
        .iter()
        .map(|t| match &t.reason {
            Some(reason) => format!("{}: {} ({})", t.target_id, t.state, reason),
            None => format!("{}: {}", t.target_id, t.state),
        })
        .collect::<Vec<_>>()
        .join(", ");
    if targets.iter().any(TargetHealth::is_healthy) {
        HealthProbeResult::healthy(detail)
    } else {
        HealthProbeResult::pending(detail)
    }
}

/// Image and optional command override for the task definition.
async fn release_image(ctx: &mut RunContext<'_>) -> Result<(String, Option<Vec<String>>)> {
    if !ctx.images.available().await {
        ctx.reporter.warn(format!(
            "Image builder {} unavailable; the container will fetch and build the source at start",
            ctx.images.name()
        ));
        let (image, command) =
            dockerfile::fallback_container(ctx.plan, &ctx.spec.git_url, &ctx.spec.git_branch);
        return Ok((image, Some(command)));
    }

    let registry = ctx
        .provisioner
        .create_registry(&ctx.names.registry())
        .await?;
    let reporter = ctx.reporter;
    let sink = move |line: LogLine| reporter.line(line);
    let image = ctx
        .provisioner
        .build_and_publish_image(
            ctx.images,
            &registry,
            ctx.source_dir.clone(),
            dockerfile::render(ctx.plan),
            &sink,
        )
        .await?;
    ctx.reporter.info(format!("Published image {image}"));
    Ok((image, None))
}

#[async_trait]
impl DeploymentStrategy for DynamicServiceStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Dynamic
    }

    async fn deploy(&self, ctx: &mut RunContext<'_>) -> Result<String> {
        let cluster = ctx
            .provisioner
            .create_compute_cluster(&ctx.names.cluster())
            .await?
            .handle();
        let log_sink = ctx
            .provisioner
            .create_log_sink(&ctx.names.log_sink())
            .await?
            .handle();

        ctx.advance(DeploymentStatus::Building)?;
        if let Some(install) = &ctx.plan.install_command {
            ctx.run_step("install", install).await?;
        }
        if let Some(generate) = &ctx.plan.orm_generate_command {
            ctx.run_step("orm-generate", generate).await?;
        }
        if let Some(sync) = &ctx.plan.schema_sync {
            if !ctx.runtime_env.contains_key("DATABASE_URL") {
                return Err(Error::Internal(
                    "schema sync requested without a database connection".to_string(),
                ));
            }
            ctx.run_step("schema-sync", sync.command()).await?;
        }
        if let Some(build) = &ctx.plan.build_command {
            ctx.run_step("build", build).await?;
        }
        let (image, command) = release_image(ctx).await?;

        ctx.advance(DeploymentStatus::Deploying)?;
        let network = &ctx.settings.network;
        let load_balancer = ctx
            .provisioner
            .create_load_balancer(&ctx.names.load_balancer(), network)
            .await?;
        let target_group = ctx
            .provisioner
            .create_target_group(
                &ctx.names.target_group(),
                ctx.plan.port,
                network.vpc_id.as_deref(),
            )
            .await?
            .handle();
        ctx.provisioner
            .create_listener(
                &ctx.names.listener(),
                &load_balancer.handle(),
                &target_group,
                ctx.settings.listener_port,
            )
            .await?;

        let mut request =
            TaskDefinitionRequest::new(ctx.names.task_definition(), image, ctx.plan.port);
        request.command = command;
        request.env = ctx.runtime_env.clone();
        let task_definition = ctx
            .provisioner
            .create_task_definition(request, &log_sink)
            .await?
            .handle();
        ctx.provisioner
            .create_service(
                &ctx.names.service(),
                &cluster,
                &task_definition,
                &target_group,
                ctx.plan.port,
                network,
            )
            .await?;

        ctx.advance(DeploymentStatus::HealthChecking)?;
        let provisioner = &*ctx.provisioner;
        let target_group = &target_group;
        poll_until_ready("targets", ctx.settings.target_poll, ctx.reporter, move || async move {
            let targets = provisioner.target_health(target_group).await?;
            Ok(describe_targets(&targets))
        })
        .await?;

        let dns = load_balancer
            .attribute("dns_name")
            .unwrap_or(load_balancer.provider_id.as_str());
        Ok(format!("http://{dns}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(state: &str, reason: Option<&str>) -> TargetHealth {
        TargetHealth {
            target_id: "10.0.1.10".into(),
            state: state.into(),
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_no_targets_is_pending() {
        let result = describe_targets(&[]);
        assert!(!result.healthy);
        assert_eq!(result.detail, "no targets registered");
    }

    #[test]
    fn test_any_healthy_target_passes() {
        let result = describe_targets(&[
            target("unhealthy", Some("Target.FailedHealthChecks")),
            target("healthy", None),
        ]);
        assert!(result.healthy);
    }

    #[test]
    fn test_detail_carries_provider_reason() {
        let result = describe_targets(&[target("initial", Some("Elb.RegistrationInProgress"))]);
        assert!(!result.healthy);
        assert_eq!(
            result.detail,
            "10.0.1.10: initial (Elb.RegistrationInProgress)"
        );
    }
}
