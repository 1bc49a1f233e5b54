use async_trait::async_trait;
use shipyard_core::Result;
use shipyard_core::deployment::DeploymentStatus;
use shipyard_core::plan::Strategy;

use super::{DeploymentStrategy, install_and_build};
use crate::context::RunContext;

/// Object storage configured for website hosting, fronted by a CDN.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticStrategy;

#[async_trait]
impl DeploymentStrategy for StaticStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Static
    }

    async fn deploy(&self, ctx: &mut RunContext<'_>) -> Result<String> {
        let store_name = ctx.names.static_hosting();
        ctx.reporter.info(format!("Creating static hosting store {store_name}"));
        let store = ctx
            .provisioner
            .create_object_store(&store_name, &ctx.settings.region)
            .await?
            .handle();
        let website = ctx.provisioner.configure_static_hosting(&store).await?;

        ctx.advance(DeploymentStatus::Building)?;
        install_and_build(ctx).await?;

        let output = ctx.plan.output.resolve(&ctx.source_dir)?;
        ctx.reporter.info(format!("Uploading {}", output.display()));
        let summary = ctx
            .provisioner
            .upload_tree(&store, &output, ctx.settings.upload_concurrency)
            .await?;
        ctx.reporter.info(format!(
            "Uploaded {} files ({} bytes)",
            summary.files, summary.bytes
        ));

        let distribution = ctx
            .provisioner
            .create_cdn_distribution(&ctx.names.distribution(), &website)
            .await?;
        ctx.provisioner.attach_public_read_policy(&store).await?;

        let domain = distribution
            .attribute("domain_name")
            .unwrap_or(distribution.provider_id.as_str());
        Ok(format!("https://{domain}"))
    }
}
