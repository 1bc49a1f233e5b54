//! Deployment strategies.
//!
//! A strategy takes a classified, checked-out tree from `PROVISIONING` to a
//! public URL. The pipeline picks one per run from the build plan.

mod dynamic;
mod static_site;

pub use dynamic::DynamicServiceStrategy;
pub use static_site::StaticStrategy;

use async_trait::async_trait;
use shipyard_core::Result;
use shipyard_core::plan::{BuildPlan, Strategy};

use crate::context::RunContext;

/// Trait for the ways a build plan can be served.
#[async_trait]
pub trait DeploymentStrategy: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Provision, build and release; returns the public URL.
    async fn deploy(&self, ctx: &mut RunContext<'_>) -> Result<String>;
}

/// The strategy serving `plan`.
pub fn for_plan(plan: &BuildPlan) -> Box<dyn DeploymentStrategy> {
    match plan.strategy {
        Strategy::Static => Box::new(StaticStrategy),
        Strategy::Dynamic => Box::new(DynamicServiceStrategy),
    }
}

/// Run the plan's install and build steps, in that order.
async fn install_and_build(ctx: &RunContext<'_>) -> Result<()> {
    if let Some(install) = &ctx.plan.install_command {
        ctx.run_step("install", install).await?;
    }
    if let Some(build) = &ctx.plan.build_command {
        ctx.run_step("build", build).await?;
    }
    Ok(())
}
