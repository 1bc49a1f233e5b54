//! The deployment state machine.

use chrono::Utc;
use serde::Serialize;
use shipyard_core::deployment::{Database, DeploymentSpec, DeploymentStatus, Framework};
use shipyard_core::executor::{CommandRunner, ImageBuilder, LogLine};
use shipyard_core::plan::BuildPlan;
use shipyard_core::provider::CloudProvider;
use shipyard_core::report::{ProjectState, ProjectStatusUpdate};
use shipyard_core::secret::SecretValue;
use shipyard_core::{DeploymentId, Error, ErrorKind, ProjectId, Result};
use shipyard_executor::git;
use shipyard_provisioner::{Provisioner, ResourceNames};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::classifier;
use crate::context::{PipelineSettings, RunContext, base_runtime_env};
use crate::database::{database_env, provision_database};
use crate::reporter::Reporter;
use crate::rollback::{RollbackError, rollback};
use crate::status::StatusTracker;
use crate::strategy;

/// The JSON document printed when a run ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub success: bool,
    pub url: Option<String>,
    pub project_id: ProjectId,
    pub deployment_id: DeploymentId,
    pub framework: Option<Framework>,
    pub database: Option<Database>,
    pub deployment_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollback_errors: Vec<RollbackError>,
    /// No real resources were touched; `url` points nowhere.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    /// Every status the run passed through.
    #[serde(skip)]
    pub history: Vec<DeploymentStatus>,
}

impl DeploymentResult {
    /// Result for a request refused before the pipeline started.
    pub fn rejected(project_id: ProjectId, deployment_id: DeploymentId, error: &Error) -> Self {
        Self {
            success: false,
            url: None,
            project_id,
            deployment_id,
            framework: None,
            database: None,
            deployment_type: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            rollback_errors: Vec::new(),
            dry_run: false,
            history: Vec::new(),
        }
    }

    /// Mark the result as produced against the simulated provider.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Runs one deployment from checkout to a terminal status.
pub struct DeploymentPipeline {
    cloud: Arc<dyn CloudProvider>,
    runner: Arc<dyn CommandRunner>,
    images: Arc<dyn ImageBuilder>,
    reporter: Reporter,
    settings: PipelineSettings,
}

impl DeploymentPipeline {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        runner: Arc<dyn CommandRunner>,
        images: Arc<dyn ImageBuilder>,
        reporter: Reporter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cloud,
            runner,
            images,
            reporter,
            settings,
        }
    }

    /// Run `spec` to completion.
    ///
    /// Never fails: errors are reported as a `failed` status and carried in
    /// the result. Anything this run created is deleted before returning on
    /// failure.
    pub async fn run(&self, spec: &DeploymentSpec) -> DeploymentResult {
        let reporter = &self.reporter;
        info!(
            deployment_id = %spec.deployment_id,
            project_id = %spec.project_id,
            framework = spec.framework.as_str(),
            "Starting deployment"
        );

        let mut status = StatusTracker::new(reporter.clone());
        let mut provisioner = Provisioner::new(self.cloud.clone(), spec.deployment_id.clone());
        let mut plan = None;
        let source_dir = self.settings.work_dir.join(spec.deployment_id.as_str());

        let outcome = self
            .execute(spec, &source_dir, &mut provisioner, &mut status, &mut plan)
            .await;

        let mut result = DeploymentResult {
            success: false,
            url: None,
            project_id: spec.project_id.clone(),
            deployment_id: spec.deployment_id.clone(),
            framework: plan.as_ref().map(|p: &BuildPlan| p.framework),
            database: plan
                .as_ref()
                .filter(|p| p.needs_database)
                .and(spec.database),
            deployment_type: plan.as_ref().map(|p| p.strategy.deployment_type()),
            error: None,
            error_kind: None,
            rollback_errors: Vec::new(),
            dry_run: self.settings.dry_run,
            history: Vec::new(),
        };

        match outcome {
            Ok(url) => {
                let mut update = reporter.status_update(DeploymentStatus::Completed);
                update.url = Some(url.clone());
                update.framework = result.framework.map(|f| f.to_string());
                update.database = result.database.map(|d| d.to_string());
                match status.advance_with(update) {
                    Ok(()) => {
                        info!(deployment_id = %spec.deployment_id, url = %url, "Deployment completed");
                        reporter.info(format!("Deployment completed: {url}"));
                        result.success = true;
                        result.url = Some(url);
                    }
                    Err(e) => {
                        error!(deployment_id = %spec.deployment_id, error = %e, "Could not complete deployment");
                        result.error = Some(e.to_string());
                        result.error_kind = Some(e.kind());
                    }
                }
            }
            Err(e) => {
                let kind = e.kind();
                error!(deployment_id = %spec.deployment_id, kind = %kind, error = %e, "Deployment failed");
                reporter.error(format!("Deployment failed ({kind}): {e}"));

                if provisioner.has_changes() {
                    result.rollback_errors = rollback(&provisioner, reporter).await;
                    if !result.rollback_errors.is_empty() {
                        warn!(
                            deployment_id = %spec.deployment_id,
                            count = result.rollback_errors.len(),
                            "Rollback left resources behind"
                        );
                    }
                }

                let mut update = reporter.status_update(DeploymentStatus::Failed);
                update.error = Some(e.to_string());
                update.framework = result.framework.map(|f| f.to_string());
                if let Err(e) = status.advance_with(update) {
                    warn!(deployment_id = %spec.deployment_id, error = %e, "Could not record failure");
                }
                result.error = Some(e.to_string());
                result.error_kind = Some(kind);
            }
        }

        reporter.project(ProjectStatusUpdate {
            project_id: spec.project_id.clone(),
            status: if result.success {
                ProjectState::Deployed
            } else {
                ProjectState::Failed
            },
            url: result.url.clone(),
            error: result.error.clone(),
            last_deployment: Utc::now(),
        });
        reporter.heartbeat();

        if let Err(e) = tokio::fs::remove_dir_all(&source_dir).await {
            debug!(dir = %source_dir.display(), error = %e, "Workspace not removed");
        }

        result.history = status.history().to_vec();
        result
    }

    async fn execute(
        &self,
        spec: &DeploymentSpec,
        source_dir: &Path,
        provisioner: &mut Provisioner,
        status: &mut StatusTracker,
        plan_slot: &mut Option<BuildPlan>,
    ) -> Result<String> {
        let reporter = &self.reporter;

        status.advance(DeploymentStatus::Cloning)?;
        reporter.info(format!(
            "Cloning {} (branch {})",
            git::redact_url(&spec.git_url),
            spec.git_branch
        ));
        let sink = |line: LogLine| reporter.line(line);
        git::checkout(
            self.runner.as_ref(),
            &spec.git_url,
            &spec.git_branch,
            source_dir,
            &sink,
        )
        .await?;

        status.advance(DeploymentStatus::Provisioning)?;
        let plan = &*plan_slot.insert(classifier::classify(source_dir, spec)?);
        reporter.info(format!(
            "Detected {} ({} deployment)",
            plan.framework,
            plan.strategy.deployment_type()
        ));

        let mut ctx = RunContext {
            spec,
            plan,
            source_dir: source_dir.to_path_buf(),
            names: ResourceNames::new(&spec.project_id, &spec.deployment_id),
            provisioner,
            runtime_env: base_runtime_env(spec, plan),
            runner: self.runner.as_ref(),
            images: self.images.as_ref(),
            reporter,
            settings: &self.settings,
            status,
        };

        if plan.needs_database {
            let engine = spec.database.ok_or_else(|| {
                Error::Validation(format!("{} requires a database", plan.framework))
            })?;
            let creds = provision_database(&mut ctx, engine).await?;
            ctx.runtime_env.extend(database_env(&creds, plan.framework));
        }

        if !spec.env_vars.is_empty() {
            let values: BTreeMap<String, String> = spec
                .env_vars
                .iter()
                .map(|e| (e.key.clone(), e.value.clone()))
                .collect();
            ctx.provisioner
                .create_secret(&ctx.names.env_secret(), SecretValue::Map(values))
                .await?;
        }

        let strategy = strategy::for_plan(plan);
        debug!(strategy = ?strategy.strategy(), "Selected deployment strategy");
        strategy.deploy(&mut ctx).await
    }
}
