//! Per-run state shared by the pipeline stages and strategies.

use shipyard_config::{PollPolicy, SystemConfig};
use shipyard_core::deployment::{DeploymentSpec, DeploymentStatus};
use shipyard_core::executor::{CommandRunner, CommandSpec, ImageBuilder, LogLine};
use shipyard_core::plan::BuildPlan;
use shipyard_core::provider::NetworkConfig;
use shipyard_core::{Error, Result};
use shipyard_provisioner::{Provisioner, ResourceNames};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::reporter::Reporter;
use crate::status::StatusTracker;

/// Tunables the pipeline takes from the system configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Checkouts land in `<work_dir>/<deployment id>`.
    pub work_dir: PathBuf,
    pub region: String,
    pub network: NetworkConfig,
    pub database_poll: PollPolicy,
    pub target_poll: PollPolicy,
    pub upload_concurrency: usize,
    pub command_timeout: Option<Duration>,
    /// Port the load balancer listens on.
    pub listener_port: u16,
    /// Set when the provider is simulated; results are marked accordingly.
    pub dry_run: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("shipyard-builds"),
            region: shipyard_config::system::DEFAULT_REGION.to_string(),
            network: NetworkConfig::default(),
            database_poll: PollPolicy::DATABASE,
            target_poll: PollPolicy::TARGETS,
            upload_concurrency: shipyard_config::system::DEFAULT_UPLOAD_CONCURRENCY,
            command_timeout: None,
            listener_port: 80,
            dry_run: false,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            region: config.region.clone(),
            network: config.network.clone(),
            database_poll: config.database_poll,
            target_poll: config.target_poll,
            upload_concurrency: config.upload_concurrency,
            command_timeout: config.command_timeout,
            dry_run: config.provider.kind.is_dry_run(),
            ..Self::default()
        }
    }
}

/// Environment handed to build steps and the runtime before any database is
/// merged in: the user's entries plus `PORT`.
pub fn base_runtime_env(spec: &DeploymentSpec, plan: &BuildPlan) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = spec
        .env_vars
        .iter()
        .map(|e| (e.key.clone(), e.value.clone()))
        .collect();
    env.entry("PORT".to_string())
        .or_insert_with(|| plan.port.to_string());
    env
}

/// Everything a strategy needs for one run.
pub struct RunContext<'a> {
    pub spec: &'a DeploymentSpec,
    pub plan: &'a BuildPlan,
    /// Root of the checked-out tree.
    pub source_dir: PathBuf,
    pub names: ResourceNames,
    pub provisioner: &'a mut Provisioner,
    /// Environment for build steps and the running service.
    pub runtime_env: BTreeMap<String, String>,
    pub runner: &'a dyn CommandRunner,
    pub images: &'a dyn ImageBuilder,
    pub reporter: &'a Reporter,
    pub settings: &'a PipelineSettings,
    pub status: &'a mut StatusTracker,
}

impl RunContext<'_> {
    pub fn advance(&mut self, next: DeploymentStatus) -> Result<()> {
        self.status.advance(next)
    }

    /// Run one build step in the checkout with the runtime environment.
    pub async fn run_step(&self, label: &str, command: &str) -> Result<()> {
        self.reporter.info(format!("{label}: {command}"));
        let spec = CommandSpec::new(command, &self.source_dir)
            .with_env(self.runtime_env.clone())
            .with_timeout(self.settings.command_timeout);
        let reporter = self.reporter;
        let sink = move |line: LogLine| reporter.line(line);

        let status = self.runner.run(&spec, &sink).await?;
        if status.success() {
            Ok(())
        } else {
            let code = status
                .code
                .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            Err(Error::Build(format!("{label} failed: `{command}` exited with {code}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_config::{DeploymentContext, DeploymentRequest, normalize};
    use shipyard_core::deployment::Framework;
    use shipyard_core::plan::{OutputLocation, Strategy};
    use shipyard_core::{DeploymentId, ProjectId};

    fn spec(env: &str) -> DeploymentSpec {
        let request = DeploymentRequest::from_json(&format!(
            r#"{{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs","envVars":{env}}}"#
        ))
        .unwrap();
        let context = DeploymentContext {
            deployment_id: DeploymentId::new("dep-1").unwrap(),
            project_id: ProjectId::new("proj-1").unwrap(),
            subdomain: "api".into(),
        };
        normalize(&request, &context).unwrap()
    }

    fn plan() -> BuildPlan {
        BuildPlan {
            framework: Framework::NodeJs,
            strategy: Strategy::Dynamic,
            install_command: None,
            build_command: None,
            start_command: None,
            output: OutputLocation::FirstExisting(vec![]),
            port: 3000,
            needs_database: false,
            uses_orm: false,
            orm_generate_command: None,
            schema_sync: None,
        }
    }

    #[test]
    fn test_base_env_adds_port() {
        let env = base_runtime_env(&spec(r#"[{"key":"API_TOKEN","value":"x"}]"#), &plan());
        assert_eq!(env.get("API_TOKEN").map(String::as_str), Some("x"));
        assert_eq!(env.get("PORT").map(String::as_str), Some("3000"));
    }

    #[test]
    fn test_user_port_is_kept() {
        let env = base_runtime_env(&spec(r#"[{"key":"PORT","value":8080}]"#), &plan());
        assert_eq!(env.get("PORT").map(String::as_str), Some("8080"));
    }

    #[test]
    fn test_settings_from_config() {
        let config = SystemConfig::from_lookup(|key| match key {
            "DEPLOYMENT_ID" => Some("dep-1".into()),
            "PROJECT_ID" => Some("proj-1".into()),
            "SUBDOMAIN" => Some("api".into()),
            "SHIPYARD_WORK_DIR" => Some("/var/shipyard".into()),
            "SHIPYARD_PROVIDER" => Some("http".into()),
            "SHIPYARD_PROVIDER_URL" => Some("http://provider.internal".into()),
            _ => None,
        })
        .unwrap();
        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.work_dir, PathBuf::from("/var/shipyard"));
        assert_eq!(settings.target_poll, PollPolicy::TARGETS);
        assert_eq!(settings.listener_port, 80);
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_memory_provider_marks_dry_run() {
        let config = SystemConfig::from_lookup(|key| match key {
            "DEPLOYMENT_ID" => Some("dep-1".into()),
            "PROJECT_ID" => Some("proj-1".into()),
            "SUBDOMAIN" => Some("api".into()),
            "SHIPYARD_PROVIDER" => Some("memory".into()),
            _ => None,
        })
        .unwrap();
        assert!(PipelineSettings::from_config(&config).dry_run);
    }
}
