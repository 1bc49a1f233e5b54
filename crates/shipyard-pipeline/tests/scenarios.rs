//! End-to-end pipeline runs against the in-memory cloud.

use async_trait::async_trait;
use shipyard_config::{DeploymentContext, DeploymentRequest, PollPolicy, normalize};
use shipyard_core::deployment::{DeploymentSpec, DeploymentStatus};
use shipyard_core::executor::{
    CommandRunner, CommandSpec, ExitStatus, ImageBuildRequest, ImageBuilder, LineSink, LogLine,
    LogStream,
};
use shipyard_core::provider::RegistryCredentials;
use shipyard_core::report::{ControlPlane, LogRecord, ProjectStatusUpdate, StatusUpdate};
use shipyard_core::resource::ResourceKind;
use shipyard_core::{DeploymentId, ErrorKind, ProjectId, Result};
use shipyard_pipeline::{DeploymentPipeline, PipelineSettings, Reporter};
use shipyard_provisioner::{InMemoryCloud, Provisioner};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const STATIC_SITE: &[(&str, &str)] = &[
    ("index.html", "<h1>hello</h1>"),
    ("css/site.css", "body { margin: 0 }"),
];

const EXPRESS_APP: &[(&str, &str)] = &[
    (
        "package.json",
        r#"{"dependencies":{"express":"4"},"scripts":{"start":"node server.js"}}"#,
    ),
    ("server.js", "require('express')().listen(3000)"),
];

const PRISMA_APP: &[(&str, &str)] = &[
    (
        "package.json",
        r#"{"dependencies":{"express":"4","@prisma/client":"5"},"devDependencies":{"prisma":"5"},"scripts":{"build":"tsc","start":"node dist/index.js"}}"#,
    ),
    ("prisma/schema.prisma", "datasource db { provider = \"postgresql\" }"),
];

/// Pretends to clone by writing fixture files, and records every command.
struct ScriptedRunner {
    files: Vec<(String, String)>,
    fail_on: Option<String>,
    calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl ScriptedRunner {
    fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, command: &str) -> Self {
        self.fail_on = Some(command.to_string());
        self
    }

    fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    fn env_of(&self, command: &str) -> Option<BTreeMap<String, String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == command)
            .map(|(_, env)| env.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, spec: &CommandSpec, on_line: LineSink<'_>) -> Result<ExitStatus> {
        self.calls
            .lock()
            .unwrap()
            .push((spec.command.clone(), spec.env.clone()));

        if spec.command.starts_with("git clone") {
            let dest = PathBuf::from(spec.command.rsplit('\'').nth(1).unwrap());
            for (path, content) in &self.files {
                let full = dest.join(path);
                std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                std::fs::write(full, content).unwrap();
            }
            on_line(LogLine::new(LogStream::Stderr, "Cloning into 'app'..."));
            return Ok(ExitStatus { code: Some(0) });
        }

        if self.fail_on.as_deref() == Some(spec.command.as_str()) {
            on_line(LogLine::new(LogStream::Stderr, "error TS2304: Cannot find name"));
            return Ok(ExitStatus { code: Some(2) });
        }
        on_line(LogLine::new(LogStream::Stdout, format!("ran {}", spec.command)));
        Ok(ExitStatus { code: Some(0) })
    }
}

struct FakeImages {
    available: bool,
    built: Mutex<Vec<String>>,
}

impl FakeImages {
    fn new(available: bool) -> Self {
        Self {
            available,
            built: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageBuilder for FakeImages {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn available(&self) -> bool {
        self.available
    }

    async fn build(&self, request: &ImageBuildRequest, _: LineSink<'_>) -> Result<()> {
        assert!(request.dockerfile.starts_with("FROM "));
        self.built.lock().unwrap().push(request.tag.clone());
        Ok(())
    }

    async fn push(&self, tag: &str, _: &RegistryCredentials, _: LineSink<'_>) -> Result<String> {
        Ok(tag.to_string())
    }
}

#[derive(Default)]
struct RecordingControl {
    statuses: Mutex<Vec<StatusUpdate>>,
    projects: Mutex<Vec<ProjectStatusUpdate>>,
    logs: Mutex<usize>,
}

#[async_trait]
impl ControlPlane for RecordingControl {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn append_log(&self, _: &LogRecord) -> Result<()> {
        *self.logs.lock().unwrap() += 1;
        Ok(())
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<()> {
        self.statuses.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn update_project(&self, update: &ProjectStatusUpdate) -> Result<()> {
        self.projects.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn heartbeat(&self, _: &DeploymentId, _: &ProjectId) -> Result<()> {
        Ok(())
    }
}

impl RecordingControl {
    fn status_sequence(&self) -> Vec<DeploymentStatus> {
        self.statuses.lock().unwrap().iter().map(|u| u.status).collect()
    }
}

fn spec(request: &str, deployment_id: &str) -> DeploymentSpec {
    let request = DeploymentRequest::from_json(request).unwrap();
    let context = DeploymentContext {
        deployment_id: DeploymentId::new(deployment_id).unwrap(),
        project_id: ProjectId::new("proj-1").unwrap(),
        subdomain: "demo".into(),
    };
    normalize(&request, &context).unwrap()
}

fn settings(work_dir: &TempDir) -> PipelineSettings {
    PipelineSettings {
        work_dir: work_dir.path().to_path_buf(),
        database_poll: PollPolicy::new(Duration::from_secs(10), 5),
        target_poll: PollPolicy::new(Duration::from_secs(30), 3),
        ..PipelineSettings::default()
    }
}

struct Harness {
    cloud: Arc<InMemoryCloud>,
    runner: Arc<ScriptedRunner>,
    images: Arc<FakeImages>,
    control: Arc<RecordingControl>,
    work_dir: TempDir,
}

impl Harness {
    fn new(runner: ScriptedRunner, images_available: bool) -> Self {
        Self {
            cloud: Arc::new(InMemoryCloud::new()),
            runner: Arc::new(runner),
            images: Arc::new(FakeImages::new(images_available)),
            control: Arc::new(RecordingControl::default()),
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    async fn deploy(&self, spec: &DeploymentSpec) -> shipyard_pipeline::DeploymentResult {
        self.deploy_with(spec, settings(&self.work_dir)).await
    }

    async fn deploy_with(
        &self,
        spec: &DeploymentSpec,
        settings: PipelineSettings,
    ) -> shipyard_pipeline::DeploymentResult {
        let (reporter, relay) = Reporter::spawn(
            self.control.clone(),
            spec.deployment_id.clone(),
            spec.project_id.clone(),
        );
        let pipeline = DeploymentPipeline::new(
            self.cloud.clone(),
            self.runner.clone(),
            self.images.clone(),
            reporter,
            settings,
        );
        let result = pipeline.run(spec).await;
        drop(pipeline);
        relay.finish().await;
        result
    }
}

#[tokio::test(start_paused = true)]
async fn test_static_site_is_served_from_cdn() {
    let harness = Harness::new(ScriptedRunner::new(STATIC_SITE), true);
    let spec = spec(
        r#"{"name":"site","gitUrl":"https://github.com/acme/site.git","framework":"static"}"#,
        "dep-1",
    );

    let result = harness.deploy(&spec).await;

    assert!(result.success, "{:?}", result.error);
    let url = result.url.clone().unwrap();
    assert!(url.starts_with("https://") && url.contains(".cdn."), "{url}");
    assert_eq!(result.deployment_type, Some("static"));
    assert_eq!(
        harness.control.status_sequence(),
        vec![
            DeploymentStatus::Queued,
            DeploymentStatus::Cloning,
            DeploymentStatus::Provisioning,
            DeploymentStatus::Building,
            DeploymentStatus::Completed,
        ]
    );
    assert_eq!(result.history, harness.control.status_sequence());

    let store = "proj-1-static-hosting";
    assert_eq!(
        harness.cloud.object_keys(store).await,
        vec!["css/site.css", "index.html"]
    );
    assert!(harness.cloud.is_public(store).await);

    for kind in [
        ResourceKind::Cluster,
        ResourceKind::Service,
        ResourceKind::Database,
        ResourceKind::LoadBalancer,
    ] {
        assert_eq!(harness.cloud.create_calls(kind).await, 0, "{kind}");
    }

    assert!(*harness.control.logs.lock().unwrap() > 0);
    let projects = harness.control.projects.lock().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].url.as_deref(), Some(url.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_build_rolls_back_database_and_secret() {
    let runner = ScriptedRunner::new(PRISMA_APP).failing_on("npm run build");
    let harness = Harness::new(runner, true);
    harness
        .cloud
        .script_database_states(["creating", "backing-up"])
        .await;
    let spec = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs-prisma","db":"postgresql"}"#,
        "dep-1",
    );

    let result = harness.deploy(&spec).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Build));
    assert!(result.rollback_errors.is_empty());
    assert_eq!(
        *harness.control.status_sequence().last().unwrap(),
        DeploymentStatus::Failed
    );

    let deleted: Vec<_> = harness
        .cloud
        .deleted()
        .await
        .into_iter()
        .map(|h| (h.kind, h.name))
        .collect();
    assert!(deleted.contains(&(ResourceKind::Database, "proj-1-db".to_string())));
    assert!(deleted.contains(&(ResourceKind::Secret, "proj-1-db-credentials".to_string())));
    assert!(harness.cloud.resources().await.is_empty());

    // The schema push ran with a connection string already in place.
    let env = harness.runner.env_of("npx prisma db push").unwrap();
    assert!(env["DATABASE_URL"].starts_with("postgresql://shipyard_admin:"));

    let commands = harness.runner.commands();
    let push = commands.iter().position(|c| c == "npx prisma db push").unwrap();
    let build = commands.iter().position(|c| c == "npm run build").unwrap();
    assert!(push < build);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_targets_time_out_and_roll_back() {
    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), false);
    harness.cloud.set_steady_target_state("unhealthy").await;
    let spec = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-1",
    );

    let result = harness.deploy(&spec).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(
        result
            .error
            .as_deref()
            .unwrap()
            .contains("Target.FailedHealthChecks")
    );
    assert_eq!(
        result.history,
        vec![
            DeploymentStatus::Queued,
            DeploymentStatus::Cloning,
            DeploymentStatus::Provisioning,
            DeploymentStatus::Building,
            DeploymentStatus::Deploying,
            DeploymentStatus::HealthChecking,
            DeploymentStatus::Failed,
        ]
    );

    let deleted: Vec<_> = harness
        .cloud
        .deleted()
        .await
        .into_iter()
        .map(|h| h.kind)
        .collect();
    for kind in [
        ResourceKind::Cluster,
        ResourceKind::Service,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
    ] {
        assert_eq!(deleted.iter().filter(|k| **k == kind).count(), 1, "{kind}");
    }
    assert_eq!(deleted.first(), Some(&ResourceKind::Service));
    assert_eq!(deleted.last(), Some(&ResourceKind::Cluster));
    assert!(harness.cloud.resources().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_after_crash_reuses_cluster() {
    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), true);
    let spec = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-1",
    );

    // A previous attempt of the same run died right after creating the cluster.
    let mut crashed = Provisioner::new(harness.cloud.clone(), spec.deployment_id.clone());
    crashed.create_compute_cluster("proj-1-cluster").await.unwrap();

    let result = harness.deploy(&spec).await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.url.as_deref().unwrap().starts_with("http://proj-1-alb-"));
    assert_eq!(harness.cloud.create_calls(ResourceKind::Cluster).await, 2);
    assert_eq!(harness.cloud.resources_of(ResourceKind::Cluster).await.len(), 1);
    assert_eq!(harness.images.built.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_redeploy_keeps_earlier_deployments_resources() {
    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), true);
    let first = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-1",
    );
    assert!(harness.deploy(&first).await.success);
    let before = harness.cloud.resources().await.len();

    harness.cloud.fail_creates_of(ResourceKind::TaskDefinition).await;
    let second = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-2",
    );
    let result = harness.deploy(&second).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Provisioning));
    assert!(harness.cloud.deleted().await.is_empty());
    assert_eq!(harness.cloud.resources().await.len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_unclassifiable_checkout_creates_nothing() {
    let harness = Harness::new(ScriptedRunner::new(&[]), true);
    let spec = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-1",
    );

    // No package.json lands in the checkout, so classification rejects it.
    let result = harness.deploy(&spec).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Classification));
    assert!(harness.cloud.resources().await.is_empty());
    assert!(harness.cloud.deleted().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_env_vars_reach_runtime_and_secret() {
    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), false);
    let spec = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs","envVars":[{"key":"FEATURE_FLAG","value":true}]}"#,
        "dep-1",
    );

    let result = harness.deploy(&spec).await;
    assert!(result.success, "{:?}", result.error);

    let secrets = harness.cloud.resources_of(ResourceKind::Secret).await;
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].name, "proj-1-env");

    let env = harness.runner.env_of("npm install").unwrap();
    assert_eq!(env["FEATURE_FLAG"], "true");
    assert_eq!(env["PORT"], "3000");

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["deploymentType"], "service");
    assert_eq!(json["framework"], "nodejs");
    assert!(json.get("rollbackErrors").is_none());
    assert!(json.get("dryRun").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_simulated_provider_result_is_marked_dry_run() {
    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), true);
    let spec = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-1",
    );
    let settings = PipelineSettings {
        dry_run: true,
        ..settings(&harness.work_dir)
    };

    let result = harness.deploy_with(&spec, settings).await;

    assert!(result.success, "{:?}", result.error);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["dryRun"], true);
    assert!(json["url"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_redeploy_leaves_live_service_on_previous_release() {
    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), true);
    harness.cloud.script_target_states(["initial"]).await;
    let first = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-1",
    );
    let result = harness.deploy(&first).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        harness.cloud.service_task_definition("proj-1-service").await.as_deref(),
        Some("proj-1-task-dep-1")
    );

    harness.cloud.set_steady_target_state("unhealthy").await;
    let second = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs"}"#,
        "dep-2",
    );
    let result = harness.deploy(&second).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.rollback_errors.is_empty());
    assert_eq!(
        harness.cloud.service_task_definition("proj-1-service").await.as_deref(),
        Some("proj-1-task-dep-1")
    );
    let task_definitions: Vec<_> = harness
        .cloud
        .resources_of(ResourceKind::TaskDefinition)
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(task_definitions, vec!["proj-1-task-dep-1"]);
    assert_eq!(harness.cloud.resources_of(ResourceKind::Service).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_redeploy_rewrites_env_secret_and_failure_restores_it() {
    use shipyard_core::provider::CloudProvider;
    use shipyard_core::secret::SecretValue;

    let harness = Harness::new(ScriptedRunner::new(EXPRESS_APP), false);
    let first = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs","envVars":[{"key":"MODE","value":"v1"}]}"#,
        "dep-1",
    );
    assert!(harness.deploy(&first).await.success);

    let second = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs","envVars":[{"key":"MODE","value":"v2"}]}"#,
        "dep-2",
    );
    assert!(harness.deploy(&second).await.success);

    let secret = harness
        .cloud
        .describe(ResourceKind::Secret, "proj-1-env")
        .await
        .unwrap()
        .handle();
    let mode = |value: SecretValue| value.get("MODE").map(str::to_string);
    assert_eq!(
        mode(harness.cloud.read_secret(&secret).await.unwrap()).as_deref(),
        Some("v2")
    );

    harness.cloud.set_steady_target_state("unhealthy").await;
    let third = spec(
        r#"{"name":"api","gitUrl":"https://github.com/acme/api.git","framework":"nodejs","envVars":[{"key":"MODE","value":"v3"}]}"#,
        "dep-3",
    );
    assert!(!harness.deploy(&third).await.success);
    assert_eq!(
        mode(harness.cloud.read_secret(&secret).await.unwrap()).as_deref(),
        Some("v2")
    );
    assert_eq!(
        harness.cloud.service_task_definition("proj-1-service").await.as_deref(),
        Some("proj-1-task-dep-2")
    );
}
