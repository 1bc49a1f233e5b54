//! Logical resource names.
//!
//! Long-lived infrastructure is named per project so redeployments reuse it;
//! task definitions are named per run.

use shipyard_core::{DeploymentId, ProjectId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    prefix: String,
    deployment: String,
}

impl ResourceNames {
    pub fn new(project_id: &ProjectId, deployment_id: &DeploymentId) -> Self {
        Self {
            prefix: project_id.resource_prefix(),
            deployment: deployment_id.as_str().to_ascii_lowercase(),
        }
    }

    fn named(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix, suffix)
    }

    pub fn cluster(&self) -> String {
        self.named("cluster")
    }

    pub fn service(&self) -> String {
        self.named("service")
    }

    pub fn task_definition(&self) -> String {
        format!("{}-task-{}", self.prefix, self.deployment)
    }

    pub fn registry(&self) -> String {
        self.named("registry")
    }

    pub fn log_sink(&self) -> String {
        self.named("logs")
    }

    pub fn load_balancer(&self) -> String {
        self.named("alb")
    }

    pub fn target_group(&self) -> String {
        self.named("tg")
    }

    pub fn listener(&self) -> String {
        self.named("listener")
    }

    pub fn static_hosting(&self) -> String {
        self.named("static-hosting")
    }

    pub fn distribution(&self) -> String {
        self.named("cdn")
    }

    pub fn database(&self) -> String {
        self.named("db")
    }

    pub fn database_secret(&self) -> String {
        self.named("db-credentials")
    }

    pub fn env_secret(&self) -> String {
        self.named("env")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> ResourceNames {
        ResourceNames::new(
            &ProjectId::new("My_Project").unwrap(),
            &DeploymentId::new("Dep-42").unwrap(),
        )
    }

    #[test]
    fn test_per_project_names_are_stable_across_runs() {
        let a = names();
        let b = ResourceNames::new(
            &ProjectId::new("My_Project").unwrap(),
            &DeploymentId::new("dep-43").unwrap(),
        );
        assert_eq!(a.cluster(), "my-project-cluster");
        assert_eq!(a.cluster(), b.cluster());
        assert_eq!(a.static_hosting(), "my-project-static-hosting");
        assert_eq!(a.database_secret(), "my-project-db-credentials");
    }

    #[test]
    fn test_task_definition_is_per_run() {
        assert_eq!(names().task_definition(), "my-project-task-dep-42");
    }
}
