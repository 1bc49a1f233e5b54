//! Deployment spec, framework and status types.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::plan::Strategy;
use crate::{DeploymentId, Error, ProjectId, Result};

/// A framework the platform knows how to build and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    #[serde(rename = "static")]
    Static,
    #[serde(rename = "vite")]
    Vite,
    #[serde(rename = "nextjs")]
    NextJs,
    #[serde(rename = "nextjs-prisma")]
    NextJsPrisma,
    #[serde(rename = "nodejs")]
    NodeJs,
    #[serde(rename = "nodejs-prisma")]
    NodeJsPrisma,
    #[serde(rename = "laravel")]
    Laravel,
}

impl Framework {
    pub const ALL: [Framework; 7] = [
        Framework::Static,
        Framework::Vite,
        Framework::NextJs,
        Framework::NextJsPrisma,
        Framework::NodeJs,
        Framework::NodeJsPrisma,
        Framework::Laravel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Static => "static",
            Framework::Vite => "vite",
            Framework::NextJs => "nextjs",
            Framework::NextJsPrisma => "nextjs-prisma",
            Framework::NodeJs => "nodejs",
            Framework::NodeJsPrisma => "nodejs-prisma",
            Framework::Laravel => "laravel",
        }
    }

    /// Static framework → strategy table.
    pub fn strategy(&self) -> Strategy {
        match self {
            Framework::Static | Framework::Vite => Strategy::Static,
            _ => Strategy::Dynamic,
        }
    }

    /// Frameworks that cannot run without a database.
    pub fn requires_database(&self) -> bool {
        matches!(self, Framework::Laravel)
    }

    pub fn uses_orm(&self) -> bool {
        matches!(self, Framework::NextJsPrisma | Framework::NodeJsPrisma)
    }

    pub fn is_javascript(&self) -> bool {
        !matches!(self, Framework::Laravel | Framework::Static)
    }

    /// The ORM-backed variant of a JS server framework, if there is one.
    pub fn with_orm(self) -> Self {
        match self {
            Framework::NextJs => Framework::NextJsPrisma,
            Framework::NodeJs => Framework::NodeJsPrisma,
            other => other,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Framework::Laravel | Framework::Static => 80,
            _ => 3000,
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Framework {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Framework::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| Error::Classification(format!("unsupported framework: {s}")))
    }
}

/// The framework as requested: either declared, or left to detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "framework")]
pub enum FrameworkHint {
    Auto,
    Explicit(Framework),
}

impl FrameworkHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkHint::Auto => "auto",
            FrameworkHint::Explicit(f) => f.as_str(),
        }
    }
}

/// Managed database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Postgresql,
    Mysql,
}

impl Database {
    pub fn as_str(&self) -> &'static str {
        match self {
            Database::Postgresql => "postgresql",
            Database::Mysql => "mysql",
        }
    }

    /// Engine name understood by managed database services.
    pub fn engine(&self) -> &'static str {
        match self {
            Database::Postgresql => "postgres",
            Database::Mysql => "mysql",
        }
    }

    /// URL scheme for connection strings.
    pub fn scheme(&self) -> &'static str {
        match self {
            Database::Postgresql => "postgresql",
            Database::Mysql => "mysql",
        }
    }

    pub fn default_database_name(&self) -> &'static str {
        match self {
            Database::Postgresql => "postgres",
            Database::Mysql => "app",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Database::Postgresql => 5432,
            Database::Mysql => 3306,
        }
    }

    /// Laravel's `DB_CONNECTION` driver name.
    pub fn laravel_driver(&self) -> &'static str {
        match self {
            Database::Postgresql => "pgsql",
            Database::Mysql => "mysql",
        }
    }
}

impl std::fmt::Display for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Database {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgresql" | "postgres" => Ok(Database::Postgresql),
            "mysql" => Ok(Database::Mysql),
            other => Err(Error::Validation(format!("unsupported database: {other}"))),
        }
    }
}

/// A single user-supplied environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Canonical, validated description of one deployment request.
///
/// Immutable once the pipeline starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub project_id: ProjectId,
    pub deployment_id: DeploymentId,
    pub name: String,
    pub git_url: Url,
    pub git_branch: String,
    pub framework: FrameworkHint,
    pub database: Option<Database>,
    pub env_vars: Vec<EnvVar>,
    pub subdomain: String,
    /// Known up front for declared frameworks; refined by classification for `auto`.
    pub needs_database: bool,
    /// `None` until classification when the framework is `auto`.
    pub strategy: Option<Strategy>,
}

impl DeploymentSpec {
    /// Look up a user-supplied environment entry; the last occurrence wins.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env_vars
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }
}

/// Lifecycle status of a deployment attempt.
///
/// Transitions are strictly forward, except that `Failed` and `RolledBack`
/// are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Cloning,
    Provisioning,
    Building,
    Deploying,
    HealthChecking,
    Completed,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::HealthChecking => "health_checking",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }

    fn rank(&self) -> u8 {
        match self {
            DeploymentStatus::Queued => 0,
            DeploymentStatus::Cloning => 1,
            DeploymentStatus::Provisioning => 2,
            DeploymentStatus::Building => 3,
            DeploymentStatus::Deploying => 4,
            DeploymentStatus::HealthChecking => 5,
            DeploymentStatus::Completed => 6,
            DeploymentStatus::Failed | DeploymentStatus::RolledBack => 7,
        }
    }

    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            DeploymentStatus::Failed | DeploymentStatus::RolledBack => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
