//! Build plans derived from a classified source tree.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::deployment::Framework;
use crate::{Error, Result};

/// How a deployment is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    /// Object storage behind a CDN.
    Static,
    /// A running compute service behind a load balancer.
    Dynamic,
}

impl Strategy {
    /// Name reported as `deploymentType` in the result document.
    pub fn deployment_type(&self) -> &'static str {
        match self {
            Strategy::Static => "static",
            Strategy::Dynamic => "service",
        }
    }
}

/// How an ORM-backed plan brings the database schema up to date.
///
/// Exactly one applies: migrations when a migrations directory exists,
/// otherwise a direct schema push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSync {
    Migrate { command: String },
    Push { command: String },
}

impl SchemaSync {
    pub fn command(&self) -> &str {
        match self {
            SchemaSync::Migrate { command } | SchemaSync::Push { command } => command,
        }
    }
}

/// Where the build output lives, relative to the checkout root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLocation {
    /// A fixed directory that must exist after the build.
    Fixed(PathBuf),
    /// The first candidate that exists, falling back to the checkout root.
    FirstExisting(Vec<PathBuf>),
}

impl OutputLocation {
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        match self {
            OutputLocation::Fixed(dir) => {
                let path = root.join(dir);
                if path.is_dir() {
                    Ok(path)
                } else {
                    Err(Error::Build(format!(
                        "build output directory {} not found",
                        dir.display()
                    )))
                }
            }
            OutputLocation::FirstExisting(candidates) => Ok(candidates
                .iter()
                .map(|c| root.join(c))
                .find(|p| p.is_dir())
                .unwrap_or_else(|| root.to_path_buf())),
        }
    }
}

/// Derived build and run instructions for a classified framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub framework: Framework,
    pub strategy: Strategy,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub output: OutputLocation,
    pub port: u16,
    pub needs_database: bool,
    pub uses_orm: bool,
    /// Client generation step for ORM-backed plans (e.g. `npx prisma generate`).
    pub orm_generate_command: Option<String>,
    pub schema_sync: Option<SchemaSync>,
}
