//! Framework classification.
//!
//! Inspects a checked-out tree and turns the requested framework into a
//! [`BuildPlan`]. Detection checks fingerprints in a fixed priority order:
//! PHP build manifest, then bundler config, then the JS package manifest,
//! falling back to a plain static site.

use serde::Deserialize;
use shipyard_core::deployment::{Database, DeploymentSpec, Framework, FrameworkHint};
use shipyard_core::plan::{BuildPlan, OutputLocation, SchemaSync, Strategy};
use shipyard_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LARAVEL_MARKERS: &[&str] = &["artisan", "composer.json"];
const NEXT_CONFIGS: &[&str] = &["next.config.js", "next.config.mjs", "next.config.ts"];
const VITE_CONFIGS: &[&str] = &["vite.config.js", "vite.config.ts", "vite.config.mjs"];
const PRISMA_SCHEMAS: &[&str] = &["prisma/schema.prisma", "schema.prisma"];
const PRISMA_MIGRATIONS: &str = "prisma/migrations";
const NODE_SERVERS: &[&str] = &["express", "koa", "fastify"];
const STATIC_OUTPUT_DIRS: &[&str] = &["dist", "build", "public", "out"];

pub const NPM_INSTALL: &str = "npm install";
pub const NPM_BUILD: &str = "npm run build";
pub const COMPOSER_INSTALL: &str = "composer install --no-dev --optimize-autoloader";
pub const PRISMA_GENERATE: &str = "npx prisma generate";
pub const PRISMA_MIGRATE: &str = "npx prisma migrate deploy";
pub const PRISMA_PUSH: &str = "npx prisma db push";
pub const LARAVEL_MIGRATE: &str = "php artisan migrate --force";
pub const NODE_FALLBACK_START: &str = "node index.js";

/// The parts of `package.json` classification looks at.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageManifest {
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
}

impl PackageManifest {
    fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join("package.json");
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Classification(format!("failed to read package.json: {e}")))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Classification(format!("invalid package.json: {e}")))
    }

    fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    fn script(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(String::as_str)
    }

    /// `start` script, then `dev`, then running the entry file directly.
    fn start_command(&self) -> String {
        if self.script("start").is_some() {
            "npm start".to_string()
        } else if self.script("dev").is_some() {
            "npm run dev".to_string()
        } else {
            NODE_FALLBACK_START.to_string()
        }
    }
}

fn any_exists(root: &Path, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| root.join(c).exists())
}

fn has_prisma_schema(root: &Path) -> bool {
    any_exists(root, PRISMA_SCHEMAS)
}

fn detect_from_manifest(manifest: &PackageManifest, root: &Path) -> Framework {
    let script_mentions = |script: &str, tool: &str| {
        manifest
            .script(script)
            .is_some_and(|body| body.contains(tool))
    };

    if script_mentions("start", "next")
        || manifest.depends_on("next")
        || manifest.depends_on("@next/font")
    {
        return Framework::NextJs;
    }
    if script_mentions("dev", "vite")
        || manifest.depends_on("vite")
        || manifest.depends_on("@vitejs/plugin-react")
    {
        return Framework::Vite;
    }
    if NODE_SERVERS.iter().any(|dep| manifest.depends_on(dep)) {
        return Framework::NodeJs;
    }
    if manifest.depends_on("prisma") || has_prisma_schema(root) {
        return Framework::NodeJsPrisma;
    }
    Framework::NodeJs
}

fn detect(root: &Path, manifest: Option<&PackageManifest>) -> Framework {
    let framework = if any_exists(root, LARAVEL_MARKERS) {
        Framework::Laravel
    } else if any_exists(root, NEXT_CONFIGS) {
        Framework::NextJs
    } else if any_exists(root, VITE_CONFIGS) {
        Framework::Vite
    } else if let Some(manifest) = manifest {
        detect_from_manifest(manifest, root)
    } else {
        Framework::Static
    };

    if framework.is_javascript() && has_prisma_schema(root) {
        framework.with_orm()
    } else {
        framework
    }
}

/// Detect the framework of a checked-out tree.
pub fn detect_framework(root: &Path) -> Result<Framework> {
    ensure_tree(root)?;
    let manifest = PackageManifest::load(root)?;
    Ok(detect(root, manifest.as_ref()))
}

fn ensure_tree(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(Error::Classification(format!(
            "{} is not a directory",
            root.display()
        )))
    }
}

/// A declared framework must match what the tree can actually build.
fn check_declared(
    framework: Framework,
    root: &Path,
    manifest: Option<&PackageManifest>,
) -> Result<()> {
    match framework {
        Framework::Laravel if !any_exists(root, LARAVEL_MARKERS) => Err(Error::Classification(
            "laravel declared but neither artisan nor composer.json exists".to_string(),
        )),
        f if f.is_javascript() && manifest.is_none() => Err(Error::Classification(format!(
            "{f} declared but package.json is missing"
        ))),
        _ => Ok(()),
    }
}

fn parse_port(raw: Option<&str>, framework: Framework) -> Result<u16> {
    match raw.map(str::trim) {
        None | Some("") => Ok(framework.default_port()),
        Some(value) => value
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| Error::Validation(format!("invalid PORT {value:?}"))),
    }
}

/// Classify a tree for a deployment spec.
pub fn classify(root: &Path, spec: &DeploymentSpec) -> Result<BuildPlan> {
    classify_tree(root, spec.framework, spec.database, spec.env("PORT"))
}

/// Classify a tree from the framework hint, the requested database and an
/// optional `PORT` override.
pub fn classify_tree(
    root: &Path,
    hint: FrameworkHint,
    database: Option<Database>,
    port: Option<&str>,
) -> Result<BuildPlan> {
    ensure_tree(root)?;
    let manifest = PackageManifest::load(root)?;

    let framework = match hint {
        FrameworkHint::Explicit(framework) => {
            check_declared(framework, root, manifest.as_ref())?;
            framework
        }
        FrameworkHint::Auto => {
            let framework = detect(root, manifest.as_ref());
            info!(framework = %framework, "Detected framework");
            framework
        }
    };

    let strategy = framework.strategy();
    let needs_database =
        framework.requires_database() || (database.is_some() && strategy == Strategy::Dynamic);
    if needs_database && database.is_none() {
        return Err(Error::Validation(format!("{framework} requires a database")));
    }
    if database.is_some() && strategy == Strategy::Static {
        debug!(framework = %framework, "Ignoring database for static site");
    }

    let port = parse_port(port, framework)?;
    let has_build_script = manifest.as_ref().is_some_and(|m| m.script("build").is_some());
    let start_from_manifest = || {
        manifest
            .as_ref()
            .map(PackageManifest::start_command)
            .unwrap_or_else(|| NODE_FALLBACK_START.to_string())
    };

    let mut plan = BuildPlan {
        framework,
        strategy,
        install_command: None,
        build_command: None,
        start_command: None,
        output: OutputLocation::FirstExisting(Vec::new()),
        port,
        needs_database,
        uses_orm: framework.uses_orm(),
        orm_generate_command: None,
        schema_sync: None,
    };

    match framework {
        Framework::Static => {
            if manifest.is_some() {
                plan.install_command = Some(NPM_INSTALL.to_string());
            }
            if has_build_script {
                plan.build_command = Some(NPM_BUILD.to_string());
            }
            plan.output = OutputLocation::FirstExisting(
                STATIC_OUTPUT_DIRS.iter().map(PathBuf::from).collect(),
            );
        }
        Framework::Vite => {
            plan.install_command = Some(NPM_INSTALL.to_string());
            plan.build_command = Some(NPM_BUILD.to_string());
            plan.output = OutputLocation::Fixed(PathBuf::from("dist"));
        }
        Framework::NextJs | Framework::NextJsPrisma => {
            plan.install_command = Some(NPM_INSTALL.to_string());
            plan.build_command = Some(NPM_BUILD.to_string());
            plan.start_command = Some(start_from_manifest());
        }
        Framework::NodeJs | Framework::NodeJsPrisma => {
            plan.install_command = Some(NPM_INSTALL.to_string());
            if has_build_script {
                plan.build_command = Some(NPM_BUILD.to_string());
            }
            plan.start_command = Some(start_from_manifest());
        }
        Framework::Laravel => {
            plan.install_command = Some(COMPOSER_INSTALL.to_string());
            plan.start_command = Some(format!(
                "php artisan serve --host=0.0.0.0 --port={port}"
            ));
            plan.schema_sync = Some(SchemaSync::Migrate {
                command: LARAVEL_MIGRATE.to_string(),
            });
        }
    }

    if plan.uses_orm {
        plan.orm_generate_command = Some(PRISMA_GENERATE.to_string());
        if needs_database {
            plan.schema_sync = Some(if root.join(PRISMA_MIGRATIONS).is_dir() {
                SchemaSync::Migrate {
                    command: PRISMA_MIGRATE.to_string(),
                }
            } else {
                SchemaSync::Push {
                    command: PRISMA_PUSH.to_string(),
                }
            });
        }
    }

    debug!(?plan, "Build plan derived");
    Ok(plan)
}
