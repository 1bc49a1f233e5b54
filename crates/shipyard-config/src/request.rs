//! Deployment request normalization.
//!
//! Turns the raw request document handed over by the API layer into the
//! canonical [`DeploymentSpec`]. Pure: no I/O, no environment access.

use regex::Regex;
use serde::Deserialize;
use shipyard_core::deployment::{Database, DeploymentSpec, EnvVar, FrameworkHint};
use shipyard_core::plan::Strategy;
use shipyard_core::{DeploymentId, ProjectId};
use std::sync::LazyLock;
use url::Url;

use crate::frameworks::resolve_framework;
use crate::{ConfigError, ConfigResult};

/// Branch used when the request does not name one.
pub const DEFAULT_BRANCH: &str = "main";

const ALLOWED_SCHEMES: &[&str] = &["https", "http", "ssh", "git", "file"];

static SUBDOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap()
});

/// Raw deployment request as sent by the API layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub name: Option<String>,
    pub git_url: Option<String>,
    pub framework: Option<String>,
    pub db: Option<String>,
    #[serde(default)]
    pub env_vars: Vec<RawEnvVar>,
    pub git_branch: Option<String>,
}

/// Environment entry as submitted; values may be any JSON scalar.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEnvVar {
    pub key: Option<String>,
    pub value: Option<serde_json::Value>,
}

impl DeploymentRequest {
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Control-plane endpoint and key smuggled in through `envVars`.
    pub fn reporting_credentials(&self) -> (Option<String>, Option<String>) {
        let find = |wanted: &str| {
            self.env_vars
                .iter()
                .find(|e| e.key.as_deref() == Some(wanted))
                .and_then(|e| e.value.as_ref())
                .and_then(scalar_to_string)
        };
        (find("API_SERVER_URL"), find("API_KEY"))
    }
}

/// Identifiers supplied by the worker environment rather than the request.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub deployment_id: DeploymentId,
    pub project_id: ProjectId,
    pub subdomain: String,
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required(field: &str, value: Option<&str>) -> ConfigResult<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn parse_git_url(raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw).map_err(|e| ConfigError::invalid("gitUrl", e.to_string()))?;
    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::invalid(
            "gitUrl",
            format!("unsupported scheme {}", url.scheme()),
        ));
    }
    if url.scheme() != "file" && url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::invalid("gitUrl", "missing host"));
    }
    Ok(url)
}

fn parse_subdomain(raw: &str) -> ConfigResult<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    if SUBDOMAIN_RE.is_match(&lowered) {
        Ok(lowered)
    } else {
        Err(ConfigError::invalid(
            "subdomain",
            format!("{raw:?} is not a valid DNS label"),
        ))
    }
}

fn parse_database(raw: Option<&str>) -> ConfigResult<Option<Database>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(db) => db
            .to_ascii_lowercase()
            .parse::<Database>()
            .map(Some)
            .map_err(|e| ConfigError::invalid("db", e.to_string())),
    }
}

fn collect_env(raw: &[RawEnvVar]) -> ConfigResult<Vec<EnvVar>> {
    let mut env = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(key) = entry.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            continue;
        };
        if key.contains('=') || key.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "envVars",
                format!("invalid key {key:?}"),
            ));
        }
        if let Some(value) = entry.value.as_ref().and_then(scalar_to_string) {
            env.push(EnvVar::new(key, value));
        }
    }
    Ok(env)
}

/// Normalize a raw request into the canonical spec.
pub fn normalize(
    request: &DeploymentRequest,
    context: &DeploymentContext,
) -> ConfigResult<DeploymentSpec> {
    let name = required("name", request.name.as_deref())?;
    let git_url = parse_git_url(&required("gitUrl", request.git_url.as_deref())?)?;
    let git_branch = request
        .git_branch
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_BRANCH)
        .to_string();
    let framework = resolve_framework(request.framework.as_deref())?;
    let database = parse_database(request.db.as_deref())?;
    let env_vars = collect_env(&request.env_vars)?;
    let subdomain = parse_subdomain(&context.subdomain)?;

    let (needs_database, strategy) = match framework {
        FrameworkHint::Explicit(f) => {
            let strategy = f.strategy();
            let needs = f.requires_database()
                || (database.is_some() && strategy == Strategy::Dynamic);
            if needs && database.is_none() {
                return Err(ConfigError::invalid(
                    "db",
                    format!("{f} requires a database"),
                ));
            }
            (needs, Some(strategy))
        }
        // Settled by classification once the tree is inspected.
        FrameworkHint::Auto => (database.is_some(), None),
    };

    Ok(DeploymentSpec {
        project_id: context.project_id.clone(),
        deployment_id: context.deployment_id.clone(),
        name,
        git_url,
        git_branch,
        framework,
        database,
        env_vars,
        subdomain,
        needs_database,
        strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::deployment::Framework;

    fn context() -> DeploymentContext {
        DeploymentContext {
            deployment_id: DeploymentId::new("dep-1").unwrap(),
            project_id: ProjectId::new("proj-1").unwrap(),
            subdomain: "my-app".to_string(),
        }
    }

    fn request(json: &str) -> DeploymentRequest {
        DeploymentRequest::from_json(json).unwrap()
    }

    #[test]
    fn test_normalizes_minimal_static_request() {
        let req = request(
            r#"{"name": "site", "gitUrl": "https://github.com/acme/site.git", "framework": "static"}"#,
        );
        let spec = normalize(&req, &context()).unwrap();

        assert_eq!(spec.name, "site");
        assert_eq!(spec.git_branch, "main");
        assert_eq!(spec.framework, FrameworkHint::Explicit(Framework::Static));
        assert_eq!(spec.strategy, Some(Strategy::Static));
        assert!(!spec.needs_database);
        assert_eq!(spec.subdomain, "my-app");
    }

    #[test]
    fn test_missing_git_url_fails() {
        let req = request(r#"{"name": "site"}"#);
        let err = normalize(&req, &context()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "gitUrl"));
    }

    #[test]
    fn test_missing_name_fails() {
        let req = request(r#"{"gitUrl": "https://github.com/acme/site.git"}"#);
        let err = normalize(&req, &context()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "name"));
    }

    #[test]
    fn test_malformed_git_url_fails() {
        for bad in ["not a url", "git@github.com:acme/site.git", "ftp://example.com/x"] {
            let req = DeploymentRequest {
                name: Some("site".into()),
                git_url: Some(bad.into()),
                ..Default::default()
            };
            let err = normalize(&req, &context()).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "gitUrl"),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_alias_and_database_make_dynamic_plan_need_db() {
        let req = request(
            r#"{"name": "api", "gitUrl": "https://github.com/acme/api.git",
                "framework": "node", "db": "postgres"}"#,
        );
        let spec = normalize(&req, &context()).unwrap();
        assert_eq!(spec.framework, FrameworkHint::Explicit(Framework::NodeJs));
        assert_eq!(spec.database, Some(Database::Postgresql));
        assert!(spec.needs_database);
        assert_eq!(spec.strategy, Some(Strategy::Dynamic));
    }

    #[test]
    fn test_static_framework_never_needs_database() {
        let req = request(
            r#"{"name": "site", "gitUrl": "https://github.com/acme/site.git",
                "framework": "vite", "db": "mysql"}"#,
        );
        let spec = normalize(&req, &context()).unwrap();
        assert!(!spec.needs_database);
    }

    #[test]
    fn test_laravel_without_database_fails() {
        let req = request(
            r#"{"name": "shop", "gitUrl": "https://github.com/acme/shop.git", "framework": "laravel"}"#,
        );
        assert!(matches!(
            normalize(&req, &context()),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "db"
        ));
    }

    #[test]
    fn test_unsupported_database_fails() {
        let req = request(
            r#"{"name": "api", "gitUrl": "https://github.com/acme/api.git", "db": "mongodb"}"#,
        );
        assert!(normalize(&req, &context()).is_err());
    }

    #[test]
    fn test_env_vars_are_collected_and_stringified() {
        let req = request(
            r#"{"name": "api", "gitUrl": "https://github.com/acme/api.git",
                "envVars": [
                    {"key": "PORT", "value": 8080},
                    {"key": "DEBUG", "value": true},
                    {"key": "", "value": "dropped"},
                    {"key": "EMPTY"},
                    {"key": "NAME", "value": "x"}
                ]}"#,
        );
        let spec = normalize(&req, &context()).unwrap();
        assert_eq!(spec.env_vars.len(), 3);
        assert_eq!(spec.env("PORT"), Some("8080"));
        assert_eq!(spec.env("DEBUG"), Some("true"));
        assert_eq!(spec.env("NAME"), Some("x"));
    }

    #[test]
    fn test_auto_framework_defers_strategy() {
        let req = request(r#"{"name": "x", "gitUrl": "https://github.com/acme/x.git", "db": "mysql"}"#);
        let spec = normalize(&req, &context()).unwrap();
        assert_eq!(spec.framework, FrameworkHint::Auto);
        assert_eq!(spec.strategy, None);
        assert!(spec.needs_database);
    }

    #[test]
    fn test_invalid_subdomain_fails() {
        let req = request(r#"{"name": "x", "gitUrl": "https://github.com/acme/x.git"}"#);
        let mut ctx = context();
        ctx.subdomain = "bad_subdomain!".into();
        assert!(normalize(&req, &ctx).is_err());
    }

    #[test]
    fn test_reporting_credentials_from_env_vars() {
        let req = request(
            r#"{"name": "x", "gitUrl": "https://github.com/acme/x.git",
                "envVars": [{"key": "API_SERVER_URL", "value": "https://api.example.com"},
                            {"key": "API_KEY", "value": "k"}]}"#,
        );
        let (url, key) = req.reporting_credentials();
        assert_eq!(url.as_deref(), Some("https://api.example.com"));
        assert_eq!(key.as_deref(), Some("k"));
    }
}
