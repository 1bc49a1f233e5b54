//! Orchestrator system configuration.
//!
//! Built once at the entry point from an enumerated set of environment keys,
//! optionally layered over a KDL file named by `SHIPYARD_CONFIG`. Nothing
//! downstream reads the process environment.

use kdl::{KdlDocument, KdlNode};
use shipyard_core::provider::NetworkConfig;
use shipyard_core::{DeploymentId, ProjectId};
use std::path::PathBuf;
use std::time::Duration;

use crate::request::DeploymentContext;
use crate::{ConfigError, ConfigResult};

/// Environment keys that must be present before any work starts.
pub const REQUIRED_ENV: [&str; 3] = ["DEPLOYMENT_ID", "PROJECT_ID", "SUBDOMAIN"];

/// Selects the cloud provider; may instead come from the config file.
pub const PROVIDER_ENV: &str = "SHIPYARD_PROVIDER";

pub const DEFAULT_REGION: &str = "ap-south-1";
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 8;

/// Bounded retry policy for a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Managed databases converge slowly: 10s × 30.
    pub const DATABASE: PollPolicy = PollPolicy::new(Duration::from_secs(10), 30);

    /// Load balancer targets: 30s × 10.
    pub const TARGETS: PollPolicy = PollPolicy::new(Duration::from_secs(30), 10);

    /// Worst-case wall clock spent sleeping.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Which cloud provider implementation to construct. Must be chosen
/// explicitly; there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// In-process simulation; nothing leaves the worker.
    Memory,
    /// REST provisioning gateway.
    Http,
}

impl ProviderKind {
    /// Runs against this provider create nothing real.
    pub fn is_dry_run(self) -> bool {
        self == ProviderKind::Memory
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "memory" => Ok(ProviderKind::Memory),
            "http" => Ok(ProviderKind::Http),
            other => Err(ConfigError::invalid(
                "provider",
                format!("unknown provider {other:?} (expected memory or http)"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub url: Option<String>,
    pub token: Option<String>,
}

/// Control-plane endpoint for status and log callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingConfig {
    pub url: String,
    pub token: String,
}

/// Validated orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub deployment_id: DeploymentId,
    pub project_id: ProjectId,
    pub subdomain: String,
    pub work_dir: PathBuf,
    pub provider: ProviderSettings,
    pub region: String,
    pub network: NetworkConfig,
    pub reporting: Option<ReportingConfig>,
    pub database_poll: PollPolicy,
    pub target_poll: PollPolicy,
    pub upload_concurrency: usize,
    pub command_timeout: Option<Duration>,
}

impl SystemConfig {
    /// Load from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<String> = REQUIRED_ENV
            .iter()
            .filter(|k| get(k).is_none())
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnv(missing));
        }

        let file = match get("SHIPYARD_CONFIG") {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                parse_system_config(&content)?
            }
            None => FileConfig::default(),
        };

        let deployment_id = DeploymentId::new(get("DEPLOYMENT_ID").unwrap_or_default())
            .map_err(|e| ConfigError::invalid("DEPLOYMENT_ID", e.to_string()))?;
        let project_id = ProjectId::new(get("PROJECT_ID").unwrap_or_default())
            .map_err(|e| ConfigError::invalid("PROJECT_ID", e.to_string()))?;
        let subdomain = get("SUBDOMAIN").unwrap_or_default();

        let work_dir = get("SHIPYARD_WORK_DIR")
            .map(PathBuf::from)
            .or(file.work_dir)
            .unwrap_or_else(|| std::env::temp_dir().join("shipyard-builds"));

        let provider = ProviderSettings {
            kind: match get(PROVIDER_ENV) {
                Some(kind) => kind.parse()?,
                None => file
                    .provider
                    .ok_or_else(|| ConfigError::MissingEnv(vec![PROVIDER_ENV.to_string()]))?,
            },
            url: get("SHIPYARD_PROVIDER_URL").or(file.provider_url),
            token: get("SHIPYARD_PROVIDER_TOKEN").or(file.provider_token),
        };
        if provider.kind == ProviderKind::Http && provider.url.is_none() {
            return Err(ConfigError::MissingField(
                "SHIPYARD_PROVIDER_URL (required for the http provider)".to_string(),
            ));
        }

        let region = get("SHIPYARD_REGION")
            .or_else(|| get("AWS_REGION"))
            .or(file.region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let split = |raw: String| -> Vec<String> {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };
        let network = NetworkConfig {
            vpc_id: get("VPC_ID").or(file.network.vpc_id),
            subnet_ids: get("SUBNET_IDS")
                .map(split)
                .unwrap_or(file.network.subnet_ids),
            security_group_ids: get("SECURITY_GROUP_IDS")
                .map(split)
                .unwrap_or(file.network.security_group_ids),
        };

        let reporting = match (get("API_SERVER_URL"), get("API_KEY")) {
            (Some(url), Some(token)) => Some(ReportingConfig { url, token }),
            _ => file.reporting,
        };

        Ok(Self {
            deployment_id,
            project_id,
            subdomain,
            work_dir,
            provider,
            region,
            network,
            reporting,
            database_poll: file.database_poll.unwrap_or(PollPolicy::DATABASE),
            target_poll: file.target_poll.unwrap_or(PollPolicy::TARGETS),
            upload_concurrency: file
                .upload_concurrency
                .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY)
                .max(1),
            command_timeout: file.command_timeout,
        })
    }

    pub fn deployment_context(&self) -> DeploymentContext {
        DeploymentContext {
            deployment_id: self.deployment_id.clone(),
            project_id: self.project_id.clone(),
            subdomain: self.subdomain.clone(),
        }
    }

    /// Fill in reporting credentials from the request when the environment had none.
    pub fn with_request_reporting(mut self, url: Option<String>, token: Option<String>) -> Self {
        if self.reporting.is_none() {
            if let (Some(url), Some(token)) = (url, token) {
                self.reporting = Some(ReportingConfig { url, token });
            }
        }
        self
    }
}

/// Settings read from the optional KDL file. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    pub work_dir: Option<PathBuf>,
    pub provider: Option<ProviderKind>,
    pub provider_url: Option<String>,
    pub provider_token: Option<String>,
    pub region: Option<String>,
    pub network: NetworkConfig,
    pub reporting: Option<ReportingConfig>,
    pub database_poll: Option<PollPolicy>,
    pub target_poll: Option<PollPolicy>,
    pub upload_concurrency: Option<usize>,
    pub command_timeout: Option<Duration>,
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<FileConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = FileConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "work-dir" => {
                config.work_dir = get_first_string_arg(node).map(PathBuf::from);
            }
            "provider" => {
                let kind = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("provider kind".to_string()))?;
                config.provider = Some(kind.parse()?);
                config.provider_url = get_string_prop(node, "url");
                config.provider_token = get_string_prop(node, "token");
            }
            "region" => {
                config.region = get_first_string_arg(node);
            }
            "network" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "vpc" => config.network.vpc_id = get_first_string_arg(child),
                            "subnet" => config.network.subnet_ids.extend(get_all_string_args(child)),
                            "security-group" => config
                                .network
                                .security_group_ids
                                .extend(get_all_string_args(child)),
                            _ => {}
                        }
                    }
                }
            }
            "reporting" => {
                let url = get_string_prop(node, "url")
                    .ok_or_else(|| ConfigError::MissingField("reporting url".to_string()))?;
                let token = get_string_prop(node, "token")
                    .ok_or_else(|| ConfigError::MissingField("reporting token".to_string()))?;
                config.reporting = Some(ReportingConfig { url, token });
            }
            "poll" => {
                let target = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("poll target".to_string()))?;
                let policy = parse_poll(node)?;
                match target.as_str() {
                    "database" => config.database_poll = Some(policy),
                    "targets" => config.target_poll = Some(policy),
                    other => {
                        return Err(ConfigError::invalid(
                            "poll",
                            format!("unknown poll target {other:?}"),
                        ));
                    }
                }
            }
            "upload-concurrency" => {
                config.upload_concurrency =
                    Some(get_first_int_arg(node, "upload-concurrency")? as usize);
            }
            "command-timeout-secs" => {
                config.command_timeout = Some(Duration::from_secs(get_first_int_arg(
                    node,
                    "command-timeout-secs",
                )?));
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_poll(node: &KdlNode) -> ConfigResult<PollPolicy> {
    let interval = get_int_prop(node, "interval-secs")?
        .ok_or_else(|| ConfigError::MissingField("poll interval-secs".to_string()))?;
    let attempts = get_int_prop(node, "max-attempts")?
        .ok_or_else(|| ConfigError::MissingField("poll max-attempts".to_string()))?;
    if attempts == 0 {
        return Err(ConfigError::invalid("max-attempts", "must be at least 1"));
    }
    Ok(PollPolicy::new(
        Duration::from_secs(interval),
        u32::try_from(attempts).map_err(|_| ConfigError::invalid("max-attempts", "too large"))?,
    ))
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn to_u64(field: &str, value: i128) -> ConfigResult<u64> {
    u64::try_from(value).map_err(|_| ConfigError::invalid(field, "must be a non-negative integer"))
}

fn get_int_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match node.get(name) {
        None => Ok(None),
        Some(v) => {
            let n = v
                .as_integer()
                .ok_or_else(|| ConfigError::invalid(name, "expected an integer"))?;
            to_u64(name, n).map(Some)
        }
    }
}

fn get_first_int_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let n = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::invalid(field, "expected an integer argument"))?;
    to_u64(field, n)
}
