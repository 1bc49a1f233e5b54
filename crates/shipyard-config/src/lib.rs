//! Configuration for the Shipyard orchestrator.
//!
//! This crate handles:
//! - Normalizing raw deployment requests into a canonical `DeploymentSpec`
//! - Orchestrator system configuration (environment + optional KDL file)
//! - Framework alias resolution

pub mod error;
pub mod frameworks;
pub mod request;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use request::{DeploymentContext, DeploymentRequest, normalize};
pub use system::{PollPolicy, ProviderKind, SystemConfig};
