//! Core domain types and traits for the Shipyard deployment orchestrator.
//!
//! This crate contains:
//! - Deployment and project identifiers
//! - The canonical deployment spec and its status machine
//! - Framework, database and build plan types
//! - Resource handles and the per-run provisioning ledger
//! - Capability traits for cloud providers, command runners, image builders
//!   and the external control plane

pub mod deployment;
pub mod error;
pub mod executor;
pub mod id;
pub mod plan;
pub mod provider;
pub mod report;
pub mod resource;
pub mod secret;

pub use error::{Error, ErrorKind, Result};
pub use id::{DeploymentId, ProjectId};
