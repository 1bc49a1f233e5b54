//! The Shipyard deployment pipeline.
//!
//! This crate handles:
//! - Framework classification of a checked-out tree
//! - The deployment state machine and its two strategies
//! - Bounded readiness polling
//! - Status and log reporting to the control plane
//! - Rollback of failed runs and the reconcile sweep for orphaned ones

pub mod classifier;
pub mod context;
pub mod control;
pub mod database;
pub mod pipeline;
pub mod poller;
pub mod reporter;
pub mod rollback;
pub mod status;
pub mod strategy;

pub use context::PipelineSettings;
pub use control::HttpControlPlane;
pub use pipeline::{DeploymentPipeline, DeploymentResult};
pub use poller::{HealthProbeResult, poll_until_ready};
pub use reporter::{Relay, Reporter};
pub use rollback::{ReconcileReport, RollbackError, reconcile};
pub use strategy::{DeploymentStrategy, DynamicServiceStrategy, StaticStrategy};
