//! Cloud resource provisioning for Shipyard.
//!
//! The [`Provisioner`] wraps an injected [`CloudProvider`] and makes every
//! create idempotent, recording what this deployment created in its ledger.
//! Provider implementations:
//! - In-memory (dry runs and tests)
//! - HTTP provisioning gateway

pub mod http;
pub mod memory;
pub mod names;
pub mod provisioner;
pub mod upload;

pub use http::HttpCloudProvider;
pub use memory::InMemoryCloud;
pub use names::ResourceNames;
pub use provisioner::{Provisioner, Restore, TaskDefinitionRequest};
pub use shipyard_core::provider::CloudProvider;
pub use upload::UploadSummary;
