//! Execution backends for Shipyard.
//!
//! Provides the worker-side pieces that touch the local machine:
//! - Shell command execution with streamed output
//! - Git checkout into a clean workspace
//! - Dockerfile rendering and Docker image builds

pub mod docker;
pub mod dockerfile;
pub mod git;
pub mod local;

pub use docker::{DockerImageBuilder, UnavailableImageBuilder};
pub use git::checkout;
pub use local::LocalShellExecutor;
pub use shipyard_core::executor::{
    CommandRunner, CommandSpec, ExitStatus, ImageBuildRequest, ImageBuilder, LogLine, LogStream,
};
