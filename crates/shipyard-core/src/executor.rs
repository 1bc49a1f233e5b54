//! Command runner and image builder traits.
//!
//! Runners execute checkout and build steps on the worker; image builders
//! package a checked-out tree into a runnable container image.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::Result;
use crate::provider::RegistryCredentials;

/// A shell command to run on the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Shell line, run with `sh -c`.
    pub command: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment on top of the worker's own.
    pub env: BTreeMap<String, String>,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Exit status of a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// `None` when the process was killed by a signal or timed out.
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Callback receiving streamed output lines.
pub type LineSink<'a> = &'a (dyn Fn(LogLine) + Send + Sync);

/// Trait for running shell commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run a command to completion, streaming its output to `on_line`.
    ///
    /// A non-zero exit is reported through the returned status, not as an error.
    async fn run(&self, spec: &CommandSpec, on_line: LineSink<'_>) -> Result<ExitStatus>;
}

/// Request to build and push one image.
#[derive(Debug, Clone)]
pub struct ImageBuildRequest {
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile contents; added to the build context alongside the tree.
    pub dockerfile: String,
    /// Fully qualified tag, including the registry host.
    pub tag: String,
}

/// Trait for container image builders.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Whether the builder can currently build images.
    async fn available(&self) -> bool;

    /// Build the image from the request's context.
    async fn build(&self, request: &ImageBuildRequest, on_line: LineSink<'_>) -> Result<()>;

    /// Push a built tag; returns the pushed image reference.
    async fn push(
        &self,
        tag: &str,
        credentials: &RegistryCredentials,
        on_line: LineSink<'_>,
    ) -> Result<String>;
}
