//! Status and log reporting.
//!
//! Every event is mirrored to `tracing` immediately and, when a control plane
//! is configured, queued for a background relay task. Queueing never blocks
//! and relay failures are only logged locally.

use chrono::Utc;
use shipyard_core::deployment::DeploymentStatus;
use shipyard_core::executor::{LogLine, LogStream};
use shipyard_core::report::{
    ControlPlane, LogLevel, LogRecord, ProjectStatusUpdate, StatusUpdate,
};
use shipyard_core::{DeploymentId, ProjectId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum Event {
    Log(LogRecord),
    Status(StatusUpdate),
    Project(ProjectStatusUpdate),
    Heartbeat,
}

/// Handle used by the pipeline to report progress.
#[derive(Debug, Clone)]
pub struct Reporter {
    deployment_id: DeploymentId,
    project_id: ProjectId,
    tx: Option<mpsc::UnboundedSender<Event>>,
}

/// The background task delivering queued events.
#[derive(Debug)]
pub struct Relay {
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    /// Wait for every queued event to be delivered.
    ///
    /// Completes once all [`Reporter`] clones are dropped.
    pub async fn finish(self) {
        if let Some(handle) = self.handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Reporter relay task failed");
            }
        }
    }
}

impl Reporter {
    /// A reporter that only writes local output.
    pub fn local(deployment_id: DeploymentId, project_id: ProjectId) -> (Self, Relay) {
        let reporter = Self {
            deployment_id,
            project_id,
            tx: None,
        };
        (reporter, Relay { handle: None })
    }

    /// A reporter relaying to `control` from a spawned task.
    pub fn spawn(
        control: Arc<dyn ControlPlane>,
        deployment_id: DeploymentId,
        project_id: ProjectId,
    ) -> (Self, Relay) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(relay(
            control,
            rx,
            deployment_id.clone(),
            project_id.clone(),
        ));
        let reporter = Self {
            deployment_id,
            project_id,
            tx: Some(tx),
        };
        (reporter, Relay {
            handle: Some(handle),
        })
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    fn send(&self, event: Event) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Reporter relay has stopped; dropping event");
            }
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let deployment_id = &self.deployment_id;
        match level {
            LogLevel::Debug => debug!(%deployment_id, "{message}"),
            LogLevel::Info => info!(%deployment_id, "{message}"),
            LogLevel::Warn => warn!(%deployment_id, "{message}"),
            LogLevel::Error => error!(%deployment_id, "{message}"),
        }
        self.send(Event::Log(LogRecord {
            deployment_id: self.deployment_id.clone(),
            project_id: self.project_id.clone(),
            message,
            level,
            timestamp: Utc::now(),
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Forward one line of command output.
    pub fn line(&self, line: LogLine) {
        let level = match line.stream {
            LogStream::Stderr => LogLevel::Warn,
            LogStream::Stdout | LogStream::System => LogLevel::Info,
        };
        self.log(level, line.content);
    }

    /// A blank status update for this deployment.
    pub fn status_update(&self, status: DeploymentStatus) -> StatusUpdate {
        StatusUpdate::new(self.deployment_id.clone(), self.project_id.clone(), status)
    }

    pub fn status(&self, update: StatusUpdate) {
        info!(
            deployment_id = %self.deployment_id,
            status = %update.status,
            url = update.url.as_deref(),
            error = update.error.as_deref(),
            "Deployment status changed"
        );
        self.send(Event::Status(update));
    }

    pub fn project(&self, update: ProjectStatusUpdate) {
        info!(project_id = %self.project_id, status = ?update.status, "Project status changed");
        self.send(Event::Project(update));
    }

    pub fn heartbeat(&self) {
        self.send(Event::Heartbeat);
    }
}

async fn relay(
    control: Arc<dyn ControlPlane>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    deployment_id: DeploymentId,
    project_id: ProjectId,
) {
    while let Some(event) = rx.recv().await {
        let (call, result) = match &event {
            Event::Log(record) => ("append_log", control.append_log(record).await),
            Event::Status(update) => ("update_status", control.update_status(update).await),
            Event::Project(update) => ("update_project", control.update_project(update).await),
            Event::Heartbeat => (
                "heartbeat",
                control.heartbeat(&deployment_id, &project_id).await,
            ),
        };
        if let Err(e) = result {
            warn!(control_plane = control.name(), call, error = %e, "Control plane callback failed");
        }
    }
}
