//! Monotonic deployment status tracking.

use shipyard_core::deployment::DeploymentStatus;
use shipyard_core::report::StatusUpdate;
use shipyard_core::{Error, Result};

use crate::reporter::Reporter;

/// Current status of one run; every accepted change is reported.
#[derive(Debug)]
pub struct StatusTracker {
    current: DeploymentStatus,
    history: Vec<DeploymentStatus>,
    reporter: Reporter,
}

impl StatusTracker {
    /// Start a run in `Queued` and report it.
    pub fn new(reporter: Reporter) -> Self {
        reporter.status(reporter.status_update(DeploymentStatus::Queued));
        Self {
            current: DeploymentStatus::Queued,
            history: vec![DeploymentStatus::Queued],
            reporter,
        }
    }

    pub fn current(&self) -> DeploymentStatus {
        self.current
    }

    /// Every status this run has been in, oldest first.
    pub fn history(&self) -> &[DeploymentStatus] {
        &self.history
    }

    pub fn advance(&mut self, next: DeploymentStatus) -> Result<()> {
        let update = self.reporter.status_update(next);
        self.advance_with(update)
    }

    /// Move to `update.status`, refusing backward moves and moves out of a
    /// terminal state.
    pub fn advance_with(&mut self, update: StatusUpdate) -> Result<()> {
        let next = update.status;
        if !self.current.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal status transition {} -> {}",
                self.current, next
            )));
        }
        self.current = next;
        self.history.push(next);
        self.reporter.status(update);
        Ok(())
    }
}
