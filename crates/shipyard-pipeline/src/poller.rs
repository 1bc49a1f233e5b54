//! Bounded readiness polling.

use shipyard_config::PollPolicy;
use shipyard_core::{Error, Result};
use std::future::Future;

use crate::reporter::Reporter;

/// Outcome of one readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbeResult {
    pub healthy: bool,
    /// Raw provider state or reason, for the progress log.
    pub detail: String,
}

impl HealthProbeResult {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn pending(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Invoke `probe` until it reports healthy, sleeping `policy.interval`
/// between attempts.
///
/// A probe error counts as an unhealthy attempt. After `policy.max_attempts`
/// unhealthy attempts this returns [`Error::Timeout`], so the wait never
/// sleeps longer than `policy.ceiling()`.
pub async fn poll_until_ready<F, Fut>(
    what: &str,
    policy: PollPolicy,
    reporter: &Reporter,
    mut probe: F,
) -> Result<HealthProbeResult>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HealthProbeResult>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        let result = probe()
            .await
            .unwrap_or_else(|e| HealthProbeResult::pending(format!("probe failed: {e}")));

        if result.healthy {
            reporter.info(format!(
                "{what} ready after {attempt} attempt(s): {}",
                result.detail
            ));
            return Ok(result);
        }

        reporter.info(format!(
            "Waiting for {what} ({attempt}/{attempts}): {}",
            result.detail
        ));
        last = result.detail;

        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::Timeout(format!(
        "{what} not ready after {attempts} attempts (last state: {last})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::{DeploymentId, ProjectId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn reporter() -> Reporter {
        Reporter::local(
            DeploymentId::new("dep-1").unwrap(),
            ProjectId::new("proj-1").unwrap(),
        )
        .0
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_first_healthy() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = PollPolicy::new(Duration::from_secs(10), 5);
        let result = poll_until_ready("database", policy, &reporter(), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n == 3 {
                HealthProbeResult::healthy("available")
            } else {
                HealthProbeResult::pending("creating")
            })
        })
        .await
        .unwrap();

        assert_eq!(result.detail, "available");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_ceiling() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = PollPolicy::new(Duration::from_secs(30), 4);
        let start = Instant::now();

        let err = poll_until_ready("targets", policy, &reporter(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HealthProbeResult::pending("unhealthy (Target.FailedHealthChecks)"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout(ref msg) if msg.contains("Target.FailedHealthChecks")));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() <= policy.ceiling());
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_count_as_attempts() {
        let policy = PollPolicy::new(Duration::from_secs(1), 2);
        let err = poll_until_ready("database", policy, &reporter(), || async {
            Err(Error::Internal("describe failed".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(ref msg) if msg.contains("describe failed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_probes_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = PollPolicy::new(Duration::from_secs(1), 0);
        let _ = poll_until_ready("targets", policy, &reporter(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HealthProbeResult::pending("initial"))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
