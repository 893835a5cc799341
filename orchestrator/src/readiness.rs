//! Bounded, fixed-interval readiness polling

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::OrchestratorError;

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Ready,
    /// Not there yet; the message describes what was observed
    NotReady(String),
    /// Will never become ready; stop polling
    Failed(String),
}

/// Result of polling until ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Success,
    /// The deadline elapsed; carries the last `NotReady` observation
    Timeout(String),
    Failed(String),
}

impl WaitOutcome {
    /// Convert into a result, naming `what` was being waited for in errors
    pub fn into_result(self, what: &str) -> Result<(), OrchestratorError> {
        match self {
            WaitOutcome::Success => Ok(()),
            WaitOutcome::Timeout(last) => Err(OrchestratorError::Timeout(format!(
                "{} not ready before deadline (last observed: {})",
                what, last
            ))),
            WaitOutcome::Failed(reason) => Err(OrchestratorError::ProbeFailed(format!(
                "{}: {}",
                what, reason
            ))),
        }
    }
}

/// Polling options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// Fixed delay between probes
    pub interval: Duration,

    /// Total time allowed before giving up
    pub deadline: Duration,
}

impl ReadinessOptions {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
        }
    }
}

/// Evaluate `probe` until it is ready, fails, or the deadline elapses.
///
/// Probes run strictly one at a time. `Failed` ends the wait immediately.
/// The sleep between probes goes through `sleep_fn`.
pub async fn wait_until<P, PF, S, SF>(
    options: &ReadinessOptions,
    mut probe: P,
    sleep_fn: S,
) -> WaitOutcome
where
    P: FnMut() -> PF,
    PF: Future<Output = Probe>,
    S: Fn(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match probe().await {
            Probe::Ready => {
                debug!("Ready after {} probe(s) in {:?}", attempts, started.elapsed());
                return WaitOutcome::Success;
            }
            Probe::Failed(reason) => {
                warn!("Probe failed terminally after {} probe(s): {}", attempts, reason);
                return WaitOutcome::Failed(reason);
            }
            Probe::NotReady(observed) => {
                let elapsed = started.elapsed();
                if elapsed >= options.deadline {
                    warn!(
                        "Gave up after {} probe(s) in {:?}: {}",
                        attempts, elapsed, observed
                    );
                    return WaitOutcome::Timeout(observed);
                }
                debug!("Not ready (probe {}): {}", attempts, observed);
                let remaining = options.deadline - elapsed;
                sleep_fn(options.interval.min(remaining)).await;
            }
        }
    }
}

/// [`wait_until`] with the tokio timer
pub async fn wait_until_ready<P, PF>(options: &ReadinessOptions, probe: P) -> WaitOutcome
where
    P: FnMut() -> PF,
    PF: Future<Output = Probe>,
{
    wait_until(options, probe, tokio::time::sleep).await
}
