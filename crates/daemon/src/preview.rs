use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use uvclink_common::backend::DeviceDriver;
use uvclink_common::error::DriverError;
use uvclink_common::types::{ControlHandle, PreviewSize, PreviewTarget};

use crate::config::PreviewConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The device behind the handle was detached.
    DeviceLost,
    /// Disconnect or shutdown was requested.
    Teardown,
    /// The surface being started into was destroyed.
    TargetLost,
}

/// Suspension points of the start sequence. Implementations watch for
/// events that must abort the sequence while it waits.
#[async_trait]
pub trait RetryGate: Send {
    /// Non-blocking check for an interruption that is already known.
    fn interrupted(&self) -> Option<Interrupted>;

    async fn pause(&mut self, delay: Duration) -> Result<(), Interrupted>;
}

/// Gate that only sleeps.
pub struct SleepGate;

#[async_trait]
impl RetryGate for SleepGate {
    fn interrupted(&self) -> Option<Interrupted> {
        None
    }

    async fn pause(&mut self, delay: Duration) -> Result<(), Interrupted> {
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    StartRejected(DriverError),
    StreamNotEstablished(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::StartRejected(e) => write!(f, "start rejected: {e}"),
            AttemptFailure::StreamNotEstablished(reason) => {
                write!(f, "stream not established: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOutcome {
    /// `None` when no preferred size was accepted and the driver default
    /// is in use.
    pub size: Option<PreviewSize>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreviewError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AttemptFailure },
    #[error("preview start interrupted: {0:?}")]
    Interrupted(Interrupted),
}

enum AttemptError {
    Failed(AttemptFailure),
    Interrupted(Interrupted),
}

/// Drives the start/verify/retry sequence for one open device.
pub struct PreviewController {
    config: PreviewConfig,
    active: bool,
    target_bound: bool,
}

impl PreviewController {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            active: false,
            target_bound: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub async fn start(
        &mut self,
        driver: &dyn DeviceDriver,
        handle: &ControlHandle,
        target: &PreviewTarget,
        gate: &mut dyn RetryGate,
    ) -> Result<PreviewOutcome, PreviewError> {
        if self.active {
            info!(handle = handle.id(), "stopping running preview before restart");
            self.stop(driver, handle).await;
            gate.pause(self.config.preclean_delay())
                .await
                .map_err(PreviewError::Interrupted)?;
        }

        let max = self.config.attempts();
        let mut last = None;
        for attempt in 1..=max {
            if let Some(interrupt) = gate.interrupted() {
                return Err(PreviewError::Interrupted(interrupt));
            }
            debug!(attempt, max, target = %target, "preview start attempt");
            match self.attempt(driver, handle, target, gate).await {
                Ok(size) => {
                    self.active = true;
                    info!(attempt, size = ?size, "preview stream verified");
                    return Ok(PreviewOutcome {
                        size,
                        attempts: attempt,
                    });
                }
                Err(AttemptError::Interrupted(interrupt)) => {
                    return Err(PreviewError::Interrupted(interrupt));
                }
                Err(AttemptError::Failed(failure)) => {
                    warn!(attempt, max, error = %failure, "preview attempt failed");
                    last = Some(failure);
                }
            }
            if attempt < max {
                gate.pause(self.config.retry_delay())
                    .await
                    .map_err(PreviewError::Interrupted)?;
            }
        }
        Err(PreviewError::Exhausted {
            attempts: max,
            last: last.unwrap_or(AttemptFailure::StreamNotEstablished(
                "no attempt was made".into(),
            )),
        })
    }

    async fn attempt(
        &mut self,
        driver: &dyn DeviceDriver,
        handle: &ControlHandle,
        target: &PreviewTarget,
        gate: &mut dyn RetryGate,
    ) -> Result<Option<PreviewSize>, AttemptError> {
        let size = self.select_size(driver, handle).await;
        driver
            .set_preview_target(handle, Some(target))
            .await
            .map_err(|e| AttemptError::Failed(AttemptFailure::StartRejected(e)))?;
        self.target_bound = true;
        driver
            .start_preview(handle)
            .await
            .map_err(|e| AttemptError::Failed(AttemptFailure::StartRejected(e)))?;

        if let Err(interrupt) = gate.pause(self.config.health_check_delay()).await {
            // Stream may be running; teardown stops it through `stop`.
            self.active = true;
            return Err(AttemptError::Interrupted(interrupt));
        }

        let reason = match driver.query_supported_sizes(handle).await {
            Ok(report) if !report.is_empty() => return Ok(size),
            Ok(_) => "empty supported-size report".to_string(),
            Err(e) => e.to_string(),
        };
        if let Err(e) = driver.stop_preview(handle).await {
            debug!(error = %e, "stop after failed health check");
        }
        Err(AttemptError::Failed(AttemptFailure::StreamNotEstablished(
            reason,
        )))
    }

    async fn select_size(
        &self,
        driver: &dyn DeviceDriver,
        handle: &ControlHandle,
    ) -> Option<PreviewSize> {
        match driver.query_supported_sizes(handle).await {
            Ok(report) => debug!(sizes = %report.descriptor, "driver supported sizes"),
            Err(e) => debug!(error = %e, "supported-size query failed"),
        }
        for &size in &self.config.sizes {
            match driver.set_preview_size(handle, size).await {
                Ok(()) => {
                    debug!(%size, "preview size applied");
                    return Some(size);
                }
                Err(e) => debug!(%size, error = %e, "preview size rejected"),
            }
        }
        warn!("no preferred preview size accepted, keeping driver default");
        None
    }

    /// Stops the stream if one is active. Returns whether anything stopped.
    pub async fn stop(&mut self, driver: &dyn DeviceDriver, handle: &ControlHandle) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        if let Err(e) = driver.stop_preview(handle).await {
            warn!(handle = handle.id(), error = %e, "stop_preview failed");
        }
        true
    }

    pub async fn unbind(&mut self, driver: &dyn DeviceDriver, handle: &ControlHandle) {
        if !self.target_bound {
            return;
        }
        self.target_bound = false;
        if let Err(e) = driver.set_preview_target(handle, None).await {
            warn!(handle = handle.id(), error = %e, "failed to unbind preview target");
        }
    }

    /// Drops local state without touching the driver, for handles that
    /// are being closed.
    pub fn reset(&mut self) {
        self.active = false;
        self.target_bound = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uvclink_backend_mock::{sample_camera, DriverCall, MockDriver};

    async fn open(driver: &MockDriver) -> ControlHandle {
        driver.open(&sample_camera()).await.expect("open")
    }

    #[tokio::test(start_paused = true)]
    async fn first_accepted_size_wins() {
        let driver = MockDriver::default();
        driver.accept_only(vec![PreviewSize::new(320, 240), PreviewSize::new(800, 600)]);
        let handle = open(&driver).await;
        let mut preview = PreviewController::new(PreviewConfig::default());
        let outcome = preview
            .start(&driver, &handle, &PreviewTarget::new("t"), &mut SleepGate)
            .await
            .expect("start");
        assert_eq!(outcome.size, Some(PreviewSize::new(320, 240)));
        assert_eq!(
            driver.count(|c| matches!(c, DriverCall::SetPreviewSize(_))),
            2
        );
        assert_eq!(
            driver.count(|c| *c == DriverCall::SetPreviewSize(PreviewSize::new(800, 600))),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_accepted_size_uses_driver_default() {
        let driver = MockDriver::default();
        driver.accept_only(Vec::new());
        let handle = open(&driver).await;
        let mut preview = PreviewController::new(PreviewConfig::default());
        let outcome = preview
            .start(&driver, &handle, &PreviewTarget::new("t"), &mut SleepGate)
            .await
            .expect("start");
        assert_eq!(outcome.size, None);
        assert!(preview.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_start_counts_as_failed_attempt() {
        let driver = MockDriver::default();
        driver.script_start(&[false, false, false]);
        let handle = open(&driver).await;
        let mut preview = PreviewController::new(PreviewConfig::default());
        let err = preview
            .start(&driver, &handle, &PreviewTarget::new("t"), &mut SleepGate)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PreviewError::Exhausted {
                attempts: 3,
                last: AttemptFailure::StartRejected(_)
            }
        ));
        assert_eq!(driver.count(|c| *c == DriverCall::StartPreview), 3);
        assert_eq!(driver.count(|c| *c == DriverCall::StopPreview), 0);
        assert!(!preview.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let driver = MockDriver::default();
        let handle = open(&driver).await;
        let mut preview = PreviewController::new(PreviewConfig::default());
        preview
            .start(&driver, &handle, &PreviewTarget::new("t"), &mut SleepGate)
            .await
            .expect("start");
        assert!(preview.stop(&driver, &handle).await);
        assert!(!preview.stop(&driver, &handle).await);
        assert_eq!(driver.count(|c| *c == DriverCall::StopPreview), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_stops_running_stream_first() {
        let driver = MockDriver::default();
        let handle = open(&driver).await;
        let mut preview = PreviewController::new(PreviewConfig::default());
        let target = PreviewTarget::new("t");
        preview.start(&driver, &handle, &target, &mut SleepGate).await.expect("first");
        preview.start(&driver, &handle, &target, &mut SleepGate).await.expect("second");
        let calls = driver.calls();
        let second_start = calls
            .iter()
            .rposition(|c| *c == DriverCall::StartPreview)
            .expect("second start");
        assert!(calls[..second_start].contains(&DriverCall::StopPreview));
    }
}
