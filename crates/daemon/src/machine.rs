use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uvclink_common::backend::DeviceDriver;
use uvclink_common::types::{ControlHandle, DeviceDescriptor, PreviewTarget};

use crate::error::SessionError;
use crate::permission::{PermissionBroker, PermissionRequest, RequestOutcome, Resolution};
use crate::preview::{Interrupted, PreviewController, PreviewError, PreviewOutcome, RetryGate};
use crate::status::{StatusEvent, StatusNotifier};

#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    CandidateFound(DeviceDescriptor),
    PermissionPending(PermissionRequest),
    Connected(ControlHandle),
    Streaming(ControlHandle),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::CandidateFound(_) => "candidate_found",
            ConnectionState::PermissionPending(_) => "permission_pending",
            ConnectionState::Connected(_) => "connected",
            ConnectionState::Streaming(_) => "streaming",
        }
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        match self {
            ConnectionState::Idle => None,
            ConnectionState::CandidateFound(device) => Some(device),
            ConnectionState::PermissionPending(request) => Some(&request.device),
            ConnectionState::Connected(handle) | ConnectionState::Streaming(handle) => {
                Some(handle.device())
            }
        }
    }

    pub fn handle(&self) -> Option<&ControlHandle> {
        match self {
            ConnectionState::Connected(handle) | ConnectionState::Streaming(handle) => {
                Some(handle)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    AwaitingPermission,
    Connected,
}

impl ConnectProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectProgress::AwaitingPermission => "awaiting_permission",
            ConnectProgress::Connected => "connected",
        }
    }
}

/// Owns the single control handle and every transition of the lifecycle.
pub struct ConnectionMachine {
    state: ConnectionState,
    driver: Arc<dyn DeviceDriver>,
    broker: PermissionBroker,
    preview: PreviewController,
    status: StatusNotifier,
}

impl ConnectionMachine {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        broker: PermissionBroker,
        preview: PreviewController,
        status: StatusNotifier,
    ) -> Self {
        Self {
            state: ConnectionState::Idle,
            driver,
            broker,
            preview,
            status,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn preview_active(&self) -> bool {
        self.preview.is_active()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if mem::discriminant(&self.state) != mem::discriminant(&next) {
            debug!(from = self.state.name(), to = next.name(), "state transition");
        }
        self.state = next;
    }

    /// Records a candidate while idle. A candidate seen in any other state
    /// is ignored.
    pub fn on_candidate(&mut self, device: DeviceDescriptor) -> bool {
        match &self.state {
            ConnectionState::Idle => {}
            ConnectionState::CandidateFound(current) if current.same_device(&device) => {
                return true;
            }
            ConnectionState::CandidateFound(current) => {
                debug!(old = %current.name, new = %device.name, "replacing candidate");
            }
            other => {
                debug!(device = %device.name, state = other.name(), "candidate ignored");
                return false;
            }
        }
        self.status.emit(StatusEvent::CandidateFound(device.clone()));
        self.set_state(ConnectionState::CandidateFound(device));
        true
    }

    pub fn on_attach(&mut self, device: DeviceDescriptor, is_candidate: bool) {
        self.status.emit(StatusEvent::DeviceAttached(device.clone()));
        if is_candidate && matches!(self.state, ConnectionState::Idle) {
            self.on_candidate(device);
        }
    }

    /// Asks for permission on the current candidate, or re-asks while a
    /// request is already pending. A device that is already granted is
    /// opened immediately.
    pub async fn request_permission(&mut self) -> Result<ConnectProgress, SessionError> {
        let device = match &self.state {
            ConnectionState::CandidateFound(device) => device.clone(),
            ConnectionState::PermissionPending(request) => request.device.clone(),
            other => {
                return Err(SessionError::InvalidState {
                    operation: "connect",
                    state: other.name(),
                })
            }
        };
        match self.broker.request(&device).await {
            RequestOutcome::AlreadyGranted => {
                self.open_device(device).await?;
                Ok(ConnectProgress::Connected)
            }
            RequestOutcome::Prompted => {
                let request = match self.broker.pending() {
                    Some(request) => request.clone(),
                    None => PermissionRequest {
                        device: device.clone(),
                        issued_at: std::time::Instant::now(),
                    },
                };
                self.status.emit(StatusEvent::PermissionRequested(device));
                self.set_state(ConnectionState::PermissionPending(request));
                Ok(ConnectProgress::AwaitingPermission)
            }
        }
    }

    /// Applies an answer to the pending request. Returns `None` when the
    /// answer is stale and nothing changed, otherwise how the request ended.
    pub async fn on_permission_result(
        &mut self,
        device: &DeviceDescriptor,
        granted: bool,
    ) -> Option<Result<(), SessionError>> {
        let awaited = matches!(
            &self.state,
            ConnectionState::PermissionPending(request) if request.device.same_device(device)
        );
        if !awaited {
            warn!(device = %device.name, state = self.state.name(), "stale permission answer");
            return None;
        }
        match self.broker.resolve(device, granted) {
            Resolution::Granted(device) => {
                let opened = self.open_device(device).await;
                if let Err(e) = &opened {
                    debug!(error = %e, "open after grant failed");
                }
                Some(opened)
            }
            Resolution::Denied(device) => {
                let name = device.name.clone();
                self.set_state(ConnectionState::Idle);
                self.status.emit(StatusEvent::PermissionDenied(device));
                Some(Err(SessionError::PermissionDenied(name)))
            }
            Resolution::Stale(device) => {
                warn!(device = %device.name, "permission answer did not match broker");
                None
            }
        }
    }

    async fn open_device(&mut self, device: DeviceDescriptor) -> Result<(), SessionError> {
        match self.driver.open(&device).await {
            Ok(handle) => {
                info!(device = %device.name, handle = handle.id(), "device opened");
                self.preview.reset();
                self.set_state(ConnectionState::Connected(handle));
                self.status.emit(StatusEvent::Connected(device));
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                self.status.emit(StatusEvent::DeviceOpenFailed {
                    device: device.clone(),
                    reason: e.to_string(),
                });
                Err(SessionError::DeviceOpenFailed {
                    device: device.name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Handles a detach report. Only the tracked device changes state; the
    /// handle is closed without stopping the stream first.
    pub async fn on_detach(&mut self, device: &DeviceDescriptor) -> bool {
        let tracked = self.state.device().is_some_and(|d| d.same_device(device));
        if !tracked {
            self.status.emit(StatusEvent::DeviceDetached(device.clone()));
            return false;
        }
        let previous = mem::replace(&mut self.state, ConnectionState::Idle);
        debug!(from = previous.name(), to = "idle", "state transition");
        let lost = match previous {
            ConnectionState::Connected(handle) | ConnectionState::Streaming(handle) => {
                self.preview.reset();
                let lost = handle.device().clone();
                self.driver.close(handle).await;
                lost
            }
            ConnectionState::PermissionPending(request) => {
                self.broker.cancel();
                request.device
            }
            ConnectionState::CandidateFound(device) => device,
            ConnectionState::Idle => device.clone(),
        };
        self.status.emit(StatusEvent::DeviceLost(lost));
        true
    }

    /// Orderly teardown: stop an active preview, then close. Safe in any
    /// state.
    pub async fn disconnect(&mut self) {
        let previous = mem::replace(&mut self.state, ConnectionState::Idle);
        match previous {
            ConnectionState::Idle => return,
            ConnectionState::CandidateFound(_) => {}
            ConnectionState::PermissionPending(request) => {
                self.broker.cancel();
                self.status.emit(StatusEvent::PermissionCancelled(request.device));
            }
            ConnectionState::Connected(handle) | ConnectionState::Streaming(handle) => {
                self.preview.stop(&*self.driver, &handle).await;
                self.preview.reset();
                self.driver.close(handle).await;
            }
        }
        debug!(to = "idle", "state transition");
        self.status.emit(StatusEvent::Disconnected);
    }

    pub async fn start_preview(
        &mut self,
        target: Option<&PreviewTarget>,
        gate: &mut dyn RetryGate,
    ) -> Result<PreviewOutcome, SessionError> {
        if self.state.handle().is_none() {
            return Err(SessionError::InvalidState {
                operation: "start preview",
                state: self.state.name(),
            });
        }
        let target = target.ok_or(SessionError::NoPreviewTarget)?;
        let handle = match mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Connected(handle) | ConnectionState::Streaming(handle) => handle,
            other => {
                self.state = other;
                return Err(SessionError::InvalidState {
                    operation: "start preview",
                    state: self.state.name(),
                });
            }
        };
        let result = self
            .preview
            .start(&*self.driver, &handle, target, gate)
            .await;
        match result {
            Ok(outcome) => {
                self.set_state(ConnectionState::Streaming(handle));
                self.status.emit(StatusEvent::PreviewStarted {
                    size: outcome.size,
                    attempts: outcome.attempts,
                });
                Ok(outcome)
            }
            Err(PreviewError::Exhausted { attempts, last }) => {
                self.set_state(ConnectionState::Connected(handle));
                self.status.emit(StatusEvent::PreviewStartFailed { attempts });
                Err(SessionError::PreviewStartFailed {
                    attempts,
                    last: last.to_string(),
                })
            }
            Err(PreviewError::Interrupted(interrupt)) => {
                let device = handle.device().name.clone();
                self.state = ConnectionState::Connected(handle);
                // The interrupting event is still queued and performs the
                // actual teardown.
                Err(match interrupt {
                    Interrupted::DeviceLost => SessionError::DeviceLost(device),
                    Interrupted::Teardown => SessionError::Cancelled,
                    Interrupted::TargetLost => SessionError::TargetLost(target.id().to_string()),
                })
            }
        }
    }

    /// Returns whether a running stream was stopped.
    pub async fn stop_preview(&mut self) -> bool {
        let handle = match mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Connected(handle) | ConnectionState::Streaming(handle) => handle,
            other => {
                self.state = other;
                return false;
            }
        };
        let stopped = self.preview.stop(&*self.driver, &handle).await;
        self.set_state(ConnectionState::Connected(handle));
        if stopped {
            self.status.emit(StatusEvent::PreviewStopped);
        }
        stopped
    }

    /// Stops the stream and unbinds the render target while the surface
    /// still exists.
    pub async fn release_target(&mut self) {
        self.stop_preview().await;
        if let Some(handle) = self.state.handle() {
            self.preview.unbind(&*self.driver, handle).await;
        }
    }
}
