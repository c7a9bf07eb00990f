use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uvclink_common::backend::{DeviceDriver, RenderSurface, UsbSubsystem};
use uvclink_common::types::{DeviceDescriptor, HotplugEvent, PreviewTarget};

use crate::config::Config;
use crate::error::SessionError;
use crate::machine::{ConnectProgress, ConnectionMachine, ConnectionState};
use crate::permission::{PermissionBroker, ResultSink};
use crate::preview::{Interrupted, PreviewController, PreviewOutcome, RetryGate};
use crate::registry::DeviceRegistry;
use crate::status::{StatusEvent, StatusNotifier};
use crate::surface::SurfaceBinder;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    ListCandidates(Reply<Vec<DeviceDescriptor>>),
    Scan(Reply<Result<DeviceDescriptor, SessionError>>),
    Connect(Reply<Result<ConnectProgress, SessionError>>),
    WaitConnected(Reply<Result<(), SessionError>>),
    StartPreview(Reply<Result<PreviewOutcome, SessionError>>),
    StopPreview(Reply<bool>),
    Disconnect(Reply<()>),
    State(Reply<StateSnapshot>),
    SurfaceDestroyed {
        target: PreviewTarget,
        reply: Reply<bool>,
    },
    Shutdown(Reply<()>),
}

enum SessionEvent {
    Attached(DeviceDescriptor),
    Detached(DeviceDescriptor),
    PermissionResult {
        device: DeviceDescriptor,
        granted: bool,
    },
    SurfaceAvailable {
        target: PreviewTarget,
        width: u32,
        height: u32,
    },
    SurfaceResized {
        width: u32,
        height: u32,
    },
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: &'static str,
    pub device: Option<DeviceDescriptor>,
    pub target: Option<String>,
    pub preview_active: bool,
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state)?;
        if let Some(device) = &self.device {
            write!(f, " {}", device.name)?;
        }
        if let Some(target) = &self.target {
            write!(f, " target={target}")?;
        }
        Ok(())
    }
}

/// Cheap handle for feeding events to, and commanding, the session worker.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    status: StatusNotifier,
}

impl SessionHandle {
    fn post(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("session worker gone, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn device_attached(&self, device: DeviceDescriptor) {
        self.post(SessionEvent::Attached(device));
    }

    pub fn device_detached(&self, device: DeviceDescriptor) {
        self.post(SessionEvent::Detached(device));
    }

    pub fn hotplug(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Attached(device) => self.device_attached(device),
            HotplugEvent::Detached(device) => self.device_detached(device),
        }
    }

    pub fn permission_result(&self, device: DeviceDescriptor, granted: bool) {
        self.post(SessionEvent::PermissionResult { device, granted });
    }

    pub fn surface_available(&self, target: PreviewTarget, width: u32, height: u32) {
        self.post(SessionEvent::SurfaceAvailable {
            target,
            width,
            height,
        });
    }

    pub fn surface_resized(&self, width: u32, height: u32) {
        self.post(SessionEvent::SurfaceResized { width, height });
    }

    /// Resolves once any preview into `target` has stopped and the target
    /// is unbound. Returns whether `target` was the live surface.
    pub async fn surface_destroyed(&self, target: PreviewTarget) -> Result<bool, SessionError> {
        self.request(|reply| Command::SurfaceDestroyed { target, reply })
            .await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionEvent::Command(make(reply)))
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn list_candidates(&self) -> Result<Vec<DeviceDescriptor>, SessionError> {
        self.request(Command::ListCandidates).await
    }

    pub async fn scan(&self) -> Result<DeviceDescriptor, SessionError> {
        self.request(Command::Scan).await?
    }

    pub async fn connect(&self) -> Result<ConnectProgress, SessionError> {
        self.request(Command::Connect).await?
    }

    /// Waits for the pending permission request to end. The wait is queued
    /// when this is called, so an answer posted afterwards is observed.
    pub fn wait_connected(&self) -> impl Future<Output = Result<(), SessionError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .tx
            .send(SessionEvent::Command(Command::WaitConnected(reply)))
            .map_err(|_| SessionError::SessionClosed);
        async move {
            sent?;
            rx.await.map_err(|_| SessionError::SessionClosed)?
        }
    }

    pub async fn start_preview(&self) -> Result<PreviewOutcome, SessionError> {
        self.request(Command::StartPreview).await?
    }

    pub async fn stop_preview(&self) -> Result<bool, SessionError> {
        self.request(Command::StopPreview).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Command::Disconnect).await
    }

    pub async fn state(&self) -> Result<StateSnapshot, SessionError> {
        self.request(Command::State).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(Command::Shutdown).await
    }
}

/// Single consumer of the event queue. Every state change happens on this
/// worker, one event at a time.
pub struct Session {
    machine: ConnectionMachine,
    registry: DeviceRegistry,
    binder: SurfaceBinder,
    status: StatusNotifier,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    deferred: VecDeque<SessionEvent>,
    waiters: Vec<Reply<Result<(), SessionError>>>,
}

impl Session {
    pub fn new(
        usb: Arc<dyn UsbSubsystem>,
        driver: Arc<dyn DeviceDriver>,
        surface: Arc<dyn RenderSurface>,
        config: Config,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = StatusNotifier::default();

        // Weak so that dropping every handle still ends the worker.
        let weak = tx.downgrade();
        let sink: ResultSink = Arc::new(move |device, granted| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(SessionEvent::PermissionResult { device, granted });
            }
        });

        let machine = ConnectionMachine::new(
            driver,
            PermissionBroker::new(Arc::clone(&usb), sink),
            PreviewController::new(config.preview),
            status.clone(),
        );
        let session = Self {
            machine,
            registry: DeviceRegistry::new(usb, config.filter),
            binder: SurfaceBinder::new(surface, config.surface.mirror),
            status: status.clone(),
            rx,
            deferred: VecDeque::new(),
            waiters: Vec::new(),
        };
        (session, SessionHandle { tx, status })
    }

    pub fn spawn(
        usb: Arc<dyn UsbSubsystem>,
        driver: Arc<dyn DeviceDriver>,
        surface: Arc<dyn RenderSurface>,
        config: Config,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(usb, driver, surface, config);
        (handle, tokio::spawn(session.run()))
    }

    pub async fn run(mut self) {
        info!(target: "uvclink", event = "session_start", "session worker started");
        loop {
            let event = match self.deferred.pop_front() {
                Some(event) => event,
                None => match self.rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };
            let pending = self.pending_device();
            let running = self.dispatch(event).await;
            if let Some(device) = pending {
                if self.pending_device().is_none() {
                    self.resolve_waiters(Err(SessionError::PermissionCancelled(device)));
                }
            }
            if !running {
                break;
            }
        }
        self.machine.disconnect().await;
        info!(target: "uvclink", event = "session_stop", "session worker stopped");
    }

    async fn dispatch(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Attached(device) => {
                let candidate = self.registry.is_candidate(&device);
                self.machine.on_attach(device, candidate);
            }
            SessionEvent::Detached(device) => {
                self.machine.on_detach(&device).await;
            }
            SessionEvent::PermissionResult { device, granted } => {
                if let Some(result) = self.machine.on_permission_result(&device, granted).await {
                    self.resolve_waiters(result);
                }
            }
            SessionEvent::SurfaceAvailable {
                target,
                width,
                height,
            } => {
                self.binder
                    .on_available(target, width, height, &mut self.machine)
                    .await;
                self.status.emit(StatusEvent::SurfaceReady { width, height });
            }
            SessionEvent::SurfaceResized { width, height } => {
                self.binder.on_resized(width, height);
            }
            SessionEvent::Command(command) => return self.command(command).await,
        }
        true
    }

    async fn command(&mut self, command: Command) -> bool {
        match command {
            Command::ListCandidates(reply) => {
                let _ = reply.send(self.registry.list_candidates().await);
            }
            Command::Scan(reply) => {
                let _ = reply.send(self.scan().await);
            }
            Command::Connect(reply) => {
                let _ = reply.send(self.machine.request_permission().await);
            }
            Command::WaitConnected(reply) => match self.machine.state() {
                ConnectionState::PermissionPending(_) => self.waiters.push(reply),
                ConnectionState::Connected(_) | ConnectionState::Streaming(_) => {
                    let _ = reply.send(Ok(()));
                }
                other => {
                    let _ = reply.send(Err(SessionError::InvalidState {
                        operation: "wait for connection",
                        state: other.name(),
                    }));
                }
            },
            Command::StartPreview(reply) => {
                let device = self.machine.state().device().cloned();
                let mut gate = QueueGate {
                    rx: &mut self.rx,
                    deferred: &mut self.deferred,
                    device,
                    target: self.binder.target().cloned(),
                };
                let result = self
                    .machine
                    .start_preview(self.binder.target(), &mut gate)
                    .await;
                let _ = reply.send(result);
            }
            Command::StopPreview(reply) => {
                let _ = reply.send(self.machine.stop_preview().await);
            }
            Command::Disconnect(reply) => {
                self.machine.disconnect().await;
                let _ = reply.send(());
            }
            Command::State(reply) => {
                let state = self.machine.state();
                let _ = reply.send(StateSnapshot {
                    state: state.name(),
                    device: state.device().cloned(),
                    target: self.binder.target().map(|t| t.id().to_string()),
                    preview_active: self.machine.preview_active(),
                });
            }
            Command::SurfaceDestroyed { target, reply } => {
                let released = self.binder.on_destroyed(&target, &mut self.machine).await;
                if released {
                    self.status.emit(StatusEvent::SurfaceReleased);
                }
                let _ = reply.send(released);
            }
            Command::Shutdown(reply) => {
                self.machine.disconnect().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn pending_device(&self) -> Option<String> {
        match self.machine.state() {
            ConnectionState::PermissionPending(request) => Some(request.device.name.clone()),
            _ => None,
        }
    }

    fn resolve_waiters(&mut self, result: Result<(), SessionError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    async fn scan(&mut self) -> Result<DeviceDescriptor, SessionError> {
        let report = self.registry.scan().await;
        let Some(device) = report.candidates.into_iter().next() else {
            self.status.emit(StatusEvent::NoCandidateFound {
                scanned: report.scanned,
            });
            return Err(SessionError::NoCandidateFound);
        };
        if self.machine.on_candidate(device.clone()) {
            Ok(device)
        } else {
            Err(SessionError::InvalidState {
                operation: "scan",
                state: self.machine.state().name(),
            })
        }
    }
}

/// Waits on the preview retry timers while watching the queue. Events that
/// arrive meanwhile are kept, in order, for the main loop.
struct QueueGate<'a> {
    rx: &'a mut mpsc::UnboundedReceiver<SessionEvent>,
    deferred: &'a mut VecDeque<SessionEvent>,
    device: Option<DeviceDescriptor>,
    target: Option<PreviewTarget>,
}

impl QueueGate<'_> {
    fn classify(&self, event: &SessionEvent) -> Option<Interrupted> {
        match event {
            SessionEvent::Detached(device)
                if self.device.as_ref().is_some_and(|d| d.same_device(device)) =>
            {
                Some(Interrupted::DeviceLost)
            }
            SessionEvent::Command(Command::Disconnect(_) | Command::Shutdown(_)) => {
                Some(Interrupted::Teardown)
            }
            SessionEvent::Command(Command::SurfaceDestroyed { target, .. })
                if self.target.as_ref() == Some(target) =>
            {
                Some(Interrupted::TargetLost)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl<'a> RetryGate for QueueGate<'a> {
    fn interrupted(&self) -> Option<Interrupted> {
        self.deferred.iter().find_map(|event| self.classify(event))
    }

    async fn pause(&mut self, delay: Duration) -> Result<(), Interrupted> {
        if let Some(interrupt) = self.interrupted() {
            return Err(interrupt);
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        return Err(Interrupted::Teardown);
                    };
                    let interrupt = self.classify(&event);
                    self.deferred.push_back(event);
                    if let Some(interrupt) = interrupt {
                        return Err(interrupt);
                    }
                }
            }
        }
    }
}
