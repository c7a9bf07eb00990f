use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use zbus::{fdo, interface, Connection, SignalContext};

use uvclink_common::backend::RenderSurface;
use uvclink_common::types::{DeviceDescriptor, PreviewTarget, Transform};

use crate::error::SessionError;
use crate::session::SessionHandle;
use crate::status::StatusEvent;

pub const DBUS_NAME: &str = "org.uvclink.Daemon";
pub const DBUS_PATH: &str = "/org/uvclink/Daemon";

fn failed(e: SessionError) -> fdo::Error {
    fdo::Error::Failed(e.to_string())
}

/// Bus-facing wrapper around a session handle.
#[derive(Clone)]
pub struct SessionService {
    session: SessionHandle,
}

impl SessionService {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

#[interface(name = "org.uvclink.Session")]
impl SessionService {
    async fn list_candidates(&self) -> fdo::Result<Vec<DeviceDescriptor>> {
        self.session.list_candidates().await.map_err(failed)
    }

    async fn scan(&self) -> fdo::Result<DeviceDescriptor> {
        self.session.scan().await.map_err(failed)
    }

    /// Returns `awaiting_permission` or `connected`.
    async fn connect(&self) -> fdo::Result<String> {
        let progress = self.session.connect().await.map_err(failed)?;
        Ok(progress.as_str().to_string())
    }

    /// Blocks until the pending permission prompt is answered.
    async fn wait_connected(&self) -> fdo::Result<()> {
        self.session.wait_connected().await.map_err(failed)
    }

    /// Returns (width, height, attempts); 0x0 means the driver default size.
    async fn start_preview(&self) -> fdo::Result<(u32, u32, u32)> {
        let outcome = self.session.start_preview().await.map_err(failed)?;
        let (width, height) = outcome
            .size
            .map(|s| (s.width, s.height))
            .unwrap_or_default();
        Ok((width, height, outcome.attempts))
    }

    async fn stop_preview(&self) -> fdo::Result<bool> {
        self.session.stop_preview().await.map_err(failed)
    }

    async fn disconnect(&self) -> fdo::Result<()> {
        self.session.disconnect().await.map_err(failed)
    }

    /// (state, device name, target id); empty strings when absent.
    async fn state(&self) -> fdo::Result<(String, String, String)> {
        let snapshot = self.session.state().await.map_err(failed)?;
        Ok((
            snapshot.state.to_string(),
            snapshot.device.map(|d| d.name).unwrap_or_default(),
            snapshot.target.unwrap_or_default(),
        ))
    }

    async fn surface_available(&self, target: &str, width: u32, height: u32) -> fdo::Result<()> {
        if target.is_empty() {
            return Err(fdo::Error::InvalidArgs("empty surface id".into()));
        }
        self.session
            .surface_available(PreviewTarget::new(target), width, height);
        Ok(())
    }

    async fn surface_resized(&self, width: u32, height: u32) {
        self.session.surface_resized(width, height);
    }

    /// Replies once the preview into `target` has stopped and the target
    /// is unbound, so the presenter may free it afterwards.
    async fn surface_destroyed(&self, target: &str) -> fdo::Result<bool> {
        self.session
            .surface_destroyed(PreviewTarget::new(target))
            .await
            .map_err(failed)
    }

    #[zbus(signal)]
    async fn status(ctxt: &SignalContext<'_>, kind: &str, message: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn transform_changed(ctxt: &SignalContext<'_>, matrix: Vec<f64>) -> zbus::Result<()>;
}

/// Render surface for remote presenters: transforms are queued and emitted
/// as `TransformChanged` signals.
pub struct ChannelSurface {
    tx: mpsc::UnboundedSender<Transform>,
}

impl ChannelSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transform>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RenderSurface for ChannelSurface {
    fn set_transform(&self, transform: Transform) {
        if self.tx.send(transform).is_err() {
            debug!("transform listener gone");
        }
    }
}

/// Re-emits status events and surface transforms as bus signals until both
/// sources close.
pub async fn forward_signals(
    connection: Connection,
    mut status: broadcast::Receiver<StatusEvent>,
    mut transforms: mpsc::UnboundedReceiver<Transform>,
) -> zbus::Result<()> {
    let iface = connection
        .object_server()
        .interface::<_, SessionService>(DBUS_PATH)
        .await?;
    let ctxt = iface.signal_context();
    let mut status_open = true;
    let mut transforms_open = true;
    while status_open || transforms_open {
        tokio::select! {
            event = status.recv(), if status_open => match event {
                Ok(event) => {
                    SessionService::status(ctxt, event.kind(), &event.to_string()).await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status signal forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => status_open = false,
            },
            transform = transforms.recv(), if transforms_open => match transform {
                Some(transform) => {
                    SessionService::transform_changed(ctxt, transform.to_vec()).await?;
                }
                None => transforms_open = false,
            },
        }
    }
    Ok(())
}
