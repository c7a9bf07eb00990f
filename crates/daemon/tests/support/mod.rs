#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uvclink_backend_mock::{sample_camera, MockDriver, MockSurface, MockUsb};
use uvclink_daemon::{Config, Session, SessionHandle, StatusEvent};

pub struct Rig {
    pub usb: MockUsb,
    pub driver: MockDriver,
    pub surface: MockSurface,
    pub handle: SessionHandle,
    pub status: broadcast::Receiver<StatusEvent>,
    pub worker: JoinHandle<()>,
}

impl Rig {
    pub fn new(config: Config) -> Self {
        Self::with_usb(MockUsb::new_with_sample(), config)
    }

    pub fn with_usb(usb: MockUsb, config: Config) -> Self {
        let driver = MockDriver::default();
        let surface = MockSurface::default();
        let (handle, worker) = Session::spawn(
            Arc::new(usb.clone()),
            Arc::new(driver.clone()),
            Arc::new(surface.clone()),
            config,
        );
        let status = handle.subscribe();
        Self {
            usb,
            driver,
            surface,
            handle,
            status,
            worker,
        }
    }

    /// Scan + connect with permission granted up front.
    pub async fn connect(&self) {
        self.usb.grant_in_advance(&sample_camera());
        self.handle.scan().await.expect("scan");
        self.handle.connect().await.expect("connect");
    }

    pub async fn connect_with_surface(&self) {
        self.connect().await;
        self.handle
            .surface_available(uvclink_common::types::PreviewTarget::new("surface-1"), 640, 480);
    }

    pub async fn state(&self) -> &'static str {
        self.handle.state().await.expect("state").state
    }

    /// Status events received so far.
    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.status.try_recv() {
            events.push(event);
        }
        events
    }
}
