use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uvclink_common::backend::{DeviceDriver, PermissionCallback, RenderSurface, UsbSubsystem};
use uvclink_common::error::DriverError;
use uvclink_common::types::{
    ControlHandle, DeviceDescriptor, PreviewSize, PreviewTarget, SupportedSizes, Transform,
};

pub fn sample_camera() -> DeviceDescriptor {
    DeviceDescriptor {
        name: "/dev/bus/usb/001/004".into(),
        vendor_id: 0x1234,
        product_id: 0x5678,
        class: 14,
        subclass: 0,
        protocol: 0,
        product_name: "Sample UVC Camera".into(),
        interfaces: Vec::new(),
    }
}

pub fn sample_keyboard() -> DeviceDescriptor {
    DeviceDescriptor {
        name: "/dev/bus/usb/001/002".into(),
        vendor_id: 0x046d,
        product_id: 0xc534,
        class: 3,
        subclass: 1,
        protocol: 1,
        product_name: "USB Receiver".into(),
        interfaces: Vec::new(),
    }
}

struct PendingPrompt {
    device: DeviceDescriptor,
    on_result: PermissionCallback,
}

/// In-memory USB subsystem. Permission prompts stay pending until the test
/// resolves them.
#[derive(Clone, Default)]
pub struct MockUsb {
    devices: Arc<Mutex<Vec<DeviceDescriptor>>>,
    granted: Arc<Mutex<HashSet<String>>>,
    prompts: Arc<Mutex<Vec<PendingPrompt>>>,
    requests: Arc<AtomicU64>,
}

impl MockUsb {
    pub fn new_with_sample() -> Self {
        let usb = Self::default();
        usb.attach(sample_keyboard());
        usb.attach(sample_camera());
        usb
    }

    pub fn attach(&self, device: DeviceDescriptor) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn detach(&self, device: &DeviceDescriptor) {
        self.devices.lock().unwrap().retain(|d| !d.same_device(device));
    }

    pub fn grant_in_advance(&self, device: &DeviceDescriptor) {
        self.granted.lock().unwrap().insert(device.name.clone());
    }

    pub fn pending_prompts(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn permission_requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Answers the oldest outstanding prompt, as the OS dialog would.
    pub fn answer_prompt(&self, granted: bool) -> Option<DeviceDescriptor> {
        let prompt = {
            let mut prompts = self.prompts.lock().unwrap();
            if prompts.is_empty() {
                return None;
            }
            prompts.remove(0)
        };
        if granted {
            self.grant_in_advance(&prompt.device);
        }
        (prompt.on_result)(granted);
        Some(prompt.device)
    }
}

#[async_trait]
impl UsbSubsystem for MockUsb {
    async fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.devices.lock().unwrap().clone()
    }

    async fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        self.granted.lock().unwrap().contains(&device.name)
    }

    fn request_permission(&self, device: &DeviceDescriptor, on_result: PermissionCallback) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(PendingPrompt {
            device: device.clone(),
            on_result,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open(String),
    Close(u64),
    StartPreview,
    StopPreview,
    SetPreviewSize(PreviewSize),
    QuerySupportedSizes,
    SetPreviewTarget(Option<String>),
}

#[derive(Default)]
struct DriverScript {
    open_error: Option<String>,
    /// `None` accepts every size.
    accepted_sizes: Option<Vec<PreviewSize>>,
    start_results: VecDeque<bool>,
    health_results: VecDeque<bool>,
    report: SupportedSizes,
}

#[derive(Default)]
struct DriverState {
    calls: Vec<DriverCall>,
    open: HashSet<u64>,
    streaming: HashSet<u64>,
}

/// Scripted driver that records every call made against it.
#[derive(Clone)]
pub struct MockDriver {
    script: Arc<Mutex<DriverScript>>,
    state: Arc<Mutex<DriverState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for MockDriver {
    fn default() -> Self {
        let report = SupportedSizes {
            descriptor: "YUYV 640x480 320x240 800x600 1024x768".into(),
            sizes: vec![
                PreviewSize::new(640, 480),
                PreviewSize::new(320, 240),
                PreviewSize::new(800, 600),
                PreviewSize::new(1024, 768),
            ],
        };
        Self {
            script: Arc::new(Mutex::new(DriverScript {
                report,
                ..Default::default()
            })),
            state: Arc::new(Mutex::new(DriverState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl MockDriver {
    pub fn fail_open(&self, reason: &str) {
        self.script.lock().unwrap().open_error = Some(reason.to_string());
    }

    pub fn accept_only(&self, sizes: Vec<PreviewSize>) {
        self.script.lock().unwrap().accepted_sizes = Some(sizes);
    }

    /// Health results for consecutive post-start queries; unscripted
    /// queries report a healthy stream.
    pub fn script_health(&self, results: &[bool]) {
        self.script.lock().unwrap().health_results = results.iter().copied().collect();
    }

    /// Results of consecutive `start_preview` calls; unscripted calls succeed.
    pub fn script_start(&self, results: &[bool]) {
        self.script.lock().unwrap().start_results = results.iter().copied().collect();
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn opens(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Open(_)))
    }

    pub fn closes(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Close(_)))
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn is_streaming(&self) -> bool {
        !self.state.lock().unwrap().streaming.is_empty()
    }

    fn record(&self, handle: &ControlHandle, call: DriverCall) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.open.contains(&handle.id()) {
            Ok(())
        } else {
            Err(DriverError::InvalidHandle(handle.id()))
        }
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    async fn open(&self, device: &DeviceDescriptor) -> Result<ControlHandle, DriverError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(DriverCall::Open(device.name.clone()));
        if let Some(reason) = self.script.lock().unwrap().open_error.clone() {
            return Err(DriverError::OpenRejected(reason));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().open.insert(id);
        Ok(ControlHandle::new(id, device.clone()))
    }

    async fn close(&self, handle: ControlHandle) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Close(handle.id()));
        state.open.remove(&handle.id());
        state.streaming.remove(&handle.id());
    }

    async fn start_preview(&self, handle: &ControlHandle) -> Result<(), DriverError> {
        self.record(handle, DriverCall::StartPreview)?;
        let ok = self
            .script
            .lock()
            .unwrap()
            .start_results
            .pop_front()
            .unwrap_or(true);
        if !ok {
            return Err(DriverError::Io("isochronous transfer failed".into()));
        }
        self.state.lock().unwrap().streaming.insert(handle.id());
        Ok(())
    }

    async fn stop_preview(&self, handle: &ControlHandle) -> Result<(), DriverError> {
        self.record(handle, DriverCall::StopPreview)?;
        self.state.lock().unwrap().streaming.remove(&handle.id());
        Ok(())
    }

    async fn set_preview_size(
        &self,
        handle: &ControlHandle,
        size: PreviewSize,
    ) -> Result<(), DriverError> {
        self.record(handle, DriverCall::SetPreviewSize(size))?;
        match &self.script.lock().unwrap().accepted_sizes {
            Some(accepted) if !accepted.contains(&size) => Err(DriverError::Unsupported),
            _ => Ok(()),
        }
    }

    async fn query_supported_sizes(
        &self,
        handle: &ControlHandle,
    ) -> Result<SupportedSizes, DriverError> {
        self.record(handle, DriverCall::QuerySupportedSizes)?;
        let streaming = self.state.lock().unwrap().streaming.contains(&handle.id());
        let mut script = self.script.lock().unwrap();
        if streaming && !script.health_results.pop_front().unwrap_or(true) {
            return Ok(SupportedSizes::default());
        }
        Ok(script.report.clone())
    }

    async fn set_preview_target(
        &self,
        handle: &ControlHandle,
        target: Option<&PreviewTarget>,
    ) -> Result<(), DriverError> {
        self.record(
            handle,
            DriverCall::SetPreviewTarget(target.map(|t| t.id().to_string())),
        )
    }
}

/// Surface that remembers every transform applied to it.
#[derive(Clone, Default)]
pub struct MockSurface {
    transforms: Arc<Mutex<Vec<Transform>>>,
}

impl MockSurface {
    pub fn transforms(&self) -> Vec<Transform> {
        self.transforms.lock().unwrap().clone()
    }
}

impl RenderSurface for MockSurface {
    fn set_transform(&self, transform: Transform) {
        self.transforms.lock().unwrap().push(transform);
    }
}
