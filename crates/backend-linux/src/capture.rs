use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uvclink_common::backend::DeviceDriver;
use uvclink_common::error::DriverError;
use uvclink_common::types::{
    ControlHandle, DeviceDescriptor, PreviewSize, PreviewTarget, SupportedSizes,
};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format};

use crate::usb::node_name;

const CAPTURE_BUFFERS: u32 = 4;
/// Bound on one dequeue, so a stream without frames still sees `stop`.
const FRAME_TIMEOUT: Duration = Duration::from_millis(250);

fn io_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Io(e.to_string())
}

/// Finds the capture-capable `/dev/videoN` node that belongs to a USB device.
fn find_video_node(usb_name: &str) -> Result<PathBuf, DriverError> {
    let mut enumerator = udev::Enumerator::new().map_err(io_err)?;
    enumerator.match_subsystem("video4linux").map_err(io_err)?;
    let mut nodes: Vec<PathBuf> = enumerator
        .scan_devices()
        .map_err(io_err)?
        .filter(|video| {
            video
                .parent_with_subsystem_devtype("usb", "usb_device")
                .ok()
                .flatten()
                .and_then(|parent| node_name(&parent))
                .is_some_and(|name| name == usb_name)
        })
        .filter_map(|video| video.devnode().map(PathBuf::from))
        .collect();
    nodes.sort();
    nodes
        .into_iter()
        .find(|node| {
            Device::with_path(node)
                .and_then(|dev| dev.query_caps())
                .map(|caps| caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE))
                .unwrap_or(false)
        })
        .ok_or_else(|| DriverError::OpenRejected(format!("no capture node for {usb_name}")))
}

/// Frame pump for one streaming session. The latest frame is written to the
/// bound target path, when there is one.
struct CaptureWorker {
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    thread: thread::JoinHandle<()>,
}

impl CaptureWorker {
    fn spawn(node: PathBuf, target: Arc<Mutex<Option<PathBuf>>>) -> Result<Self, DriverError> {
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));
        let thread = {
            let stop = Arc::clone(&stop);
            let alive = Arc::clone(&alive);
            let frames = Arc::clone(&frames);
            thread::Builder::new()
                .name("uvclink-capture".into())
                .spawn(move || {
                    if let Err(e) = pump(&node, &stop, &frames, &target) {
                        warn!(node = %node.display(), error = %e, "capture stopped");
                    }
                    alive.store(false, Ordering::SeqCst);
                })
                .map_err(io_err)?
        };
        Ok(Self {
            stop,
            alive,
            frames,
            thread,
        })
    }

    fn healthy(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.frames.load(Ordering::SeqCst) > 0
    }

    /// Stops the pump and waits until its stream buffers are released.
    fn halt(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.thread.join().is_err() {
            warn!("capture thread panicked");
        }
    }
}

fn pump(
    node: &Path,
    stop: &AtomicBool,
    frames: &AtomicU64,
    target: &Mutex<Option<PathBuf>>,
) -> std::io::Result<()> {
    let dev = Device::with_path(node)?;
    let mut stream = MmapStream::with_buffers(&dev, Type::VideoCapture, CAPTURE_BUFFERS)?;
    stream.set_timeout(FRAME_TIMEOUT);
    while !stop.load(Ordering::SeqCst) {
        let (buf, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(e),
        };
        frames.fetch_add(1, Ordering::SeqCst);
        let path = target.lock().unwrap().clone();
        if let Some(path) = path {
            let used = (meta.bytesused as usize).min(buf.len());
            std::fs::write(&path, &buf[..used])?;
        }
    }
    Ok(())
}

struct OpenDevice {
    usb: DeviceDescriptor,
    node: PathBuf,
    control: Device,
    target: Arc<Mutex<Option<PathBuf>>>,
    worker: Option<CaptureWorker>,
}

/// V4L2 driver for UVC cameras. A preview target id is a file path that
/// receives the most recent frame.
#[derive(Clone, Default)]
pub struct V4lDriver {
    open: Arc<Mutex<HashMap<u64, OpenDevice>>>,
    next_id: Arc<AtomicU64>,
}

impl V4lDriver {
    async fn with_device<T, F>(&self, handle: &ControlHandle, f: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut OpenDevice) -> Result<T, DriverError> + Send + 'static,
    {
        let open = Arc::clone(&self.open);
        let id = handle.id();
        tokio::task::spawn_blocking(move || {
            let mut open = open.lock().unwrap();
            let device = open.get_mut(&id).ok_or(DriverError::InvalidHandle(id))?;
            f(device)
        })
        .await
        .map_err(io_err)?
    }
}

fn describe_sizes(dev: &Device) -> Result<SupportedSizes, DriverError> {
    let mut descriptor = Vec::new();
    let mut sizes = Vec::new();
    for format in dev.enum_formats().map_err(io_err)? {
        let mut entry = format.fourcc.str().unwrap_or("????").to_string();
        for framesize in dev.enum_framesizes(format.fourcc).map_err(io_err)? {
            match framesize.size {
                v4l::framesize::FrameSizeEnum::Discrete(size) => {
                    entry.push_str(&format!(" {}x{}", size.width, size.height));
                    let size = PreviewSize::new(size.width, size.height);
                    if !sizes.contains(&size) {
                        sizes.push(size);
                    }
                }
                v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                    entry.push_str(&format!(
                        " {}x{}-{}x{}",
                        step.min_width, step.min_height, step.max_width, step.max_height
                    ));
                }
            }
        }
        descriptor.push(entry);
    }
    Ok(SupportedSizes {
        descriptor: descriptor.join("; "),
        sizes,
    })
}

#[async_trait]
impl DeviceDriver for V4lDriver {
    async fn open(&self, device: &DeviceDescriptor) -> Result<ControlHandle, DriverError> {
        let usb = device.clone();
        let (node, control) = tokio::task::spawn_blocking(move || {
            let node = find_video_node(&usb.name)?;
            let control =
                Device::with_path(&node).map_err(|e| DriverError::OpenRejected(e.to_string()))?;
            Ok::<_, DriverError>((node, control))
        })
        .await
        .map_err(io_err)??;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        info!(device = %device.name, node = %node.display(), handle = id, "opened capture node");
        self.open.lock().unwrap().insert(
            id,
            OpenDevice {
                usb: device.clone(),
                node,
                control,
                target: Arc::new(Mutex::new(None)),
                worker: None,
            },
        );
        Ok(ControlHandle::new(id, device.clone()))
    }

    async fn close(&self, handle: ControlHandle) {
        let removed = self.open.lock().unwrap().remove(&handle.id());
        let Some(OpenDevice { usb, worker, .. }) = removed else {
            return;
        };
        if let Some(worker) = worker {
            if let Err(e) = tokio::task::spawn_blocking(move || worker.halt()).await {
                warn!(device = %usb.name, error = %e, "capture worker join failed");
            }
        }
        debug!(device = %usb.name, handle = handle.id(), "closed capture node");
    }

    async fn start_preview(&self, handle: &ControlHandle) -> Result<(), DriverError> {
        self.with_device(handle, |device| {
            if let Some(worker) = device.worker.take() {
                worker.halt();
            }
            let worker = CaptureWorker::spawn(device.node.clone(), Arc::clone(&device.target))?;
            device.worker = Some(worker);
            Ok(())
        })
        .await
    }

    async fn stop_preview(&self, handle: &ControlHandle) -> Result<(), DriverError> {
        self.with_device(handle, |device| match device.worker.take() {
            Some(worker) => {
                worker.halt();
                Ok(())
            }
            None => Err(DriverError::NotStreaming),
        })
        .await
    }

    async fn set_preview_size(
        &self,
        handle: &ControlHandle,
        size: PreviewSize,
    ) -> Result<(), DriverError> {
        self.with_device(handle, move |device| {
            let current = device.control.format().map_err(io_err)?;
            let requested = Format::new(size.width, size.height, current.fourcc);
            let applied = device.control.set_format(&requested).map_err(io_err)?;
            if applied.width != size.width || applied.height != size.height {
                return Err(DriverError::Unsupported);
            }
            Ok(())
        })
        .await
    }

    async fn query_supported_sizes(
        &self,
        handle: &ControlHandle,
    ) -> Result<SupportedSizes, DriverError> {
        self.with_device(handle, |device| {
            // A stream that never produced a frame reports nothing.
            if device.worker.as_ref().is_some_and(|w| !w.healthy()) {
                return Ok(SupportedSizes::default());
            }
            describe_sizes(&device.control)
        })
        .await
    }

    async fn set_preview_target(
        &self,
        handle: &ControlHandle,
        target: Option<&PreviewTarget>,
    ) -> Result<(), DriverError> {
        let path = target.map(|t| PathBuf::from(t.id()));
        self.with_device(handle, move |device| {
            *device.target.lock().unwrap() = path;
            Ok(())
        })
        .await
    }
}
