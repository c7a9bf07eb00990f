use async_trait::async_trait;

use crate::error::DriverError;
use crate::types::{
    ControlHandle, DeviceDescriptor, PreviewSize, PreviewTarget, SupportedSizes, Transform,
};

/// Invoked exactly once with the OS grant decision, from any thread.
pub type PermissionCallback = Box<dyn FnOnce(bool) + Send + 'static>;

#[async_trait]
pub trait UsbSubsystem: Send + Sync {
    async fn enumerate(&self) -> Vec<DeviceDescriptor>;
    async fn has_permission(&self, device: &DeviceDescriptor) -> bool;
    /// Starts an OS permission prompt and returns without waiting for it.
    fn request_permission(&self, device: &DeviceDescriptor, on_result: PermissionCallback);
}

/// Capability set of the native UVC streaming engine.
///
/// Every call may block on USB I/O; implementations are expected to move
/// that work off the async executor.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    async fn open(&self, device: &DeviceDescriptor) -> Result<ControlHandle, DriverError>;
    async fn close(&self, handle: ControlHandle);
    async fn start_preview(&self, handle: &ControlHandle) -> Result<(), DriverError>;
    async fn stop_preview(&self, handle: &ControlHandle) -> Result<(), DriverError>;
    /// `Err(DriverError::Unsupported)` when the device rejects the size.
    async fn set_preview_size(
        &self,
        handle: &ControlHandle,
        size: PreviewSize,
    ) -> Result<(), DriverError>;
    async fn query_supported_sizes(
        &self,
        handle: &ControlHandle,
    ) -> Result<SupportedSizes, DriverError>;
    /// Binds the render destination, or unbinds it with `None`.
    async fn set_preview_target(
        &self,
        handle: &ControlHandle,
        target: Option<&PreviewTarget>,
    ) -> Result<(), DriverError>;
}

/// Presentation surface the stream is shown on.
pub trait RenderSurface: Send + Sync {
    fn set_transform(&self, transform: Transform);
}
