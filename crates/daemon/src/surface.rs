use std::sync::Arc;

use tracing::{debug, warn};
use uvclink_common::backend::RenderSurface;
use uvclink_common::types::{PreviewTarget, Transform};

use crate::machine::ConnectionMachine;

/// Follows the lifecycle of the presentation surface and keeps its
/// orientation transform current.
pub struct SurfaceBinder {
    surface: Arc<dyn RenderSurface>,
    mirror: bool,
    current: Option<PreviewTarget>,
}

impl SurfaceBinder {
    pub fn new(surface: Arc<dyn RenderSurface>, mirror: bool) -> Self {
        Self {
            surface,
            mirror,
            current: None,
        }
    }

    pub fn target(&self) -> Option<&PreviewTarget> {
        self.current.as_ref()
    }

    pub async fn on_available(
        &mut self,
        target: PreviewTarget,
        width: u32,
        height: u32,
        machine: &mut ConnectionMachine,
    ) {
        if let Some(previous) = &self.current {
            if *previous != target {
                warn!(previous = %previous, target = %target, "replacing live preview target");
                machine.release_target().await;
            }
        }
        debug!(target = %target, width, height, "preview surface available");
        self.current = Some(target);
        self.apply(width, height);
    }

    pub fn on_resized(&mut self, width: u32, height: u32) {
        if self.current.is_none() {
            debug!(width, height, "resize without a live surface ignored");
            return;
        }
        self.apply(width, height);
    }

    /// Releases the target before forgetting it. A destroy notice for a
    /// surface other than the live one is ignored.
    pub async fn on_destroyed(
        &mut self,
        target: &PreviewTarget,
        machine: &mut ConnectionMachine,
    ) -> bool {
        if self.current.as_ref() != Some(target) {
            debug!(target = %target, "destroy for unknown surface ignored");
            return false;
        }
        machine.release_target().await;
        self.current = None;
        true
    }

    fn apply(&self, width: u32, height: u32) {
        let transform = if self.mirror {
            Transform::horizontal_mirror(width, height)
        } else {
            Transform::IDENTITY
        };
        debug!(width, height, mirror = self.mirror, "applying surface transform");
        self.surface.set_transform(transform);
    }
}
