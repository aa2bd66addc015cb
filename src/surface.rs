//! The render target the shader draws into.

use crate::adapter::{DrawContext, DrawOp, SurfaceHandle, TextureHandle, VersionAdapter};
use crate::error::SurfaceAllocationError;
use tracing::debug;

/// Owns exactly one host render target. Holds resources, does not draw.
#[derive(Debug)]
pub struct CanvasSurface {
    handle: Option<SurfaceHandle>,
    render_scale: f32,
    alpha: f32,
    allocations: u64,
}

impl CanvasSurface {
    pub fn new(render_scale: f32, alpha: f32) -> Self {
        Self {
            handle: None,
            render_scale: render_scale.clamp(0.05, 1.0),
            alpha: alpha.clamp(0.0, 1.0),
            allocations: 0,
        }
    }

    /// Backing size for a requested host size.
    pub fn scaled_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |v: u32| ((v as f32 * self.render_scale).round() as u32).max(1);
        (scale(width), scale(height))
    }

    /// Reallocates the render target when the scaled size differs from the
    /// current allocation. Returns whether a reallocation happened.
    pub fn resize(&mut self, adapter: &mut VersionAdapter, width: u32, height: u32) -> Result<bool, SurfaceAllocationError> {
        let (w, h) = self.scaled_size(width, height);
        if self.size() == Some((w, h)) {
            return Ok(false);
        }
        let new_handle = adapter.create_surface(w, h)?;
        if let Some(old) = self.handle.replace(new_handle) {
            adapter.release_surface(old);
        }
        self.allocations += 1;
        debug!("Canvas surface allocated at {}x{}", w, h);
        Ok(true)
    }

    /// Records a clear of the whole surface.
    pub fn clear(&self, ctx: &mut DrawContext, color: [f32; 4]) {
        if let Some(target) = self.handle {
            ctx.push(DrawOp::Clear { target, color });
        }
    }

    /// The surface as a sampleable texture.
    pub fn as_texture_handle(&self) -> Option<TextureHandle> {
        self.handle.map(|h| h.texture())
    }

    pub fn handle(&self) -> Option<SurfaceHandle> {
        self.handle
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.handle.map(|h| (h.texture().width(), h.texture().height()))
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn render_scale(&self) -> f32 {
        self.render_scale
    }

    /// Number of render targets allocated over the surface's lifetime.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn release(&mut self, adapter: &mut VersionAdapter) {
        if let Some(handle) = self.handle.take() {
            adapter.release_surface(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::headless::HeadlessHost;

    fn adapter() -> (VersionAdapter, crate::adapter::headless::HeadlessProbe) {
        let (host, probe) = HeadlessHost::render_targets(640, 480);
        (VersionAdapter::select("1.21.4", host).unwrap(), probe)
    }

    #[test]
    fn test_resize_is_idempotent() {
        let (mut adapter, probe) = adapter();
        let mut surface = CanvasSurface::new(1.0, 1.0);
        assert!(surface.resize(&mut adapter, 320, 200).unwrap());
        assert!(!surface.resize(&mut adapter, 320, 200).unwrap());
        assert_eq!(probe.surface_allocations(), 1);
        assert_eq!(surface.allocations(), 1);
    }

    #[test]
    fn test_resize_to_new_size_reallocates() {
        let (mut adapter, probe) = adapter();
        let mut surface = CanvasSurface::new(1.0, 1.0);
        surface.resize(&mut adapter, 320, 200).unwrap();
        assert!(surface.resize(&mut adapter, 640, 480).unwrap());
        assert_eq!(surface.size(), Some((640, 480)));
        assert_eq!(probe.surface_allocations(), 2);
        assert_eq!(probe.live_targets(), 1);
        let target = surface.handle().unwrap().target();
        assert_eq!(probe.target_size(target), Some((640, 480)));
    }

    #[test]
    fn test_render_scale_has_minimum_size() {
        let surface = CanvasSurface::new(0.5, 1.0);
        assert_eq!(surface.scaled_size(640, 481), (320, 241));
        let tiny = CanvasSurface::new(0.01, 1.0);
        assert_eq!(tiny.render_scale(), 0.05);
        assert_eq!(tiny.scaled_size(4, 4), (1, 1));
    }

    #[test]
    fn test_failed_allocation_keeps_previous_target() {
        let (mut adapter, probe) = adapter();
        let mut surface = CanvasSurface::new(1.0, 1.0);
        surface.resize(&mut adapter, 100, 100).unwrap();
        probe.fail_surface_allocation(true);
        assert!(surface.resize(&mut adapter, 200, 200).is_err());
        assert_eq!(surface.size(), Some((100, 100)));
        probe.fail_surface_allocation(false);
        assert!(surface.resize(&mut adapter, 200, 200).unwrap());
    }

    #[test]
    fn test_clear_and_release() {
        let (mut adapter, probe) = adapter();
        let mut surface = CanvasSurface::new(1.0, 0.5);
        let mut ctx = DrawContext::new((640, 480));
        surface.clear(&mut ctx, [0.0; 4]);
        assert!(ctx.ops().is_empty());
        surface.resize(&mut adapter, 10, 10).unwrap();
        surface.clear(&mut ctx, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(ctx.ops().len(), 1);
        assert_eq!(surface.as_texture_handle().map(|t| t.width()), Some(10));
        surface.release(&mut adapter);
        assert_eq!(probe.live_targets(), 0);
        assert!(surface.handle().is_none());
    }
}
