//! GPU seam used by the stereo pipeline.
//!
//! Eye buffers, the mirror and the tracker frustum only talk to
//! [`GpuBackend`]. The wgpu implementation lives in `renderer.rs`.
//! Textures and meshes are owned values: dropping one releases the GPU
//! resource.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::device::LensDistortion;
use crate::error::GpuError;

/// Pixel format class of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Color,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
    pub sample_count: u32,
}

impl TargetDesc {
    pub fn color(label: &'static str, width: u32, height: u32) -> Self {
        Self {
            label,
            width,
            height,
            format: TargetFormat::Color,
            sample_count: 1,
        }
    }

    pub fn depth(label: &'static str, width: u32, height: u32) -> Self {
        Self {
            format: TargetFormat::Depth,
            ..Self::color(label, width, height)
        }
    }

    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Rejects zero-sized targets and sample counts the backends can't allocate.
    pub fn validate(&self) -> Result<(), GpuError> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::InvalidSize {
                label: self.label,
                width: self.width,
                height: self.height,
            });
        }
        if !matches!(self.sample_count, 1 | 2 | 4 | 8) {
            return Err(GpuError::UnsupportedSampleCount(self.sample_count));
        }
        Ok(())
    }
}

/// Pixel rectangle, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// A render target created by a backend.
pub trait GpuTarget {
    fn desc(&self) -> &TargetDesc;

    fn size(&self) -> (u32, u32) {
        let desc = self.desc();
        (desc.width, desc.height)
    }
}

/// Destination of a blit: the application window or another target.
#[derive(Debug)]
pub enum BlitTarget<'a, T> {
    Window,
    Texture(&'a T),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlitFilter {
    Nearest,
    Linear,
    /// Barrel warp applied while sampling (compositor mirror).
    Lens(LensDistortion),
}

/// Vertex for wireframe meshes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// Render-thread GPU operations needed by the HMD pipeline.
pub trait GpuBackend {
    type Texture: GpuTarget;
    type Mesh;

    fn create_target(&mut self, desc: &TargetDesc) -> Result<Self::Texture, GpuError>;

    /// Current size of the application window.
    fn window_size(&self) -> (u32, u32);

    /// Make `color`/`depth` the active render target. `clear` clears color to
    /// the given RGBA and depth to 1.0 before any draws.
    fn bind_target(
        &mut self,
        color: &Self::Texture,
        depth: Option<&Self::Texture>,
        viewport: Rect,
        clear: Option<[f32; 4]>,
    );

    fn set_viewport(&mut self, viewport: Rect);

    fn unbind_target(&mut self);

    /// Resolve a multisampled color target into a single-sample one of the same size.
    fn resolve(&mut self, msaa: &Self::Texture, dst: &Self::Texture);

    /// Copy `src_rect` of `src` into `dst_rect` of `dst`. Scales when the rects differ.
    fn blit(
        &mut self,
        src: &Self::Texture,
        src_rect: Rect,
        dst: BlitTarget<'_, Self::Texture>,
        dst_rect: Rect,
        filter: BlitFilter,
    );

    fn create_line_mesh(
        &mut self,
        vertices: &[LineVertex],
        indices: &[u16],
    ) -> Result<Self::Mesh, GpuError>;

    /// Draw a line list into the bound target.
    fn draw_lines(&mut self, mesh: &Self::Mesh, mvp: Mat4);
}
