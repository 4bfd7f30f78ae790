//! Per-eye render targets and swap chains.
//!
//! Each eye renders into the current slot of its own swap chain, either
//! directly (plain path) or through a multisampled target that is resolved
//! into the slot afterwards. Finishing an eye hands the slot to the
//! compositor and moves on, so the application never draws into the image
//! the compositor is reading.

use log::{debug, info};

use crate::config::VrConfig;
use crate::device::{DeviceSession, Eye};
use crate::error::GpuError;
use crate::gpu::{GpuBackend, Rect, TargetDesc};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Ring of images shared with the compositor.
pub struct SwapChain<T> {
    slots: Vec<T>,
    current: usize,
    submitted: Option<usize>,
}

impl<T> SwapChain<T> {
    /// # Panics
    /// With fewer than two slots.
    pub fn new(slots: Vec<T>) -> Self {
        assert!(slots.len() >= 2, "swap chain needs at least two slots");
        Self {
            slots,
            current: 0,
            submitted: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot the application renders into next.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    /// Slot most recently handed to the compositor.
    pub fn submitted_index(&self) -> Option<usize> {
        self.submitted
    }

    pub fn submitted(&self) -> Option<&T> {
        self.submitted.map(|i| &self.slots[i])
    }

    /// Hand the current slot to the compositor and advance.
    fn commit(&mut self) {
        self.submitted = Some(self.current);
        self.current = (self.current + 1) % self.slots.len();
    }
}

/// Multisampled color + depth pair.
pub struct MsaaTargets<T> {
    color: T,
    depth: T,
    samples: u32,
}

/// Which targets scene draws go to.
pub enum RenderPath<T> {
    /// Straight into the swap chain slot
    Plain,
    /// Into multisampled targets, resolved into the slot on finish
    Multisample(MsaaTargets<T>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Unbound,
    Plain,
    Multisample,
}

struct EyeTargets<T> {
    swap_chain: SwapChain<T>,
    depth: T,
    path: RenderPath<T>,
}

/// One eye's render targets.
pub struct EyeBuffer<B: GpuBackend> {
    eye: Eye,
    size: (u32, u32),
    targets: Option<EyeTargets<B::Texture>>,
    binding: Binding,
}

impl<B: GpuBackend> EyeBuffer<B> {
    /// Allocate the swap chain and depth target at the eye's recommended size.
    pub fn new(
        backend: &mut B,
        session: &DeviceSession,
        eye: Eye,
        config: &VrConfig,
    ) -> Result<Self, GpuError> {
        let (rec_w, rec_h) = session.eye_desc(eye).recommended_size;
        let size = (
            ((rec_w as f32 * config.pixel_density).round() as u32).max(1),
            ((rec_h as f32 * config.pixel_density).round() as u32).max(1),
        );
        let slot_count = config.swap_chain_slots.max(2);

        // Anything created before a failure is dropped on the early return.
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(backend.create_target(&TargetDesc::color("eye swap slot", size.0, size.1))?);
        }
        let depth = backend.create_target(&TargetDesc::depth("eye depth", size.0, size.1))?;

        info!(
            "{:?} eye buffer: {}x{}, {} swap slots",
            eye, size.0, size.1, slot_count
        );

        Ok(Self {
            eye,
            size,
            targets: Some(EyeTargets {
                swap_chain: SwapChain::new(slots),
                depth,
                path: RenderPath::Plain,
            }),
            binding: Binding::Unbound,
        })
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn viewport(&self) -> Rect {
        Rect::from_size(self.size.0, self.size.1)
    }

    pub fn is_destroyed(&self) -> bool {
        self.targets.is_none()
    }

    pub fn swap_chain(&self) -> Option<&SwapChain<B::Texture>> {
        self.targets.as_ref().map(|t| &t.swap_chain)
    }

    pub fn depth_target(&self) -> Option<&B::Texture> {
        self.targets.as_ref().map(|t| &t.depth)
    }

    /// Image last handed to the compositor.
    pub fn submitted_texture(&self) -> Option<&B::Texture> {
        self.swap_chain().and_then(|sc| sc.submitted())
    }

    pub fn msaa_samples(&self) -> Option<u32> {
        match self.targets.as_ref().map(|t| &t.path) {
            Some(RenderPath::Multisample(msaa)) => Some(msaa.samples),
            _ => None,
        }
    }

    pub fn msaa_enabled(&self) -> bool {
        self.msaa_samples().is_some()
    }

    fn targets(&self) -> &EyeTargets<B::Texture> {
        match self.targets.as_ref() {
            Some(targets) => targets,
            None => panic!("{:?} eye buffer used after destroy", self.eye),
        }
    }

    /// Bind the current swap chain slot and clear it.
    ///
    /// # Panics
    /// If the buffer is already bound or destroyed.
    pub fn on_render(&mut self, backend: &mut B) {
        assert_eq!(self.binding, Binding::Unbound, "{:?} eye buffer bound twice", self.eye);
        let viewport = self.viewport();
        let targets = self.targets();
        backend.bind_target(
            targets.swap_chain.current(),
            Some(&targets.depth),
            viewport,
            Some(CLEAR_COLOR),
        );
        self.binding = Binding::Plain;
    }

    /// Unbind and hand the slot to the compositor.
    ///
    /// # Panics
    /// Without a matching [`EyeBuffer::on_render`].
    pub fn on_render_finish(&mut self, backend: &mut B) {
        assert_eq!(
            self.binding,
            Binding::Plain,
            "{:?} eye on_render_finish without matching on_render",
            self.eye
        );
        backend.unbind_target();
        self.commit();
    }

    /// Create multisampled targets. No-op when they already exist with the same sample count.
    pub fn setup_msaa(&mut self, backend: &mut B, samples: u32) -> Result<(), GpuError> {
        assert_eq!(self.binding, Binding::Unbound, "cannot change MSAA while rendering");
        if self.msaa_samples() == Some(samples) {
            return Ok(());
        }
        let (w, h) = self.size;
        let color = backend.create_target(&TargetDesc::color("eye msaa color", w, h).with_samples(samples))?;
        let depth = backend.create_target(&TargetDesc::depth("eye msaa depth", w, h).with_samples(samples))?;

        let eye = self.eye;
        let targets = match self.targets.as_mut() {
            Some(targets) => targets,
            None => panic!("{:?} eye buffer used after destroy", eye),
        };
        targets.path = RenderPath::Multisample(MsaaTargets { color, depth, samples });
        debug!("{:?} eye MSAA x{} enabled", eye, samples);
        Ok(())
    }

    /// Drop the multisampled targets and go back to the plain path.
    pub fn disable_msaa(&mut self) {
        assert_eq!(self.binding, Binding::Unbound, "cannot change MSAA while rendering");
        if let Some(targets) = self.targets.as_mut() {
            if matches!(targets.path, RenderPath::Multisample(_)) {
                targets.path = RenderPath::Plain;
                debug!("{:?} eye MSAA disabled", self.eye);
            }
        }
    }

    /// Bind the multisampled targets and clear them.
    ///
    /// # Panics
    /// If MSAA was not set up, or the buffer is already bound.
    pub fn on_render_msaa(&mut self, backend: &mut B) {
        assert_eq!(self.binding, Binding::Unbound, "{:?} eye buffer bound twice", self.eye);
        let viewport = self.viewport();
        let msaa = match &self.targets().path {
            RenderPath::Multisample(msaa) => msaa,
            RenderPath::Plain => panic!("{:?} eye on_render_msaa without setup_msaa", self.eye),
        };
        backend.bind_target(&msaa.color, Some(&msaa.depth), viewport, Some(CLEAR_COLOR));
        self.binding = Binding::Multisample;
    }

    /// Unbind, resolve into the current slot, then hand the slot to the compositor.
    pub fn on_render_msaa_finish(&mut self, backend: &mut B) {
        assert_eq!(
            self.binding,
            Binding::Multisample,
            "{:?} eye on_render_msaa_finish without matching on_render_msaa",
            self.eye
        );
        backend.unbind_target();
        let targets = self.targets();
        if let RenderPath::Multisample(msaa) = &targets.path {
            backend.resolve(&msaa.color, targets.swap_chain.current());
        }
        self.commit();
    }

    /// Bind whichever path is active.
    pub fn begin(&mut self, backend: &mut B) {
        if self.msaa_enabled() {
            self.on_render_msaa(backend);
        } else {
            self.on_render(backend);
        }
    }

    /// Finish whichever path [`EyeBuffer::begin`] bound.
    pub fn finish(&mut self, backend: &mut B) {
        match self.binding {
            Binding::Multisample => self.on_render_msaa_finish(backend),
            _ => self.on_render_finish(backend),
        }
    }

    fn commit(&mut self) {
        self.binding = Binding::Unbound;
        if let Some(targets) = self.targets.as_mut() {
            targets.swap_chain.commit();
        }
    }

    /// Release every target. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.targets.take().is_some() {
            debug!("{:?} eye buffer destroyed", self.eye);
        }
        self.binding = Binding::Unbound;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TargetFormat;
    use crate::testing::{GpuOp, RecordingBackend, ScriptedHmd};

    fn setup() -> (RecordingBackend, DeviceSession, VrConfig) {
        let session = DeviceSession::open(Box::new(ScriptedHmd::dk2())).unwrap();
        (RecordingBackend::new(1280, 720), session, VrConfig::default())
    }

    #[test]
    fn test_allocates_recommended_size() {
        let (mut backend, session, config) = setup();
        let buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        assert_eq!(buffer.size(), (1182, 1461));
        assert!(buffer.swap_chain().unwrap().len() >= 2);

        let descs = backend.live_descs();
        assert!(descs.iter().all(|d| (d.width, d.height) == (1182, 1461) && d.sample_count == 1));
        assert_eq!(descs.iter().filter(|d| d.format == TargetFormat::Depth).count(), 1);
    }

    #[test]
    fn test_pixel_density_scales_targets() {
        let (mut backend, session, mut config) = setup();
        config.pixel_density = 0.5;
        let buffer = EyeBuffer::new(&mut backend, &session, Eye::Right, &config).unwrap();
        assert_eq!(buffer.size(), (591, 731));
    }

    #[test]
    fn test_slot_index_wraps_after_full_cycle() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        let slots = buffer.swap_chain().unwrap().len();
        let initial = buffer.swap_chain().unwrap().current_index();

        for cycle in 1..=(slots * 3) {
            buffer.on_render(&mut backend);
            buffer.on_render_finish(&mut backend);
            let sc = buffer.swap_chain().unwrap();
            assert_ne!(sc.current_index(), sc.submitted_index().unwrap());
            if cycle % slots == 0 {
                assert_eq!(sc.current_index(), initial);
            }
        }
    }

    #[test]
    fn test_render_binds_current_slot_with_full_viewport() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        backend.clear_ops();
        buffer.on_render(&mut backend);
        match &backend.ops[0] {
            GpuOp::Bind { viewport, depth, clear, .. } => {
                assert_eq!(*viewport, Rect::from_size(1182, 1461));
                assert!(depth.is_some());
                assert!(*clear);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_msaa_resolves_before_advancing() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        buffer.setup_msaa(&mut backend, 4).unwrap();
        let slot_before = buffer.swap_chain().unwrap().current_index();
        backend.clear_ops();

        buffer.begin(&mut backend);
        buffer.finish(&mut backend);

        assert!(matches!(backend.ops[0], GpuOp::Bind { .. }));
        assert_eq!(backend.ops[1], GpuOp::Unbind);
        assert!(matches!(backend.ops[2], GpuOp::Resolve { .. }));
        assert_eq!(buffer.swap_chain().unwrap().submitted_index(), Some(slot_before));
    }

    #[test]
    fn test_msaa_toggle_leaves_no_resources_behind() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        let baseline = backend.live_descs();

        buffer.setup_msaa(&mut backend, 4).unwrap();
        assert_eq!(backend.live_count(), baseline.len() + 2);
        buffer.disable_msaa();

        assert_eq!(backend.live_descs(), baseline);
        assert_eq!(buffer.swap_chain().unwrap().current_index(), 0);
        assert_eq!(buffer.swap_chain().unwrap().submitted_index(), None);
        assert!(!buffer.msaa_enabled());
    }

    #[test]
    fn test_failed_msaa_setup_keeps_plain_path() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        let live = backend.live_count();
        backend.fail_after(1);
        assert!(buffer.setup_msaa(&mut backend, 4).is_err());
        assert_eq!(backend.live_count(), live);
        assert!(!buffer.msaa_enabled());
    }

    #[test]
    fn test_failed_allocation_releases_partial_buffer() {
        let (mut backend, session, config) = setup();
        backend.fail_after(2);
        assert!(EyeBuffer::new(&mut backend, &session, Eye::Left, &config).is_err());
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn test_destroy_twice_is_harmless() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        buffer.setup_msaa(&mut backend, 4).unwrap();
        buffer.destroy();
        buffer.destroy();
        assert!(buffer.is_destroyed());
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "without matching on_render")]
    fn test_finish_without_render_panics() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        buffer.on_render_finish(&mut backend);
    }

    #[test]
    #[should_panic(expected = "without setup_msaa")]
    fn test_msaa_render_without_setup_panics() {
        let (mut backend, session, config) = setup();
        let mut buffer = EyeBuffer::new(&mut backend, &session, Eye::Left, &config).unwrap();
        buffer.on_render_msaa(&mut backend);
    }
}
