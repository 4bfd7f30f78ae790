//! Mirror of the HMD view in the application window.
//!
//! Two mutually exclusive modes, picked when VR buffers are created:
//! the compositor mirror (the submitted eye images, lens-warped as the
//! headset shows them) and the non-distorted debug mirror, where the scene
//! is rendered straight into a window-sized target.

use log::{debug, info};
use serde::Deserialize;

use crate::device::{Eye, LensDistortion};
use crate::error::GpuError;
use crate::gpu::{BlitFilter, BlitTarget, GpuBackend, GpuTarget, Rect, TargetDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    #[default]
    Distorted,
    NonDistorted,
}

/// Which part of the mirror to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorEyes {
    /// Both eyes side by side
    Both,
    Single(Eye),
}

pub enum MirrorState<T> {
    Compositor { texture: T },
    NonDistort { color: T, depth: T },
}

pub struct MirrorPresenter<B: GpuBackend> {
    state: Option<MirrorState<B::Texture>>,
    lens: Option<LensDistortion>,
    size: (u32, u32),
}

impl<B: GpuBackend> MirrorPresenter<B> {
    /// Mirror texture the compositor output is copied into.
    pub fn compositor(
        backend: &mut B,
        width: u32,
        height: u32,
        lens: Option<LensDistortion>,
    ) -> Result<Self, GpuError> {
        let state = Self::allocate(backend, MirrorMode::Distorted, width, height)?;
        info!("Compositor mirror {}x{}", width, height);
        Ok(Self {
            state,
            lens,
            size: (width, height),
        })
    }

    /// Window-sized color + depth target for rendering the scene without lens correction.
    pub fn non_distorted(backend: &mut B, width: u32, height: u32) -> Result<Self, GpuError> {
        let state = Self::allocate(backend, MirrorMode::NonDistorted, width, height)?;
        info!("Non-distorted mirror {}x{}", width, height);
        Ok(Self {
            state,
            lens: None,
            size: (width, height),
        })
    }

    fn allocate(
        backend: &mut B,
        mode: MirrorMode,
        width: u32,
        height: u32,
    ) -> Result<Option<MirrorState<B::Texture>>, GpuError> {
        let state = match mode {
            MirrorMode::Distorted => MirrorState::Compositor {
                texture: backend.create_target(&TargetDesc::color("mirror", width, height))?,
            },
            MirrorMode::NonDistorted => MirrorState::NonDistort {
                color: backend.create_target(&TargetDesc::color("non-distort mirror", width, height))?,
                depth: backend.create_target(&TargetDesc::depth("non-distort mirror depth", width, height))?,
            },
        };
        Ok(Some(state))
    }

    pub fn mode(&self) -> Option<MirrorMode> {
        match self.state.as_ref()? {
            MirrorState::Compositor { .. } => Some(MirrorMode::Distorted),
            MirrorState::NonDistort { .. } => Some(MirrorMode::NonDistorted),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// The color target shown in the window.
    pub fn texture(&self) -> Option<&B::Texture> {
        match self.state.as_ref()? {
            MirrorState::Compositor { texture } => Some(texture),
            MirrorState::NonDistort { color, .. } => Some(color),
        }
    }

    /// Recreate the targets at a new window size, keeping the mode.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) -> Result<(), GpuError> {
        let Some(mode) = self.mode() else {
            return Ok(());
        };
        if (width, height) == self.size {
            return Ok(());
        }
        // On failure the old targets stay in place at the old size.
        self.state = Self::allocate(backend, mode, width, height)?;
        self.size = (width, height);
        debug!("Mirror resized to {}x{}", width, height);
        Ok(())
    }

    /// Copy the submitted eye images into the mirror texture, side by side.
    /// No-op in non-distorted mode.
    pub fn compose(&self, backend: &mut B, left: &B::Texture, right: &B::Texture) {
        let Some(MirrorState::Compositor { texture }) = self.state.as_ref() else {
            return;
        };
        let filter = match self.lens {
            Some(lens) => BlitFilter::Lens(lens),
            None => BlitFilter::Linear,
        };
        let half = self.size.0 / 2;
        for (eye, src) in [(Eye::Left, left), (Eye::Right, right)] {
            let (w, h) = src.size();
            let x = eye.index() as u32 * half;
            backend.blit(
                src,
                Rect::from_size(w, h),
                BlitTarget::Texture(texture),
                Rect::new(x, 0, half, self.size.1),
                filter,
            );
        }
    }

    /// Blit the mirror texture into the window at `(offset, 0)`, unscaled.
    ///
    /// # Panics
    /// In non-distorted mode.
    pub fn blit_mirror(&self, backend: &mut B, eyes: MirrorEyes, offset: u32) {
        let texture = match self.state.as_ref() {
            Some(MirrorState::Compositor { texture }) => texture,
            Some(MirrorState::NonDistort { .. }) => panic!("blit_mirror in non-distorted mirror mode"),
            None => return,
        };
        let (w, h) = self.size;
        let src = match eyes {
            MirrorEyes::Both => Rect::from_size(w, h),
            MirrorEyes::Single(eye) => Rect::new(eye.index() as u32 * (w / 2), 0, w / 2, h),
        };
        let dst = Rect::new(offset, 0, src.width, src.height);
        backend.blit(texture, src, BlitTarget::Window, dst, BlitFilter::Nearest);
    }

    /// Bind the non-distorted target and clear it.
    ///
    /// # Panics
    /// In compositor mode.
    pub fn on_non_distort_mirror_start(&self, backend: &mut B) {
        let (color, depth) = self.non_distort_targets("on_non_distort_mirror_start");
        backend.bind_target(color, Some(depth), Rect::from_size(self.size.0, self.size.1), Some([0.0, 0.0, 0.0, 1.0]));
    }

    /// Restrict drawing to `eye`'s half of the non-distorted target.
    pub fn bind_non_distort_eye(&self, backend: &mut B, eye: Eye) {
        self.non_distort_targets("bind_non_distort_eye");
        let half = self.size.0 / 2;
        backend.set_viewport(Rect::new(eye.index() as u32 * half, 0, half, self.size.1));
    }

    pub fn on_non_distort_mirror_finish(&self, backend: &mut B) {
        self.non_distort_targets("on_non_distort_mirror_finish");
        backend.unbind_target();
    }

    /// Blit the non-distorted target into the window at `(offset, 0)`, unscaled.
    pub fn blit_non_distort_mirror(&self, backend: &mut B, offset: u32) {
        let (color, _) = self.non_distort_targets("blit_non_distort_mirror");
        let (w, h) = self.size;
        backend.blit(
            color,
            Rect::from_size(w, h),
            BlitTarget::Window,
            Rect::new(offset, 0, w, h),
            BlitFilter::Nearest,
        );
    }

    fn non_distort_targets(&self, call: &str) -> (&B::Texture, &B::Texture) {
        match self.state.as_ref() {
            Some(MirrorState::NonDistort { color, depth }) => (color, depth),
            _ => panic!("{} requires the non-distorted mirror", call),
        }
    }

    /// Release the mirror targets. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.state.take().is_some() {
            debug!("Mirror destroyed");
        }
    }
}
