//! HMD renderer: device session, eye buffers, mirror and debug views behind
//! one render-thread object.
//!
//! Typical frame:
//!
//! ```text
//! on_render_start
//! for eye in [Left, Right]:
//!     on_eye_render -> draw scene with the returned matrix
//!     render_tracker_frustum
//!     on_eye_render_finish
//! submit_frame
//! blit_mirror
//! ```

use glam::Mat4;
use log::{error, info, warn};

use crate::config::VrConfig;
use crate::device::{DeviceSession, Eye, HmdDevice, PerfHudMode};
use crate::error::VrError;
use crate::flags::{MapStats, RenderFlag, RenderFlags};
use crate::frame::{FrameStats, FrameSubmitter};
use crate::gpu::GpuBackend;
use crate::input::Key;
use crate::mirror::{MirrorEyes, MirrorMode, MirrorPresenter};
use crate::pose::FrameTiming;
use crate::tracking::{CameraFrustum, DebugHud, HudInput};
use crate::ui::TextRenderer;

pub struct HmdRenderer<B: GpuBackend> {
    config: VrConfig,
    msaa: bool,
    // Field order is drop order: GPU resources go before the session closes.
    frames: Option<FrameSubmitter<B>>,
    mirror: Option<MirrorPresenter<B>>,
    frustum: CameraFrustum<B>,
    hud: Option<DebugHud>,
    session: Option<DeviceSession>,
}

impl<B: GpuBackend> HmdRenderer<B> {
    pub fn new(config: VrConfig) -> Self {
        Self {
            msaa: config.msaa,
            config,
            frames: None,
            mirror: None,
            frustum: CameraFrustum::new(),
            hud: None,
            session: None,
        }
    }

    pub fn config(&self) -> &VrConfig {
        &self.config
    }

    /// Connect to the headset. On failure nothing is retained.
    pub fn init_vr(&mut self, device: Box<dyn HmdDevice>) -> Result<(), VrError> {
        if self.session.is_some() {
            warn!("init_vr with an open session, closing it first");
            self.destroy_vr();
        }
        let mut session = match DeviceSession::open(device) {
            Ok(session) => session,
            Err(err) => {
                error!("Failed to initialize VR: {}", err);
                return Err(err.into());
            }
        };
        if self.config.perf_hud != PerfHudMode::Off {
            session.set_perf_hud(self.config.perf_hud);
        }
        self.session = Some(session);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn buffers_initialized(&self) -> bool {
        self.frames.is_some()
    }

    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.as_ref()
    }

    /// Create eye buffers and the mirror (mode from config) for a window of the given size.
    ///
    /// A second call without [`HmdRenderer::destroy_vr`] in between is rejected.
    pub fn init_vr_buffers(&mut self, backend: &mut B, window_width: u32, window_height: u32) -> Result<(), VrError> {
        let session = self.session.as_ref().ok_or(VrError::NotInitialized)?;
        if self.frames.is_some() {
            return Err(VrError::BuffersAlreadyInitialized);
        }

        let config = VrConfig {
            msaa: self.msaa,
            ..self.config.clone()
        };
        // Built into locals so a failure part way drops everything created so far.
        let frames = FrameSubmitter::new(backend, session, &config)?;
        let mirror = match self.config.mirror {
            MirrorMode::Distorted => {
                MirrorPresenter::compositor(backend, window_width, window_height, session.descriptor().lens)?
            }
            MirrorMode::NonDistorted => MirrorPresenter::non_distorted(backend, window_width, window_height)?,
        };

        let (w, h) = frames.eye_buffer(Eye::Left).size();
        info!(
            "VR buffers ready: eyes {}x{}, mirror {:?} {}x{}, MSAA {}",
            w, h, self.config.mirror, window_width, window_height, self.msaa
        );
        self.frames = Some(frames);
        self.mirror = Some(mirror);
        Ok(())
    }

    /// Replace the mirror with a non-distorted one, bypassing lens correction.
    pub fn init_non_distort_mirror(&mut self, backend: &mut B, width: u32, height: u32) -> Result<(), VrError> {
        if self.session.is_none() {
            return Err(VrError::NotInitialized);
        }
        // The current mirror stays if the new one cannot be created.
        let mirror = MirrorPresenter::non_distorted(backend, width, height)?;
        self.mirror = Some(mirror);
        Ok(())
    }

    pub fn is_non_distort_mirror(&self) -> bool {
        self.mirror.as_ref().and_then(|m| m.mode()) == Some(MirrorMode::NonDistorted)
    }

    /// Release buffers, mirror and debug geometry, then close the device.
    /// Safe without a prior `init_vr` and safe to repeat.
    pub fn destroy_vr(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            frames.destroy();
        }
        if let Some(mut mirror) = self.mirror.take() {
            mirror.destroy();
        }
        self.frustum = CameraFrustum::new();
        self.hud = None;
        if self.session.take().is_some() {
            info!("VR destroyed");
        }
    }

    /// HMD panel resolution.
    pub fn get_resolution(&self) -> Result<(u32, u32), VrError> {
        self.session
            .as_ref()
            .map(DeviceSession::resolution)
            .ok_or(VrError::NotInitialized)
    }

    pub fn is_debug_hmd(&self) -> bool {
        self.session.as_ref().is_some_and(DeviceSession::is_debug_hmd)
    }

    pub fn is_dk2(&self) -> bool {
        self.session.as_ref().is_some_and(DeviceSession::is_dk2)
    }

    fn frame_parts(&mut self) -> Result<(&mut DeviceSession, &mut FrameSubmitter<B>), VrError> {
        match (self.session.as_mut(), self.frames.as_mut()) {
            (Some(session), Some(frames)) => Ok((session, frames)),
            _ => Err(VrError::NotInitialized),
        }
    }

    pub fn on_render_start(&mut self) -> Result<FrameTiming, VrError> {
        let (session, frames) = self.frame_parts()?;
        Ok(frames.on_render_start(session))
    }

    /// Bind `eye`'s buffer and return its view-projection matrix.
    pub fn on_eye_render(&mut self, backend: &mut B, eye: Eye) -> Result<Mat4, VrError> {
        let (session, frames) = self.frame_parts()?;
        Ok(frames.on_eye_render(backend, session, eye))
    }

    pub fn on_eye_render_finish(&mut self, backend: &mut B, eye: Eye) -> Result<(), VrError> {
        let (_, frames) = self.frame_parts()?;
        frames.on_eye_render_finish(backend, eye);
        Ok(())
    }

    /// Last matrix computed for `eye`, identity before the first frame.
    pub fn get_eye_mvp_matrix(&self, eye: Eye) -> Mat4 {
        self.frames
            .as_ref()
            .map_or(Mat4::IDENTITY, |frames| frames.eye_mvp_matrix(eye))
    }

    /// Submit both eyes and, if accepted, refresh the compositor mirror.
    pub fn submit_frame(&mut self, backend: &mut B) -> Result<(), VrError> {
        let (Some(session), Some(frames)) = (self.session.as_mut(), self.frames.as_mut()) else {
            return Err(VrError::NotInitialized);
        };
        frames.submit_frame(session)?;

        if let Some(mirror) = self.mirror.as_ref() {
            let left = frames.eye_buffer(Eye::Left).submitted_texture();
            let right = frames.eye_buffer(Eye::Right).submitted_texture();
            if let (Some(left), Some(right)) = (left, right) {
                mirror.compose(backend, left, right);
            }
        }
        Ok(())
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frames.as_ref().map(FrameSubmitter::stats).unwrap_or_default()
    }

    /// Eye render target size, `None` before buffers exist.
    pub fn eye_size(&self, eye: Eye) -> Option<(u32, u32)> {
        self.frames.as_ref().map(|f| f.eye_buffer(eye).size())
    }

    /// Show the compositor mirror in the window at `(offset, 0)`.
    pub fn blit_mirror(&self, backend: &mut B, eyes: MirrorEyes, offset: u32) {
        if let Some(mirror) = self.mirror.as_ref() {
            mirror.blit_mirror(backend, eyes, offset);
        }
    }

    pub fn on_non_distort_mirror_start(&self, backend: &mut B) -> Result<(), VrError> {
        self.mirror.as_ref().ok_or(VrError::NotInitialized)?.on_non_distort_mirror_start(backend);
        Ok(())
    }

    /// Restrict drawing to `eye`'s half of the non-distorted mirror; returns the eye's matrix.
    pub fn bind_non_distort_eye(&self, backend: &mut B, eye: Eye) -> Result<Mat4, VrError> {
        self.mirror.as_ref().ok_or(VrError::NotInitialized)?.bind_non_distort_eye(backend, eye);
        Ok(self.get_eye_mvp_matrix(eye))
    }

    pub fn on_non_distort_mirror_finish(&self, backend: &mut B) -> Result<(), VrError> {
        self.mirror.as_ref().ok_or(VrError::NotInitialized)?.on_non_distort_mirror_finish(backend);
        Ok(())
    }

    pub fn blit_non_distort_mirror(&self, backend: &mut B, offset: u32) -> Result<(), VrError> {
        self.mirror.as_ref().ok_or(VrError::NotInitialized)?.blit_non_distort_mirror(backend, offset);
        Ok(())
    }

    /// Recreate the mirror for a new window size. Eye buffers are unaffected.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) -> Result<(), VrError> {
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.resize(backend, width, height)?;
        }
        Ok(())
    }

    /// Switch multisampled eye rendering on or off. Applies immediately when
    /// buffers exist, otherwise at `init_vr_buffers`.
    pub fn set_msaa(&mut self, backend: &mut B, enabled: bool) -> Result<(), VrError> {
        if let Some(frames) = self.frames.as_mut() {
            frames.set_msaa(backend, enabled)?;
        }
        self.msaa = enabled;
        Ok(())
    }

    pub fn msaa_enabled(&self) -> bool {
        self.msaa
    }

    pub fn show_perf_stats(&mut self, mode: PerfHudMode) {
        if let Some(session) = self.session.as_mut() {
            session.set_perf_hud(mode);
        }
    }

    pub fn recenter(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.recenter();
        }
    }

    /// Viewer key bindings: R recenters, H cycles the perf HUD, F1-F8 toggle
    /// render flags (F8 also switches MSAA) and ~ toggles the stats view.
    pub fn on_key_press(&mut self, backend: &mut B, key: Key, flags: &mut RenderFlags) -> Result<(), VrError> {
        let flag = match key {
            Key::R => {
                self.recenter();
                return Ok(());
            }
            Key::H => {
                if let Some(mode) = self.session.as_ref().map(|s| s.perf_hud().next()) {
                    self.show_perf_stats(mode);
                }
                return Ok(());
            }
            Key::Escape => return Ok(()),
            Key::Tilde => RenderFlag::ShowStats,
            Key::F1 => RenderFlag::Wireframe,
            Key::F2 => RenderFlag::ShowLightmaps,
            Key::F3 => RenderFlag::UseLightmaps,
            Key::F4 => RenderFlag::AlphaTest,
            Key::F5 => RenderFlag::SkipMissingTex,
            Key::F6 => RenderFlag::SkipPvs,
            Key::F7 => RenderFlag::SkipFrustumCulling,
            Key::F8 => RenderFlag::Multisampling,
        };

        let on = flags.toggle(flag);
        info!("{}: {}", flag.label(), if on { "on" } else { "off" });
        if flag == RenderFlag::Multisampling {
            if let Err(err) = self.set_msaa(backend, on) {
                flags.set(flag, self.msaa);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Set up the debug HUD and tracker frustum, as enabled in the config.
    pub fn create_debug(&mut self, backend: &mut B) -> Result<(), VrError> {
        let session = self.session.as_ref().ok_or(VrError::NotInitialized)?;
        if self.config.tracker_frustum {
            self.frustum.recalculate(backend, session)?;
        }
        if self.config.debug_hud {
            self.hud = Some(DebugHud::new());
        }
        Ok(())
    }

    /// Rebuild the tracker frustum after the device geometry changed.
    pub fn recalculate_tracker_frustum(&mut self, backend: &mut B) -> Result<(), VrError> {
        let session = self.session.as_ref().ok_or(VrError::NotInitialized)?;
        self.frustum.recalculate(backend, session)?;
        Ok(())
    }

    /// Once per frame, `now` in seconds.
    pub fn update_debug(&mut self, now: f64) {
        if let Some(hud) = self.hud.as_mut() {
            hud.on_update(now);
        }
    }

    pub fn debug_hud(&self) -> Option<&DebugHud> {
        self.hud.as_ref()
    }

    pub fn render_debug(&self, text: &mut dyn TextRenderer, map_stats: Option<&MapStats>) {
        let (Some(hud), Some(session)) = (self.hud.as_ref(), self.session.as_ref()) else {
            return;
        };
        let poses = self.frames.as_ref().map(FrameSubmitter::poses);
        let input = HudInput {
            session,
            tracking: poses.and_then(|p| p.tracking_state()),
            timing: poses.and_then(|p| p.timing()),
            eye_sizes: [
                self.eye_size(Eye::Left).unwrap_or_default(),
                self.eye_size(Eye::Right).unwrap_or_default(),
            ],
            map_stats,
        };
        hud.on_render(text, &input);
    }

    /// Draw the tracker frustum into the bound eye target.
    pub fn render_tracker_frustum(&self, backend: &mut B, eye: Eye) {
        let Some(frames) = self.frames.as_ref() else {
            return;
        };
        if let Some(tracking) = frames.poses().tracking_state() {
            self.frustum.on_render(backend, frames.eye_mvp_matrix(eye), tracking);
        }
    }
}

impl<B: GpuBackend> Drop for HmdRenderer<B> {
    fn drop(&mut self) {
        self.destroy_vr();
    }
}
