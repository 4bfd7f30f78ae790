//! Per-frame orchestration: timing, per-eye render brackets and compositor submission.
//!
//! Phases run strictly in order:
//!
//! ```text
//! Idle -> TimingAcquired -> EyeRendering(Left) -> EyeFinished(Left)
//!      -> EyeRendering(Right) -> EyeFinished(Right) -> (submit) -> Idle
//! ```
//!
//! Any call out of that order is a caller bug and panics. A rejected
//! submission only drops the frame.

use glam::Mat4;
use log::{debug, info, warn};

use crate::config::VrConfig;
use crate::device::{DeviceSession, Eye, EyeLayer, FrameSubmission};
use crate::error::{GpuError, SubmitError};
use crate::eye_buffer::EyeBuffer;
use crate::gpu::GpuBackend;
use crate::pose::{FrameTiming, PoseTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    TimingAcquired,
    EyeRendering(Eye),
    EyeFinished(Eye),
}

/// Submission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub submitted: u64,
    pub dropped: u64,
}

pub struct FrameSubmitter<B: GpuBackend> {
    eyes: [EyeBuffer<B>; 2],
    poses: PoseTracker,
    phase: FramePhase,
    timing: Option<FrameTiming>,
    msaa_samples: u32,
    stats: FrameStats,
}

impl<B: GpuBackend> FrameSubmitter<B> {
    /// Allocate both eye buffers, multisampled if the config asks for it.
    pub fn new(backend: &mut B, session: &DeviceSession, config: &VrConfig) -> Result<Self, GpuError> {
        let left = EyeBuffer::new(backend, session, Eye::Left, config)?;
        let right = EyeBuffer::new(backend, session, Eye::Right, config)?;
        let mut submitter = Self {
            eyes: [left, right],
            poses: PoseTracker::new(config.near_clip, config.far_clip),
            phase: FramePhase::Idle,
            timing: None,
            msaa_samples: config.msaa_samples,
            stats: FrameStats::default(),
        };
        if config.msaa {
            submitter.set_msaa(backend, true)?;
        }
        Ok(submitter)
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn timing(&self) -> Option<FrameTiming> {
        self.timing
    }

    pub fn poses(&self) -> &PoseTracker {
        &self.poses
    }

    pub fn eye_buffer(&self, eye: Eye) -> &EyeBuffer<B> {
        &self.eyes[eye.index()]
    }

    pub fn eye_mvp_matrix(&self, eye: Eye) -> Mat4 {
        self.poses.eye_mvp_matrix(eye)
    }

    pub fn msaa_enabled(&self) -> bool {
        self.eyes[0].msaa_enabled()
    }

    /// Switch both eyes between the plain and multisampled paths. Only legal between frames.
    pub fn set_msaa(&mut self, backend: &mut B, enabled: bool) -> Result<(), GpuError> {
        assert_eq!(self.phase, FramePhase::Idle, "MSAA switched mid-frame");
        if !enabled {
            self.eyes.iter_mut().for_each(EyeBuffer::disable_msaa);
            info!("MSAA disabled");
            return Ok(());
        }
        for i in 0..self.eyes.len() {
            if let Err(err) = self.eyes[i].setup_msaa(backend, self.msaa_samples) {
                // Keep both eyes on the same path.
                self.eyes.iter_mut().for_each(EyeBuffer::disable_msaa);
                return Err(err);
            }
        }
        info!("MSAA x{} enabled", self.msaa_samples);
        Ok(())
    }

    /// Begin a frame: predicted display time plus the frame's tracking sample.
    pub fn on_render_start(&mut self, session: &mut DeviceSession) -> FrameTiming {
        assert_eq!(
            self.phase,
            FramePhase::Idle,
            "on_render_start while previous frame is still {:?}",
            self.phase
        );
        let timing = self.poses.on_render_start(session);
        self.poses.sample_tracking(session);
        self.timing = Some(timing);
        self.phase = FramePhase::TimingAcquired;
        timing
    }

    /// Compute the eye's matrices and bind its buffer. Scene draws follow.
    pub fn on_eye_render(&mut self, backend: &mut B, session: &mut DeviceSession, eye: Eye) -> Mat4 {
        let expected = match eye {
            Eye::Left => FramePhase::TimingAcquired,
            Eye::Right => FramePhase::EyeFinished(Eye::Left),
        };
        assert_eq!(
            self.phase, expected,
            "on_eye_render({:?}) out of order",
            eye
        );
        let mvp = self.poses.on_eye_render(session, eye);
        self.eyes[eye.index()].begin(backend);
        self.phase = FramePhase::EyeRendering(eye);
        mvp
    }

    /// Unbind the eye, resolving first when multisampled.
    pub fn on_eye_render_finish(&mut self, backend: &mut B, eye: Eye) {
        assert_eq!(
            self.phase,
            FramePhase::EyeRendering(eye),
            "on_eye_render_finish({:?}) without matching on_eye_render",
            eye
        );
        self.eyes[eye.index()].finish(backend);
        self.phase = FramePhase::EyeFinished(eye);
    }

    /// Hand both finished eyes to the compositor. On rejection the frame is
    /// dropped and the next frame may start normally.
    pub fn submit_frame(&mut self, session: &mut DeviceSession) -> Result<(), SubmitError> {
        assert_eq!(
            self.phase,
            FramePhase::EyeFinished(Eye::Right),
            "submit_frame before both eyes finished"
        );
        self.phase = FramePhase::Idle;

        let timing = match self.timing.take() {
            Some(timing) => timing,
            None => panic!("submit_frame without frame timing"),
        };
        let layer = |eye: Eye| {
            let buffer = &self.eyes[eye.index()];
            EyeLayer {
                eye,
                swap_slot: buffer
                    .swap_chain()
                    .and_then(|sc| sc.submitted_index())
                    .unwrap_or_default(),
                viewport: buffer.viewport(),
                fov: session.eye_desc(eye).fov,
                pose: self.poses.eye_pose(eye).map(|p| p.pose).unwrap_or_default(),
            }
        };
        let frame = FrameSubmission {
            frame_index: timing.frame_index,
            display_time: timing.predicted_display_time,
            layers: [layer(Eye::Left), layer(Eye::Right)],
        };

        match session.submit(&frame) {
            Ok(()) => {
                self.stats.submitted += 1;
                debug!("Frame {} submitted", frame.frame_index);
                Ok(())
            }
            Err(err) => {
                self.stats.dropped += 1;
                warn!("Frame {} dropped: {}", frame.frame_index, err);
                Err(err)
            }
        }
    }

    /// Release both eyes' GPU resources. Safe to call more than once.
    pub fn destroy(&mut self) {
        self.eyes.iter_mut().for_each(EyeBuffer::destroy);
        self.phase = FramePhase::Idle;
        self.timing = None;
    }
}
