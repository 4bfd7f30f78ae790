//! HMD device boundary and the session that owns it.
//!
//! [`HmdDevice`] is the narrow set of SDK operations the pipeline needs:
//! connect, describe, predict display time, sample tracking, accept eye
//! layers. [`DeviceSession`] owns one connected device for the lifetime of
//! VR mode and closes it exactly once when dropped. Every other component
//! borrows the session per call.

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};
use log::info;
use serde::Deserialize;

use crate::error::{SessionError, SubmitError};
use crate::gpu::Rect;

/// Eye index. Left is always rendered first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

bitflags! {
    /// Capabilities reported by the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HmdCaps: u32 {
        /// Simulated headset, no hardware attached
        const DEBUG_DEVICE = 1 << 0;
        const LOW_PERSISTENCE = 1 << 1;
        const DYNAMIC_PREDICTION = 1 << 2;
        const POSITION_TRACKING = 1 << 3;
    }
}

bitflags! {
    /// Per-sample tracking status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        const ORIENTATION_TRACKED = 1 << 0;
        const POSITION_TRACKED = 1 << 1;
        const CAMERA_POSE_TRACKED = 1 << 2;
        const POSITION_CONNECTED = 1 << 3;
        const HMD_CONNECTED = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmdType {
    Dk1,
    Dk2,
    Cv1,
    Other,
}

/// Field of view as tangents of the half angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FovPort {
    pub up_tan: f32,
    pub down_tan: f32,
    pub left_tan: f32,
    pub right_tan: f32,
}

impl FovPort {
    pub fn symmetric(horizontal_tan: f32, vertical_tan: f32) -> Self {
        Self {
            up_tan: vertical_tan,
            down_tan: vertical_tan,
            left_tan: horizontal_tan,
            right_tan: horizontal_tan,
        }
    }

    pub fn horizontal_degrees(&self) -> f32 {
        (self.left_tan.atan() + self.right_tan.atan()).to_degrees()
    }

    pub fn vertical_degrees(&self) -> f32 {
        (self.up_tan.atan() + self.down_tan.atan()).to_degrees()
    }
}

/// Per-eye rendering description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRenderDesc {
    pub eye: Eye,
    pub fov: FovPort,
    /// Render target size at pixel density 1.0
    pub recommended_size: (u32, u32),
    /// Eye position relative to the head origin, in head space (meters)
    pub hmd_to_eye_offset: Vec3,
}

/// Sensing volume of the positional tracking camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrustumDesc {
    pub h_fov_radians: f32,
    pub v_fov_radians: f32,
    pub near_z: f32,
    pub far_z: f32,
}

/// Radial lens coefficients used by the compositor mirror.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LensDistortion {
    pub k1: f32,
    pub k2: f32,
}

/// Static description of a connected HMD.
#[derive(Debug, Clone, PartialEq)]
pub struct HmdDescriptor {
    pub product_name: String,
    pub hmd_type: HmdType,
    pub caps: HmdCaps,
    /// Panel resolution in pixels
    pub resolution: (u32, u32),
    pub eyes: [EyeRenderDesc; 2],
    pub camera: Option<CameraFrustumDesc>,
    pub lens: Option<LensDistortion>,
}

/// Rigid transform (position + orientation)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self { orientation, position }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }

    /// Pose of a point offset from this one in local space (e.g. eye from head).
    pub fn offset_by(&self, local_offset: Vec3) -> Pose {
        Pose {
            orientation: self.orientation,
            position: self.position + self.orientation * local_offset,
        }
    }
}

/// One tracking sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackingState {
    pub head_pose: Pose,
    /// Pose of the tracking camera in the same space as the head
    pub camera_pose: Pose,
    /// Device time the sample was taken, seconds
    pub sample_time: f64,
    pub status: StatusFlags,
}

/// One eye's contribution to a submitted frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeLayer {
    pub eye: Eye,
    /// Swap chain slot holding the finished image
    pub swap_slot: usize,
    pub viewport: Rect,
    pub fov: FovPort,
    pub pose: Pose,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSubmission {
    pub frame_index: u64,
    pub display_time: f64,
    pub layers: [EyeLayer; 2],
}

/// Device-side performance overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfHudMode {
    #[default]
    Off,
    PerfSummary,
    LatencyTiming,
    AppRenderTiming,
    CompRenderTiming,
    VersionInfo,
}

impl PerfHudMode {
    /// Next mode in cycling order, wrapping back to `Off`.
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::PerfSummary,
            Self::PerfSummary => Self::LatencyTiming,
            Self::LatencyTiming => Self::AppRenderTiming,
            Self::AppRenderTiming => Self::CompRenderTiming,
            Self::CompRenderTiming => Self::VersionInfo,
            Self::VersionInfo => Self::Off,
        }
    }
}

/// SDK operations the pipeline depends on.
pub trait HmdDevice {
    /// Connect and describe the headset.
    fn open(&mut self) -> Result<HmdDescriptor, SessionError>;

    /// Release the connection. Called once, only after a successful `open`.
    fn close(&mut self);

    /// Predicted mid-scanout time for the given frame, seconds.
    fn predicted_display_time(&mut self, frame_index: u64) -> f64;

    fn tracking_state(&mut self, at_time: f64) -> TrackingState;

    fn submit_frame(&mut self, frame: &FrameSubmission) -> Result<(), SubmitError>;

    fn set_perf_hud(&mut self, mode: PerfHudMode);

    /// Make the current head pose the tracking origin.
    fn recenter(&mut self);
}

/// A connected HMD. Dropping the session closes the device.
pub struct DeviceSession {
    device: Box<dyn HmdDevice>,
    desc: HmdDescriptor,
    perf_hud: PerfHudMode,
}

impl DeviceSession {
    /// Connect to `device`. On failure the device is dropped unopened.
    pub fn open(mut device: Box<dyn HmdDevice>) -> Result<Self, SessionError> {
        let desc = device.open()?;
        info!(
            "HMD connected: {} ({:?}), panel {}x{}, caps {:?}",
            desc.product_name, desc.hmd_type, desc.resolution.0, desc.resolution.1, desc.caps
        );
        Ok(Self {
            device,
            desc,
            perf_hud: PerfHudMode::Off,
        })
    }

    pub fn descriptor(&self) -> &HmdDescriptor {
        &self.desc
    }

    pub fn eye_desc(&self, eye: Eye) -> &EyeRenderDesc {
        &self.desc.eyes[eye.index()]
    }

    /// Panel resolution, also used as the default mirror size.
    pub fn resolution(&self) -> (u32, u32) {
        self.desc.resolution
    }

    pub fn is_debug_hmd(&self) -> bool {
        self.desc.caps.contains(HmdCaps::DEBUG_DEVICE)
    }

    pub fn is_dk2(&self) -> bool {
        self.desc.hmd_type == HmdType::Dk2
    }

    pub fn predicted_display_time(&mut self, frame_index: u64) -> f64 {
        self.device.predicted_display_time(frame_index)
    }

    pub fn tracking_state(&mut self, at_time: f64) -> TrackingState {
        self.device.tracking_state(at_time)
    }

    pub fn submit(&mut self, frame: &FrameSubmission) -> Result<(), SubmitError> {
        self.device.submit_frame(frame)
    }

    pub fn set_perf_hud(&mut self, mode: PerfHudMode) {
        info!("Perf HUD: {:?}", mode);
        self.perf_hud = mode;
        self.device.set_perf_hud(mode);
    }

    pub fn perf_hud(&self) -> PerfHudMode {
        self.perf_hud
    }

    pub fn recenter(&mut self) {
        info!("Recentering tracking origin");
        self.device.recenter();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        info!("Closing HMD session: {}", self.desc.product_name);
        self.device.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHmd;

    #[test]
    fn test_open_failure_never_closes() {
        let hmd = ScriptedHmd::absent();
        let probe = hmd.probe();
        let err = DeviceSession::open(Box::new(hmd)).err().unwrap();
        assert!(matches!(err, SessionError::NoDevice));
        assert_eq!(probe.closes(), 0);
    }

    #[test]
    fn test_drop_closes_exactly_once() {
        let hmd = ScriptedHmd::dk2();
        let probe = hmd.probe();
        let session = DeviceSession::open(Box::new(hmd)).unwrap();
        assert!(session.is_dk2());
        assert!(session.is_debug_hmd());
        drop(session);
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn test_offset_by_rotates_into_head_space() {
        let head = Pose::new(Vec3::new(0.0, 1.6, 0.0), Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let eye = head.offset_by(Vec3::new(0.032, 0.0, 0.0));
        // Turned 90 degrees left, so +X in head space is -Z in world space.
        assert!(eye.position.abs_diff_eq(Vec3::new(0.0, 1.6, -0.032), 1e-5));
        assert_eq!(eye.orientation, head.orientation);
    }

    #[test]
    fn test_perf_hud_cycle_wraps() {
        let mut mode = PerfHudMode::Off;
        for _ in 0..6 {
            mode = mode.next();
        }
        assert_eq!(mode, PerfHudMode::Off);
    }

    #[test]
    fn test_symmetric_fov_degrees() {
        let fov = FovPort::symmetric(1.0, 1.0);
        assert!((fov.horizontal_degrees() - 90.0).abs() < 1e-4);
        assert!((fov.vertical_degrees() - 90.0).abs() < 1e-4);
    }
}
