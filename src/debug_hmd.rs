//! Debug HMD: a simulated DK2-class headset for running without hardware.
//!
//! Head motion is a gentle synthetic sway so the stereo pipeline, mirror
//! and tracker frustum all have something moving to show.

use std::time::Instant;

use glam::{EulerRot, Quat, Vec3};
use log::{debug, info};

use crate::device::{
    CameraFrustumDesc, Eye, EyeRenderDesc, FovPort, FrameSubmission, HmdCaps, HmdDescriptor,
    HmdDevice, HmdType, LensDistortion, PerfHudMode, Pose, StatusFlags, TrackingState,
};
use crate::error::{SessionError, SubmitError};

// Inter-pupillary distance (average human IPD is ~63mm)
const IPD: f32 = 0.063;
// DK2 panel refresh
const REFRESH_HZ: f64 = 75.0;

/// Descriptor of a DK2 headset: 1920x1080 panel, 1182x1461 eye targets,
/// tracking camera with a 74x54 degree sensing volume.
pub fn dk2_descriptor(debug_device: bool) -> HmdDescriptor {
    let mut caps = HmdCaps::LOW_PERSISTENCE | HmdCaps::DYNAMIC_PREDICTION | HmdCaps::POSITION_TRACKING;
    if debug_device {
        caps |= HmdCaps::DEBUG_DEVICE;
    }

    // Lens centers sit nasally, so each eye sees further outward than inward.
    let left_fov = FovPort {
        up_tan: 1.3292,
        down_tan: 1.3292,
        left_tan: 1.0586,
        right_tan: 1.0923,
    };
    let right_fov = FovPort {
        left_tan: left_fov.right_tan,
        right_tan: left_fov.left_tan,
        ..left_fov
    };

    HmdDescriptor {
        product_name: if debug_device {
            "Oculus Rift DK2 (debug)".to_string()
        } else {
            "Oculus Rift DK2".to_string()
        },
        hmd_type: HmdType::Dk2,
        caps,
        resolution: (1920, 1080),
        eyes: [
            EyeRenderDesc {
                eye: Eye::Left,
                fov: left_fov,
                recommended_size: (1182, 1461),
                hmd_to_eye_offset: Vec3::new(-IPD / 2.0, 0.0, 0.0),
            },
            EyeRenderDesc {
                eye: Eye::Right,
                fov: right_fov,
                recommended_size: (1182, 1461),
                hmd_to_eye_offset: Vec3::new(IPD / 2.0, 0.0, 0.0),
            },
        ],
        camera: Some(CameraFrustumDesc {
            h_fov_radians: 1.292,
            v_fov_radians: 0.942,
            near_z: 0.4,
            far_z: 2.5,
        }),
        lens: Some(LensDistortion { k1: 0.25, k2: 0.15 }),
    }
}

/// Simulated headset
pub struct DebugHmd {
    attached: bool,
    start: Instant,
    // Tracking origin set by recenter()
    yaw_origin: f32,
    position_origin: Vec3,
    last_submitted: Option<u64>,
    perf_hud: PerfHudMode,
}

impl DebugHmd {
    pub fn new() -> Self {
        Self {
            attached: true,
            start: Instant::now(),
            yaw_origin: 0.0,
            position_origin: Vec3::ZERO,
            last_submitted: None,
            perf_hud: PerfHudMode::Off,
        }
    }

    /// A device slot with nothing plugged in; `open` fails.
    pub fn absent() -> Self {
        Self {
            attached: false,
            ..Self::new()
        }
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Breathing pitch, slow look-around yaw and a little sway.
    fn simulated_head(&self, time: f64) -> (f32, f32, f32, Vec3) {
        let t = time as f32;
        let breathing = (t * 0.5).sin() * 0.01;
        let sway = (t * 0.3).sin() * 0.005;
        let look = (t * 0.2).sin() * 0.35;
        let position = Vec3::new((t * 0.3).sin() * 0.02, (t * 0.5).sin() * 0.005, 0.0);
        (look, breathing, sway, position)
    }

    /// World position relative to the recentered origin, in its yawed frame.
    fn to_tracking_space(&self, position: Vec3) -> Vec3 {
        Quat::from_rotation_y(-self.yaw_origin) * (position - self.position_origin)
    }
}

impl Default for DebugHmd {
    fn default() -> Self {
        Self::new()
    }
}

impl HmdDevice for DebugHmd {
    fn open(&mut self) -> Result<HmdDescriptor, SessionError> {
        if !self.attached {
            info!("Debug HMD: no device attached");
            return Err(SessionError::NoDevice);
        }
        self.start = Instant::now();
        self.last_submitted = None;
        Ok(dk2_descriptor(true))
    }

    fn close(&mut self) {
        info!("Debug HMD closed");
    }

    fn predicted_display_time(&mut self, _frame_index: u64) -> f64 {
        let period = 1.0 / REFRESH_HZ;
        // Middle of the next scanout
        ((self.now() / period).floor() + 1.5) * period
    }

    fn tracking_state(&mut self, at_time: f64) -> TrackingState {
        let (yaw, pitch, roll, position) = self.simulated_head(at_time);
        let head_pose = Pose::new(
            self.to_tracking_space(position),
            Quat::from_euler(EulerRot::YXZ, yaw - self.yaw_origin, pitch, roll),
        );
        TrackingState {
            head_pose,
            // Camera on the desk a meter ahead, facing the user
            camera_pose: Pose::new(
                self.to_tracking_space(Vec3::new(0.0, 0.1, -1.0)),
                Quat::from_rotation_y(std::f32::consts::PI - self.yaw_origin),
            ),
            sample_time: self.now(),
            status: StatusFlags::all(),
        }
    }

    fn submit_frame(&mut self, frame: &FrameSubmission) -> Result<(), SubmitError> {
        if let Some(last) = self.last_submitted {
            if frame.frame_index <= last {
                return Err(SubmitError::Rejected {
                    frame_index: frame.frame_index,
                    reason: format!("frame index not after last submitted frame {}", last),
                });
            }
        }
        if let Some(layer) = frame.layers.iter().find(|l| l.viewport.width == 0 || l.viewport.height == 0) {
            return Err(SubmitError::Rejected {
                frame_index: frame.frame_index,
                reason: format!("empty viewport for {:?} eye", layer.eye),
            });
        }
        self.last_submitted = Some(frame.frame_index);
        debug!(
            "Debug HMD: frame {} accepted (slots {}/{})",
            frame.frame_index, frame.layers[0].swap_slot, frame.layers[1].swap_slot
        );
        Ok(())
    }

    fn set_perf_hud(&mut self, mode: PerfHudMode) {
        if mode != self.perf_hud {
            debug!("Debug HMD: perf HUD {:?} -> {:?} (not drawn)", self.perf_hud, mode);
            self.perf_hud = mode;
        }
    }

    fn recenter(&mut self) {
        let (yaw, _, _, position) = self.simulated_head(self.now());
        self.yaw_origin = yaw;
        self.position_origin = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EyeLayer;
    use crate::gpu::Rect;

    fn submission(frame_index: u64, width: u32) -> FrameSubmission {
        let layer = |eye| EyeLayer {
            eye,
            swap_slot: 0,
            viewport: Rect::from_size(width, 1461),
            fov: FovPort::symmetric(1.0, 1.0),
            pose: Pose::IDENTITY,
        };
        FrameSubmission {
            frame_index,
            display_time: 0.0,
            layers: [layer(Eye::Left), layer(Eye::Right)],
        }
    }

    #[test]
    fn test_absent_device_fails_open() {
        let mut hmd = DebugHmd::absent();
        assert!(matches!(hmd.open(), Err(SessionError::NoDevice)));
    }

    #[test]
    fn test_dk2_descriptor_eye_targets() {
        let desc = dk2_descriptor(true);
        assert_eq!(desc.eyes[0].recommended_size, (1182, 1461));
        assert_eq!(desc.eyes[1].recommended_size, (1182, 1461));
        assert!(desc.eyes[0].hmd_to_eye_offset.x < 0.0);
        assert!(desc.eyes[1].hmd_to_eye_offset.x > 0.0);
        assert_eq!(desc.eyes[0].fov.left_tan, desc.eyes[1].fov.right_tan);
    }

    #[test]
    fn test_rejects_stale_frame_index() {
        let mut hmd = DebugHmd::new();
        hmd.open().unwrap();
        assert!(hmd.submit_frame(&submission(3, 1182)).is_ok());
        let err = hmd.submit_frame(&submission(3, 1182)).unwrap_err();
        assert!(matches!(err, SubmitError::Rejected { frame_index: 3, .. }));
        assert!(hmd.submit_frame(&submission(4, 1182)).is_ok());
    }

    #[test]
    fn test_rejects_empty_viewport() {
        let mut hmd = DebugHmd::new();
        hmd.open().unwrap();
        assert!(hmd.submit_frame(&submission(1, 0)).is_err());
    }

    #[test]
    fn test_display_time_is_ahead_of_now() {
        let mut hmd = DebugHmd::new();
        hmd.open().unwrap();
        let now = hmd.now();
        assert!(hmd.predicted_display_time(0) > now);
    }

    #[test]
    fn test_recenter_zeroes_yaw() {
        let mut hmd = DebugHmd::new();
        hmd.open().unwrap();
        hmd.recenter();
        let at = hmd.now();
        let state = hmd.tracking_state(at);
        let (yaw, _, _) = state.head_pose.orientation.to_euler(EulerRot::YXZ);
        // Clock moved on a little between recenter and the sample
        assert!(yaw.abs() < 0.05);
    }

    #[test]
    fn test_recentered_positions_follow_origin_yaw() {
        let mut hmd = DebugHmd::new();
        hmd.yaw_origin = std::f32::consts::FRAC_PI_2;
        hmd.position_origin = Vec3::new(1.0, 0.0, 0.0);

        assert!(hmd.to_tracking_space(Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
        // One meter along world +X is straight behind after a quarter turn left.
        let moved = hmd.to_tracking_space(Vec3::new(2.0, 0.0, 0.0));
        assert!((moved - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-5);

        let state = hmd.tracking_state(0.0);
        let camera = Quat::from_rotation_y(-hmd.yaw_origin) * (Vec3::new(0.0, 0.1, -1.0) - hmd.position_origin);
        assert!((state.camera_pose.position - camera).length() < 1e-6);
    }
}
