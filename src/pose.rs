//! Per-frame head pose sampling and eye matrix derivation.
//!
//! One tracking sample is taken per frame (at the predicted display time)
//! and shared by both eyes.

use glam::{Mat4, Vec4};

use crate::device::{DeviceSession, Eye, FovPort, Pose, TrackingState};

/// Display timing for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub frame_index: u64,
    /// Seconds, device clock
    pub predicted_display_time: f64,
}

/// Eye pose and the matrices derived from it. Valid for one frame only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePose {
    pub pose: Pose,
    pub view: Mat4,
    pub projection: Mat4,
    /// Head-to-eye translation
    pub eye_offset: Mat4,
}

impl EyePose {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Asymmetric perspective projection from FOV tangents.
///
/// Right-handed, camera looking down -Z, clip-space depth in [0, 1]
/// (wgpu convention).
pub fn projection_from_fov(fov: &FovPort, near: f32, far: f32) -> Mat4 {
    let left = -fov.left_tan * near;
    let right = fov.right_tan * near;
    let top = fov.up_tan * near;
    let bottom = -fov.down_tan * near;

    let x_scale = 2.0 * near / (right - left);
    let y_scale = 2.0 * near / (top - bottom);
    let x_offset = (right + left) / (right - left);
    let y_offset = (top + bottom) / (top - bottom);
    let z_scale = far / (near - far);
    let z_offset = near * far / (near - far);

    Mat4::from_cols(
        Vec4::new(x_scale, 0.0, 0.0, 0.0),
        Vec4::new(0.0, y_scale, 0.0, 0.0),
        Vec4::new(x_offset, y_offset, z_scale, -1.0),
        Vec4::new(0.0, 0.0, z_offset, 0.0),
    )
}

pub struct PoseTracker {
    near: f32,
    far: f32,
    next_frame_index: u64,
    timing: Option<FrameTiming>,
    tracking: Option<TrackingState>,
    eye_poses: [Option<EyePose>; 2],
    eye_mvp: [Mat4; 2],
}

impl PoseTracker {
    pub fn new(near: f32, far: f32) -> Self {
        Self {
            near,
            far,
            next_frame_index: 0,
            timing: None,
            tracking: None,
            eye_poses: [None, None],
            eye_mvp: [Mat4::IDENTITY; 2],
        }
    }

    /// Start a frame: fetch the predicted display time and drop last frame's sample.
    pub fn on_render_start(&mut self, session: &mut DeviceSession) -> FrameTiming {
        let frame_index = self.next_frame_index;
        self.next_frame_index += 1;

        let timing = FrameTiming {
            frame_index,
            predicted_display_time: session.predicted_display_time(frame_index),
        };
        self.timing = Some(timing);
        self.tracking = None;
        self.eye_poses = [None, None];
        timing
    }

    /// Take this frame's tracking sample now rather than at the first eye.
    /// Later calls in the same frame return the cached sample.
    ///
    /// # Panics
    /// If no frame was started.
    pub fn sample_tracking(&mut self, session: &mut DeviceSession) -> TrackingState {
        let timing = match self.timing {
            Some(timing) => timing,
            None => panic!("sample_tracking called before on_render_start"),
        };
        *self
            .tracking
            .get_or_insert_with(|| session.tracking_state(timing.predicted_display_time))
    }

    /// Compute `eye`'s pose and return its view-projection matrix.
    ///
    /// # Panics
    /// If no frame was started, or the right eye comes before the left.
    pub fn on_eye_render(&mut self, session: &mut DeviceSession, eye: Eye) -> Mat4 {
        let timing = match self.timing {
            Some(timing) => timing,
            None => panic!("on_eye_render({:?}) called before on_render_start", eye),
        };
        assert!(
            eye == Eye::Left || self.eye_poses[Eye::Left.index()].is_some(),
            "right eye rendered before left eye in frame {}",
            timing.frame_index
        );

        let tracking = *self
            .tracking
            .get_or_insert_with(|| session.tracking_state(timing.predicted_display_time));

        let desc = session.eye_desc(eye);
        let pose = tracking.head_pose.offset_by(desc.hmd_to_eye_offset);
        let eye_pose = EyePose {
            pose,
            view: pose.to_matrix().inverse(),
            projection: projection_from_fov(&desc.fov, self.near, self.far),
            eye_offset: Mat4::from_translation(desc.hmd_to_eye_offset),
        };

        let mvp = eye_pose.view_projection();
        self.eye_poses[eye.index()] = Some(eye_pose);
        self.eye_mvp[eye.index()] = mvp;
        mvp
    }

    /// Last matrix computed for `eye`; no recomputation.
    pub fn eye_mvp_matrix(&self, eye: Eye) -> Mat4 {
        self.eye_mvp[eye.index()]
    }

    pub fn eye_pose(&self, eye: Eye) -> Option<&EyePose> {
        self.eye_poses[eye.index()].as_ref()
    }

    /// This frame's tracking sample, once an eye has been rendered.
    pub fn tracking_state(&self) -> Option<&TrackingState> {
        self.tracking.as_ref()
    }

    pub fn timing(&self) -> Option<FrameTiming> {
        self.timing
    }

    pub fn set_clip_planes(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHmd;
    use glam::{Quat, Vec3};

    fn session() -> (DeviceSession, crate::testing::HmdProbe) {
        let hmd = ScriptedHmd::dk2();
        let probe = hmd.probe();
        (DeviceSession::open(Box::new(hmd)).unwrap(), probe)
    }

    #[test]
    fn test_projection_maps_near_and_far_to_unit_depth() {
        let proj = projection_from_fov(&FovPort::symmetric(1.0, 1.0), 0.1, 100.0);
        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_projection_edges_hit_clip_bounds() {
        let fov = FovPort {
            up_tan: 1.0,
            down_tan: 0.5,
            left_tan: 0.8,
            right_tan: 1.2,
        };
        let proj = projection_from_fov(&fov, 1.0, 10.0);
        // Point on the right frustum edge at depth 2
        let right = proj * Vec4::new(1.2 * 2.0, 0.0, -2.0, 1.0);
        assert!((right.x / right.w - 1.0).abs() < 1e-5);
        let bottom = proj * Vec4::new(0.0, -0.5 * 2.0, -2.0, 1.0);
        assert!((bottom.y / bottom.w + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_frame_index_increments() {
        let (mut session, _) = session();
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        let a = tracker.on_render_start(&mut session);
        let b = tracker.on_render_start(&mut session);
        assert_eq!(a.frame_index, 0);
        assert_eq!(b.frame_index, 1);
        assert!(b.predicted_display_time > a.predicted_display_time);
    }

    #[test]
    fn test_both_eyes_share_one_tracking_sample() {
        let (mut session, probe) = session();
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        tracker.on_render_start(&mut session);
        tracker.on_eye_render(&mut session, Eye::Left);
        // Head moves between eyes; the right eye must not see it.
        probe.set_head_pose(Pose::new(Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY));
        tracker.on_eye_render(&mut session, Eye::Right);
        assert_eq!(probe.tracking_queries(), 1);

        let left = tracker.eye_pose(Eye::Left).unwrap().pose.position;
        let right = tracker.eye_pose(Eye::Right).unwrap().pose.position;
        assert!((right.x - left.x - 0.063).abs() < 1e-5);

        tracker.on_render_start(&mut session);
        tracker.on_eye_render(&mut session, Eye::Left);
        assert_eq!(probe.tracking_queries(), 2);
    }

    #[test]
    fn test_early_sample_is_reused_by_eyes() {
        let (mut session, probe) = session();
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        let timing = tracker.on_render_start(&mut session);
        let sample = tracker.sample_tracking(&mut session);
        assert!(sample.sample_time < timing.predicted_display_time);
        tracker.on_eye_render(&mut session, Eye::Left);
        tracker.on_eye_render(&mut session, Eye::Right);
        assert_eq!(probe.tracking_queries(), 1);
        assert_eq!(tracker.tracking_state(), Some(&sample));
    }

    #[test]
    fn test_mvp_is_projection_times_view() {
        let (mut session, probe) = session();
        let head = Pose::new(Vec3::new(0.1, 1.7, -0.3), Quat::from_rotation_y(0.4));
        probe.set_head_pose(head);
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        tracker.on_render_start(&mut session);

        for eye in Eye::BOTH {
            let mvp = tracker.on_eye_render(&mut session, eye);
            let desc = *session.eye_desc(eye);
            let eye_pose = head.offset_by(desc.hmd_to_eye_offset);
            let expected =
                projection_from_fov(&desc.fov, 0.1, 1000.0) * eye_pose.to_matrix().inverse();
            assert!(mvp.abs_diff_eq(expected, 1e-5));
            assert_eq!(tracker.eye_mvp_matrix(eye), mvp);
        }
    }

    #[test]
    fn test_view_matrix_moves_eye_to_origin() {
        let (mut session, probe) = session();
        probe.set_head_pose(Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_x(0.3)));
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        tracker.on_render_start(&mut session);
        tracker.on_eye_render(&mut session, Eye::Left);
        let eye = tracker.eye_pose(Eye::Left).unwrap();
        let at_eye = eye.view.transform_point3(eye.pose.position);
        assert!(at_eye.abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    #[should_panic(expected = "right eye rendered before left eye")]
    fn test_right_before_left_panics() {
        let (mut session, _) = session();
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        tracker.on_render_start(&mut session);
        tracker.on_eye_render(&mut session, Eye::Right);
    }

    #[test]
    #[should_panic(expected = "before on_render_start")]
    fn test_eye_render_without_frame_panics() {
        let (mut session, _) = session();
        let mut tracker = PoseTracker::new(0.1, 1000.0);
        tracker.on_eye_render(&mut session, Eye::Left);
    }
}
