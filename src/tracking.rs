//! Debug visualization of tracking: the IR camera's sensing volume drawn in
//! world space, and a text HUD with frame rate, latency and pose.

use glam::{EulerRot, Mat4, Vec2, Vec4};
use log::debug;

use crate::device::{CameraFrustumDesc, DeviceSession, Eye, StatusFlags, TrackingState};
use crate::error::GpuError;
use crate::flags::MapStats;
use crate::gpu::{GpuBackend, LineVertex};
use crate::pose::FrameTiming;
use crate::ui::TextRenderer;

const APEX_COLOR: [f32; 4] = [0.4, 0.4, 0.4, 1.0];
const NEAR_COLOR: [f32; 4] = [0.2, 0.8, 0.2, 1.0];
const FAR_COLOR: [f32; 4] = [0.8, 0.4, 0.1, 1.0];

/// Vertices and line-list indices of a camera frustum in camera space
/// (camera at the origin, looking down -Z).
///
/// Vertex 0 is the apex, 1..=4 the near rectangle and 5..=8 the far one.
pub fn frustum_geometry(camera: &CameraFrustumDesc) -> (Vec<LineVertex>, Vec<u16>) {
    let half_h = (camera.h_fov_radians * 0.5).tan();
    let half_v = (camera.v_fov_radians * 0.5).tan();
    let rect = |z: f32, color: [f32; 4]| {
        let (x, y) = (half_h * z, half_v * z);
        [(-x, -y), (x, -y), (x, y), (-x, y)].map(|(px, py)| LineVertex {
            position: [px, py, -z],
            color,
        })
    };

    let mut vertices = vec![LineVertex {
        position: [0.0; 3],
        color: APEX_COLOR,
    }];
    vertices.extend(rect(camera.near_z, NEAR_COLOR));
    vertices.extend(rect(camera.far_z, FAR_COLOR));

    let mut indices = Vec::with_capacity(32);
    for i in 0..4u16 {
        let next = (i + 1) % 4;
        // Apex to far corner, through the near corner
        indices.extend([0, 5 + i]);
        indices.extend([1 + i, 1 + next]);
        indices.extend([5 + i, 5 + next]);
        indices.extend([1 + i, 5 + i]);
    }
    (vertices, indices)
}

/// Wireframe of the tracking camera's sensing volume.
pub struct CameraFrustum<B: GpuBackend> {
    mesh: Option<B::Mesh>,
    desc: Option<CameraFrustumDesc>,
}

impl<B: GpuBackend> Default for CameraFrustum<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> CameraFrustum<B> {
    pub fn new() -> Self {
        Self { mesh: None, desc: None }
    }

    pub fn desc(&self) -> Option<&CameraFrustumDesc> {
        self.desc.as_ref()
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh.is_some()
    }

    /// Rebuild the mesh from the device's camera description.
    /// Devices without a tracking camera get no mesh.
    pub fn recalculate(&mut self, backend: &mut B, session: &DeviceSession) -> Result<(), GpuError> {
        self.mesh = None;
        self.desc = session.descriptor().camera;
        if let Some(camera) = self.desc {
            let (vertices, indices) = frustum_geometry(&camera);
            self.mesh = Some(backend.create_line_mesh(&vertices, &indices)?);
            debug!(
                "Tracker frustum: {:.1}x{:.1} deg, {}..{} m",
                camera.h_fov_radians.to_degrees(),
                camera.v_fov_radians.to_degrees(),
                camera.near_z,
                camera.far_z
            );
        }
        Ok(())
    }

    /// Draw at the camera pose into the bound eye target.
    pub fn on_render(&self, backend: &mut B, eye_mvp: Mat4, tracking: &TrackingState) {
        let Some(mesh) = self.mesh.as_ref() else {
            return;
        };
        if !tracking.status.contains(StatusFlags::POSITION_CONNECTED) {
            return;
        }
        backend.draw_lines(mesh, eye_mvp * tracking.camera_pose.to_matrix());
    }
}

/// Latency reading for display, "N/A" when nothing measurable.
pub fn format_latency_reading(seconds: f64) -> String {
    if seconds < 0.000001 {
        "N/A".to_string()
    } else {
        format!("{:.2}ms", seconds * 1000.0)
    }
}

/// Everything the HUD shows about one frame.
pub struct HudInput<'a> {
    pub session: &'a DeviceSession,
    pub tracking: Option<&'a TrackingState>,
    pub timing: Option<FrameTiming>,
    pub eye_sizes: [(u32, u32); 2],
    pub map_stats: Option<&'a MapStats>,
}

/// Frame-rate counter and pose readout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugHud {
    pub frame_counter: u32,
    pub total_frame_counter: u64,
    pub seconds_per_frame: f64,
    pub fps: f64,
    pub last_fps_update: f64,
}

impl DebugHud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Once per rendered frame, `now` in seconds.
    pub fn on_update(&mut self, now: f64) {
        self.update_frame_rate_counter(now);
    }

    /// Count a frame; once a second has passed since the last update,
    /// publish the average and start counting again.
    pub fn update_frame_rate_counter(&mut self, now: f64) {
        self.frame_counter += 1;
        self.total_frame_counter += 1;

        let elapsed = now - self.last_fps_update;
        if elapsed >= 1.0 {
            self.seconds_per_frame = elapsed / self.frame_counter as f64;
            self.fps = self.frame_counter as f64 / elapsed;
            self.frame_counter = 0;
            self.last_fps_update = now;
        }
    }

    pub fn lines(&self, input: &HudInput<'_>) -> Vec<String> {
        let desc = input.session.descriptor();
        let mut lines = vec![
            format!("{} ({:?})", desc.product_name, desc.hmd_type),
            format!(
                "FPS: {:.1} ({:.2} ms/frame), frames: {}",
                self.fps,
                self.seconds_per_frame * 1000.0,
                self.total_frame_counter
            ),
        ];

        let latency = match (input.tracking, input.timing) {
            (Some(tracking), Some(timing)) => timing.predicted_display_time - tracking.sample_time,
            _ => 0.0,
        };
        lines.push(format!("Latency: {}", format_latency_reading(latency)));

        if let Some(tracking) = input.tracking {
            let pos = tracking.head_pose.position;
            let (yaw, pitch, roll) = tracking.head_pose.orientation.to_euler(EulerRot::YXZ);
            lines.push(format!("Pos: {:.3} {:.3} {:.3}", pos.x, pos.y, pos.z));
            lines.push(format!(
                "Yaw: {:.1} Pitch: {:.1} Roll: {:.1}",
                yaw.to_degrees(),
                pitch.to_degrees(),
                roll.to_degrees()
            ));
            lines.push(format!("Tracking: {}", status_summary(tracking.status)));
        }

        for eye in Eye::BOTH {
            let fov = input.session.eye_desc(eye).fov;
            let (w, h) = input.eye_sizes[eye.index()];
            lines.push(format!(
                "{:?} eye: FOV {:.1}x{:.1}, texture {}x{}",
                eye,
                fov.horizontal_degrees(),
                fov.vertical_degrees(),
                w,
                h
            ));
        }

        if let Some(stats) = input.map_stats {
            lines.push(format!(
                "Faces: {}/{} Patches: {}/{}",
                stats.visible_faces, stats.faces, stats.visible_patches, stats.patches
            ));
        }
        lines
    }

    pub fn on_render(&self, text: &mut dyn TextRenderer, input: &HudInput<'_>) {
        text.set_color(Vec4::new(1.0, 1.0, 0.2, 1.0));
        text.set_scale(Vec2::ONE);
        for (i, line) in self.lines(input).iter().enumerate() {
            text.draw_text(line, -0.95, 0.95 - i as f32 * 0.06, 0.0);
        }
    }
}

fn status_summary(status: StatusFlags) -> String {
    let parts: Vec<&str> = [
        (StatusFlags::ORIENTATION_TRACKED, "orientation"),
        (StatusFlags::POSITION_TRACKED, "position"),
        (StatusFlags::CAMERA_POSE_TRACKED, "camera"),
    ]
    .into_iter()
    .filter(|(flag, _)| status.contains(*flag))
    .map(|(_, name)| name)
    .collect();

    if parts.is_empty() {
        "lost".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Pose;
    use crate::testing::{GpuOp, RecordingBackend, ScriptedHmd};
    use crate::ui::EguiText;
    use glam::{Quat, Vec3};

    fn session() -> DeviceSession {
        DeviceSession::open(Box::new(ScriptedHmd::dk2())).unwrap()
    }

    #[test]
    fn test_frame_rate_counter_samples_and_resets() {
        let mut hud = DebugHud::new();
        hud.on_update(0.0);
        hud.on_update(0.5);
        assert_eq!(hud.fps, 0.0);

        hud.on_update(1.0);
        assert!((hud.fps - 3.0).abs() < 1e-9);
        assert_eq!(hud.frame_counter, 0);
        assert_eq!(hud.last_fps_update, 1.0);

        hud.on_update(1.6);
        assert_eq!(hud.frame_counter, 1);
        assert!((hud.fps - 3.0).abs() < 1e-9);
        assert_eq!(hud.total_frame_counter, 4);
    }

    #[test]
    fn test_latency_formatting() {
        assert_eq!(format_latency_reading(0.0), "N/A");
        assert_eq!(format_latency_reading(0.0000005), "N/A");
        assert_eq!(format_latency_reading(0.015), "15.00ms");
    }

    #[test]
    fn test_frustum_geometry_shape() {
        let camera = CameraFrustumDesc {
            h_fov_radians: 1.292,
            v_fov_radians: 0.942,
            near_z: 0.4,
            far_z: 2.5,
        };
        let (vertices, indices) = frustum_geometry(&camera);
        assert_eq!(vertices.len(), 9);
        assert_eq!(indices.len(), 32);
        assert!(indices.iter().all(|i| (*i as usize) < vertices.len()));

        let corner = Vec3::from_array(vertices[7].position);
        let expected = Vec3::new((0.646f32).tan() * 2.5, (0.471f32).tan() * 2.5, -2.5);
        assert!(corner.abs_diff_eq(expected, 1e-5));
        assert_eq!(vertices[1].position[2], -0.4);
    }

    #[test]
    fn test_recalculate_and_draw_at_camera_pose() {
        let mut backend = RecordingBackend::new(1280, 720);
        let session = session();
        let mut frustum = CameraFrustum::new();
        assert!(!frustum.has_mesh());
        frustum.recalculate(&mut backend, &session).unwrap();
        assert!(frustum.has_mesh());

        let camera_pose = Pose::new(Vec3::new(0.0, 0.1, -1.0), Quat::from_rotation_y(1.0));
        let tracking = TrackingState {
            head_pose: Pose::IDENTITY,
            camera_pose,
            sample_time: 0.0,
            status: StatusFlags::all(),
        };
        let eye_mvp = Mat4::from_scale(Vec3::splat(2.0));
        frustum.on_render(&mut backend, eye_mvp, &tracking);

        assert_eq!(
            backend.ops,
            vec![GpuOp::DrawLines {
                index_count: 32,
                mvp: eye_mvp * camera_pose.to_matrix()
            }]
        );
    }

    #[test]
    fn test_skips_draw_without_position_camera() {
        let mut backend = RecordingBackend::new(1280, 720);
        let mut frustum = CameraFrustum::new();
        frustum.recalculate(&mut backend, &session()).unwrap();
        let tracking = TrackingState {
            head_pose: Pose::IDENTITY,
            camera_pose: Pose::IDENTITY,
            sample_time: 0.0,
            status: StatusFlags::ORIENTATION_TRACKED,
        };
        frustum.on_render(&mut backend, Mat4::IDENTITY, &tracking);
        assert!(backend.ops.is_empty());
    }

    #[test]
    fn test_hud_lines_report_latency_and_eyes() {
        let session = session();
        let tracking = TrackingState {
            head_pose: Pose::IDENTITY,
            camera_pose: Pose::IDENTITY,
            sample_time: 1.0,
            status: StatusFlags::ORIENTATION_TRACKED,
        };
        let timing = FrameTiming {
            frame_index: 10,
            predicted_display_time: 1.02,
        };
        let input = HudInput {
            session: &session,
            tracking: Some(&tracking),
            timing: Some(timing),
            eye_sizes: [(1182, 1461); 2],
            map_stats: None,
        };
        let lines = DebugHud::new().lines(&input);
        assert!(lines.iter().any(|l| l == "Latency: 20.00ms"));
        assert!(lines.iter().any(|l| l == "Tracking: orientation"));
        assert!(lines.iter().any(|l| l.starts_with("Right eye:") && l.ends_with("1182x1461")));

        let no_sample = HudInput { tracking: None, ..input };
        let lines = DebugHud::new().lines(&no_sample);
        assert!(lines.iter().any(|l| l == "Latency: N/A"));
    }

    #[test]
    fn test_on_render_draws_each_line() {
        let session = session();
        let stats = MapStats::default();
        let input = HudInput {
            session: &session,
            tracking: None,
            timing: None,
            eye_sizes: [(1182, 1461); 2],
            map_stats: Some(&stats),
        };
        let hud = DebugHud::new();
        let mut text = EguiText::new();
        hud.on_render(&mut text, &input);
        assert_eq!(text.runs().len(), hud.lines(&input).len());
        assert!(text.runs()[1].ndc.y < text.runs()[0].ndc.y);
    }
}
