//! Test doubles: a recording GPU backend and a scriptable HMD.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use glam::Mat4;

use crate::debug_hmd::dk2_descriptor;
use crate::device::{
    FrameSubmission, HmdDescriptor, HmdDevice, PerfHudMode, Pose, StatusFlags, TrackingState,
};
use crate::error::{GpuError, SessionError, SubmitError};
use crate::gpu::{BlitFilter, BlitTarget, GpuBackend, GpuTarget, LineVertex, Rect, TargetDesc};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GpuOp {
    Create { id: u32, desc: TargetDesc },
    Bind { color: u32, depth: Option<u32>, viewport: Rect, clear: bool },
    Viewport(Rect),
    Unbind,
    Resolve { src: u32, dst: u32 },
    Blit { src: u32, src_rect: Rect, dst: Option<u32>, dst_rect: Rect, filter: BlitFilter },
    DrawLines { index_count: usize, mvp: Mat4 },
}

pub(crate) struct TestTexture {
    pub id: u32,
    desc: TargetDesc,
    live: Rc<RefCell<HashSet<u32>>>,
}

impl GpuTarget for TestTexture {
    fn desc(&self) -> &TargetDesc {
        &self.desc
    }
}

impl Drop for TestTexture {
    fn drop(&mut self) {
        let removed = self.live.borrow_mut().remove(&self.id);
        assert!(removed, "texture {} released twice", self.id);
    }
}

pub(crate) struct TestMesh {
    pub vertices: Vec<LineVertex>,
    pub indices: Vec<u16>,
}

/// Records every call and tracks which targets are alive.
pub(crate) struct RecordingBackend {
    live: Rc<RefCell<HashSet<u32>>>,
    descs: Vec<TargetDesc>,
    next_id: u32,
    window: (u32, u32),
    allocations_left: Option<usize>,
    pub ops: Vec<GpuOp>,
}

impl RecordingBackend {
    pub fn new(window_width: u32, window_height: u32) -> Self {
        Self {
            live: Rc::new(RefCell::new(HashSet::new())),
            descs: Vec::new(),
            next_id: 1,
            window: (window_width, window_height),
            allocations_left: None,
            ops: Vec::new(),
        }
    }

    /// Let `count` more allocations succeed, then fail the rest.
    pub fn fail_after(&mut self, count: usize) {
        self.allocations_left = Some(count);
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn live_descs(&self) -> Vec<TargetDesc> {
        let live = self.live.borrow();
        (1..self.next_id)
            .filter(|id| live.contains(id))
            .map(|id| self.descs[(id - 1) as usize])
            .collect()
    }

    pub fn blits(&self) -> Vec<GpuOp> {
        self.ops.iter().filter(|op| matches!(op, GpuOp::Blit { .. })).cloned().collect()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl GpuBackend for RecordingBackend {
    type Texture = TestTexture;
    type Mesh = TestMesh;

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TestTexture, GpuError> {
        desc.validate()?;
        if let Some(left) = self.allocations_left.as_mut() {
            if *left == 0 {
                return Err(GpuError::Allocation(format!("out of memory for {}", desc.label)));
            }
            *left -= 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.descs.push(*desc);
        self.live.borrow_mut().insert(id);
        self.ops.push(GpuOp::Create { id, desc: *desc });
        Ok(TestTexture {
            id,
            desc: *desc,
            live: Rc::clone(&self.live),
        })
    }

    fn window_size(&self) -> (u32, u32) {
        self.window
    }

    fn bind_target(
        &mut self,
        color: &TestTexture,
        depth: Option<&TestTexture>,
        viewport: Rect,
        clear: Option<[f32; 4]>,
    ) {
        self.ops.push(GpuOp::Bind {
            color: color.id,
            depth: depth.map(|d| d.id),
            viewport,
            clear: clear.is_some(),
        });
    }

    fn set_viewport(&mut self, viewport: Rect) {
        self.ops.push(GpuOp::Viewport(viewport));
    }

    fn unbind_target(&mut self) {
        self.ops.push(GpuOp::Unbind);
    }

    fn resolve(&mut self, msaa: &TestTexture, dst: &TestTexture) {
        assert!(msaa.desc.sample_count > 1, "resolve source must be multisampled");
        assert_eq!(dst.desc.sample_count, 1, "resolve destination must be single-sampled");
        self.ops.push(GpuOp::Resolve { src: msaa.id, dst: dst.id });
    }

    fn blit(
        &mut self,
        src: &TestTexture,
        src_rect: Rect,
        dst: BlitTarget<'_, TestTexture>,
        dst_rect: Rect,
        filter: BlitFilter,
    ) {
        let dst = match dst {
            BlitTarget::Window => None,
            BlitTarget::Texture(t) => Some(t.id),
        };
        self.ops.push(GpuOp::Blit { src: src.id, src_rect, dst, dst_rect, filter });
    }

    fn create_line_mesh(&mut self, vertices: &[LineVertex], indices: &[u16]) -> Result<TestMesh, GpuError> {
        Ok(TestMesh {
            vertices: vertices.to_vec(),
            indices: indices.to_vec(),
        })
    }

    fn draw_lines(&mut self, mesh: &TestMesh, mvp: Mat4) {
        self.ops.push(GpuOp::DrawLines { index_count: mesh.indices.len(), mvp });
    }
}

#[derive(Default)]
struct ProbeState {
    closes: u32,
    tracking_queries: u32,
    recenters: u32,
    head_pose: Pose,
    perf_hud: PerfHudMode,
    reject_next: Option<SubmitError>,
    submissions: Vec<FrameSubmission>,
}

/// Shared view into a [`ScriptedHmd`] after it has been boxed into a session.
#[derive(Clone)]
pub(crate) struct HmdProbe(Rc<RefCell<ProbeState>>);

impl HmdProbe {
    pub fn closes(&self) -> u32 {
        self.0.borrow().closes
    }

    pub fn tracking_queries(&self) -> u32 {
        self.0.borrow().tracking_queries
    }

    pub fn recenters(&self) -> u32 {
        self.0.borrow().recenters
    }

    pub fn perf_hud(&self) -> PerfHudMode {
        self.0.borrow().perf_hud
    }

    pub fn set_head_pose(&self, pose: Pose) {
        self.0.borrow_mut().head_pose = pose;
    }

    pub fn reject_next_submit(&self, err: SubmitError) {
        self.0.borrow_mut().reject_next = Some(err);
    }

    pub fn submissions(&self) -> Vec<FrameSubmission> {
        self.0.borrow().submissions.clone()
    }
}

/// Deterministic device: fixed 75 Hz display clock, head pose set by the test.
pub(crate) struct ScriptedHmd {
    desc: Option<HmdDescriptor>,
    state: Rc<RefCell<ProbeState>>,
}

impl ScriptedHmd {
    pub fn dk2() -> Self {
        Self::with_descriptor(dk2_descriptor(true))
    }

    pub fn with_descriptor(desc: HmdDescriptor) -> Self {
        Self {
            desc: Some(desc),
            state: Rc::new(RefCell::new(ProbeState::default())),
        }
    }

    pub fn absent() -> Self {
        Self {
            desc: None,
            state: Rc::new(RefCell::new(ProbeState::default())),
        }
    }

    pub fn probe(&self) -> HmdProbe {
        HmdProbe(Rc::clone(&self.state))
    }
}

impl HmdDevice for ScriptedHmd {
    fn open(&mut self) -> Result<HmdDescriptor, SessionError> {
        self.desc.clone().ok_or(SessionError::NoDevice)
    }

    fn close(&mut self) {
        self.state.borrow_mut().closes += 1;
    }

    fn predicted_display_time(&mut self, frame_index: u64) -> f64 {
        frame_index as f64 / 75.0 + 0.02
    }

    fn tracking_state(&mut self, at_time: f64) -> TrackingState {
        let mut state = self.state.borrow_mut();
        state.tracking_queries += 1;
        TrackingState {
            head_pose: state.head_pose,
            camera_pose: Pose::IDENTITY,
            sample_time: at_time - 0.015,
            status: StatusFlags::all(),
        }
    }

    fn submit_frame(&mut self, frame: &FrameSubmission) -> Result<(), SubmitError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.reject_next.take() {
            return Err(err);
        }
        state.submissions.push(*frame);
        Ok(())
    }

    fn set_perf_hud(&mut self, mode: PerfHudMode) {
        self.state.borrow_mut().perf_hud = mode;
    }

    fn recenter(&mut self) {
        self.state.borrow_mut().recenters += 1;
    }
}
