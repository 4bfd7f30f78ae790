//! HMD Core - head-mounted display rendering for a desktop 3D viewer
//!
//! Owns the headset session, per-eye render targets (optionally
//! multisampled), per-frame pose tracking, frame submission, the desktop
//! mirror window and the debug views (tracker frustum and stats HUD).
//!
//! GPU work goes through [`gpu::GpuBackend`]; [`renderer::WgpuBackend`] is the
//! wgpu implementation. Headsets implement [`device::HmdDevice`];
//! [`debug_hmd::DebugHmd`] simulates a DK2 when no hardware is attached.

pub mod config;
pub mod debug_hmd;
pub mod device;
pub mod error;
pub mod eye_buffer;
pub mod flags;
pub mod frame;
pub mod gpu;
pub mod hmd;
pub mod input;
pub mod mirror;
pub mod pose;
pub mod renderer;
pub mod tracking;
pub mod ui;

#[cfg(test)]
mod testing;

pub use config::VrConfig;
pub use debug_hmd::DebugHmd;
pub use device::{Eye, HmdDevice, PerfHudMode};
pub use error::{ConfigError, GpuError, SessionError, SubmitError, VrError};
pub use flags::{MapStats, RenderFlag, RenderFlags};
pub use gpu::{GpuBackend, LineVertex};
pub use hmd::HmdRenderer;
pub use input::Key;
pub use mirror::{MirrorEyes, MirrorMode};
pub use renderer::WgpuBackend;
pub use ui::{EguiText, TextRenderer};
