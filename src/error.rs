//! Error types for the HMD pipeline.
//!
//! Initialization and allocation failures abort VR mode, submission failures
//! only drop the current frame. Out-of-order render bracket calls are not
//! errors at all: they panic.

use thiserror::Error;

/// Device connection failures (`init_vr`).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no HMD device detected")]
    NoDevice,

    #[error("HMD handshake failed: {0}")]
    Handshake(String),
}

/// GPU resource creation failures.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("invalid size {width}x{height} for render target '{label}'")]
    InvalidSize {
        label: &'static str,
        width: u32,
        height: u32,
    },

    #[error("unsupported MSAA sample count: {0}")]
    UnsupportedSampleCount(u32),

    #[error("GPU allocation failed: {0}")]
    Allocation(String),
}

/// Compositor rejected a frame. Recoverable: the frame is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("HMD disconnected")]
    DeviceLost,

    #[error("application is not visible on the HMD")]
    NotVisible,

    #[error("compositor rejected frame {frame_index}: {reason}")]
    Rejected { frame_index: u64, reason: String },
}

/// Errors surfaced by [`crate::hmd::HmdRenderer`].
#[derive(Debug, Error)]
pub enum VrError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("VR session is not initialized")]
    NotInitialized,

    #[error("VR buffers are already initialized, call destroy_vr first")]
    BuffersAlreadyInitialized,
}

/// Config file loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
