//! Runtime configuration for the HMD pipeline.
//!
//! Loaded from a TOML file; every field has a default so a partial file (or
//! no file at all) is fine.

use std::path::Path;

use serde::Deserialize;

use crate::device::PerfHudMode;
use crate::error::ConfigError;
use crate::mirror::MirrorMode;

/// Tunable parameters for VR buffers, projection and debug output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VrConfig {
    pub window_width: u32,
    pub window_height: u32,
    /// Start with multisampled eye buffers
    pub msaa: bool,
    pub msaa_samples: u32,
    /// Slots per eye swap chain (at least 2)
    pub swap_chain_slots: usize,
    /// Scale applied to the device's recommended eye target size
    pub pixel_density: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub mirror: MirrorMode,
    pub debug_hud: bool,
    pub tracker_frustum: bool,
    pub perf_hud: PerfHudMode,
}

impl Default for VrConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            msaa: false,
            msaa_samples: 4,
            swap_chain_slots: 3,
            pixel_density: 1.0,
            near_clip: 0.1,
            far_clip: 1000.0,
            mirror: MirrorMode::Distorted,
            debug_hud: true,
            tracker_frustum: true,
            perf_hud: PerfHudMode::Off,
        }
    }
}

impl VrConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: VrConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.msaa_samples, 2 | 4 | 8) {
            return Err(ConfigError::Invalid(format!(
                "msaa_samples must be 2, 4 or 8 (got {})",
                self.msaa_samples
            )));
        }
        if self.swap_chain_slots < 2 {
            return Err(ConfigError::Invalid(format!(
                "swap_chain_slots must be at least 2 (got {})",
                self.swap_chain_slots
            )));
        }
        if !(self.pixel_density > 0.0) {
            return Err(ConfigError::Invalid("pixel_density must be positive".into()));
        }
        if !(self.near_clip > 0.0 && self.near_clip < self.far_clip) {
            return Err(ConfigError::Invalid(format!(
                "clip planes must satisfy 0 < near < far (got {} / {})",
                self.near_clip, self.far_clip
            )));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::Invalid("window size must be non-zero".into()));
        }
        Ok(())
    }
}
