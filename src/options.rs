//! Engine options read by stages when they start.
//!
//! Options are plain data. Flags decide which targets and sub-stages exist, so
//! they are only read at start; changing them afterwards has no effect on a
//! pipeline that is already running.
//!
//! ```json
//! {
//!     "emissive_enabled": true,
//!     "ssao_enabled": true,
//!     "exposure": 1.4
//! }
//! ```
//!
//! Missing fields take their defaults.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Adds an emissive G-buffer attachment and enables the emissive pass.
    #[serde(default)]
    pub emissive_enabled: bool,
    /// Adds an `ambientBuffer` G-buffer attachment after all others.
    #[serde(default)]
    pub legacy_ambient: bool,
    #[serde(default = "EngineOptions::default_true")]
    pub shadows_enabled: bool,
    #[serde(default)]
    pub ssao_enabled: bool,
    #[serde(default = "EngineOptions::default_ssao_radius")]
    pub ssao_radius: f32,
    #[serde(default = "EngineOptions::default_ssao_g_displace")]
    pub ssao_g_displace: f32,
    #[serde(default = "EngineOptions::default_ssao_divider")]
    pub ssao_divider: f32,
    #[serde(default = "EngineOptions::default_exposure")]
    pub exposure: f32,
    /// Edge length of the square shadow map.
    #[serde(default = "EngineOptions::default_shadow_map_size")]
    pub shadow_map_size: u32,
    /// Clear color of the background pass, linear RGBA.
    #[serde(default = "EngineOptions::default_background_color")]
    pub background_color: [f32; 4],
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            emissive_enabled: false,
            legacy_ambient: false,
            shadows_enabled: true,
            ssao_enabled: false,
            ssao_radius: Self::default_ssao_radius(),
            ssao_g_displace: Self::default_ssao_g_displace(),
            ssao_divider: Self::default_ssao_divider(),
            exposure: Self::default_exposure(),
            shadow_map_size: Self::default_shadow_map_size(),
            background_color: Self::default_background_color(),
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON and validates them.
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: EngineOptions = serde_json::from_str(json)?;
        Ok(options.validate())
    }

    /// Reads and validates options from a JSON file.
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, OptionsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Like [`read_from_path`](Self::read_from_path), but a missing, unreadable
    /// or malformed file falls back to the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::read_from_path(path) {
            Ok(options) => {
                info!("Loaded engine options from {:?}", path);
                options
            }
            Err(OptionsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Engine options file {:?} not found. Using default options.",
                    path
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    "Failed to load {:?} ({}). Falling back to default engine options.",
                    path, err
                );
                Self::default()
            }
        }
    }

    /// Replaces out-of-range tunables with their defaults.
    pub fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if !(self.exposure.is_finite() && self.exposure > 0.0) {
            warn!("Exposure must be a positive number. Using default value.");
            self.exposure = Self::default_exposure();
        }

        if !(self.ssao_radius.is_finite() && self.ssao_radius > 0.0) {
            warn!("SSAO radius must be a positive number. Using default value.");
            self.ssao_radius = Self::default_ssao_radius();
        }

        if !(self.ssao_divider.is_finite() && self.ssao_divider > 0.0) {
            warn!("SSAO divider must be a positive number. Using default value.");
            self.ssao_divider = Self::default_ssao_divider();
        }

        if !self.ssao_g_displace.is_finite() {
            warn!("SSAO displacement must be finite. Using default value.");
            self.ssao_g_displace = Self::default_ssao_g_displace();
        }

        self
    }

    pub fn with_emissive(mut self, enabled: bool) -> Self {
        self.emissive_enabled = enabled;
        self
    }

    pub fn with_legacy_ambient(mut self, enabled: bool) -> Self {
        self.legacy_ambient = enabled;
        self
    }

    pub fn with_shadows(mut self, enabled: bool) -> Self {
        self.shadows_enabled = enabled;
        self
    }

    pub fn with_ssao(mut self, enabled: bool) -> Self {
        self.ssao_enabled = enabled;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size;
        self
    }

    pub fn with_background_color(mut self, color: [f32; 4]) -> Self {
        self.background_color = color;
        self
    }

    /// Number of G-buffer color attachments these options produce.
    pub fn gbuffer_attachment_count(&self) -> usize {
        3 + usize::from(self.emissive_enabled) + usize::from(self.legacy_ambient)
    }

    const fn default_true() -> bool {
        true
    }

    const fn default_ssao_radius() -> f32 {
        8.0
    }

    const fn default_ssao_g_displace() -> f32 {
        6.0
    }

    const fn default_ssao_divider() -> f32 {
        0.5
    }

    const fn default_exposure() -> f32 {
        1.0
    }

    const fn default_shadow_map_size() -> u32 {
        2048
    }

    const fn default_background_color() -> [f32; 4] {
        [0.05, 0.05, 0.08, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = EngineOptions::from_json(r#"{ "emissive_enabled": true }"#).unwrap();
        assert!(options.emissive_enabled);
        assert!(options.shadows_enabled);
        assert!(!options.ssao_enabled);
        assert_eq!(options.ssao_radius, 8.0);
        assert_eq!(options.ssao_g_displace, 6.0);
        assert_eq!(options.ssao_divider, 0.5);
        assert_eq!(options.shadow_map_size, 2048);
    }

    #[test]
    fn validate_replaces_invalid_tunables() {
        let options = EngineOptions::from_json(
            r#"{ "shadow_map_size": 0, "exposure": -1.0, "ssao_divider": 0.0 }"#,
        )
        .unwrap();
        assert_eq!(options.shadow_map_size, 2048);
        assert_eq!(options.exposure, 1.0);
        assert_eq!(options.ssao_divider, 0.5);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            EngineOptions::from_json("{ nope"),
            Err(OptionsError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = "does/not/exist/options.json";
        assert!(matches!(
            EngineOptions::read_from_path(path),
            Err(OptionsError::Io(_))
        ));
        assert_eq!(EngineOptions::load_from_path(path), EngineOptions::default());
    }

    #[test]
    fn gbuffer_attachments_follow_flags() {
        assert_eq!(EngineOptions::new().gbuffer_attachment_count(), 3);
        assert_eq!(
            EngineOptions::new()
                .with_emissive(true)
                .with_legacy_ambient(true)
                .gbuffer_attachment_count(),
            5
        );
    }
}
