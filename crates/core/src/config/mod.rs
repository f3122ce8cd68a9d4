use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, SpatialError};

/// Top-level parameter bundle consumed by the spatial engine.
///
/// Values are already resolved when the engine sees them; the loaders here are
/// a convenience for harnesses that keep the bundle in a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialParams {
    pub spatial: SpatialConfig,
    pub camera: CameraConfig,
    pub action: ActionConfig,
    pub decode: DecodeConfig,
    pub flags: SalienceFlags,
}

impl SpatialParams {
    /// Parses and validates a JSON parameter bundle. Missing keys fall back to
    /// their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    /// Reads a JSON parameter bundle from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects constants the field dynamics cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.spatial;
        if !(s.pri_decay_lambda > 0.0 && s.pri_decay_lambda < 1.0) {
            return Err(SpatialError::invalid("pri_decay_lambda", "must lie in (0, 1)"));
        }
        if !(s.pri_peak_height_thresh > 0.0 && s.pri_peak_height_thresh <= 1.0) {
            return Err(SpatialError::invalid(
                "pri_peak_height_thresh",
                "must lie in (0, 1]",
            ));
        }
        if s.association_angle <= 0.0 {
            return Err(SpatialError::invalid("association_angle", "must be positive"));
        }
        if s.degrees_hindsight < 0.0 || s.degrees_hindsight > 90.0 {
            return Err(SpatialError::invalid("degrees_hindsight", "must lie in [0, 90]"));
        }
        if s.wide_field_width < 2 {
            return Err(SpatialError::invalid("wide_field_width", "must be at least 2"));
        }
        if s.blur_kernel_size == 0 || s.blur_kernel_size % 2 == 0 {
            return Err(SpatialError::invalid("blur_kernel_size", "must be odd"));
        }
        if s.face_gain < 0.0 || s.ball_gain < 0.0 {
            return Err(SpatialError::invalid("face_gain/ball_gain", "must not be negative"));
        }
        if s.audio_event_gain < 0.0 || s.audio_event_gain_making_noise < 0.0 {
            return Err(SpatialError::invalid("audio_event_gain", "must not be negative"));
        }
        if s.audio_event_azim_size <= 0.0 || s.audio_event_elev_size <= 0.0 {
            return Err(SpatialError::invalid("audio_event_size", "must be positive"));
        }

        let a = &self.action;
        if a.range_estimate_min <= 0.0 || a.range_estimate_min > a.range_estimate_max {
            return Err(SpatialError::invalid(
                "range_estimate_min",
                "must be positive and not exceed range_estimate_max",
            ));
        }
        if a.range_estimate_gain <= 0.0 {
            return Err(SpatialError::invalid("range_estimate_gain", "must be positive"));
        }
        if a.face_size_m <= 0.0 || a.ball_size_m <= 0.0 {
            return Err(SpatialError::invalid("object_size_m", "must be positive"));
        }
        if self.decode.image_width == 0 {
            return Err(SpatialError::invalid("image_width", "must be positive"));
        }
        Ok(())
    }
}

/// Salience field dynamics and injection gains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Per-tick retention applied both to the field and to source confidence.
    pub pri_decay_lambda: f32,
    /// Fraction of the field maximum above which cells belong to the peak.
    pub pri_peak_height_thresh: f32,
    /// Angular distance (radians) at which source confidence reaches zero.
    pub association_angle: f32,
    /// How far past 90 degrees either side the wide field reaches.
    pub degrees_hindsight: f32,
    pub wide_field_width: usize,
    pub blur_kernel_size: usize,
    pub face_gain: f32,
    pub ball_gain: f32,
    pub audio_event_gain: f32,
    /// Audio gain used while the robot is itself vocalizing.
    pub audio_event_gain_making_noise: f32,
    /// Angular standard widths (radians) of an audio event's response.
    pub audio_event_azim_size: f32,
    pub audio_event_elev_size: f32,
    /// Range attributed to audio sources, which carry no size cue.
    pub audio_range_nominal: f32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            pri_decay_lambda: 0.9,
            pri_peak_height_thresh: 0.75,
            association_angle: 0.35,
            degrees_hindsight: 30.0,
            wide_field_width: 256,
            blur_kernel_size: 15,
            face_gain: 1.0,
            ball_gain: 1.0,
            audio_event_gain: 0.5,
            audio_event_gain_making_noise: 0.75,
            audio_event_azim_size: 0.2,
            audio_event_elev_size: 0.3,
            audio_range_nominal: 1.0,
        }
    }
}

/// Mounting offsets of the two cameras in the head frame, radians.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub azimuth: [f32; 2],
    pub elevation: [f32; 2],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            azimuth: [0.4712, -0.4712],
            elevation: [0.0, 0.0],
        }
    }
}

/// Range estimation constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub range_estimate_min: f32,
    pub range_estimate_max: f32,
    /// `k` in `range = k / relative_size`.
    pub range_estimate_gain: f32,
    pub face_size_m: f32,
    pub ball_size_m: f32,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            range_estimate_min: 0.1,
            range_estimate_max: 2.0,
            range_estimate_gain: 0.4,
            face_size_m: 0.2,
            ball_size_m: 0.06,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Reference width apparent sizes are normalised by.
    pub image_width: u32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { image_width: 640 }
    }
}

/// Per-modality switches for the injectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SalienceFlags {
    pub salience_from_motion: bool,
    pub salience_from_ball: bool,
    pub salience_from_faces: bool,
    pub salience_from_sound: bool,
}

impl Default for SalienceFlags {
    fn default() -> Self {
        Self {
            salience_from_motion: true,
            salience_from_ball: true,
            salience_from_faces: true,
            salience_from_sound: true,
        }
    }
}
