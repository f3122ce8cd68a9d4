//! Spatial attention core for a small mobile robot.
//!
//! Transient perceptual signals (visual motion, detected faces, a detected
//! ball, localized sound events) are fused into a persistent salience field per
//! stream: one per camera plus a wide, audio-only azimuth track. Every tick the
//! field is smoothed and decayed, new stimuli are injected, the most salient
//! region is reduced to a [`PriorityPeak`], and one peak is arbitrated across
//! all streams for downstream orienting logic.
//!
//! Each module owns a distinct piece of that pipeline. Camera streams may be
//! driven concurrently from separate threads through [`StreamFrameSink`]; the
//! only shared critical sections are the one-time geometry build and the
//! best-peak slot, both entered with a non-blocking try-lock.

pub mod config;
pub mod dome;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod inject;
pub mod peak;

pub use config::{
    ActionConfig, CameraConfig, DecodeConfig, SalienceFlags, SpatialConfig, SpatialParams,
};
pub use dome::{inject_pattern, DomeCache};
pub use engine::{SpatialEngine, StreamFrameSink};
pub use error::{Result, SpatialError};
pub use geometry::{
    CameraModel, FrameSize, Geometry, GeometryCache, PinholeCameraModel, StreamId, View,
};
pub use inject::{
    estimate_range, AudioEvent, BallDetection, FaceDetection, Injector, Modality,
    SalienceSource, SelfState,
};
pub use peak::{association_confidence, select_best, PriorityPeak};
