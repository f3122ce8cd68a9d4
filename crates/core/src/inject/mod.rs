//! Modality injectors: each turns one transient detection into a field update
//! and, where the detection has a direction, a salience source record.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{DomeCache, Geometry, SpatialParams, StreamId, View};

/// Perceptual channels that can be attributed to a peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Face,
    Ball,
    Audio,
}

impl Modality {
    pub const COUNT: usize = 3;
    pub const ALL: [Modality; Modality::COUNT] = [Modality::Face, Modality::Ball, Modality::Audio];

    pub fn index(self) -> usize {
        match self {
            Modality::Face => 0,
            Modality::Ball => 1,
            Modality::Audio => 2,
        }
    }
}

/// A direction some modality reported during the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalienceSource {
    pub modality: Modality,
    pub view: View,
    pub range: f32,
}

/// Face bounding box in pixels with detector confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

/// Centre and radius in pixels of the matched colour blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallDetection {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// A localized sound in head coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub azim: f32,
    pub elev: f32,
    pub level: f32,
}

/// The robot's own activity, which gates or reweights injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfState {
    pub moving: bool,
    pub blinking: bool,
    pub vocalizing: bool,
}

/// Range from apparent size using `range = k / (size_px / image_width / size_m)`,
/// clamped to the configured limits. Non-increasing in `size_in_pix`.
pub fn estimate_range(size_in_pix: f32, size_in_m: f32, params: &SpatialParams) -> f32 {
    let action = &params.action;
    let size_norm = size_in_pix / params.decode.image_width as f32;
    let size_rel = size_norm / size_in_m;

    let range = if size_rel > 0.0 {
        action.range_estimate_gain / size_rel
    } else {
        action.range_estimate_max
    };
    range.clamp(action.range_estimate_min, action.range_estimate_max)
}

/// Everything an injector needs besides the field and its input.
#[derive(Clone, Copy)]
pub struct Injector<'a> {
    pub params: &'a SpatialParams,
    pub geometry: &'a Geometry,
    pub domes: &'a DomeCache,
    pub self_state: SelfState,
}

impl<'a> Injector<'a> {
    /// Adds the zero-mean motion energy frame. Skipped while the robot's own
    /// movement or blinking would dominate the signal.
    pub fn inject_motion(&self, field: &mut Array2<f32>, frame: &Array2<f32>) {
        if self.self_state.moving || self.self_state.blinking {
            return;
        }
        if frame.dim() != field.dim() {
            tracing::warn!(
                frame = ?frame.dim(),
                field = ?field.dim(),
                "motion frame does not match field, ignoring"
            );
            return;
        }
        // non-finite cells carry no motion
        let motion = |m: f32| if m.is_finite() { m } else { 0.0 };
        let mean = frame.fold(0.0, |acc, &m| acc + motion(m)) / frame.len().max(1) as f32;
        field.zip_mut_with(frame, |cell, &m| *cell += motion(m) - mean);
    }

    pub fn inject_faces(
        &self,
        field: &mut Array2<f32>,
        camera: usize,
        faces: &[FaceDetection],
        sources: &mut Vec<SalienceSource>,
    ) {
        let params = self.params;
        for face in faces {
            let range = estimate_range(face.w, params.action.face_size_m, params);
            tracing::debug!(range, confidence = face.confidence, "face");

            let x = (face.x + face.w * 0.5) as isize;
            let y = (face.y + face.h * 0.5) as isize;
            let extent = (face.w + face.h) * 0.25;
            let height = params.spatial.face_gain * face.confidence * 255.0;
            let radius = dome_radius(extent);

            self.domes.inject_dome(field, (x, y), radius, height);
            sources.push(SalienceSource {
                modality: Modality::Face,
                view: self.geometry.pixel_to_view(camera, [x as f32, y as f32]),
                range,
            });
        }
    }

    pub fn inject_ball(
        &self,
        field: &mut Array2<f32>,
        camera: usize,
        ball: &BallDetection,
        sources: &mut Vec<SalienceSource>,
    ) {
        let params = self.params;
        let range = estimate_range(ball.radius * 2.0, params.action.ball_size_m, params);
        tracing::debug!(range, "ball");

        let x = ball.x as isize;
        let y = ball.y as isize;
        let height = params.spatial.ball_gain * 255.0;

        self.domes.inject_dome(field, (x, y), dome_radius(ball.radius), height);
        sources.push(SalienceSource {
            modality: Modality::Ball,
            view: self.geometry.pixel_to_view(camera, [x as f32, y as f32]),
            range,
        });
    }

    /// Adds a Gaussian response per event. Camera streams respond in azimuth
    /// and elevation; the wide stream in azimuth only. Returns the elevation of
    /// the last event so the wide stream can report it.
    pub fn inject_audio(
        &self,
        field: &mut Array2<f32>,
        stream: StreamId,
        events: &[AudioEvent],
        sources: &mut Vec<SalienceSource>,
    ) -> Option<f32> {
        let spatial = &self.params.spatial;
        let mut gain = spatial.audio_event_gain;
        if self.self_state.vocalizing {
            gain = spatial.audio_event_gain_making_noise;
        }
        let azim_recip = 1.0 / spatial.audio_event_azim_size;
        let elev_recip = 1.0 / spatial.audio_event_elev_size;

        let mut last_elev = None;
        for event in events {
            let scale = gain * 255.0 * event.level;
            let response_azim = |axis: &[f32]| -> Vec<f32> {
                axis.iter()
                    .map(|a| gaussian((event.azim - a) * azim_recip))
                    .collect()
            };

            match stream.camera() {
                Some(camera) => {
                    let ra = response_azim(self.geometry.central_axis_azim(camera));
                    let re: Vec<f32> = self
                        .geometry
                        .central_axis_elev(camera)
                        .iter()
                        .map(|e| gaussian((event.elev - e) * elev_recip))
                        .collect();
                    for ((y, x), cell) in field.indexed_iter_mut() {
                        *cell += scale * re[y] * ra[x];
                    }
                }
                None => {
                    let ra = response_azim(self.geometry.wide_azim());
                    for (cell, r) in field.row_mut(0).iter_mut().zip(ra) {
                        *cell += scale * r;
                    }
                    last_elev = Some(event.elev);
                }
            }

            sources.push(SalienceSource {
                modality: Modality::Audio,
                view: View::new(event.azim, event.elev),
                range: spatial.audio_range_nominal,
            });
        }
        last_elev
    }
}

fn gaussian(x: f32) -> f32 {
    (-(x * x)).exp()
}

/// Representational radius for a detection of pixel extent `extent`.
fn dome_radius(extent: f32) -> usize {
    ((extent * 0.5) as usize).max(1)
}
