//! The per-stream tick: field dynamics, injection, peak extraction,
//! attribution and cross-stream arbitration.

use std::{fmt, mem};

use ndarray::Array2;
use parking_lot::{Mutex, RwLock};

use crate::{
    filter::{gaussian_blur, gaussian_kernel, sigma_for_kernel},
    peak::{find_stream_peak, select_best},
    AudioEvent, BallDetection, CameraModel, DomeCache, FaceDetection, Geometry, GeometryCache,
    Injector, PriorityPeak, SelfState, SpatialParams, StreamId,
};

/// Entry point the external scheduler calls whenever a camera stream has a new
/// motion frame.
pub trait StreamFrameSink {
    /// Processes `stream` for this tick and returns the streams that were
    /// updated. An absent frame or unready geometry updates nothing.
    fn on_stream_frame(&self, stream: StreamId, frame: Option<Array2<f32>>) -> Vec<StreamId>;
}

/// State exclusively owned by one stream's processing call.
struct StreamState {
    field: Array2<f32>,
    motion: Option<Array2<f32>>,
    peak: PriorityPeak,
    /// Elevation of the last audio event; the wide stream has no row axis.
    wide_elev: f32,
}

impl StreamState {
    fn new(stream: StreamId) -> Self {
        Self {
            field: Array2::zeros((0, 0)),
            motion: None,
            peak: PriorityPeak::null(stream),
            wide_elev: 0.0,
        }
    }
}

/// Detections waiting for the next tick of a camera stream.
#[derive(Debug, Default)]
struct DetectionInbox {
    faces: Option<Vec<FaceDetection>>,
    ball: Option<BallDetection>,
}

/// Owns every salience field, the shared caches and the two exclusion points:
/// geometry initialization and best-peak publication.
pub struct SpatialEngine {
    params: SpatialParams,
    blur_taps: Vec<f32>,
    geometry: GeometryCache,
    domes: DomeCache,
    streams: [Mutex<StreamState>; 3],
    inbox: [Mutex<DetectionInbox>; 2],
    audio_queue: Mutex<Vec<AudioEvent>>,
    pending_audio: [Mutex<Vec<AudioEvent>>; 3],
    self_state: RwLock<SelfState>,
    /// Last peak of each stream, readable by any stream for arbitration.
    peaks: Mutex<[PriorityPeak; 3]>,
    best_peak: Mutex<Option<PriorityPeak>>,
    salience_frames: [RwLock<Option<Array2<u8>>>; 3],
}

impl SpatialEngine {
    pub fn new(params: SpatialParams, camera: Box<dyn CameraModel>) -> Self {
        let size = params.spatial.blur_kernel_size;
        let blur_taps = gaussian_kernel(size, sigma_for_kernel(size));
        Self {
            geometry: GeometryCache::new(camera, &params),
            params,
            blur_taps,
            domes: DomeCache::new(),
            streams: StreamId::ALL.map(|s| Mutex::new(StreamState::new(s))),
            inbox: Default::default(),
            audio_queue: Mutex::new(Vec::new()),
            pending_audio: Default::default(),
            self_state: RwLock::new(SelfState::default()),
            peaks: Mutex::new(StreamId::ALL.map(PriorityPeak::null)),
            best_peak: Mutex::new(None),
            salience_frames: Default::default(),
        }
    }

    pub fn params(&self) -> &SpatialParams {
        &self.params
    }

    pub fn geometry(&self) -> &GeometryCache {
        &self.geometry
    }

    pub fn domes(&self) -> &DomeCache {
        &self.domes
    }

    pub fn init_passes(&self) -> usize {
        self.geometry.init_passes()
    }

    /// Replaces the face detections for a camera stream's next tick.
    pub fn push_faces(&self, stream: StreamId, faces: Vec<FaceDetection>) {
        if let Some(camera) = stream.camera() {
            self.inbox[camera].lock().faces = Some(faces);
        }
    }

    /// Replaces the ball detection for a camera stream's next tick.
    pub fn push_ball(&self, stream: StreamId, ball: BallDetection) {
        if let Some(camera) = stream.camera() {
            self.inbox[camera].lock().ball = Some(ball);
        }
    }

    /// Queues localized sounds for every stream.
    pub fn push_audio_events(&self, events: impl IntoIterator<Item = AudioEvent>) {
        self.audio_queue.lock().extend(events);
    }

    pub fn set_self_state(&self, state: SelfState) {
        *self.self_state.write() = state;
    }

    /// Most recently published best peak.
    pub fn best_peak(&self) -> Option<PriorityPeak> {
        self.best_peak.lock().clone()
    }

    /// Retained peak of a single stream.
    pub fn stream_peak(&self, stream: StreamId) -> PriorityPeak {
        self.peaks.lock()[stream.index()].clone()
    }

    /// Byte-quantized copy of the stream's field after its last tick.
    pub fn salience_frame(&self, stream: StreamId) -> Option<Array2<u8>> {
        self.salience_frames[stream.index()].read().clone()
    }

    fn drain_audio_queue(&self) {
        let queued = mem::take(&mut *self.audio_queue.lock());
        if queued.is_empty() {
            return;
        }
        for pending in &self.pending_audio {
            pending.lock().extend_from_slice(&queued);
        }
    }

    fn process_stream(&self, stream: StreamId, geometry: &Geometry, motion: Option<Array2<f32>>) {
        self.drain_audio_queue();

        let params = &self.params;
        let spatial = &params.spatial;
        let flags = &params.flags;
        let index = stream.index();

        let mut state = self.streams[index].lock();
        let state = &mut *state;
        if motion.is_some() {
            state.motion = motion;
        }

        let dim = geometry.field_dim(stream);
        if state.field.dim() != dim {
            state.field = Array2::zeros(dim);
        }

        let blurred = gaussian_blur(&state.field, &self.blur_taps);
        let mean = blurred.mean().unwrap_or(0.0);
        let lambda = spatial.pri_decay_lambda;
        state.field = blurred.mapv(|v| lambda * v - mean);

        let injector = Injector {
            params,
            geometry,
            domes: &self.domes,
            self_state: *self.self_state.read(),
        };
        let mut sources = Vec::new();

        if let Some(camera) = stream.camera() {
            let motion = state.motion.take();
            let (faces, ball) = {
                let mut inbox = self.inbox[camera].lock();
                (inbox.faces.take(), inbox.ball.take())
            };

            if flags.salience_from_motion {
                if let Some(frame) = &motion {
                    injector.inject_motion(&mut state.field, frame);
                }
            }
            if flags.salience_from_ball {
                if let Some(ball) = &ball {
                    injector.inject_ball(&mut state.field, camera, ball, &mut sources);
                }
            }
            if flags.salience_from_faces {
                if let Some(faces) = &faces {
                    injector.inject_faces(&mut state.field, camera, faces, &mut sources);
                }
            }
        }

        let events = mem::take(&mut *self.pending_audio[index].lock());
        if flags.salience_from_sound && !events.is_empty() {
            let elev = injector.inject_audio(&mut state.field, stream, &events, &mut sources);
            if let Some(elev) = elev {
                state.wide_elev = elev;
            }
        }

        state
            .field
            .mapv_inplace(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 255.0) });

        find_stream_peak(&mut state.peak, &state.field, geometry, state.wide_elev, params);
        state
            .peak
            .attribute_sources(&sources, spatial.pri_decay_lambda, spatial.association_angle);
        self.peaks.lock()[index] = state.peak.clone();

        self.publish_best_peak();

        *self.salience_frames[index].write() = Some(state.field.mapv(|v| v as u8));
    }

    fn publish_best_peak(&self) {
        let Some(mut best) = select_best(&*self.peaks.lock()).cloned() else {
            return;
        };
        best.finalize(&self.params);

        match self.best_peak.try_lock() {
            Some(mut slot) => *slot = Some(best),
            None => tracing::trace!("best peak slot busy, skipping publication"),
        }
    }
}

impl StreamFrameSink for SpatialEngine {
    fn on_stream_frame(&self, stream: StreamId, frame: Option<Array2<f32>>) -> Vec<StreamId> {
        let mut updated = Vec::new();

        // the wide stream has no frames of its own
        if stream.camera().is_none() {
            return updated;
        }
        let Some(frame) = frame else {
            return updated;
        };
        if !self.geometry.ensure_ready(stream, frame.dim()) {
            return updated;
        }
        let Some(geometry) = self.geometry.get() else {
            return updated;
        };

        self.process_stream(stream, geometry, Some(frame));
        updated.push(stream);

        if stream == StreamId::Left {
            self.process_stream(StreamId::Wide, geometry, None);
            updated.push(StreamId::Wide);
        }
        updated
    }
}

impl fmt::Debug for SpatialEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialEngine")
            .field("geometry", &self.geometry)
            .field("domes", &self.domes.len())
            .field("best_peak", &self.best_peak.try_lock().map(|p| p.clone()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Modality, PinholeCameraModel};

    const SHAPE: (usize, usize) = (120, 160);

    fn engine() -> SpatialEngine {
        SpatialEngine::new(
            SpatialParams::default(),
            Box::new(PinholeCameraModel::default()),
        )
    }

    fn blank() -> Option<Array2<f32>> {
        Some(Array2::zeros(SHAPE))
    }

    fn field_mean(engine: &SpatialEngine, stream: StreamId) -> f32 {
        engine.streams[stream.index()]
            .lock()
            .field
            .mean()
            .unwrap_or(0.0)
    }

    #[test]
    fn absent_frame_is_a_noop() {
        let engine = engine();
        assert!(engine.on_stream_frame(StreamId::Left, None).is_empty());
        assert!(!engine.geometry().is_ready());
    }

    #[test]
    fn left_stream_also_drives_wide_stream() {
        let engine = engine();
        assert_eq!(
            engine.on_stream_frame(StreamId::Left, blank()),
            vec![StreamId::Left, StreamId::Wide]
        );
        assert_eq!(
            engine.on_stream_frame(StreamId::Right, blank()),
            vec![StreamId::Right]
        );
        assert!(engine.on_stream_frame(StreamId::Wide, blank()).is_empty());
        assert_eq!(engine.init_passes(), 1);
    }

    #[test]
    fn skips_tick_while_geometry_lock_is_busy() {
        let engine = engine();
        let guard = engine.geometry.pending.lock();
        assert!(engine.on_stream_frame(StreamId::Right, blank()).is_empty());
        drop(guard);
        assert_eq!(engine.on_stream_frame(StreamId::Right, blank()).len(), 1);
    }

    #[test]
    fn fields_are_sized_per_stream() {
        let engine = engine();
        engine.on_stream_frame(StreamId::Left, blank());
        assert_eq!(engine.salience_frame(StreamId::Left).unwrap().dim(), SHAPE);
        assert_eq!(engine.salience_frame(StreamId::Wide).unwrap().dim(), (1, 256));
        assert!(engine.salience_frame(StreamId::Right).is_none());
    }

    #[test]
    fn field_mean_decays_without_stimulus() {
        let engine = engine();
        let mut frame = Array2::<f32>::zeros(SHAPE);
        frame
            .slice_mut(ndarray::s![50..70, 70..90])
            .fill(200.0);
        engine.on_stream_frame(StreamId::Left, Some(frame));

        let mut previous = field_mean(&engine, StreamId::Left);
        assert!(previous > 0.0);
        for _ in 0..40 {
            engine.on_stream_frame(StreamId::Left, blank());
            let mean = field_mean(&engine, StreamId::Left);
            assert!(mean <= previous);
            previous = mean;
        }
        assert!(previous < 0.5);
    }

    #[test]
    fn field_stays_in_byte_range() {
        let engine = engine();
        let frame = Array2::from_elem(SHAPE, 1000.0_f32);
        let mut spike = frame.clone();
        spike[[60, 80]] = 5000.0;
        engine.push_ball(StreamId::Left, BallDetection { x: 80.0, y: 60.0, radius: 10.0 });
        engine.on_stream_frame(StreamId::Left, Some(spike));

        let state = engine.streams[0].lock();
        assert!(state.field.iter().all(|v| (0.0..=255.0).contains(v)));
    }

    #[test]
    fn non_finite_motion_does_not_poison_the_field() {
        let engine = engine();
        let mut frame = Array2::<f32>::zeros(SHAPE);
        frame
            .slice_mut(ndarray::s![50..70, 70..90])
            .fill(200.0);
        frame[[10, 10]] = f32::NAN;
        frame[[11, 10]] = f32::INFINITY;
        engine.on_stream_frame(StreamId::Left, Some(frame));

        let in_range = |engine: &SpatialEngine| {
            engine.streams[0]
                .lock()
                .field
                .iter()
                .all(|v| (0.0..=255.0).contains(v))
        };
        assert!(in_range(&engine));
        assert!(engine.stream_peak(StreamId::Left).height > 0.0);

        engine.on_stream_frame(StreamId::Left, blank());
        assert!(in_range(&engine));
        assert!(engine.stream_peak(StreamId::Left).height > 0.0);
    }

    #[test]
    fn far_out_of_frame_ball_is_ignored() {
        let engine = engine();
        engine.push_ball(StreamId::Right, BallDetection { x: 1e30, y: 10.0, radius: 5.0 });
        assert_eq!(engine.on_stream_frame(StreamId::Right, blank()).len(), 1);
        assert_eq!(engine.streams[1].lock().field.sum(), 0.0);

        engine.push_ball(StreamId::Right, BallDetection { x: -1e30, y: f32::MAX, radius: 5.0 });
        engine.on_stream_frame(StreamId::Right, blank());
        assert_eq!(engine.streams[1].lock().field.sum(), 0.0);
        assert_eq!(engine.stream_peak(StreamId::Right).height, 0.0);
    }

    #[test]
    fn detections_are_consumed_once() {
        let engine = engine();
        engine.push_faces(
            StreamId::Right,
            vec![FaceDetection { x: 70.0, y: 50.0, w: 20.0, h: 20.0, confidence: 1.0 }],
        );
        engine.on_stream_frame(StreamId::Right, blank());
        let first = engine.stream_peak(StreamId::Right);
        assert_eq!(first.confidence(Modality::Face), 1.0);

        engine.on_stream_frame(StreamId::Right, blank());
        let second = engine.stream_peak(StreamId::Right);
        assert!((second.confidence(Modality::Face) - 0.9).abs() < 1e-3);
        assert!(engine.inbox[1].lock().faces.is_none());
    }

    #[test]
    fn disabled_modality_is_not_injected() {
        let mut params = SpatialParams::default();
        params.flags.salience_from_ball = false;
        let engine = SpatialEngine::new(params, Box::new(PinholeCameraModel::default()));
        engine.push_ball(StreamId::Left, BallDetection { x: 80.0, y: 60.0, radius: 10.0 });
        engine.on_stream_frame(StreamId::Left, blank());

        assert!(engine.stream_peak(StreamId::Left).is_null());
        assert!(engine.inbox[0].lock().ball.is_none());
    }

    #[test]
    fn audio_is_shared_by_all_streams() {
        let engine = engine();
        engine.on_stream_frame(StreamId::Left, blank());
        engine.push_audio_events([AudioEvent { azim: -0.47, elev: 0.0, level: 1.0 }]);

        engine.on_stream_frame(StreamId::Left, blank());
        assert_eq!(engine.pending_audio[1].lock().len(), 1);
        assert!(engine.pending_audio[0].lock().is_empty());
        assert!(engine.pending_audio[2].lock().is_empty());

        engine.on_stream_frame(StreamId::Right, blank());
        assert!(engine.pending_audio[1].lock().is_empty());
        let right = engine.stream_peak(StreamId::Right);
        assert!(right.height > 0.0);
        assert!(right.confidence(Modality::Audio) > 0.5);
    }

    #[test]
    fn published_peak_is_finalized() {
        let engine = engine();
        engine.push_ball(StreamId::Left, BallDetection { x: 80.0, y: 60.0, radius: 16.0 });
        engine.on_stream_frame(StreamId::Left, blank());

        let best = engine.best_peak().unwrap();
        assert_eq!(best.stream, StreamId::Left);
        assert_eq!(best.range, best.source_range[Modality::Ball.index()]);
        assert!(best.location[0] > 0.0);
    }

    #[test]
    fn busy_publication_is_skipped() {
        let engine = engine();
        let slot = engine.best_peak.lock();
        engine.on_stream_frame(StreamId::Left, blank());
        drop(slot);
        assert!(engine.best_peak().is_none());

        engine.on_stream_frame(StreamId::Left, blank());
        assert!(engine.best_peak().is_some());
    }
}
