//! Camera geometry and the lazily built per-stream lookup tables.
//!
//! Frame dimensions are unknown until the first motion frame arrives, so the
//! tables are built once, on demand, by whichever camera stream gets there
//! first. The build is guarded by a non-blocking lock: a stream that loses the
//! race skips its tick instead of waiting.

use std::{
    f32::consts::PI,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        OnceLock,
    },
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::SpatialParams;

/// Identifies one of the three salience streams. Indices are stable and define
/// arbitration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamId {
    Left,
    Right,
    Wide,
}

impl StreamId {
    pub const ALL: [StreamId; 3] = [StreamId::Left, StreamId::Right, StreamId::Wide];

    pub fn index(self) -> usize {
        match self {
            StreamId::Left => 0,
            StreamId::Right => 1,
            StreamId::Wide => 2,
        }
    }

    /// Camera index for the two image streams, `None` for the wide stream.
    pub fn camera(self) -> Option<usize> {
        match self {
            StreamId::Left => Some(0),
            StreamId::Right => Some(1),
            StreamId::Wide => None,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamId::Left => "left",
            StreamId::Right => "right",
            StreamId::Wide => "wide",
        };
        f.write_str(name)
    }
}

/// A view line in radians. Positive azimuth is to the robot's left, positive
/// elevation is up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub azim: f32,
    pub elev: f32,
}

impl View {
    pub fn new(azim: f32, elev: f32) -> Self {
        Self { azim, elev }
    }

    /// Euclidean distance in (azimuth, elevation) space.
    pub fn angle_to(&self, other: &View) -> f32 {
        let da = self.azim - other.azim;
        let de = self.elev - other.elev;
        (da * da + de * de).sqrt()
    }
}

/// Maps image pixels to view lines for a single camera.
pub trait CameraModel: Send + Sync {
    fn set_frame_size(&mut self, width: usize, height: usize);

    /// View line through `pixel` (`[x, y]`) relative to the camera's own axis.
    fn pixel_to_view(&self, pixel: [f32; 2]) -> View;

    fn frame_pixel_count(&self) -> usize;
}

/// Distortion-free pinhole camera with a fixed horizontal field of view.
#[derive(Debug, Clone)]
pub struct PinholeCameraModel {
    hfov: f32,
    width: usize,
    height: usize,
}

impl PinholeCameraModel {
    pub fn new(hfov: f32) -> Self {
        Self {
            hfov,
            width: 0,
            height: 0,
        }
    }

    fn focal_length(&self) -> f32 {
        (self.width as f32 * 0.5) / (self.hfov * 0.5).tan()
    }
}

impl Default for PinholeCameraModel {
    fn default() -> Self {
        Self::new(PI / 3.0)
    }
}

impl CameraModel for PinholeCameraModel {
    fn set_frame_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
    }

    fn pixel_to_view(&self, pixel: [f32; 2]) -> View {
        let f = self.focal_length();
        let cx = (self.width as f32 - 1.0) * 0.5;
        let cy = (self.height as f32 - 1.0) * 0.5;
        View {
            azim: -((pixel[0] - cx) / f).atan(),
            elev: -((pixel[1] - cy) / f).atan(),
        }
    }

    fn frame_pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Frame dimensions recovered from the first motion frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: usize,
    pub height: usize,
}

/// Tables built by the one-time initialization pass. Immutable afterwards.
pub struct Geometry {
    frame: FrameSize,
    camera: Box<dyn CameraModel>,
    mounting: [View; 2],
    central_axis_azim: [Vec<f32>; 2],
    central_axis_elev: [Vec<f32>; 2],
    wide_azim: Vec<f32>,
}

impl Geometry {
    fn build(
        mut camera: Box<dyn CameraModel>,
        frame: FrameSize,
        settings: &GeometrySettings,
    ) -> Self {
        camera.set_frame_size(frame.width, frame.height);

        let mid_row = frame.height as f32 * 0.5 - 0.5;
        let mid_col = frame.width as f32 * 0.5 - 0.5;
        let mut central_axis_azim = [Vec::new(), Vec::new()];
        let mut central_axis_elev = [Vec::new(), Vec::new()];
        for (index, mount) in settings.mounting.iter().enumerate() {
            central_axis_azim[index] = (0..frame.width)
                .map(|x| camera.pixel_to_view([x as f32, mid_row]).azim + mount.azim)
                .collect();
            central_axis_elev[index] = (0..frame.height)
                .map(|y| camera.pixel_to_view([mid_col, y as f32]).elev + mount.elev)
                .collect();
        }

        Self {
            frame,
            camera,
            mounting: settings.mounting,
            central_axis_azim,
            central_axis_elev,
            wide_azim: wide_azimuth_axis(settings.wide_width, settings.degrees_hindsight),
        }
    }

    pub fn frame(&self) -> FrameSize {
        self.frame
    }

    /// Pixel to head-frame view line for camera `camera` (0 or 1).
    pub fn pixel_to_view(&self, camera: usize, pixel: [f32; 2]) -> View {
        let mut view = self.camera.pixel_to_view(pixel);
        view.azim += self.mounting[camera].azim;
        view.elev += self.mounting[camera].elev;
        view
    }

    pub fn frame_pixel_count(&self) -> usize {
        self.camera.frame_pixel_count()
    }

    /// Head-frame azimuth of each pixel column along the central row.
    pub fn central_axis_azim(&self, camera: usize) -> &[f32] {
        &self.central_axis_azim[camera]
    }

    /// Head-frame elevation of each pixel row along the central column.
    pub fn central_axis_elev(&self, camera: usize) -> &[f32] {
        &self.central_axis_elev[camera]
    }

    /// Azimuth of each wide-field cell, descending from left to right.
    pub fn wide_azim(&self) -> &[f32] {
        &self.wide_azim
    }

    /// `(rows, cols)` of the salience field owned by `stream`.
    pub fn field_dim(&self, stream: StreamId) -> (usize, usize) {
        match stream.camera() {
            Some(_) => (self.frame.height, self.frame.width),
            None => (1, self.wide_azim.len()),
        }
    }
}

impl fmt::Debug for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geometry")
            .field("frame", &self.frame)
            .field("mounting", &self.mounting)
            .field("wide_azim", &self.wide_azim.len())
            .finish()
    }
}

/// Cell-centred azimuths spanning `±(90° + hindsight)`.
pub fn wide_azimuth_axis(width: usize, degrees_hindsight: f32) -> Vec<f32> {
    let azim_max = (90.0 + degrees_hindsight).to_radians();
    let step = azim_max / (width as f32 * 0.5);
    (0..width)
        .map(|i| azim_max - (i as f32 + 0.5) * step)
        .collect()
}

#[derive(Debug, Clone)]
struct GeometrySettings {
    mounting: [View; 2],
    degrees_hindsight: f32,
    wide_width: usize,
}

/// Lazily initialized, process-lifetime geometry shared by all streams.
pub struct GeometryCache {
    settings: GeometrySettings,
    /// Holds the camera model until initialization consumes it. The lock
    /// doubles as the initialization exclusion.
    pub(crate) pending: Mutex<Option<Box<dyn CameraModel>>>,
    ready: OnceLock<Geometry>,
    passes: AtomicUsize,
}

impl GeometryCache {
    pub fn new(camera: Box<dyn CameraModel>, params: &SpatialParams) -> Self {
        let cam = &params.camera;
        Self {
            settings: GeometrySettings {
                mounting: [
                    View::new(cam.azimuth[0], cam.elevation[0]),
                    View::new(cam.azimuth[1], cam.elevation[1]),
                ],
                degrees_hindsight: params.spatial.degrees_hindsight,
                wide_width: params.spatial.wide_field_width,
            },
            pending: Mutex::new(Some(camera)),
            ready: OnceLock::new(),
            passes: AtomicUsize::new(0),
        }
    }

    /// Returns `true` once the tables exist. Never blocks: if another stream
    /// holds the initialization lock this returns `false` and the caller
    /// should skip its tick.
    pub fn ensure_ready(&self, stream: StreamId, frame_shape: (usize, usize)) -> bool {
        if self.ready.get().is_some() {
            return true;
        }

        let Some(mut pending) = self.pending.try_lock() else {
            tracing::info!(%stream, "geometry init busy on another stream");
            return false;
        };

        if self.ready.get().is_some() {
            tracing::info!(%stream, "geometry init already completed by another stream");
            return true;
        }

        let (height, width) = frame_shape;
        if width == 0 || height == 0 {
            tracing::warn!(%stream, width, height, "cannot build geometry from an empty frame");
            return false;
        }

        let Some(camera) = pending.take() else {
            tracing::warn!(%stream, "camera model missing before geometry init");
            return false;
        };

        tracing::info!(%stream, width, height, "geometry init started");
        let geometry = Geometry::build(camera, FrameSize { width, height }, &self.settings);
        self.passes.fetch_add(1, Ordering::SeqCst);
        // Only the lock holder reaches this point, so the cell is still empty.
        let _ = self.ready.set(geometry);
        tracing::info!(%stream, "geometry init completed");
        true
    }

    pub fn get(&self) -> Option<&Geometry> {
        self.ready.get()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    /// Number of initialization passes performed; at most one.
    pub fn init_passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for GeometryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryCache")
            .field("ready", &self.ready.get())
            .field("passes", &self.init_passes())
            .finish()
    }
}
