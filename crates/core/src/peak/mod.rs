//! Priority peaks: the most salient direction in each stream, which modalities
//! explain it, and the arbitration that picks one across streams.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{Geometry, Modality, SalienceSource, SpatialParams, StreamId, View};

/// Summary of the most salient region of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityPeak {
    pub stream: StreamId,
    /// Field maximum scaled into [0, 1].
    pub height: f32,
    /// Fraction of the field's cells above the peak threshold.
    pub size: f32,
    pub azim: f32,
    pub elev: f32,
    /// Per-modality confidence that this peak originates from that modality.
    pub source_conf: [f32; Modality::COUNT],
    /// Range estimate that went with each modality's confidence.
    pub source_range: [f32; Modality::COUNT],
    /// Filled in by [`PriorityPeak::finalize`].
    pub range: f32,
    /// Head-frame point at `range` along the peak direction.
    pub location: [f32; 3],
}

impl PriorityPeak {
    pub fn null(stream: StreamId) -> Self {
        Self {
            stream,
            height: 0.0,
            size: 0.0,
            azim: 0.0,
            elev: 0.0,
            source_conf: [0.0; Modality::COUNT],
            source_range: [0.0; Modality::COUNT],
            range: 0.0,
            location: [0.0; 3],
        }
    }

    pub fn view(&self) -> View {
        View::new(self.azim, self.elev)
    }

    pub fn is_null(&self) -> bool {
        self.height <= 0.0
    }

    pub fn confidence(&self, modality: Modality) -> f32 {
        self.source_conf[modality.index()]
    }

    /// Clears the located part of the peak. Attribution is kept so it can keep
    /// decaying.
    fn reset_location(&mut self) {
        self.height = 0.0;
        self.size = 0.0;
        self.azim = 0.0;
        self.elev = 0.0;
    }

    /// Decays existing confidence by `decay_lambda`, then raises it for each
    /// source near the peak: `1 - d / association_angle`, floored at zero.
    pub fn attribute_sources(
        &mut self,
        sources: &[SalienceSource],
        decay_lambda: f32,
        association_angle: f32,
    ) {
        for conf in &mut self.source_conf {
            *conf *= decay_lambda;
        }

        let peak = self.view();
        for source in sources {
            let conf = association_confidence(source.view.angle_to(&peak), association_angle);
            let slot = source.modality.index();
            if conf > self.source_conf[slot] {
                self.source_conf[slot] = conf;
                self.source_range[slot] = source.range;
            }
        }
    }

    /// Derives the fields downstream orienting logic consumes: the range of
    /// the most confident modality and the corresponding head-frame point.
    pub fn finalize(&mut self, params: &SpatialParams) {
        let best = Modality::ALL
            .iter()
            .map(|m| m.index())
            .filter(|&i| self.source_conf[i] > 0.0)
            .max_by(|&a, &b| self.source_conf[a].total_cmp(&self.source_conf[b]));

        self.range = match best {
            Some(i) => self.source_range[i],
            None => params.action.range_estimate_max,
        };

        let (sa, ca) = self.azim.sin_cos();
        let (se, ce) = self.elev.sin_cos();
        self.location = [self.range * ce * ca, self.range * ce * sa, self.range * se];
    }
}

/// Confidence falls linearly from 1 at zero distance to 0 at `association_angle`.
pub fn association_confidence(distance: f32, association_angle: f32) -> f32 {
    (1.0 - distance / association_angle).max(0.0)
}

/// Thresholded region of a field, described by its unweighted centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakRegion {
    /// Raw field maximum.
    pub max: f32,
    /// `[x, y]` mean of the cells strictly above threshold.
    pub centroid: [f32; 2],
    pub count: usize,
}

/// Finds cells strictly above `fraction * max`. `None` when no cell qualifies.
pub fn find_region(field: &Array2<f32>, fraction: f32) -> Option<PeakRegion> {
    let max = field.iter().copied().fold(f32::MIN, f32::max);
    let thresh = fraction * max;

    let (mut sx, mut sy, mut count) = (0.0_f64, 0.0_f64, 0_usize);
    for ((y, x), &value) in field.indexed_iter() {
        if value > thresh {
            sx += x as f64;
            sy += y as f64;
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    Some(PeakRegion {
        max,
        centroid: [(sx / count as f64) as f32, (sy / count as f64) as f32],
        count,
    })
}

/// Updates `peak` in place from the stream's clipped field.
pub fn find_stream_peak(
    peak: &mut PriorityPeak,
    field: &Array2<f32>,
    geometry: &Geometry,
    wide_elev: f32,
    params: &SpatialParams,
) {
    let Some(region) = find_region(field, params.spatial.pri_peak_height_thresh) else {
        peak.reset_location();
        return;
    };

    let (size, view) = match peak.stream.camera() {
        Some(camera) => (
            region.count as f32 / geometry.frame_pixel_count() as f32,
            geometry.pixel_to_view(camera, region.centroid),
        ),
        None => {
            let axis = geometry.wide_azim();
            let index = (region.centroid[0].round() as usize).min(axis.len() - 1);
            (
                region.count as f32 / axis.len() as f32,
                View::new(axis[index], wide_elev),
            )
        }
    };

    peak.height = region.max / 255.0;
    peak.size = size;
    peak.azim = view.azim;
    peak.elev = view.elev;
}

/// The peak with strictly greatest height; ties go to the earlier stream.
pub fn select_best(peaks: &[PriorityPeak]) -> Option<&PriorityPeak> {
    let mut iter = peaks.iter();
    let mut best = iter.next()?;
    for peak in iter {
        if peak.height > best.height {
            best = peak;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak_with_height(stream: StreamId, height: f32) -> PriorityPeak {
        PriorityPeak {
            height,
            ..PriorityPeak::null(stream)
        }
    }

    fn source(modality: Modality, azim: f32, range: f32) -> SalienceSource {
        SalienceSource {
            modality,
            view: View::new(azim, 0.0),
            range,
        }
    }

    #[test]
    fn confidence_is_linear_in_distance() {
        assert_eq!(association_confidence(0.0, 0.4), 1.0);
        assert!((association_confidence(0.1, 0.4) - 0.75).abs() < 1e-6);
        assert_eq!(association_confidence(0.4, 0.4), 0.0);
        assert_eq!(association_confidence(0.9, 0.4), 0.0);
    }

    #[test]
    fn region_uses_unweighted_centroid() {
        let mut field = Array2::<f32>::zeros((10, 10));
        field[[2, 2]] = 100.0;
        field[[2, 6]] = 80.0;
        let region = find_region(&field, 0.75).unwrap();
        assert_eq!(region.count, 2);
        assert_eq!(region.centroid, [4.0, 2.0]);
        assert_eq!(region.max, 100.0);
    }

    #[test]
    fn empty_field_has_no_region() {
        assert!(find_region(&Array2::<f32>::zeros((4, 4)), 0.75).is_none());
    }

    #[test]
    fn attribution_decays_then_replaces() {
        let mut peak = PriorityPeak::null(StreamId::Left);
        peak.attribute_sources(&[source(Modality::Face, 0.0, 0.8)], 0.9, 0.4);
        assert_eq!(peak.confidence(Modality::Face), 1.0);
        assert_eq!(peak.source_range[Modality::Face.index()], 0.8);

        peak.attribute_sources(&[], 0.9, 0.4);
        assert!((peak.confidence(Modality::Face) - 0.9).abs() < 1e-6);

        // a weaker, far-off source does not overwrite the retained range
        peak.attribute_sources(&[source(Modality::Face, 0.3, 1.5)], 0.9, 0.4);
        assert!((peak.confidence(Modality::Face) - 0.81).abs() < 1e-6);
        assert_eq!(peak.source_range[Modality::Face.index()], 0.8);
        assert_eq!(peak.confidence(Modality::Ball), 0.0);
    }

    #[test]
    fn finalize_uses_most_confident_range() {
        let params = SpatialParams::default();
        let mut peak = PriorityPeak::null(StreamId::Right);
        peak.source_conf = [0.2, 0.7, 0.0];
        peak.source_range = [1.2, 0.5, 0.0];
        peak.finalize(&params);
        assert_eq!(peak.range, 0.5);
        assert!((peak.location[0] - 0.5).abs() < 1e-6);

        let mut unattributed = PriorityPeak::null(StreamId::Right);
        unattributed.azim = std::f32::consts::FRAC_PI_2;
        unattributed.finalize(&params);
        assert_eq!(unattributed.range, params.action.range_estimate_max);
        assert!((unattributed.location[1] - params.action.range_estimate_max).abs() < 1e-5);
    }

    #[test]
    fn best_peak_is_strictly_highest() {
        let peaks = [
            peak_with_height(StreamId::Left, 0.2),
            peak_with_height(StreamId::Right, 0.6),
            peak_with_height(StreamId::Wide, 0.4),
        ];
        assert_eq!(select_best(&peaks).unwrap().stream, StreamId::Right);
    }

    #[test]
    fn ties_go_to_earlier_stream() {
        let all_equal = [
            peak_with_height(StreamId::Left, 0.5),
            peak_with_height(StreamId::Right, 0.5),
            peak_with_height(StreamId::Wide, 0.5),
        ];
        assert_eq!(select_best(&all_equal).unwrap().stream, StreamId::Left);

        let right_wide = [
            peak_with_height(StreamId::Left, 0.1),
            peak_with_height(StreamId::Right, 0.5),
            peak_with_height(StreamId::Wide, 0.5),
        ];
        assert_eq!(select_best(&right_wide).unwrap().stream, StreamId::Right);
        assert!(select_best(&[]).is_none());
    }
}
