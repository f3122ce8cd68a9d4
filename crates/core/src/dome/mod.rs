use std::{collections::HashMap, sync::Arc};

use ndarray::{s, Array2};
use parking_lot::RwLock;

use crate::filter::{gaussian_blur, gaussian_kernel, kernel_for_sigma};

/// Memoized radially symmetric bumps used to stamp stimuli into a field.
///
/// Domes are keyed by integer radius and normalised so their peak is exactly
/// 1.0; callers scale by the desired height at injection time.
#[derive(Debug, Default)]
pub struct DomeCache {
    domes: RwLock<HashMap<usize, Arc<Array2<f32>>>>,
}

impl DomeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `(8r + 1)`-square dome for `radius`. Radius 0 is treated
    /// as 1.
    pub fn get(&self, radius: usize) -> Arc<Array2<f32>> {
        let radius = radius.max(1);
        if let Some(dome) = self.domes.read().get(&radius) {
            return Arc::clone(dome);
        }

        let mut domes = self.domes.write();
        Arc::clone(domes.entry(radius).or_insert_with(|| {
            tracing::debug!(radius, "creating dome");
            Arc::new(build_dome(radius))
        }))
    }

    pub fn len(&self) -> usize {
        self.domes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds the dome for `radius`, scaled to `height`, centred on `center`.
    pub fn inject_dome(
        &self,
        field: &mut Array2<f32>,
        center: (isize, isize),
        radius: usize,
        height: f32,
    ) {
        let dome = self.get(radius);
        add_clipped(field, center, &dome, height);
    }
}

fn build_dome(radius: usize) -> Array2<f32> {
    let side = radius * 8 + 1;
    let mut dome = Array2::<f32>::zeros((side, side));
    dome[[radius * 4, radius * 4]] = 1.0;

    let sigma = radius as f32;
    let mut dome = gaussian_blur(&dome, &gaussian_kernel(kernel_for_sigma(sigma), sigma));

    let peak = dome.iter().copied().fold(f32::MIN, f32::max);
    dome.mapv_inplace(|v| v / peak);
    dome
}

/// Adds `pattern` into `field` centred at `center` (`(x, y)` in cells). The
/// pattern window is clipped to the field; a centre whose pattern misses the
/// field entirely is a no-op.
pub fn inject_pattern(field: &mut Array2<f32>, center: (isize, isize), pattern: &Array2<f32>) {
    add_clipped(field, center, pattern, 1.0);
}

fn add_clipped(field: &mut Array2<f32>, center: (isize, isize), pattern: &Array2<f32>, scale: f32) {
    let (rows, cols) = field.dim();
    let (ph, pw) = pattern.dim();
    let Some((dx, sx)) = clip_span(center.0, pw, cols) else {
        return;
    };
    let Some((dy, sy)) = clip_span(center.1, ph, rows) else {
        return;
    };

    let mut dst = field.slice_mut(s![dy.0..dy.1, dx.0..dx.1]);
    let src = pattern.slice(s![sy.0..sy.1, sx.0..sx.1]);
    dst.scaled_add(scale, &src);
}

/// Destination and source ranges along one axis for a pattern of odd length
/// `len` centred at `center` in a field of length `limit`.
fn clip_span(center: isize, len: usize, limit: usize) -> Option<((usize, usize), (usize, usize))> {
    let half = (len / 2) as isize;
    let limit = limit as isize;
    let lo = center.saturating_sub(half);
    let hi = center.saturating_add(half + 1);
    if hi <= 0 || lo >= limit {
        return None;
    }

    let d1 = lo.max(0);
    let d2 = hi.min(limit);
    let s1 = d1 - lo;
    let s2 = len as isize - (hi - d2);
    Some(((d1 as usize, d2 as usize), (s1 as usize, s2 as usize)))
}
