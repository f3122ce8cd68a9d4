//! Separable Gaussian smoothing over salience fields.
//!
//! Borders are handled by mirror reflection that does not repeat the edge cell
//! (`dcb|abcd|cba`), so a single-row field is smoothed along its row only.

use ndarray::{Array2, Axis};

/// Standard deviation implied by a kernel size when none is given explicitly.
pub fn sigma_for_kernel(size: usize) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Odd kernel size covering four standard deviations either side.
pub fn kernel_for_sigma(sigma: f32) -> usize {
    ((sigma * 8.0 + 1.0).round() as usize) | 1
}

/// Normalised 1D Gaussian taps.
pub fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as f32;
    let scale = -0.5 / (sigma * sigma);
    let mut taps: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - half;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= sum;
    }
    taps
}

/// Smooths `field` with `taps` along both axes.
pub fn gaussian_blur(field: &Array2<f32>, taps: &[f32]) -> Array2<f32> {
    let rows = convolve_axis(field, taps, Axis(1));
    convolve_axis(&rows, taps, Axis(0))
}

fn convolve_axis(field: &Array2<f32>, taps: &[f32], axis: Axis) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros(field.raw_dim());
    let half = (taps.len() / 2) as isize;
    let len = field.len_of(axis);

    for (src, mut dst) in field.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        for i in 0..len {
            let mut acc = 0.0;
            for (k, tap) in taps.iter().enumerate() {
                let j = reflect_101(i as isize + k as isize - half, len);
                acc += tap * src[j];
            }
            dst[i] = acc;
        }
    }
    out
}

fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = index;
    loop {
        if i < 0 {
            i = -i;
        } else if i > last {
            i = 2 * last - i;
        } else {
            return i as usize;
        }
    }
}
