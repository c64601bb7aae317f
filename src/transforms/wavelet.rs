//! Single-level 2-D Haar decomposition
//!
//! Odd-length axes are extended by repeating the last sample (symmetric
//! extension), so every subband has `ceil(H/2) x ceil(W/2)` coefficients.

use ndarray::Array2;

use super::resize_bilinear;

/// The four subbands of a one-level decomposition
#[derive(Debug, Clone)]
pub struct HaarSubbands {
    /// Low-pass in both directions
    pub approx: Array2<f32>,
    /// Low-pass along rows, high-pass along columns
    pub horizontal: Array2<f32>,
    /// High-pass along rows, low-pass along columns
    pub vertical: Array2<f32>,
    /// High-pass in both directions
    pub diagonal: Array2<f32>,
}

/// One-level 2-D Haar transform with orthonormal filters
pub fn haar_dwt2(grid: &Array2<f32>) -> HaarSubbands {
    let (height, width) = grid.dim();
    let out_h = height.div_ceil(2);
    let out_w = width.div_ceil(2);

    // Symmetric extension: index past the end mirrors back onto the last sample
    let at = |y: usize, x: usize| grid[[y.min(height - 1), x.min(width - 1)]];

    let mut approx = Array2::zeros((out_h, out_w));
    let mut horizontal = Array2::zeros((out_h, out_w));
    let mut vertical = Array2::zeros((out_h, out_w));
    let mut diagonal = Array2::zeros((out_h, out_w));

    for i in 0..out_h {
        for j in 0..out_w {
            let a = at(2 * i, 2 * j);
            let b = at(2 * i, 2 * j + 1);
            let c = at(2 * i + 1, 2 * j);
            let d = at(2 * i + 1, 2 * j + 1);

            approx[[i, j]] = (a + b + c + d) / 2.0;
            horizontal[[i, j]] = (a + b - c - d) / 2.0;
            vertical[[i, j]] = (a - b + c - d) / 2.0;
            diagonal[[i, j]] = (a - b - c + d) / 2.0;
        }
    }

    HaarSubbands {
        approx,
        horizontal,
        vertical,
        diagonal,
    }
}

/// Magnitude of the approximation subband resized to `size x size`
pub fn wavelet_map(gray: &Array2<f32>, size: usize) -> Array2<f32> {
    let subbands = haar_dwt2(gray);
    resize_bilinear(&subbands.approx.mapv(f32::abs), size, size)
}
