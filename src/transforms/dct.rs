//! Two-dimensional DCT-II over the full grayscale grid
//!
//! The transform is orthonormal (DC scaled by `sqrt(1/N)`, the rest by
//! `sqrt(2/N)`) and separable: rows first, then columns. Each 1-D pass is
//! computed through a length-`2N` FFT of the mirrored signal.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, Axis};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::resize_bilinear;

/// Orthonormal 1-D DCT-II of a fixed length
pub struct Dct1d {
    len: usize,
    fft: Arc<dyn Fft<f64>>,
    /// `exp(-i*pi*k / 2N)` scaled by the orthonormal factor
    twiddles: Vec<Complex<f64>>,
}

impl Dct1d {
    pub fn new(len: usize, planner: &mut FftPlanner<f64>) -> Self {
        let n = len as f64;
        let twiddles = (0..len)
            .map(|k| {
                let norm = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
                Complex::from_polar(norm * 0.5, -PI * k as f64 / (2.0 * n))
            })
            .collect();

        Self {
            len,
            fft: planner.plan_fft_forward(2 * len),
            twiddles,
        }
    }

    /// Transform `signal` in place; its length must equal the planned length
    pub fn process(&self, signal: &mut [f64], scratch: &mut Vec<Complex<f64>>) {
        debug_assert_eq!(signal.len(), self.len);
        scratch.clear();
        scratch.extend(signal.iter().map(|&v| Complex::new(v, 0.0)));
        scratch.extend(signal.iter().rev().map(|&v| Complex::new(v, 0.0)));
        self.fft.process(scratch);

        for (k, out) in signal.iter_mut().enumerate() {
            *out = (scratch[k] * self.twiddles[k]).re;
        }
    }
}

/// Orthonormal 2-D DCT-II of a grid
pub fn dct2(grid: &Array2<f32>) -> Array2<f32> {
    let (height, width) = grid.dim();
    let mut planner = FftPlanner::new();
    let row_dct = Dct1d::new(width, &mut planner);
    let col_dct = Dct1d::new(height, &mut planner);

    let mut coeffs: Array2<f64> = grid.mapv(|v| v as f64);
    let mut scratch = Vec::with_capacity(2 * width.max(height));
    let mut line = Vec::with_capacity(width.max(height));

    for axis in [Axis(1), Axis(0)] {
        let dct = if axis == Axis(1) { &row_dct } else { &col_dct };
        for mut lane in coeffs.lanes_mut(axis) {
            line.clear();
            line.extend(lane.iter().copied());
            dct.process(&mut line, &mut scratch);
            lane.iter_mut().zip(&line).for_each(|(dst, &src)| *dst = src);
        }
    }

    coeffs.mapv(|v| v as f32)
}

/// DCT coefficient map resized to `size x size`
pub fn dct_map(gray: &Array2<f32>, size: usize) -> Array2<f32> {
    resize_bilinear(&dct2(gray), size, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct O(N^2) reference
    fn naive_dct(signal: &[f64]) -> Vec<f64> {
        let n = signal.len() as f64;
        (0..signal.len())
            .map(|k| {
                let norm = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
                norm * signal
                    .iter()
                    .enumerate()
                    .map(|(i, &x)| x * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                    .sum::<f64>()
            })
            .collect()
    }

    #[test]
    fn test_dct1d_matches_reference() {
        let mut planner = FftPlanner::new();
        for len in [1usize, 2, 5, 8, 13] {
            let signal: Vec<f64> = (0..len).map(|i| ((i * 37) % 11) as f64 - 4.0).collect();
            let expected = naive_dct(&signal);

            let dct = Dct1d::new(len, &mut planner);
            let mut actual = signal.clone();
            let mut scratch = Vec::new();
            dct.process(&mut actual, &mut scratch);

            for (a, e) in actual.iter().zip(&expected) {
                assert!((a - e).abs() < 1e-9, "len {}: {} vs {}", len, a, e);
            }
        }
    }

    #[test]
    fn test_constant_grid_only_has_dc() {
        let grid = Array2::from_elem((6, 10), 2.0f32);
        let coeffs = dct2(&grid);
        let expected_dc = 2.0 * (60.0f32).sqrt();

        assert!((coeffs[[0, 0]] - expected_dc).abs() < 1e-3);
        for ((y, x), v) in coeffs.indexed_iter() {
            if (y, x) != (0, 0) {
                assert!(v.abs() < 1e-3, "coefficient ({}, {}) = {}", y, x, v);
            }
        }
    }

    #[test]
    fn test_energy_preserved() {
        let grid = Array2::from_shape_fn((9, 7), |(y, x)| ((y * 7 + x * 3) % 13) as f32);
        let coeffs = dct2(&grid);
        let energy_in: f32 = grid.iter().map(|v| v * v).sum();
        let energy_out: f32 = coeffs.iter().map(|v| v * v).sum();
        assert!((energy_in - energy_out).abs() / energy_in < 1e-4);
    }

    #[test]
    fn test_dct_map_shape() {
        let grid = Array2::from_elem((5, 3), 1.0f32);
        assert_eq!(dct_map(&grid, 224).dim(), (224, 224));
    }
}
