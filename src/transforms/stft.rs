//! Short-time Fourier magnitude along image rows
//!
//! Each row of the grayscale grid is treated as a signal: zero-padded by half
//! a segment on both sides, extended to a whole number of hops, split into
//! Hann-windowed segments of 64 samples with 50% overlap and transformed with
//! a one-sided FFT scaled by `1 / sum(window)`.
//!
//! The result is three-dimensional (rows x frequencies x frames). Only the
//! first frame is kept before resizing, which turns it back into a
//! rows x frequencies map.

use ndarray::{Array2, Array3, Axis};
use rustfft::{num_complex::Complex, FftPlanner};

use super::resize_bilinear;

/// Default segment length in samples
pub const SEGMENT_LEN: usize = 64;

/// Segmentation parameters for one signal length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StftLayout {
    /// Samples per segment (clamped to the signal length)
    pub segment_len: usize,
    /// Samples shared between consecutive segments
    pub overlap: usize,
    /// Number of one-sided frequency bins
    pub freqs: usize,
    /// Number of segments after boundary and hop padding
    pub frames: usize,
}

impl StftLayout {
    pub fn new(signal_len: usize, segment_len: usize) -> Self {
        let segment_len = segment_len.min(signal_len).max(1);
        let overlap = segment_len / 2;
        let step = segment_len - overlap;

        let padded = signal_len + 2 * (segment_len / 2);
        let remainder = (padded - segment_len) % step;
        let extra = if remainder == 0 { 0 } else { step - remainder };
        let total = padded + extra % segment_len;

        Self {
            segment_len,
            overlap,
            freqs: segment_len / 2 + 1,
            frames: (total - segment_len) / step + 1,
        }
    }

    fn step(&self) -> usize {
        self.segment_len - self.overlap
    }
}

/// Magnitude spectrogram of every row, shaped (rows, freqs, frames)
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub magnitude: Array3<f32>,
    pub layout: StftLayout,
}

impl Spectrogram {
    /// Collapse the frame axis by keeping only its first slice
    pub fn first_frame(&self) -> Array2<f32> {
        self.magnitude.index_axis(Axis(2), 0).to_owned()
    }
}

/// Periodic Hann window
pub fn hann_window(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / len as f64).cos())
        .collect()
}

/// STFT magnitude of each row of `grid`
pub fn row_stft(grid: &Array2<f32>, segment_len: usize) -> Spectrogram {
    let (rows, cols) = grid.dim();
    let layout = StftLayout::new(cols, segment_len);
    let window = hann_window(layout.segment_len);
    let scale = 1.0 / window.iter().sum::<f64>();
    let half = layout.segment_len / 2;

    let fft = FftPlanner::new().plan_fft_forward(layout.segment_len);
    let mut magnitude = Array3::<f32>::zeros((rows, layout.freqs, layout.frames));
    let mut buffer = vec![Complex::new(0.0f64, 0.0); layout.segment_len];

    for (r, row) in grid.rows().into_iter().enumerate() {
        for frame in 0..layout.frames {
            let start = frame * layout.step();
            for (n, slot) in buffer.iter_mut().enumerate() {
                // Position in the unpadded row; boundary and hop padding are zeros
                let sample = (start + n)
                    .checked_sub(half)
                    .and_then(|i| row.get(i))
                    .map_or(0.0, |&v| v as f64);
                *slot = Complex::new(sample * window[n], 0.0);
            }
            fft.process(&mut buffer);

            for f in 0..layout.freqs {
                magnitude[[r, f, frame]] = (buffer[f].norm() * scale) as f32;
            }
        }
    }

    Spectrogram { magnitude, layout }
}

/// First-frame STFT magnitude resized to `size x size`
pub fn stft_map(gray: &Array2<f32>, size: usize) -> Array2<f32> {
    let spectrogram = row_stft(gray, SEGMENT_LEN);
    resize_bilinear(&spectrogram.first_frame(), size, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_for_wide_rows() {
        // 256 samples + 64 boundary = 320, already a multiple of the hop
        let layout = StftLayout::new(256, SEGMENT_LEN);
        assert_eq!(layout.segment_len, 64);
        assert_eq!(layout.overlap, 32);
        assert_eq!(layout.freqs, 33);
        assert_eq!(layout.frames, 9);
    }

    #[test]
    fn test_layout_pads_to_whole_hops() {
        // 100 + 64 = 164 -> padded to 192 -> (192 - 64) / 32 + 1 = 5
        let layout = StftLayout::new(100, SEGMENT_LEN);
        assert_eq!(layout.frames, 5);
    }

    #[test]
    fn test_layout_clamps_short_signals() {
        let layout = StftLayout::new(10, SEGMENT_LEN);
        assert_eq!(layout.segment_len, 10);
        assert_eq!(layout.freqs, 6);

        let single = StftLayout::new(1, SEGMENT_LEN);
        assert_eq!(single.segment_len, 1);
        assert_eq!(single.freqs, 1);
        assert!(single.frames >= 1);
    }

    #[test]
    fn test_spectrogram_is_three_dimensional() {
        let grid = Array2::from_shape_fn((12, 200), |(y, x)| ((x + y) % 9) as f32);
        let spectrogram = row_stft(&grid, SEGMENT_LEN);
        let (rows, freqs, frames) = spectrogram.magnitude.dim();
        assert_eq!(rows, 12);
        assert_eq!(freqs, 33);
        assert_eq!(frames, spectrogram.layout.frames);
        assert_eq!(spectrogram.first_frame().dim(), (12, 33));
    }

    #[test]
    fn test_constant_row_first_frame() {
        // First frame sees 32 zeros then 32 ones under the window
        let grid = Array2::from_elem((1, 128), 1.0f32);
        let frame = row_stft(&grid, SEGMENT_LEN).first_frame();

        let window = hann_window(64);
        let expected_dc: f64 = window[32..].iter().sum::<f64>() / window.iter().sum::<f64>();
        assert!((frame[[0, 0]] as f64 - expected_dc).abs() < 1e-6);
        assert!(frame.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_stft_map_shape() {
        let grid = Array2::from_elem((7, 3), 5.0f32);
        let map = stft_map(&grid, 224);
        assert_eq!(map.dim(), (224, 224));
        assert!(map.iter().all(|v| v.is_finite()));
    }
}
