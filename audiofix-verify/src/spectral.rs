//! Spectral measurements on decoded audio

use rustfft::{FftPlanner, num_complex::Complex};
use std::ops::Range;

/// Lowest frequency considered when peak-picking
const MIN_FREQUENCY_HZ: f64 = 20.0;

/// Longest transform used for peak-picking (~2.7 s at 96 kHz)
const MAX_FFT_SIZE: usize = 1 << 18;

/// Frames left after dropping the first and last 10%
pub fn central_region(frames: usize) -> Range<usize> {
    let margin = frames / 10;
    margin..frames - margin
}

/// Estimate the dominant frequency of a mono signal
///
/// Hann-windowed over the input length, zero-padded to the next power of two,
/// then refined with parabolic interpolation on log magnitudes around the
/// peak bin. Returns `None` for inputs too short to analyse or with no energy
/// above 20 Hz.
pub fn dominant_frequency(samples: &[f32], sample_rate: u32) -> Option<f64> {
    if samples.len() < 64 || sample_rate == 0 {
        return None;
    }

    let len = samples.len().min(MAX_FFT_SIZE);
    let fft_size = len.next_power_of_two().min(MAX_FFT_SIZE);

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);

    // Apply Hann window
    let mut buffer: Vec<Complex<f64>> = samples[..len]
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let window =
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (len - 1) as f64).cos());
            Complex::new(s as f64 * window, 0.0)
        })
        .collect();
    buffer.resize(fft_size, Complex::new(0.0, 0.0));

    fft.process(&mut buffer);

    let nyquist = fft_size / 2;
    let freq_resolution = sample_rate as f64 / fft_size as f64;
    let min_bin = ((MIN_FREQUENCY_HZ / freq_resolution).ceil() as usize).max(1);

    let magnitudes: Vec<f64> = buffer[..nyquist].iter().map(|c| c.norm()).collect();

    let (peak_bin, &peak) = magnitudes
        .iter()
        .enumerate()
        .skip(min_bin)
        .max_by(|a, b| a.1.total_cmp(b.1))?;

    if peak <= f64::EPSILON {
        return None;
    }

    let offset = if peak_bin + 1 < nyquist {
        let ln = |m: f64| m.max(f64::MIN_POSITIVE).ln();
        let (alpha, beta, gamma) = (
            ln(magnitudes[peak_bin - 1]),
            ln(peak),
            ln(magnitudes[peak_bin + 1]),
        );
        let denominator = alpha - 2.0 * beta + gamma;
        if denominator.abs() > f64::EPSILON {
            (0.5 * (alpha - gamma) / denominator).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    } else {
        0.0
    };

    Some((peak_bin as f64 + offset) * freq_resolution)
}
