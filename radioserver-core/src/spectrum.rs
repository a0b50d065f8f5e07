//! Streaming spectrum estimation for FFT display frames.
//!
//! ```text
//! input → [collect N] → [Hann window] → [FFT] → |·|² → 10·log10(·) → [fftshift] → dB
//! ```
//!
//! Frames are rate limited by skipping input between transforms: after each
//! frame the estimator discards `frame_interval - N` samples.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

const MIN_FFT_SIZE: usize = 256;
const MAX_FFT_SIZE: usize = 1 << 15;
const FLOOR_DB: f32 = -200.0;

/// Streaming windowed FFT producing log-power spectra.
pub struct SpectrumEstimator {
    fft_size: usize,
    frame_interval: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Squared coherent gain of the window times N², used to normalise power.
    norm: f32,
    input: Vec<Complex32>,
    work: Vec<Complex32>,
    scratch: Vec<Complex32>,
    skip: usize,
}

impl fmt::Debug for SpectrumEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumEstimator")
            .field("fft_size", &self.fft_size)
            .field("frame_interval", &self.frame_interval)
            .field("buffered", &self.input.len())
            .finish()
    }
}

impl SpectrumEstimator {
    /// FFT size used for a display width: the next power of two, bounded.
    pub fn fft_size_for(display_pixels: u32) -> usize {
        (display_pixels as usize)
            .next_power_of_two()
            .clamp(MIN_FFT_SIZE, MAX_FFT_SIZE)
    }

    /// Samples between frame starts for a given input rate and frame rate.
    pub fn frame_interval_for(sample_rate: u32, frames_per_second: u32, fft_size: usize) -> usize {
        let interval = sample_rate as usize / frames_per_second.max(1) as usize;
        interval.max(fft_size)
    }

    pub fn new(fft_size: usize, frame_interval: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / fft_size as f32).cos())
            .collect();
        let gain: f32 = window.iter().sum();

        Self {
            fft_size,
            frame_interval: frame_interval.max(fft_size),
            fft,
            norm: gain * gain,
            window,
            input: Vec::with_capacity(fft_size),
            work: vec![Complex32::new(0.0, 0.0); fft_size],
            scratch,
            skip: 0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frame_interval(&self) -> usize {
        self.frame_interval
    }

    /// Consumes samples and returns every spectrum completed by them.
    ///
    /// Spectra are in dB relative to a full-scale tone, DC in the middle.
    pub fn process(&mut self, mut samples: &[Complex32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();

        while !samples.is_empty() {
            if self.skip > 0 {
                let n = self.skip.min(samples.len());
                self.skip -= n;
                samples = &samples[n..];
                continue;
            }

            let n = (self.fft_size - self.input.len()).min(samples.len());
            self.input.extend_from_slice(&samples[..n]);
            samples = &samples[n..];

            if self.input.len() == self.fft_size {
                frames.push(self.transform());
                self.input.clear();
                self.skip = self.frame_interval - self.fft_size;
            }
        }

        frames
    }

    fn transform(&mut self) -> Vec<f32> {
        for ((w, s), win) in self.work.iter_mut().zip(&self.input).zip(&self.window) {
            *w = *s * *win;
        }
        self.fft.process_with_scratch(&mut self.work, &mut self.scratch);

        let half = self.fft_size / 2;
        let mut spectrum = vec![FLOOR_DB; self.fft_size];
        for (i, bin) in self.work.iter().enumerate() {
            let power = bin.norm_sqr() / self.norm;
            let db = if power > 1e-20 {
                10.0 * power.log10()
            } else {
                FLOOR_DB
            };
            spectrum[(i + half) % self.fft_size] = db;
        }
        spectrum
    }
}

/// Resamples a spectrum to the display width.
///
/// When reducing, each pixel shows the strongest bin it covers so narrow
/// signals stay visible; when enlarging, bins are repeated.
pub fn bin_to_pixels(spectrum: &[f32], pixels: usize) -> Vec<f32> {
    let bins = spectrum.len();
    if bins == 0 || pixels == 0 {
        return Vec::new();
    }

    (0..pixels)
        .map(|p| {
            let start = p * bins / pixels;
            let end = ((p + 1) * bins / pixels).max(start + 1).min(bins);
            spectrum[start..end]
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .collect()
}
