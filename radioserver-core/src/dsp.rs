//! Frequency translation and decimation.
//!
//! ```text
//! input → [×exp(-j2π·shift·n/fs)] → [FIR lowpass] → [↓R] → output
//! ```
//!
//! A translator is built from [`TranslatorParams`]; the channel generator
//! compares parameters on every settings update and keeps the running
//! translator (phase, delay line) when nothing relevant changed.

use num_complex::Complex32;
use std::f64::consts::PI;

/// Converts a decimation stage index to its decimation factor (`2^stage`).
pub fn stage_to_decimation(stage: u32) -> u32 {
    1u32 << stage.min(31)
}

/// Designs lowpass taps for a decimating translator.
///
/// Blackman-windowed sinc with the cutoff at the output Nyquist frequency.
/// A decimation of 1 needs no filtering and yields a single unit tap.
pub fn design_translator_taps(decimation: u32, sample_rate: u32) -> Vec<f32> {
    if decimation <= 1 || sample_rate == 0 {
        return vec![1.0];
    }

    let num_taps = (8 * decimation as usize + 1) | 1;
    let cutoff_hz = sample_rate as f64 / (2.0 * decimation as f64);
    let fc = cutoff_hz / sample_rate as f64;
    let m = (num_taps - 1) as f64;
    let mid = m / 2.0;

    let mut taps: Vec<f64> = (0..num_taps)
        .map(|i| {
            let n = i as f64 - mid;
            let sinc = if n.abs() < 1e-10 {
                2.0 * PI * fc
            } else {
                (2.0 * PI * fc * n).sin() / n
            };
            let window = 0.42 - 0.5 * (2.0 * PI * i as f64 / m).cos()
                + 0.08 * (4.0 * PI * i as f64 / m).cos();
            sinc * window
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-10 {
        for t in &mut taps {
            *t /= sum;
        }
    }

    taps.into_iter().map(|t| t as f32).collect()
}

/// Everything a translator is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorParams {
    pub decimation: u32,
    /// Offset of the wanted channel from the device center, in Hz.
    pub shift_hz: i64,
    pub sample_rate: u32,
}

impl TranslatorParams {
    pub fn new(stage: u32, channel_center: u32, device_center: u32, sample_rate: u32) -> Self {
        Self {
            decimation: stage_to_decimation(stage),
            shift_hz: channel_center as i64 - device_center as i64,
            sample_rate,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.decimation == 1 && self.shift_hz == 0
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.sample_rate / self.decimation.max(1)
    }
}

/// Mixes a channel down to baseband, filters and decimates it.
#[derive(Debug, Clone)]
pub struct FrequencyTranslator {
    params: TranslatorParams,
    taps: Vec<f32>,
    delay_line: Vec<Complex32>,
    write_idx: usize,
    phase: f64,
    phase_inc: f64,
    decim_count: usize,
}

impl FrequencyTranslator {
    pub fn new(params: TranslatorParams) -> Self {
        let taps = design_translator_taps(params.decimation, params.sample_rate);
        Self::with_taps(params, taps)
    }

    pub fn with_taps(params: TranslatorParams, taps: Vec<f32>) -> Self {
        let taps = if taps.is_empty() { vec![1.0] } else { taps };
        let phase_inc = if params.sample_rate == 0 {
            0.0
        } else {
            -2.0 * PI * params.shift_hz as f64 / params.sample_rate as f64
        };
        Self {
            delay_line: vec![Complex32::new(0.0, 0.0); taps.len()],
            taps,
            params,
            write_idx: 0,
            phase: 0.0,
            phase_inc,
            decim_count: 0,
        }
    }

    pub fn params(&self) -> TranslatorParams {
        self.params
    }

    /// True when processing would return the input unchanged.
    pub fn is_identity(&self) -> bool {
        self.params.is_identity()
    }

    pub fn decimation(&self) -> u32 {
        self.params.decimation
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    /// Translates a block; the output has `input.len() / decimation` samples
    /// (carrying the decimation phase across blocks).
    pub fn process(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        let decimation = self.params.decimation.max(1) as usize;
        let mut output = Vec::with_capacity(input.len() / decimation + 1);
        let n = self.taps.len();

        for &sample in input {
            let mixed = if self.phase_inc == 0.0 {
                sample
            } else {
                let (sin, cos) = self.phase.sin_cos();
                let lo = Complex32::new(cos as f32, sin as f32);
                self.phase += self.phase_inc;
                if self.phase > PI {
                    self.phase -= 2.0 * PI;
                } else if self.phase < -PI {
                    self.phase += 2.0 * PI;
                }
                sample * lo
            };

            self.delay_line[self.write_idx] = mixed;
            self.write_idx = (self.write_idx + 1) % n;

            self.decim_count += 1;
            if self.decim_count >= decimation {
                self.decim_count = 0;
                let mut acc = Complex32::new(0.0, 0.0);
                for (k, tap) in self.taps.iter().enumerate() {
                    let idx = (self.write_idx + n - 1 - k) % n;
                    acc += self.delay_line[idx] * *tap;
                }
                output.push(acc);
            }
        }

        output
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.decim_count = 0;
        self.write_idx = 0;
        self.delay_line.fill(Complex32::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, sample_rate: f64, len: usize) -> Vec<Complex32> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * PI * freq * i as f64 / sample_rate;
                Complex32::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    fn mean_power(samples: &[Complex32]) -> f32 {
        samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
    }

    #[test]
    fn test_stage_to_decimation() {
        assert_eq!(stage_to_decimation(0), 1);
        assert_eq!(stage_to_decimation(3), 8);
        assert_eq!(stage_to_decimation(10), 1024);
    }

    #[test]
    fn test_taps_unit_for_no_decimation() {
        assert_eq!(design_translator_taps(1, 2_400_000), vec![1.0]);
    }

    #[test]
    fn test_taps_normalized_and_symmetric() {
        let taps = design_translator_taps(4, 2_400_000);
        assert_eq!(taps.len(), 33);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        for i in 0..taps.len() / 2 {
            assert!((taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_identity_params() {
        assert!(TranslatorParams::new(0, 100_000_000, 100_000_000, 2_400_000).is_identity());
        assert!(!TranslatorParams::new(1, 100_000_000, 100_000_000, 2_400_000).is_identity());
        let shifted = TranslatorParams::new(0, 100_100_000, 100_000_000, 2_400_000);
        assert!(!shifted.is_identity());
        assert_eq!(shifted.shift_hz, 100_000);
    }

    #[test]
    fn test_decimation_output_length() {
        let params = TranslatorParams::new(2, 0, 0, 1_000_000);
        let mut translator = FrequencyTranslator::new(params);
        let out = translator.process(&vec![Complex32::new(1.0, 0.0); 1000]);
        assert_eq!(out.len(), 250);

        // Decimation phase carries over between blocks.
        let mut translator = FrequencyTranslator::new(params);
        let a = translator.process(&vec![Complex32::new(1.0, 0.0); 3]);
        let b = translator.process(&vec![Complex32::new(1.0, 0.0); 5]);
        assert_eq!(a.len() + b.len(), 2);
    }

    #[test]
    fn test_translates_tone_to_baseband() {
        let fs = 1_000_000.0;
        let params = TranslatorParams {
            decimation: 8,
            shift_hz: 200_000,
            sample_rate: 1_000_000,
        };
        let mut translator = FrequencyTranslator::new(params);

        let wanted = translator.process(&tone(200_000.0, fs, 8000));
        translator.reset();
        let rejected = translator.process(&tone(-300_000.0, fs, 8000));

        let settle = 20;
        let wanted_power = mean_power(&wanted[settle..]);
        let rejected_power = mean_power(&rejected[settle..]);
        assert!(wanted_power > 0.8, "wanted power {}", wanted_power);
        assert!(rejected_power < 0.01, "rejected power {}", rejected_power);
    }

    #[test]
    fn test_pure_shift_keeps_length() {
        let params = TranslatorParams {
            decimation: 1,
            shift_hz: 10_000,
            sample_rate: 100_000,
        };
        let mut translator = FrequencyTranslator::new(params);
        let out = translator.process(&tone(10_000.0, 100_000.0, 100));
        assert_eq!(out.len(), 100);
        // Shifted to DC: every sample is close to 1 + 0j.
        for s in &out {
            assert!((s.re - 1.0).abs() < 1e-3 && s.im.abs() < 1e-3);
        }
    }
}
