//! Frame-level signal analysis backing [`crate::features`].
//!
//! Short-time Fourier transform over Hann-windowed frames, then the
//! per-frame descriptors the feature vector summarises.

use log::debug;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Every signal is analysed at this rate so features are comparable across files.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;

/// Analysis frame length (FFT size) in samples.
pub const FRAME_LENGTH: usize = 2048;
/// Hop between consecutive frames in samples.
pub const HOP_LENGTH: usize = 512;
pub const N_MELS: usize = 128;
pub const N_MFCC: usize = 5;
const ROLLOFF_PERCENT: f64 = 0.85;
const TOP_DB: f64 = 80.0;
const AMIN: f64 = 1e-10;
const PITCH_CLASSES: usize = 12;

/// Tempo search range and prior centre, in BPM.
const MIN_BPM: f64 = 30.0;
const MAX_BPM: f64 = 300.0;
const START_BPM: f64 = 120.0;

/// Band-limited sinc resampling of mono `samples` from `from_rate` to `to_rate`.
///
/// # Errors
///
/// Returns the resampler's message when it rejects the ratio or input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(to_rate) / f64::from(from_rate);

    // Whole signal as one chunk
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| format!("cannot resample {from_rate} Hz to {to_rate} Hz: {e}"))?;
    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| format!("resampling failed: {e}"))?;

    let resampled = output.pop().unwrap_or_default();
    debug!(
        "Resampled {} samples ({from_rate} Hz) to {} samples ({to_rate} Hz)",
        samples.len(),
        resampled.len()
    );
    Ok(resampled)
}

/// Per-frame descriptors of one signal plus its tempo estimate.
#[derive(Debug, Clone, Default)]
pub struct FrameAnalysis {
    pub centroid: Vec<f64>,
    pub rolloff: Vec<f64>,
    pub zcr: Vec<f64>,
    pub rms: Vec<f64>,
    /// Normalised chroma energies, all frames flattened.
    pub chroma: Vec<f64>,
    /// One series per coefficient, `N_MFCC` series.
    pub mfcc: Vec<Vec<f64>>,
    pub tempo: f64,
}

impl FrameAnalysis {
    /// Analyse `samples` (mono). Expects at least one frame of input.
    #[must_use]
    pub fn compute(samples: &[f32], sample_rate: u32) -> Self {
        let sr = f64::from(sample_rate);
        let padded = center_pad(samples);
        let n_frames = frame_count(padded.len());
        let bins = FRAME_LENGTH / 2 + 1;
        let freqs: Vec<f64> = (0..bins).map(|k| bin_frequency(k, sr)).collect();

        let window = hann_window(FRAME_LENGTH);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(FRAME_LENGTH);
        let mel_bank = MelFilterbank::new(sr);
        let pitch_class = pitch_class_map(&freqs);

        let mut analysis = Self {
            mfcc: vec![Vec::with_capacity(n_frames); N_MFCC],
            ..Self::default()
        };
        let mut mel_db: Vec<Vec<f64>> = Vec::with_capacity(n_frames);
        let mut buffer = vec![Complex::new(0.0, 0.0); FRAME_LENGTH];
        let mut magnitude = vec![0.0; bins];

        for frame_idx in 0..n_frames {
            let frame = &padded[frame_idx * HOP_LENGTH..frame_idx * HOP_LENGTH + FRAME_LENGTH];

            analysis.zcr.push(zero_crossing_rate(frame));
            analysis.rms.push(rms(frame));

            for (slot, (&x, &w)) in buffer.iter_mut().zip(frame.iter().zip(&window)) {
                *slot = Complex::new(x * w, 0.0);
            }
            fft.process(&mut buffer);
            for (mag, c) in magnitude.iter_mut().zip(&buffer) {
                *mag = c.norm();
            }

            analysis.centroid.push(spectral_centroid(&magnitude, &freqs));
            analysis.rolloff.push(spectral_rolloff(&magnitude, &freqs));

            let power: Vec<f64> = magnitude.iter().map(|m| m * m).collect();
            analysis.chroma.extend(chroma_frame(&power, &pitch_class));
            mel_db.push(mel_bank.apply(&power).into_iter().map(power_to_db).collect());
        }

        clamp_to_top_db(&mut mel_db);
        for frame in &mel_db {
            for (k, coeff) in dct_ortho(frame, N_MFCC).into_iter().enumerate() {
                analysis.mfcc[k].push(coeff);
            }
        }

        let onset = onset_strength(&mel_db);
        analysis.tempo = estimate_tempo(&onset, sr / HOP_LENGTH as f64);
        analysis
    }
}

/// Population mean and standard deviation; `(0, 0)` for an empty series.
#[must_use]
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Zero-pad half a frame on both sides so frame `t` is centred on sample `t * hop`.
fn center_pad(samples: &[f32]) -> Vec<f64> {
    let pad = FRAME_LENGTH / 2;
    let mut padded = vec![0.0; samples.len() + 2 * pad];
    for (dst, &src) in padded[pad..].iter_mut().zip(samples) {
        *dst = f64::from(src);
    }
    padded
}

fn frame_count(padded_len: usize) -> usize {
    if padded_len < FRAME_LENGTH {
        0
    } else {
        1 + (padded_len - FRAME_LENGTH) / HOP_LENGTH
    }
}

#[allow(clippy::cast_precision_loss)]
fn bin_frequency(bin: usize, sr: f64) -> f64 {
    bin as f64 * sr / FRAME_LENGTH as f64
}

/// Periodic Hann window.
#[allow(clippy::cast_precision_loss)]
fn hann_window(length: usize) -> Vec<f64> {
    (0..length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f64) / length as f64).cos())
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn zero_crossing_rate(frame: &[f64]) -> f64 {
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / frame.len() as f64
}

#[allow(clippy::cast_precision_loss)]
fn rms(frame: &[f64]) -> f64 {
    (frame.iter().map(|x| x * x).sum::<f64>() / frame.len() as f64).sqrt()
}

fn spectral_centroid(magnitude: &[f64], freqs: &[f64]) -> f64 {
    let total: f64 = magnitude.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    magnitude.iter().zip(freqs).map(|(m, f)| m * f).sum::<f64>() / total
}

fn spectral_rolloff(magnitude: &[f64], freqs: &[f64]) -> f64 {
    let total: f64 = magnitude.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let threshold = ROLLOFF_PERCENT * total;
    let mut cumulative = 0.0;
    for (m, f) in magnitude.iter().zip(freqs) {
        cumulative += m;
        if cumulative >= threshold {
            return *f;
        }
    }
    freqs.last().copied().unwrap_or(0.0)
}

/// Pitch class (C = 0) of every FFT bin, `None` below the lowest C.
fn pitch_class_map(freqs: &[f64]) -> Vec<Option<usize>> {
    const C1_HZ: f64 = 32.703;
    freqs
        .iter()
        .map(|&f| {
            if f < C1_HZ {
                return None;
            }
            let midi = 69.0 + 12.0 * (f / 440.0).log2();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let class = (midi.round() as i64).rem_euclid(PITCH_CLASSES as i64) as usize;
            Some(class)
        })
        .collect()
}

/// Fold a power spectrum into 12 pitch classes, scaled so the loudest is 1.
fn chroma_frame(power: &[f64], pitch_class: &[Option<usize>]) -> [f64; PITCH_CLASSES] {
    let mut chroma = [0.0; PITCH_CLASSES];
    for (p, class) in power.iter().zip(pitch_class) {
        if let Some(class) = class {
            chroma[*class] += p;
        }
    }
    let max = chroma.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        for c in &mut chroma {
            *c /= max;
        }
    }
    chroma
}

fn power_to_db(power: f64) -> f64 {
    10.0 * power.max(AMIN).log10()
}

/// Limit the dynamic range of the whole spectrogram to `TOP_DB` below its peak.
fn clamp_to_top_db(mel_db: &mut [Vec<f64>]) {
    let peak = mel_db
        .iter()
        .flatten()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() {
        return;
    }
    let floor = peak - TOP_DB;
    for v in mel_db.iter_mut().flatten() {
        *v = v.max(floor);
    }
}

/// Orthonormal DCT-II, first `n_coeffs` coefficients.
#[allow(clippy::cast_precision_loss)]
fn dct_ortho(input: &[f64], n_coeffs: usize) -> Vec<f64> {
    let n = input.len() as f64;
    (0..n_coeffs)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// Mean positive change of the log-mel spectrum between consecutive frames.
#[allow(clippy::cast_precision_loss)]
fn onset_strength(mel_db: &[Vec<f64>]) -> Vec<f64> {
    let mut onset = Vec::with_capacity(mel_db.len());
    onset.push(0.0);
    for pair in mel_db.windows(2) {
        let flux: f64 = pair[1]
            .iter()
            .zip(&pair[0])
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();
        onset.push(flux / N_MELS as f64);
    }
    onset
}

/// Tempo in BPM from the onset envelope's autocorrelation, weighted by a
/// log-normal prior around `START_BPM`. Returns 0 when there is no rhythm.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn estimate_tempo(onset: &[f64], frame_rate: f64) -> f64 {
    if onset.len() < 4 || frame_rate <= 0.0 {
        return 0.0;
    }
    let min_lag = ((60.0 * frame_rate / MAX_BPM).ceil() as usize).max(1);
    let max_lag = ((60.0 * frame_rate / MIN_BPM).floor() as usize).min(onset.len() - 1);
    if min_lag > max_lag {
        return 0.0;
    }

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag {
        let ac: f64 = onset.iter().zip(&onset[lag..]).map(|(a, b)| a * b).sum();
        let bpm = 60.0 * frame_rate / lag as f64;
        let prior = (-0.5 * (bpm / START_BPM).log2().powi(2)).exp();
        let weighted = ac * prior;
        if best.map_or(true, |(_, score)| weighted > score) {
            best = Some((lag, weighted));
        }
    }

    match best {
        Some((lag, score)) if score > 0.0 => 60.0 * frame_rate / lag as f64,
        _ => 0.0,
    }
}

/// Slaney-style mel filterbank stored sparsely (first bin + weights per band).
struct MelFilterbank {
    bands: Vec<(usize, Vec<f64>)>,
}

impl MelFilterbank {
    #[allow(clippy::cast_precision_loss)]
    fn new(sr: f64) -> Self {
        let bins = FRAME_LENGTH / 2 + 1;
        let fft_freqs: Vec<f64> = (0..bins).map(|k| bin_frequency(k, sr)).collect();
        let mel_max = hz_to_mel(sr / 2.0);
        let mel_points: Vec<f64> = (0..N_MELS + 2)
            .map(|i| mel_to_hz(mel_max * i as f64 / (N_MELS + 1) as f64))
            .collect();

        let bands = (0..N_MELS)
            .map(|m| {
                let (lo, centre, hi) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
                let norm = 2.0 / (hi - lo);
                let mut first = None;
                let mut weights = Vec::new();
                for (k, &f) in fft_freqs.iter().enumerate() {
                    let lower = (f - lo) / (centre - lo);
                    let upper = (hi - f) / (hi - centre);
                    let w = lower.min(upper).max(0.0) * norm;
                    if w > 0.0 {
                        first.get_or_insert(k);
                        weights.push(w);
                    } else if first.is_some() {
                        break;
                    }
                }
                (first.unwrap_or(0), weights)
            })
            .collect();
        Self { bands }
    }

    fn apply(&self, power: &[f64]) -> Vec<f64> {
        self.bands
            .iter()
            .map(|(start, weights)| {
                weights
                    .iter()
                    .zip(&power[*start..])
                    .map(|(w, p)| w * p)
                    .sum()
            })
            .collect()
    }
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    let min_log_mel = MIN_LOG_HZ / F_SP;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let min_log_mel = MIN_LOG_HZ / F_SP;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (log_step() * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resample_identity_and_length() {
        let samples: Vec<f32> = (0..44_100).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(resample(&samples, 22_050, 22_050).unwrap(), samples);

        let halved = resample(&samples, 44_100, 22_050).unwrap();
        let expected = samples.len() / 2;
        assert!(halved.len().abs_diff(expected) <= 256, "{}", halved.len());
        assert!(halved.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_mean_std_population() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(mean, 5.0);
        assert_relative_eq!(std, 2.0);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [50.0, 440.0, 1000.0, 4000.0, 11_025.0] {
            assert_relative_eq!(mel_to_hz(hz_to_mel(hz)), hz, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_frame_count_matches_centered_framing() {
        // n samples padded by a full frame yields 1 + n / hop frames
        let n = 22_050;
        assert_eq!(frame_count(n + FRAME_LENGTH), 1 + n / HOP_LENGTH);
        assert_eq!(frame_count(FRAME_LENGTH - 1), 0);
    }

    #[test]
    fn test_rolloff_and_centroid_on_single_bin() {
        let freqs = [0.0, 100.0, 200.0, 300.0];
        let magnitude = [0.0, 0.0, 1.0, 0.0];
        assert_relative_eq!(spectral_centroid(&magnitude, &freqs), 200.0);
        assert_relative_eq!(spectral_rolloff(&magnitude, &freqs), 200.0);
        assert_eq!(spectral_centroid(&[0.0; 4], &freqs), 0.0);
    }

    #[test]
    fn test_chroma_maps_a440_to_pitch_class_nine() {
        let freqs = [440.0];
        let classes = pitch_class_map(&freqs);
        assert_eq!(classes, vec![Some(9)]);
        let chroma = chroma_frame(&[3.0], &classes);
        assert_relative_eq!(chroma[9], 1.0);
        assert_relative_eq!(chroma.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_dct_of_constant_has_only_dc() {
        let coeffs = dct_ortho(&[1.0; 8], 3);
        assert_relative_eq!(coeffs[0], 8.0f64.sqrt(), max_relative = 1e-12);
        assert!(coeffs[1].abs() < 1e-12);
        assert!(coeffs[2].abs() < 1e-12);
    }

    #[test]
    fn test_tempo_from_periodic_onsets() {
        // One impulse every 0.5 s at ~43 frames/s -> 120 BPM
        let frame_rate = 22_050.0 / HOP_LENGTH as f64;
        let period = (0.5 * frame_rate).round() as usize;
        let onset: Vec<f64> = (0..600).map(|i| if i % period == 0 { 1.0 } else { 0.0 }).collect();
        let bpm = estimate_tempo(&onset, frame_rate);
        let expected = 60.0 * frame_rate / period as f64;
        assert_relative_eq!(bpm, expected, max_relative = 1e-9);
    }

    #[test]
    fn test_tempo_of_silence_is_zero() {
        assert_eq!(estimate_tempo(&[0.0; 200], 43.0), 0.0);
        assert_eq!(estimate_tempo(&[1.0], 43.0), 0.0);
    }
}
