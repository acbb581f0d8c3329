//! # Audio Feature Extraction
//!
//! Turns decoded audio into a fixed-schema [`FeatureVector`] of 21 named
//! doubles. The schema is a plain struct so a stored vector is either complete
//! or fails to deserialize; there is no partially populated state.
//!
//! ## Pipeline
//!
//! 1. Decode mono samples through an [`AudioDecoder`], limited to the analysis window
//! 2. Frame the signal (2048-sample Hann window, hop 512, centered)
//! 3. Compute per-frame spectral centroid, rolloff, zero-crossing rate, RMS,
//!    chroma and MFCCs, then summarise each as mean/std
//! 4. Estimate tempo from the onset-strength autocorrelation
//!
//! Extraction is deterministic: identical samples and window give identical
//! vectors.

use crate::decoder::{AudioDecoder, DecodedAudio};
use crate::dsp::{self, FrameAnalysis};
use crate::error::{Result, TretaError};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of dimensions in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 21;

/// Default analysis window in seconds.
pub const DEFAULT_MAX_DURATION_SECS: f64 = 30.0;

/// Dimension names, in the order used by [`FeatureVector::to_array`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "tempo",
    "spectral_centroid_mean",
    "spectral_centroid_std",
    "spectral_rolloff_mean",
    "spectral_rolloff_std",
    "zero_crossing_rate_mean",
    "zero_crossing_rate_std",
    "rmse_mean",
    "rmse_std",
    "chroma_mean",
    "chroma_std",
    "mfcc_1_mean",
    "mfcc_1_std",
    "mfcc_2_mean",
    "mfcc_2_std",
    "mfcc_3_mean",
    "mfcc_3_std",
    "mfcc_4_mean",
    "mfcc_4_std",
    "mfcc_5_mean",
    "mfcc_5_std",
];

/// Summary statistics of one decoded track.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub tempo: f64,
    pub spectral_centroid_mean: f64,
    pub spectral_centroid_std: f64,
    pub spectral_rolloff_mean: f64,
    pub spectral_rolloff_std: f64,
    pub zero_crossing_rate_mean: f64,
    pub zero_crossing_rate_std: f64,
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub chroma_mean: f64,
    pub chroma_std: f64,
    pub mfcc_1_mean: f64,
    pub mfcc_1_std: f64,
    pub mfcc_2_mean: f64,
    pub mfcc_2_std: f64,
    pub mfcc_3_mean: f64,
    pub mfcc_3_std: f64,
    pub mfcc_4_mean: f64,
    pub mfcc_4_std: f64,
    pub mfcc_5_mean: f64,
    pub mfcc_5_std: f64,
}

impl FeatureVector {
    /// Flatten into the order of [`FEATURE_NAMES`].
    #[must_use]
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.tempo,
            self.spectral_centroid_mean,
            self.spectral_centroid_std,
            self.spectral_rolloff_mean,
            self.spectral_rolloff_std,
            self.zero_crossing_rate_mean,
            self.zero_crossing_rate_std,
            self.rmse_mean,
            self.rmse_std,
            self.chroma_mean,
            self.chroma_std,
            self.mfcc_1_mean,
            self.mfcc_1_std,
            self.mfcc_2_mean,
            self.mfcc_2_std,
            self.mfcc_3_mean,
            self.mfcc_3_std,
            self.mfcc_4_mean,
            self.mfcc_4_std,
            self.mfcc_5_mean,
            self.mfcc_5_std,
        ]
    }

    #[must_use]
    pub fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        let [tempo, spectral_centroid_mean, spectral_centroid_std, spectral_rolloff_mean, spectral_rolloff_std, zero_crossing_rate_mean, zero_crossing_rate_std, rmse_mean, rmse_std, chroma_mean, chroma_std, mfcc_1_mean, mfcc_1_std, mfcc_2_mean, mfcc_2_std, mfcc_3_mean, mfcc_3_std, mfcc_4_mean, mfcc_4_std, mfcc_5_mean, mfcc_5_std] =
            values;
        Self {
            tempo,
            spectral_centroid_mean,
            spectral_centroid_std,
            spectral_rolloff_mean,
            spectral_rolloff_std,
            zero_crossing_rate_mean,
            zero_crossing_rate_std,
            rmse_mean,
            rmse_std,
            chroma_mean,
            chroma_std,
            mfcc_1_mean,
            mfcc_1_std,
            mfcc_2_mean,
            mfcc_2_std,
            mfcc_3_mean,
            mfcc_3_std,
            mfcc_4_mean,
            mfcc_4_std,
            mfcc_5_mean,
            mfcc_5_std,
        }
    }

    /// Every dimension is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Named view, handy for printing.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> {
        FEATURE_NAMES.into_iter().zip(self.to_array())
    }
}

/// Computes [`FeatureVector`]s from audio files through a pluggable decoder.
pub struct FeatureExtractor<D: AudioDecoder> {
    decoder: D,
}

impl<D: AudioDecoder> FeatureExtractor<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    /// Decode at most `max_duration_secs` of `path` and summarise it.
    /// An infinite window reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns [`TretaError::UnsupportedFormat`] when the decoder rejects the
    /// codec, and [`TretaError::FeatureExtraction`] when the file is unreadable,
    /// empty, or yields non-finite values.
    pub fn extract(&self, path: &Path, max_duration_secs: f64) -> Result<FeatureVector> {
        if max_duration_secs.is_nan() || max_duration_secs <= 0.0 {
            return Err(TretaError::FeatureExtraction {
                path: path.to_path_buf(),
                reason: format!("invalid analysis window of {max_duration_secs}s"),
            });
        }
        debug!("Extracting features from {} ({max_duration_secs}s window)", path.display());
        let audio = self.decoder.decode(path, max_duration_secs)?;
        extract_from_audio(&audio, max_duration_secs).map_err(|reason| {
            TretaError::FeatureExtraction {
                path: path.to_path_buf(),
                reason,
            }
        })
    }
}

/// Pure half of extraction: decoded samples in, features out.
///
/// Samples past the window are ignored. The rest is resampled to
/// [`dsp::ANALYSIS_SAMPLE_RATE`]; a clip shorter than one analysis frame is
/// zero-padded to a full frame.
pub fn extract_from_audio(
    audio: &DecodedAudio,
    max_duration_secs: f64,
) -> std::result::Result<FeatureVector, String> {
    if audio.samples.is_empty() {
        return Err("decoded audio is empty".to_string());
    }
    if audio.sample_rate == 0 {
        return Err("sample rate is zero".to_string());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let window = (max_duration_secs.max(0.0) * f64::from(audio.sample_rate)) as usize;
    let end = window.clamp(1, audio.samples.len());
    let mut samples = dsp::resample(&audio.samples[..end], audio.sample_rate, dsp::ANALYSIS_SAMPLE_RATE)?;
    if samples.len() < dsp::FRAME_LENGTH {
        samples.resize(dsp::FRAME_LENGTH, 0.0);
    }
    trace!("Analysing {} samples at {} Hz", samples.len(), dsp::ANALYSIS_SAMPLE_RATE);

    let analysis = FrameAnalysis::compute(&samples, dsp::ANALYSIS_SAMPLE_RATE);
    let features = summarise(&analysis);

    if features.is_finite() {
        Ok(features)
    } else {
        Err("non-finite feature value".to_string())
    }
}

fn summarise(analysis: &FrameAnalysis) -> FeatureVector {
    let (spectral_centroid_mean, spectral_centroid_std) = dsp::mean_std(&analysis.centroid);
    let (spectral_rolloff_mean, spectral_rolloff_std) = dsp::mean_std(&analysis.rolloff);
    let (zero_crossing_rate_mean, zero_crossing_rate_std) = dsp::mean_std(&analysis.zcr);
    let (rmse_mean, rmse_std) = dsp::mean_std(&analysis.rms);
    let (chroma_mean, chroma_std) = dsp::mean_std(&analysis.chroma);
    let mfcc: Vec<(f64, f64)> = analysis.mfcc.iter().map(|c| dsp::mean_std(c)).collect();
    let coeff = |i: usize| mfcc.get(i).copied().unwrap_or((0.0, 0.0));

    FeatureVector {
        tempo: analysis.tempo,
        spectral_centroid_mean,
        spectral_centroid_std,
        spectral_rolloff_mean,
        spectral_rolloff_std,
        zero_crossing_rate_mean,
        zero_crossing_rate_std,
        rmse_mean,
        rmse_std,
        chroma_mean,
        chroma_std,
        mfcc_1_mean: coeff(0).0,
        mfcc_1_std: coeff(0).1,
        mfcc_2_mean: coeff(1).0,
        mfcc_2_std: coeff(1).1,
        mfcc_3_mean: coeff(2).0,
        mfcc_3_std: coeff(2).1,
        mfcc_4_mean: coeff(3).0,
        mfcc_4_std: coeff(3).1,
        mfcc_5_mean: coeff(4).0,
        mfcc_5_std: coeff(4).1,
    }
}
