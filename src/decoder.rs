//! Audio decoding to mono `f32` PCM.

use crate::error::{Result, TretaError};
use log::{debug, warn};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Seconds of PCM reserved up front; longer windows grow on demand.
const INITIAL_RESERVE_SECS: usize = 60;

/// Mono samples in `[-1.0, 1.0]` with their sample rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before down-mixing.
    pub channels: usize,
}

impl DecodedAudio {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Turns an audio file into mono PCM, reading at most `max_duration_secs`.
pub trait AudioDecoder {
    fn decode(&self, path: &Path, max_duration_secs: f64) -> Result<DecodedAudio>;
}

/// Decoder backed by symphonia's format detection and codec registry (MP3, FLAC, WAV, OGG, AAC...).
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path, max_duration_secs: f64) -> Result<DecodedAudio> {
        debug!("Decoding {}", path.display());

        let file = File::open(path).map_err(|e| TretaError::FeatureExtraction {
            path: path.to_path_buf(),
            reason: format!("cannot open file: {e}"),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let detected = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| unsupported(path, &e))?;
        let mut format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| TretaError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "no audio track".to_string(),
            })?;
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            TretaError::FeatureExtraction {
                path: path.to_path_buf(),
                reason: "unknown sample rate".to_string(),
            }
        })?;
        let channels = track.codec_params.channels.map_or(1, |c| c.count());

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| unsupported(path, &e))?;

        // Saturates to usize::MAX for an unbounded window
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_samples = (max_duration_secs.max(0.0) * f64::from(sample_rate)) as usize;
        let reserve = usize::try_from(sample_rate).unwrap_or(0).saturating_mul(INITIAL_RESERVE_SECS);
        let mut samples: Vec<f32> = Vec::with_capacity(max_samples.min(reserve));
        let mut buffer: Option<SampleBuffer<f32>> = None;

        while samples.len() < max_samples {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(TretaError::FeatureExtraction {
                        path: path.to_path_buf(),
                        reason: format!("error reading packet: {e}"),
                    })
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!("Skipping corrupt packet in {}: {msg}", path.display());
                    continue;
                }
                Err(e) => {
                    return Err(TretaError::FeatureExtraction {
                        path: path.to_path_buf(),
                        reason: format!("decode failed: {e}"),
                    })
                }
            };

            let spec = *decoded.spec();
            let channel_count = spec.channels.count().max(1);
            let buf = buffer.get_or_insert_with(|| {
                SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
            });
            if buf.capacity() < decoded.capacity() * channel_count {
                *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            }
            buf.copy_interleaved_ref(decoded);

            let remaining = max_samples - samples.len();
            #[allow(clippy::cast_precision_loss)]
            samples.extend(
                buf.samples()
                    .chunks(channel_count)
                    .take(remaining)
                    .map(|frame| frame.iter().sum::<f32>() / channel_count as f32),
            );
        }

        let audio = DecodedAudio {
            samples,
            sample_rate,
            channels,
        };
        debug!(
            "Decoded {:.1}s of {}-channel audio at {} Hz from {}",
            audio.duration_secs(),
            audio.channels,
            audio.sample_rate,
            path.display()
        );
        Ok(audio)
    }
}

fn unsupported(path: &Path, err: &SymphoniaError) -> TretaError {
    match err {
        SymphoniaError::IoError(e) => TretaError::FeatureExtraction {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
        other => TretaError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}
